//! 捕获代理处理器
//!
//! 每个入站请求交给独立任务处理：转发上游、把响应原样回传调用方，同时旁路生成交互记录。
//! 调用方断开（handler future 或响应 body 被丢弃）经 `CancellationToken` 传递到上游读取，
//! 任务在任何路径上都会走到最后的持久化步骤。

use std::panic::AssertUnwindSafe;
use std::time::Instant;

use axum::{
    body::{Body, Bytes},
    extract::{Request, State},
    http::{HeaderMap, HeaderName, HeaderValue, Method, StatusCode, header, request::Parts},
    response::{IntoResponse, Json, Response},
};
use futures::{FutureExt, StreamExt};
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;

use crate::common::preview;
use crate::store::{InteractionRecord, LogStore, RecordedResponse};
use crate::stream::StreamReconstructor;

use super::recorder::{self, Utf8ChunkDecoder};
use super::types::ErrorResponse;

/// 请求体上限
const MAX_REQUEST_BODY: usize = 32 * 1024 * 1024;

/// 流式转发通道容量（片段数）
const STREAM_CHANNEL_CAPACITY: usize = 64;

const DEFAULT_ANTHROPIC_VERSION: &str = "2023-06-01";

/// 调用方在响应完成前断开
pub const DISCONNECT_ERROR: &str = "client disconnected before the response completed";

/// 调用方在上游响应前断开时记录的状态码
const CLIENT_CLOSED_STATUS: u16 = 499;

/// 捕获代理共享状态
#[derive(Clone)]
pub struct CaptureState {
    client: reqwest::Client,
    upstream_url: String,
    credential: (HeaderName, HeaderValue),
    store: LogStore,
}

impl CaptureState {
    pub fn new(
        client: reqwest::Client,
        upstream_url: impl Into<String>,
        api_key: &str,
        bearer: bool,
        store: LogStore,
    ) -> anyhow::Result<Self> {
        let (name, mut value) = if bearer {
            (header::AUTHORIZATION, HeaderValue::from_str(&format!("Bearer {}", api_key))?)
        } else {
            (HeaderName::from_static("x-api-key"), HeaderValue::from_str(api_key)?)
        };
        value.set_sensitive(true);

        Ok(Self {
            client,
            upstream_url: upstream_url.into().trim_end_matches('/').to_string(),
            credential: (name, value),
            store,
        })
    }

    fn upstream_url(&self, path_and_query: &str) -> String {
        format!("{}{}", self.upstream_url, path_and_query)
    }

    /// 出站请求头：去掉逐跳头和调用方凭据，注入配置的凭据
    fn upstream_headers(&self, inbound: &HeaderMap) -> HeaderMap {
        let mut headers = HeaderMap::new();
        for (name, value) in inbound {
            if recorder::forward_request_header(name.as_str()) {
                headers.append(name.clone(), value.clone());
            }
        }
        headers.insert(self.credential.0.clone(), self.credential.1.clone());
        if !headers.contains_key("anthropic-version") {
            headers.insert(
                "anthropic-version",
                HeaderValue::from_static(DEFAULT_ANTHROPIC_VERSION),
            );
        }
        headers
    }
}

/// 兜底路由：所有未被其它路由匹配的请求都经此转发
pub async fn proxy_handler(State(state): State<CaptureState>, request: Request) -> Response {
    let cancel = CancellationToken::new();
    // handler future 被丢弃（调用方在响应头前断开）时取消捕获任务的上游调用
    let guard = cancel.clone().drop_guard();
    let (respond, response) = oneshot::channel();

    tokio::spawn(capture(state, request, cancel, respond));

    let response = response.await.unwrap_or_else(|_| {
        (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(ErrorResponse::internal("Capture task failed")),
        )
            .into_response()
    });
    guard.disarm();
    response
}

/// 捕获任务：转发完成（或失败、被取消）后持久化唯一一条记录
async fn capture(
    state: CaptureState,
    request: Request,
    cancel: CancellationToken,
    respond: oneshot::Sender<Response>,
) {
    let started = Instant::now();
    let (parts, body) = request.into_parts();
    let mut record = InteractionRecord::new(
        recorder::new_record_id(),
        parts.method.as_str(),
        parts.uri.path(),
        parts.uri.query().map(str::to_string),
    );
    record.request.headers = recorder::snapshot_headers(&parts.headers, true);

    let forwarded = AssertUnwindSafe(forward(
        &state,
        &mut record,
        parts,
        body,
        &cancel,
        respond,
        started,
    ))
    .catch_unwind()
    .await;

    if forwarded.is_err() {
        tracing::error!(record_id = %record.id, "捕获任务异常终止");
        if record.response.is_none() {
            record.response = Some(RecordedResponse {
                status: StatusCode::INTERNAL_SERVER_ERROR.as_u16(),
                error: Some("internal capture error".to_string()),
                ..Default::default()
            });
        }
    }

    let id = record.id.clone();
    tracing::info!(
        record_id = %id,
        method = %record.method,
        path = %record.path,
        status = record.status(),
        duration_ms = record.duration_ms,
        streamed = record.is_streamed(),
        "交互已捕获"
    );
    if let Err(e) = state.store.write(record).await {
        tracing::error!(record_id = %id, "持久化交互记录失败: {}", e);
    }
}

fn elapsed_ms(started: Instant) -> Option<u64> {
    Some(started.elapsed().as_millis() as u64)
}

fn build_response(status: StatusCode, headers: HeaderMap, body: Body) -> Response {
    let mut response = Response::new(body);
    *response.status_mut() = status;
    *response.headers_mut() = headers;
    response
}

fn failure(status: u16, error: impl Into<String>) -> RecordedResponse {
    RecordedResponse {
        status,
        error: Some(error.into()),
        ..Default::default()
    }
}

async fn forward(
    state: &CaptureState,
    record: &mut InteractionRecord,
    parts: Parts,
    body: Body,
    cancel: &CancellationToken,
    respond: oneshot::Sender<Response>,
    started: Instant,
) {
    let body = match axum::body::to_bytes(body, MAX_REQUEST_BODY).await {
        Ok(body) => body,
        Err(e) => {
            tracing::warn!(record_id = %record.id, "读取请求体失败: {}", e);
            record.response = Some(failure(
                StatusCode::BAD_REQUEST.as_u16(),
                format!("failed to read request body: {}", e),
            ));
            let _ = respond.send(
                (
                    StatusCode::BAD_REQUEST,
                    Json(ErrorResponse::invalid_request("Failed to read request body")),
                )
                    .into_response(),
            );
            return;
        }
    };
    record.request.body = recorder::decode_body(&body, true);

    #[cfg(feature = "sensitive-logs")]
    tracing::debug!(
        record_id = %record.id,
        body = %String::from_utf8_lossy(&body),
        "请求体"
    );

    let path_and_query = parts
        .uri
        .path_and_query()
        .map(|pq| pq.as_str())
        .unwrap_or("/");
    let url = state.upstream_url(path_and_query);
    let mut upstream = state
        .client
        .request(parts.method.clone(), &url)
        .headers(state.upstream_headers(&parts.headers));
    if parts.method != Method::GET && parts.method != Method::HEAD && !body.is_empty() {
        upstream = upstream.body(body);
    }

    let sent = tokio::select! {
        _ = cancel.cancelled() => {
            tracing::info!(record_id = %record.id, "调用方在上游响应前断开，已取消上游请求");
            record.response = Some(failure(CLIENT_CLOSED_STATUS, DISCONNECT_ERROR));
            return;
        }
        sent = upstream.send() => sent,
    };

    let upstream_response = match sent {
        Ok(resp) => resp,
        Err(e) => {
            tracing::warn!(record_id = %record.id, url = %url, "上游请求失败: {}", e);
            record.response = Some(failure(StatusCode::BAD_GATEWAY.as_u16(), e.to_string()));
            let _ = respond.send(
                (StatusCode::BAD_GATEWAY, Json(ErrorResponse::upstream_failure())).into_response(),
            );
            return;
        }
    };

    let status = upstream_response.status();
    let upstream_headers = upstream_response.headers().clone();
    let content_type = upstream_headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);

    let mut client_headers = HeaderMap::new();
    for (name, value) in &upstream_headers {
        if recorder::forward_response_header(name.as_str()) {
            client_headers.append(name.clone(), value.clone());
        }
    }

    let mut recorded = RecordedResponse {
        status: status.as_u16(),
        headers: recorder::snapshot_headers(&upstream_headers, false),
        ..Default::default()
    };

    if !recorder::is_event_stream(content_type.as_deref()) {
        let bytes = tokio::select! {
            _ = cancel.cancelled() => {
                tracing::info!(record_id = %record.id, "调用方断开，停止读取上游响应");
                recorded.error = Some(DISCONNECT_ERROR.to_string());
                record.response = Some(recorded);
                return;
            }
            bytes = upstream_response.bytes() => bytes,
        };

        match bytes {
            Ok(bytes) => {
                if !status.is_success() {
                    tracing::warn!(
                        record_id = %record.id,
                        status = status.as_u16(),
                        "上游返回错误: {}",
                        preview(&String::from_utf8_lossy(&bytes), 512)
                    );
                }
                recorded.body = recorder::decode_body(
                    &bytes,
                    recorder::is_json_content_type(content_type.as_deref()),
                );
                record.duration_ms = elapsed_ms(started);
                record.response = Some(recorded);
                let _ = respond.send(build_response(status, client_headers, Body::from(bytes)));
            }
            Err(e) => {
                tracing::warn!(record_id = %record.id, "读取上游响应失败: {}", e);
                record.response = Some(failure(StatusCode::BAD_GATEWAY.as_u16(), e.to_string()));
                let _ = respond.send(
                    (StatusCode::BAD_GATEWAY, Json(ErrorResponse::upstream_failure()))
                        .into_response(),
                );
            }
        }
        return;
    }

    // 流式：响应 body 持有 drop guard，调用方断开时 body 被丢弃并触发取消
    let (tx, rx) = mpsc::channel::<Bytes>(STREAM_CHANNEL_CAPACITY);
    let body_guard = cancel.clone().drop_guard();
    let body_stream = futures::stream::unfold((rx, body_guard), |(mut rx, guard)| async move {
        let chunk = rx.recv().await?;
        Some((Ok::<Bytes, std::io::Error>(chunk), (rx, guard)))
    });
    let _ = respond.send(build_response(
        status,
        client_headers,
        Body::from_stream(body_stream),
    ));

    let mut upstream_body = upstream_response.bytes_stream();
    let mut reconstructor = StreamReconstructor::new();
    let mut decoder = Utf8ChunkDecoder::new();
    let mut chunks = Vec::new();

    loop {
        let next = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                recorded.error = Some(DISCONNECT_ERROR.to_string());
                break;
            }
            next = upstream_body.next() => next,
        };

        match next {
            Some(Ok(bytes)) => {
                reconstructor.feed(&bytes);
                let text = decoder.decode(&bytes);
                if !text.is_empty() {
                    chunks.push(text);
                }
                if tx.send(bytes).await.is_err() {
                    recorded.error = Some(DISCONNECT_ERROR.to_string());
                    break;
                }
            }
            Some(Err(e)) => {
                tracing::warn!(record_id = %record.id, "上游流读取失败: {}", e);
                recorded.error = Some(format!("upstream stream error: {}", e));
                break;
            }
            None => break,
        }
    }
    // 释放上游连接，不再继续读取
    drop(upstream_body);
    drop(tx);

    if recorded.error.as_deref() == Some(DISCONNECT_ERROR) {
        tracing::info!(record_id = %record.id, chunks = chunks.len(), "调用方中途断开，已取消上游流");
    }

    if let Some(rest) = decoder.finish() {
        chunks.push(rest);
    }
    let events = reconstructor.events_seen();
    let (message, warnings) = reconstructor.finish();
    for warning in &warnings {
        tracing::debug!(record_id = %record.id, "流重建警告: {}", warning);
    }

    tracing::debug!(
        record_id = %record.id,
        events,
        role = ?message.role(),
        stop_reason = ?message.stop_reason(),
        output_tokens = ?message.usage().and_then(|u| u.get("output_tokens")),
        "流式响应重建完成"
    );

    #[cfg(feature = "sensitive-logs")]
    tracing::debug!(record_id = %record.id, message = %message.to_value(), "重建的响应消息");

    if events > 0 {
        recorded.body = Some(message.to_value());
    }
    recorded.stream_chunks = Some(chunks);
    record.duration_ms = elapsed_ms(started);
    record.response = Some(recorded);
}
