//! 请求/响应快照工具
//!
//! 头部过滤与脱敏、流式片段的 UTF-8 安全解码、记录 ID 生成。

use std::collections::BTreeMap;

use axum::http::HeaderMap;
use serde_json::Value;

use crate::common::mask_secret;

/// 不转发给上游的请求头（调用方自己的凭据会被替换）
const SKIPPED_REQUEST_HEADERS: &[&str] = &[
    "host",
    "content-length",
    "authorization",
    "x-api-key",
    "accept-encoding",
    "connection",
    "keep-alive",
    "transfer-encoding",
];

/// 不回传给调用方的响应头
const SKIPPED_RESPONSE_HEADERS: &[&str] =
    &["connection", "keep-alive", "transfer-encoding", "content-length"];

/// 记录时需要脱敏的请求头
const SENSITIVE_HEADERS: &[&str] = &["authorization", "x-api-key", "cookie", "proxy-authorization"];

pub fn forward_request_header(name: &str) -> bool {
    !SKIPPED_REQUEST_HEADERS.contains(&name)
}

pub fn forward_response_header(name: &str) -> bool {
    !SKIPPED_RESPONSE_HEADERS.contains(&name)
}

/// 生成记录 ID：时间前缀保证按文件名倒序即为最新优先
pub fn new_record_id() -> String {
    let suffix = uuid::Uuid::new_v4().simple().to_string();
    format!(
        "{}_{}",
        chrono::Utc::now().format("%Y%m%dT%H%M%S%3f"),
        &suffix[..8]
    )
}

/// 头部快照；敏感值脱敏，同名多值以 ", " 拼接
pub fn snapshot_headers(headers: &HeaderMap, mask: bool) -> BTreeMap<String, String> {
    let mut snapshot: BTreeMap<String, String> = BTreeMap::new();
    for (name, value) in headers {
        let name = name.as_str();
        let raw = String::from_utf8_lossy(value.as_bytes());
        let value = if mask && SENSITIVE_HEADERS.contains(&name) {
            mask_authorization(&raw)
        } else {
            raw.into_owned()
        };
        snapshot
            .entry(name.to_string())
            .and_modify(|existing| {
                existing.push_str(", ");
                existing.push_str(&value);
            })
            .or_insert(value);
    }
    snapshot
}

/// 脱敏时保留认证方案（如 "Bearer "）
fn mask_authorization(value: &str) -> String {
    match value.split_once(' ') {
        Some((scheme, secret)) if !secret.is_empty() => {
            format!("{} {}", scheme, mask_secret(secret.trim()))
        }
        _ => mask_secret(value),
    }
}

/// 将消息体解码为可持久化的值：`json` 为 true 时优先按 JSON 解析，失败退回文本
pub fn decode_body(bytes: &[u8], json: bool) -> Option<Value> {
    if bytes.is_empty() {
        return None;
    }
    if json && let Ok(value) = serde_json::from_slice::<Value>(bytes) {
        return Some(value);
    }
    Some(Value::String(String::from_utf8_lossy(bytes).into_owned()))
}

/// content-type 是否为 JSON
pub fn is_json_content_type(content_type: Option<&str>) -> bool {
    content_type.is_some_and(|ct| {
        let ct = ct.to_ascii_lowercase();
        ct.contains("application/json") || ct.contains("+json")
    })
}

/// content-type 是否为 SSE
pub fn is_event_stream(content_type: Option<&str>) -> bool {
    content_type.is_some_and(|ct| ct.to_ascii_lowercase().contains("text/event-stream"))
}

/// 流式片段解码器：多字节字符跨片段时保留尾部字节到下一片
#[derive(Debug, Default)]
pub struct Utf8ChunkDecoder {
    pending: Vec<u8>,
}

impl Utf8ChunkDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// 解码一个片段，返回当前可完整解码的文本（可能为空）
    pub fn decode(&mut self, chunk: &[u8]) -> String {
        self.pending.extend_from_slice(chunk);
        let complete = match std::str::from_utf8(&self.pending) {
            Ok(_) => self.pending.len(),
            // 尾部是不完整的字符
            Err(e) if e.error_len().is_none() => e.valid_up_to(),
            // 真正的非法字节，按 lossy 处理
            Err(_) => self.pending.len(),
        };
        let rest = self.pending.split_off(complete);
        let text = String::from_utf8_lossy(&self.pending).into_owned();
        self.pending = rest;
        text
    }

    /// 流结束时输出残留字节
    pub fn finish(&mut self) -> Option<String> {
        if self.pending.is_empty() {
            return None;
        }
        let text = String::from_utf8_lossy(&self.pending).into_owned();
        self.pending.clear();
        Some(text)
    }
}
