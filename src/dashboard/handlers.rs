//! Dashboard API 处理器
//!
//! 只做参数校验，实际逻辑在日志存储与指标 worker 中。

use std::sync::atomic::Ordering;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};

use crate::store::StoreError;

use super::router::DashboardState;
use super::types::{
    DeleteLogsRequest, DeleteLogsResponse, LogListResponse, LogQuery, LogSummary, StatsResponse,
};

const DEFAULT_PAGE_SIZE: u32 = 20;
const MAX_PAGE_SIZE: u32 = 200;

fn error_response(status: StatusCode, error_type: &str, message: impl Into<String>) -> Response {
    (
        status,
        Json(serde_json::json!({
            "error": {"type": error_type, "message": message.into()}
        })),
    )
        .into_response()
}

fn store_error_response(e: StoreError) -> Response {
    match e {
        StoreError::InvalidId(id) => error_response(
            StatusCode::BAD_REQUEST,
            "invalid_request_error",
            format!("非法的记录 ID: {}", id),
        ),
        other => {
            tracing::error!("日志存储操作失败: {}", other);
            error_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                "internal_error",
                other.to_string(),
            )
        }
    }
}

/// GET /api/logs
pub async fn list_logs(
    State(state): State<DashboardState>,
    Query(query): Query<LogQuery>,
) -> Response {
    let page = query.page.unwrap_or(1);
    let page_size = query.page_size.unwrap_or(DEFAULT_PAGE_SIZE);
    if page == 0 || page_size == 0 || page_size > MAX_PAGE_SIZE {
        return error_response(
            StatusCode::BAD_REQUEST,
            "invalid_request_error",
            format!("page 需从 1 开始，pageSize 需在 1..={} 之间", MAX_PAGE_SIZE),
        );
    }

    let ids = match state.store.list().await {
        Ok(ids) => ids,
        Err(e) => return store_error_response(e),
    };

    let start = (page as usize - 1).saturating_mul(page_size as usize);
    let mut records = Vec::new();
    for id in ids.iter().skip(start).take(page_size as usize) {
        match state.store.read(id).await {
            Ok(Some(record)) => records.push(LogSummary::from(&record)),
            Ok(None) => {}
            Err(e) => tracing::warn!(record_id = %id, "读取记录失败，列表中跳过: {}", e),
        }
    }

    Json(LogListResponse {
        total: ids.len() as u64,
        page,
        page_size,
        records,
    })
    .into_response()
}

/// GET /api/logs/{id}
pub async fn get_log(State(state): State<DashboardState>, Path(id): Path<String>) -> Response {
    match state.store.read(&id).await {
        Ok(Some(record)) => Json(record).into_response(),
        Ok(None) => error_response(
            StatusCode::NOT_FOUND,
            "not_found_error",
            format!("记录不存在: {}", id),
        ),
        Err(e) => store_error_response(e),
    }
}

/// DELETE /api/logs
pub async fn delete_logs(
    State(state): State<DashboardState>,
    Json(payload): Json<DeleteLogsRequest>,
) -> Response {
    if payload.ids.is_empty() {
        return error_response(
            StatusCode::BAD_REQUEST,
            "invalid_request_error",
            "ids 不能为空",
        );
    }

    match state.store.delete(payload.ids).await {
        Ok(results) => Json(DeleteLogsResponse { results }).into_response(),
        Err(e) => store_error_response(e),
    }
}

/// POST /api/logs/recompute
///
/// 后台执行强制重算，立即返回 202；同一时间只允许一个重算任务。
pub async fn recompute_logs(State(state): State<DashboardState>) -> Response {
    let Some(worker) = state.worker.clone() else {
        return error_response(
            StatusCode::SERVICE_UNAVAILABLE,
            "unavailable_error",
            "指标计算未启用",
        );
    };

    if state.recomputing.swap(true, Ordering::AcqRel) {
        return error_response(
            StatusCode::CONFLICT,
            "conflict_error",
            "已有重算任务在执行",
        );
    }

    let recomputing = state.recomputing.clone();
    tokio::spawn(async move {
        worker.recompute_all().await;
        recomputing.store(false, Ordering::Release);
    });

    (
        StatusCode::ACCEPTED,
        Json(serde_json::json!({
            "success": true,
            "message": "已开始重算全部记录指标"
        })),
    )
        .into_response()
}

/// GET /api/logs/stats
pub async fn get_stats(State(state): State<DashboardState>) -> Response {
    let ids = match state.store.list().await {
        Ok(ids) => ids,
        Err(e) => return store_error_response(e),
    };

    let mut records = Vec::with_capacity(ids.len());
    for id in &ids {
        match state.store.read(id).await {
            Ok(Some(record)) => records.push(record),
            Ok(None) => {}
            Err(e) => tracing::warn!(record_id = %id, "读取记录失败，统计中跳过: {}", e),
        }
    }

    Json(StatsResponse::from_records(&records)).into_response()
}
