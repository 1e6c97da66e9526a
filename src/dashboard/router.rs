//! Dashboard API 路由

use std::sync::Arc;
use std::sync::atomic::AtomicBool;

use axum::{
    Router,
    body::Body,
    extract::State,
    http::{Request, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Json},
    routing::{get, post},
};

use crate::capture::types::ErrorResponse;
use crate::common::auth;
use crate::metrics::MetricsWorker;
use crate::store::LogStore;

use super::handlers::{delete_logs, get_log, get_stats, list_logs, recompute_logs};

/// Dashboard API 状态
#[derive(Clone)]
pub struct DashboardState {
    pub admin_api_key: String,
    pub store: LogStore,
    /// 指标计算未启用时为 None
    pub worker: Option<Arc<MetricsWorker>>,
    /// 是否有重算任务在执行
    pub recomputing: Arc<AtomicBool>,
}

/// Dashboard 认证中间件
async fn dashboard_auth_middleware(
    State(state): State<DashboardState>,
    request: Request<Body>,
    next: Next,
) -> axum::response::Response {
    match auth::extract_api_key(&request) {
        Some(key) if auth::constant_time_eq(&key, &state.admin_api_key) => {
            next.run(request).await
        }
        _ => (
            StatusCode::UNAUTHORIZED,
            Json(ErrorResponse::authentication_error()),
        )
            .into_response(),
    }
}

/// CORS 中间件层（允许任意来源，便于本地前端直接访问）
fn cors_layer() -> tower_http::cors::CorsLayer {
    use tower_http::cors::{Any, CorsLayer};

    CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any)
}

/// 创建 Dashboard API 路由
///
/// 返回 Router<()>，可直接 nest 到主应用
pub fn create_dashboard_router(
    admin_api_key: impl Into<String>,
    store: LogStore,
    worker: Option<Arc<MetricsWorker>>,
) -> Router {
    let state = DashboardState {
        admin_api_key: admin_api_key.into(),
        store,
        worker,
        recomputing: Arc::new(AtomicBool::new(false)),
    };

    Router::new()
        .route("/", get(list_logs).delete(delete_logs))
        .route("/stats", get(get_stats))
        .route("/recompute", post(recompute_logs))
        .route("/{id}", get(get_log))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            dashboard_auth_middleware,
        ))
        .layer(cors_layer())
        .with_state(state)
}
