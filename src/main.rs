mod capture;
mod common;
mod dashboard;
mod http_client;
mod metrics;
mod model;
mod store;
mod stream;
mod token;

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use axum::Router;
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use capture::{CaptureState, proxy_handler};
use metrics::{MetricsWorker, WorkerConfig};
use model::arg::Args;
use model::config::Config;
use store::LogStore;
use token::CountTokensClient;

#[tokio::main]
async fn main() {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    if let Err(e) = run(args).await {
        tracing::error!("{:#}", e);
        std::process::exit(1);
    }
}

async fn run(args: Args) -> anyhow::Result<()> {
    let config_path = args
        .config
        .unwrap_or_else(|| Config::default_config_path().to_string());
    let config = Config::load(&config_path)?;
    config
        .validate()
        .with_context(|| format!("配置校验失败: {}", config_path))?;
    if let Some(path) = &config.config_path {
        tracing::info!(config = %path.display(), exists = path.exists(), "已加载配置");
    }

    #[cfg(feature = "sensitive-logs")]
    tracing::warn!("sensitive-logs 已启用，debug 日志会包含完整请求/响应体");

    let client = http_client::build_client(config.proxy_url.as_deref())?;
    let store = LogStore::open(&config.log_dir)?;
    let shutdown = CancellationToken::new();

    let worker = if config.metrics.enabled {
        let counter = config.count_tokens_api_url.as_ref().map(|url| {
            CountTokensClient::new(
                client.clone(),
                url.clone(),
                config.count_tokens_api_key.clone(),
                config.count_tokens_auth_type.clone(),
            )
        });
        let registry = metrics::analyzers::default_registry(counter)?;
        if registry.is_empty() {
            tracing::warn!("未注册任何指标分析器，worker 不会产生新字段");
        } else {
            tracing::info!(analyzers = registry.len(), "指标计算已启用");
        }

        let worker_config = WorkerConfig {
            poll_interval: Duration::from_secs(config.metrics.poll_interval_secs),
            max_concurrency: config.metrics.max_concurrency,
            watch: config.metrics.watch,
        };
        Some(Arc::new(MetricsWorker::new(
            store.clone(),
            Arc::new(registry),
            worker_config,
        )))
    } else {
        tracing::info!("指标计算未启用");
        None
    };
    let worker_handle = worker.clone().map(|w| w.start(shutdown.clone()));

    let capture_state = CaptureState::new(
        client,
        &config.upstream_url,
        config.api_key(),
        config.uses_bearer(),
        store.clone(),
    )?;
    let mut app = Router::new()
        .fallback(proxy_handler)
        .with_state(capture_state);

    if let Some(admin_key) = config
        .admin_api_key
        .as_deref()
        .filter(|k| !k.trim().is_empty())
    {
        app = app.nest(
            "/api/logs",
            dashboard::create_dashboard_router(admin_key, store.clone(), worker.clone()),
        );
        tracing::info!("Dashboard API 已启用: /api/logs");
    }

    let addr = format!("{}:{}", config.host, config.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("监听 {} 失败", addr))?;
    tracing::info!(
        addr = %addr,
        upstream = %config.upstream_url,
        log_dir = %config.log_dir.display(),
        "捕获代理已启动"
    );

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(shutdown.clone()))
        .await?;

    shutdown.cancel();
    if let Some(handle) = worker_handle {
        let _ = handle.await;
    }
    Ok(())
}

async fn shutdown_signal(shutdown: CancellationToken) {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("监听退出信号失败: {}", e);
    }
    tracing::info!("收到退出信号，正在关闭");
    shutdown.cancel();
}
