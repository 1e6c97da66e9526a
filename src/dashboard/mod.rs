//! 交互记录 Dashboard API
//!
//! 日志存储与强制重算入口的薄封装，仅在配置 adminApiKey 时挂载到 /api/logs

mod handlers;
mod router;
mod types;

pub use router::create_dashboard_router;
