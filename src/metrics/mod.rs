//! 派生指标
//!
//! 注册表 + 后台 worker，异步为已持久化的记录补充 token 使用量、调用方标签和工具统计。

pub mod analyzer;
pub mod analyzers;
pub mod types;
pub mod worker;

pub use analyzer::{Analyzer, AnalyzerRegistry};
pub use worker::{MetricsWorker, WorkerConfig};
