//! 交互记录持久化
//!
//! 文件存储，每条记录一个 JSON 文件

pub mod file_store;
pub mod model;

pub use file_store::{DeleteOutcome, LogStore, StoreError};
pub use model::{InteractionRecord, RecordedRequest, RecordedResponse};
