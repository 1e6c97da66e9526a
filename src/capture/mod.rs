//! 捕获代理层
//!
//! 转发请求到上游，原样回传响应，并为每个入站请求持久化一条交互记录。

mod handler;
mod recorder;
pub mod types;

pub use handler::{CaptureState, proxy_handler};
