//! SSE 流解析与消息重建

pub mod parser;
pub mod reconstruct;

pub use reconstruct::{ContentSegment, ReconstructedMessage, StreamReconstructor};
