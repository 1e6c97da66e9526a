//! SSE 事件流解析器
//!
//! 将增量到达的字节流切分为 `{event, data}` 帧：
//! - 以空行作为帧分隔符，未完成的帧保留在缓冲区
//! - `finish()` 在流结束时冲刷缓冲区中剩余的非空内容（部分上游省略最后的空行）
//! - 丢弃所有 `\r`，CRLF 与 LF 流切分结果一致

use bytes::{Buf, BytesMut};

/// 单个 SSE 帧
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SseFrame {
    /// `event:` 字段（多次出现时取最后一个）
    pub event: Option<String>,
    /// 所有 `data:` 行以换行拼接
    pub data: String,
}

/// 增量 SSE 解析器
#[derive(Debug, Default)]
pub struct SseParser {
    buffer: BytesMut,
}

impl SseParser {
    pub fn new() -> Self {
        Self::default()
    }

    /// 喂入一段原始字节，返回本次新完成的帧
    pub fn feed(&mut self, chunk: &[u8]) -> Vec<SseFrame> {
        self.buffer
            .extend(chunk.iter().copied().filter(|&b| b != b'\r'));

        let mut frames = Vec::new();
        while let Some(pos) = find_delimiter(&self.buffer) {
            let raw = self.buffer.split_to(pos);
            self.buffer.advance(2);
            if let Some(frame) = parse_frame(&String::from_utf8_lossy(&raw)) {
                frames.push(frame);
            }
        }
        frames
    }

    /// 文本便捷入口
    #[cfg(test)]
    pub fn feed_str(&mut self, chunk: &str) -> Vec<SseFrame> {
        self.feed(chunk.as_bytes())
    }

    /// 流结束：把缓冲区剩余内容作为最后一帧输出
    pub fn finish(&mut self) -> Option<SseFrame> {
        let rest = self.buffer.split();
        let text = String::from_utf8_lossy(&rest);
        if text.trim().is_empty() {
            return None;
        }
        parse_frame(&text)
    }

    /// 缓冲区中尚未成帧的字节数
    #[cfg(test)]
    pub fn pending_len(&self) -> usize {
        self.buffer.len()
    }
}

fn find_delimiter(buf: &[u8]) -> Option<usize> {
    buf.windows(2).position(|w| w == b"\n\n")
}

/// 解析一个完整帧；没有 `data:` 行的帧（注释、心跳）返回 None
fn parse_frame(raw: &str) -> Option<SseFrame> {
    let mut event = None;
    let mut data_lines: Vec<&str> = Vec::new();

    for line in raw.split('\n') {
        if line.starts_with(':') {
            continue;
        }
        if let Some(value) = line.strip_prefix("event:") {
            event = Some(value.trim().to_string());
        } else if let Some(value) = line.strip_prefix("data:") {
            data_lines.push(value.strip_prefix(' ').unwrap_or(value));
        }
    }

    if data_lines.is_empty() {
        return None;
    }

    Some(SseFrame {
        event: event.filter(|e| !e.is_empty()),
        data: data_lines.join("\n"),
    })
}
