//! 流式响应重建
//!
//! 消费 SSE 帧，按内容块 index 维护 builder，把增量事件合并为一条完整消息。
//! 畸形输入只记录 warning，不会返回错误，尽力产出能解析出的部分。

use std::collections::HashMap;

use serde_json::{Map, Value};

use super::parser::{SseFrame, SseParser};

/// 重建后的内容段
#[derive(Debug, Clone, PartialEq)]
pub enum ContentSegment {
    Text {
        text: String,
    },
    ToolUse {
        id: String,
        name: String,
        input: Value,
    },
    Thinking {
        thinking: String,
        signature: Option<String>,
    },
    /// 未识别的块类型，原样保留 content_block_start 中的内容
    Passthrough(Value),
}

impl ContentSegment {
    /// 序列化为 Anthropic 内容块格式
    pub fn to_value(&self) -> Value {
        match self {
            ContentSegment::Text { text } => serde_json::json!({
                "type": "text",
                "text": text,
            }),
            ContentSegment::ToolUse { id, name, input } => serde_json::json!({
                "type": "tool_use",
                "id": id,
                "name": name,
                "input": input,
            }),
            ContentSegment::Thinking {
                thinking,
                signature,
            } => {
                let mut block = serde_json::json!({
                    "type": "thinking",
                    "thinking": thinking,
                });
                if let Some(sig) = signature {
                    block["signature"] = Value::String(sig.clone());
                }
                block
            }
            ContentSegment::Passthrough(value) => value.clone(),
        }
    }
}

/// 重建完成的消息
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ReconstructedMessage {
    /// 顶层字段（id / role / model / stop_reason / usage ...）
    pub fields: Map<String, Value>,
    /// 按块打开顺序排列的内容段
    pub content: Vec<ContentSegment>,
}

impl ReconstructedMessage {
    pub fn role(&self) -> Option<&str> {
        self.fields.get("role").and_then(|v| v.as_str())
    }

    pub fn stop_reason(&self) -> Option<&str> {
        self.fields.get("stop_reason").and_then(|v| v.as_str())
    }

    pub fn usage(&self) -> Option<&Map<String, Value>> {
        self.fields.get("usage").and_then(|v| v.as_object())
    }

    /// 转换为与非流式响应相同形状的 JSON
    pub fn to_value(&self) -> Value {
        let mut obj = self.fields.clone();
        obj.insert(
            "content".to_string(),
            Value::Array(self.content.iter().map(ContentSegment::to_value).collect()),
        );
        Value::Object(obj)
    }
}

/// 单个打开中的内容块
#[derive(Debug)]
enum BlockBuilder {
    Text {
        text: String,
    },
    ToolUse {
        id: String,
        name: String,
        /// content_block_start 中给出的 input（通常为空对象）
        initial_input: Value,
        partial_json: String,
    },
    Thinking {
        thinking: String,
        signature: Option<String>,
    },
    Passthrough,
}

impl BlockBuilder {
    fn from_start(block: &Value) -> Self {
        let str_field = |key: &str| {
            block
                .get(key)
                .and_then(|v| v.as_str())
                .unwrap_or_default()
                .to_string()
        };

        match block.get("type").and_then(|v| v.as_str()) {
            Some("text") => BlockBuilder::Text {
                text: str_field("text"),
            },
            Some("tool_use") | Some("server_tool_use") => BlockBuilder::ToolUse {
                id: str_field("id"),
                name: str_field("name"),
                initial_input: block
                    .get("input")
                    .cloned()
                    .unwrap_or_else(|| Value::Object(Map::new())),
                partial_json: String::new(),
            },
            Some("thinking") => BlockBuilder::Thinking {
                thinking: str_field("thinking"),
                signature: block
                    .get("signature")
                    .and_then(|v| v.as_str())
                    .filter(|s| !s.is_empty())
                    .map(str::to_string),
            },
            _ => BlockBuilder::Passthrough,
        }
    }

    fn apply_delta(&mut self, delta: &Value) {
        let delta_type = delta.get("type").and_then(|v| v.as_str()).unwrap_or("");
        let str_field = |key: &str| delta.get(key).and_then(|v| v.as_str());

        match (self, delta_type) {
            (BlockBuilder::Text { text }, "text_delta") => {
                if let Some(fragment) = str_field("text") {
                    text.push_str(fragment);
                }
            }
            (BlockBuilder::ToolUse { partial_json, .. }, "input_json_delta") => {
                if let Some(fragment) = str_field("partial_json") {
                    partial_json.push_str(fragment);
                }
            }
            (BlockBuilder::Thinking { thinking, .. }, "thinking_delta") => {
                if let Some(fragment) = str_field("thinking") {
                    thinking.push_str(fragment);
                }
            }
            (BlockBuilder::Thinking { signature, .. }, "signature_delta") => {
                if let Some(sig) = str_field("signature") {
                    *signature = Some(sig.to_string());
                }
            }
            _ => {}
        }
    }

    /// 关闭块；tool_use 在此时一次性解析累积的 JSON
    fn finalize(self, index: u64, warnings: &mut Vec<String>) -> Option<ContentSegment> {
        match self {
            BlockBuilder::Text { text } => Some(ContentSegment::Text { text }),
            BlockBuilder::ToolUse {
                id,
                name,
                initial_input,
                partial_json,
            } => {
                let input = if partial_json.trim().is_empty() {
                    initial_input
                } else {
                    match serde_json::from_str::<Value>(&partial_json) {
                        Ok(value) => value,
                        Err(e) => {
                            warnings.push(format!(
                                "块 {} 的 tool_use input 不是合法 JSON，保留原始字符串: {}",
                                index, e
                            ));
                            Value::String(partial_json)
                        }
                    }
                };
                Some(ContentSegment::ToolUse { id, name, input })
            }
            BlockBuilder::Thinking {
                thinking,
                signature,
            } => Some(ContentSegment::Thinking {
                thinking,
                signature,
            }),
            // 透传块保持 start 时的占位内容
            BlockBuilder::Passthrough => None,
        }
    }
}

/// 流式消息重建器
#[derive(Debug, Default)]
pub struct StreamReconstructor {
    parser: SseParser,
    message: ReconstructedMessage,
    /// 打开中的块：index -> (builder, 在 content 中的位置)
    open_blocks: HashMap<u64, (BlockBuilder, usize)>,
    warnings: Vec<String>,
    events_seen: usize,
}

impl StreamReconstructor {
    pub fn new() -> Self {
        Self::default()
    }

    /// 喂入原始字节块
    pub fn feed(&mut self, chunk: &[u8]) {
        for frame in self.parser.feed(chunk) {
            self.apply_frame(&frame);
        }
    }

    /// 已处理的有效事件数
    pub fn events_seen(&self) -> usize {
        self.events_seen
    }

    /// 流结束：冲刷解析器，关闭所有仍打开的块
    pub fn finish(mut self) -> (ReconstructedMessage, Vec<String>) {
        if let Some(frame) = self.parser.finish() {
            self.apply_frame(&frame);
        }

        let mut leftover: Vec<u64> = self.open_blocks.keys().copied().collect();
        leftover.sort_unstable();
        for index in leftover {
            self.warnings
                .push(format!("内容块 {} 在流结束时仍未关闭", index));
            self.close_block(index);
        }

        (self.message, self.warnings)
    }

    /// 从已存储的原始 chunk 重建（用于读取时补全旧记录）
    pub fn rebuild<S: AsRef<str>>(chunks: &[S]) -> (ReconstructedMessage, Vec<String>) {
        let mut reconstructor = Self::new();
        for chunk in chunks {
            reconstructor.feed(chunk.as_ref().as_bytes());
        }
        reconstructor.finish()
    }

    fn apply_frame(&mut self, frame: &SseFrame) {
        let data = frame.data.trim();
        if data.is_empty() || data == "[DONE]" {
            return;
        }

        let payload: Value = match serde_json::from_str(data) {
            Ok(v) => v,
            Err(e) => {
                self.warnings.push(format!(
                    "无法解析事件 {} 的数据: {}",
                    frame.event.as_deref().unwrap_or("<unnamed>"),
                    e
                ));
                return;
            }
        };

        let event_type = frame
            .event
            .clone()
            .or_else(|| {
                payload
                    .get("type")
                    .and_then(|v| v.as_str())
                    .map(str::to_string)
            })
            .unwrap_or_default();

        self.events_seen += 1;
        self.apply_event(&event_type, &payload);
    }

    fn apply_event(&mut self, event_type: &str, payload: &Value) {
        match event_type {
            "message_start" => self.on_message_start(payload),
            "content_block_start" => self.on_block_start(payload),
            "content_block_delta" => self.on_block_delta(payload),
            "content_block_stop" => {
                if let Some(index) = block_index(payload) {
                    self.close_block(index);
                }
            }
            "message_delta" => self.on_message_delta(payload),
            "error" => {
                if let Some(error) = payload.get("error") {
                    self.message
                        .fields
                        .insert("error".to_string(), error.clone());
                }
            }
            // message_stop / ping / 未知事件
            _ => {}
        }
    }

    fn on_message_start(&mut self, payload: &Value) {
        if let Some(message) = payload.get("message").and_then(|v| v.as_object()) {
            for (key, value) in message {
                if key != "content" {
                    self.message.fields.insert(key.clone(), value.clone());
                }
            }
        }
        self.message.content.clear();
        self.open_blocks.clear();
    }

    fn on_block_start(&mut self, payload: &Value) {
        let Some(index) = block_index(payload) else {
            self.warnings
                .push("content_block_start 缺少 index，已忽略".to_string());
            return;
        };
        let block = payload
            .get("content_block")
            .cloned()
            .unwrap_or_else(|| Value::Object(Map::new()));

        let builder = BlockBuilder::from_start(&block);
        let placeholder = match &builder {
            BlockBuilder::Passthrough => ContentSegment::Passthrough(block),
            BlockBuilder::Text { text } => ContentSegment::Text { text: text.clone() },
            BlockBuilder::ToolUse {
                id,
                name,
                initial_input,
                ..
            } => ContentSegment::ToolUse {
                id: id.clone(),
                name: name.clone(),
                input: initial_input.clone(),
            },
            BlockBuilder::Thinking {
                thinking,
                signature,
            } => ContentSegment::Thinking {
                thinking: thinking.clone(),
                signature: signature.clone(),
            },
        };

        if self.open_blocks.contains_key(&index) {
            self.warnings
                .push(format!("内容块 {} 重复打开，覆盖之前的 builder", index));
        }

        let position = self.message.content.len();
        self.message.content.push(placeholder);
        self.open_blocks.insert(index, (builder, position));
    }

    fn on_block_delta(&mut self, payload: &Value) {
        let (Some(index), Some(delta)) = (block_index(payload), payload.get("delta")) else {
            return;
        };
        // 已关闭或从未打开的块：静默忽略
        if let Some((builder, _)) = self.open_blocks.get_mut(&index) {
            builder.apply_delta(delta);
        }
    }

    fn close_block(&mut self, index: u64) {
        let Some((builder, position)) = self.open_blocks.remove(&index) else {
            return;
        };
        if let Some(segment) = builder.finalize(index, &mut self.warnings) {
            if let Some(slot) = self.message.content.get_mut(position) {
                *slot = segment;
            }
        }
    }

    fn on_message_delta(&mut self, payload: &Value) {
        let fields = &mut self.message.fields;

        if let Some(delta) = payload.get("delta").and_then(|v| v.as_object()) {
            for key in ["stop_reason", "stop_sequence"] {
                if let Some(value) = delta.get(key) {
                    fields.insert(key.to_string(), value.clone());
                }
            }
            let role_unset = fields.get("role").is_none_or(|v| v.is_null());
            if role_unset {
                if let Some(role) = delta.get("role") {
                    fields.insert("role".to_string(), role.clone());
                }
            }
        }

        let usage_updates = payload
            .get("usage")
            .or_else(|| payload.get("delta").and_then(|d| d.get("usage")))
            .and_then(|v| v.as_object());
        if let Some(updates) = usage_updates {
            let usage = fields
                .entry("usage".to_string())
                .or_insert_with(|| Value::Object(Map::new()));
            if !usage.is_object() {
                *usage = Value::Object(Map::new());
            }
            if let Some(usage) = usage.as_object_mut() {
                for (key, value) in updates {
                    usage.insert(key.clone(), value.clone());
                }
            }
        }
    }
}

fn block_index(payload: &Value) -> Option<u64> {
    payload.get("index").and_then(|v| v.as_u64())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sse(event: &str, data: Value) -> String {
        format!("event: {}\ndata: {}\n\n", event, data)
    }

    fn full_stream() -> Vec<String> {
        vec![
            sse(
                "message_start",
                serde_json::json!({
                    "type": "message_start",
                    "message": {
                        "id": "msg_01", "type": "message", "role": "assistant",
                        "model": "claude-sonnet-4-5", "content": [],
                        "stop_reason": null,
                        "usage": {"input_tokens": 12, "output_tokens": 1}
                    }
                }),
            ),
            sse(
                "content_block_start",
                serde_json::json!({"type": "content_block_start", "index": 0,
                    "content_block": {"type": "thinking", "thinking": ""}}),
            ),
            sse(
                "content_block_delta",
                serde_json::json!({"type": "content_block_delta", "index": 0,
                    "delta": {"type": "thinking_delta", "thinking": "Let me "}}),
            ),
            sse(
                "content_block_delta",
                serde_json::json!({"type": "content_block_delta", "index": 0,
                    "delta": {"type": "thinking_delta", "thinking": "think."}}),
            ),
            sse(
                "content_block_delta",
                serde_json::json!({"type": "content_block_delta", "index": 0,
                    "delta": {"type": "signature_delta", "signature": "sig-a"}}),
            ),
            sse(
                "content_block_delta",
                serde_json::json!({"type": "content_block_delta", "index": 0,
                    "delta": {"type": "signature_delta", "signature": "sig-b"}}),
            ),
            sse(
                "content_block_stop",
                serde_json::json!({"type": "content_block_stop", "index": 0}),
            ),
            sse(
                "content_block_start",
                serde_json::json!({"type": "content_block_start", "index": 1,
                    "content_block": {"type": "text", "text": ""}}),
            ),
            sse(
                "content_block_start",
                serde_json::json!({"type": "content_block_start", "index": 2,
                    "content_block": {"type": "tool_use", "id": "toolu_1", "name": "Read", "input": {}}}),
            ),
            sse(
                "content_block_delta",
                serde_json::json!({"type": "content_block_delta", "index": 1,
                    "delta": {"type": "text_delta", "text": "Reading "}}),
            ),
            sse(
                "content_block_delta",
                serde_json::json!({"type": "content_block_delta", "index": 2,
                    "delta": {"type": "input_json_delta", "partial_json": "{\"file_path\":"}}),
            ),
            sse(
                "content_block_delta",
                serde_json::json!({"type": "content_block_delta", "index": 1,
                    "delta": {"type": "text_delta", "text": "file"}}),
            ),
            sse(
                "content_block_delta",
                serde_json::json!({"type": "content_block_delta", "index": 2,
                    "delta": {"type": "input_json_delta", "partial_json": " \"/tmp/a.rs\"}"}}),
            ),
            sse(
                "content_block_stop",
                serde_json::json!({"type": "content_block_stop", "index": 1}),
            ),
            sse(
                "content_block_stop",
                serde_json::json!({"type": "content_block_stop", "index": 2}),
            ),
            sse(
                "message_delta",
                serde_json::json!({"type": "message_delta",
                    "delta": {"stop_reason": "tool_use", "stop_sequence": null, "role": "user"},
                    "usage": {"output_tokens": 42}}),
            ),
            sse("message_stop", serde_json::json!({"type": "message_stop"})),
        ]
    }

    #[test]
    fn test_full_stream_reconstruction() {
        let (message, warnings) = StreamReconstructor::rebuild(&full_stream());
        assert!(warnings.is_empty(), "unexpected warnings: {:?}", warnings);

        assert_eq!(message.role(), Some("assistant"));
        assert_eq!(message.stop_reason(), Some("tool_use"));
        let usage = message.usage().unwrap();
        assert_eq!(usage["input_tokens"], 12);
        assert_eq!(usage["output_tokens"], 42);

        assert_eq!(
            message.content,
            vec![
                ContentSegment::Thinking {
                    thinking: "Let me think.".to_string(),
                    signature: Some("sig-b".to_string()),
                },
                ContentSegment::Text {
                    text: "Reading file".to_string()
                },
                ContentSegment::ToolUse {
                    id: "toolu_1".to_string(),
                    name: "Read".to_string(),
                    input: serde_json::json!({"file_path": "/tmp/a.rs"}),
                },
            ]
        );
    }

    /// 相同 chunk 序列经两个独立实例重建，结果一致
    #[test]
    fn test_reconstruction_is_deterministic() {
        let chunks = full_stream();
        let (first, _) = StreamReconstructor::rebuild(&chunks);
        let (second, _) = StreamReconstructor::rebuild(&chunks);
        assert_eq!(first, second);
        assert_eq!(first.to_value(), second.to_value());
    }

    #[test]
    fn test_reconstruction_independent_of_chunking() {
        let joined = full_stream().concat();
        let (whole, _) = StreamReconstructor::rebuild(&[joined.clone()]);

        let mut reconstructor = StreamReconstructor::new();
        for byte in joined.as_bytes().chunks(5) {
            reconstructor.feed(byte);
        }
        let (pieces, _) = reconstructor.finish();
        assert_eq!(whole, pieces);
    }

    #[test]
    fn test_tool_use_json_fragments_concatenated_once() {
        let target = serde_json::json!({
            "command": "cargo test",
            "nested": {"list": [1, 2, 3], "flag": true},
            "description": "运行测试"
        });
        let serialized = serde_json::to_string(&target).unwrap();
        let mut chunks = vec![sse(
            "content_block_start",
            serde_json::json!({"type": "content_block_start", "index": 0,
                "content_block": {"type": "tool_use", "id": "toolu_9", "name": "Bash", "input": {}}}),
        )];
        let chars: Vec<char> = serialized.chars().collect();
        for piece in chars.chunks(4) {
            let fragment: String = piece.iter().collect();
            chunks.push(sse(
                "content_block_delta",
                serde_json::json!({"type": "content_block_delta", "index": 0,
                    "delta": {"type": "input_json_delta", "partial_json": fragment}}),
            ));
        }
        chunks.push(sse(
            "content_block_stop",
            serde_json::json!({"type": "content_block_stop", "index": 0}),
        ));

        let (message, warnings) = StreamReconstructor::rebuild(&chunks);
        assert!(warnings.is_empty());
        match &message.content[0] {
            ContentSegment::ToolUse { input, name, .. } => {
                assert_eq!(name, "Bash");
                assert_eq!(input, &target);
            }
            other => panic!("unexpected segment: {:?}", other),
        }
    }

    #[test]
    fn test_invalid_tool_json_falls_back_to_raw_string() {
        let chunks = vec![
            sse(
                "content_block_start",
                serde_json::json!({"type": "content_block_start", "index": 0,
                    "content_block": {"type": "tool_use", "id": "t", "name": "Edit", "input": {}}}),
            ),
            sse(
                "content_block_delta",
                serde_json::json!({"type": "content_block_delta", "index": 0,
                    "delta": {"type": "input_json_delta", "partial_json": "{\"path\": \"a"}}),
            ),
            sse(
                "content_block_stop",
                serde_json::json!({"type": "content_block_stop", "index": 0}),
            ),
        ];

        let (message, warnings) = StreamReconstructor::rebuild(&chunks);
        assert_eq!(warnings.len(), 1);
        assert_eq!(
            message.content[0],
            ContentSegment::ToolUse {
                id: "t".to_string(),
                name: "Edit".to_string(),
                input: Value::String("{\"path\": \"a".to_string()),
            }
        );
    }

    #[test]
    fn test_delta_after_stop_is_ignored() {
        let chunks = vec![
            sse(
                "content_block_start",
                serde_json::json!({"type": "content_block_start", "index": 0,
                    "content_block": {"type": "text", "text": ""}}),
            ),
            sse(
                "content_block_delta",
                serde_json::json!({"type": "content_block_delta", "index": 0,
                    "delta": {"type": "text_delta", "text": "done"}}),
            ),
            sse(
                "content_block_stop",
                serde_json::json!({"type": "content_block_stop", "index": 0}),
            ),
            sse(
                "content_block_delta",
                serde_json::json!({"type": "content_block_delta", "index": 0,
                    "delta": {"type": "text_delta", "text": " late"}}),
            ),
        ];

        let (message, warnings) = StreamReconstructor::rebuild(&chunks);
        assert!(warnings.is_empty());
        assert_eq!(
            message.content,
            vec![ContentSegment::Text {
                text: "done".to_string()
            }]
        );
    }

    #[test]
    fn test_malformed_payload_is_warning_not_error() {
        let chunks = vec![
            "event: content_block_start\ndata: {not json\n\n".to_string(),
            sse(
                "content_block_start",
                serde_json::json!({"type": "content_block_start", "index": 0,
                    "content_block": {"type": "text", "text": "ok"}}),
            ),
            sse(
                "content_block_stop",
                serde_json::json!({"type": "content_block_stop", "index": 0}),
            ),
        ];

        let (message, warnings) = StreamReconstructor::rebuild(&chunks);
        assert_eq!(warnings.len(), 1);
        assert_eq!(
            message.content,
            vec![ContentSegment::Text {
                text: "ok".to_string()
            }]
        );
    }

    #[test]
    fn test_passthrough_block_kept_as_is() {
        let block = serde_json::json!({"type": "web_search_tool_result", "tool_use_id": "srv_1", "content": []});
        let chunks = vec![
            sse(
                "content_block_start",
                serde_json::json!({"type": "content_block_start", "index": 0, "content_block": block}),
            ),
            sse(
                "content_block_delta",
                serde_json::json!({"type": "content_block_delta", "index": 0,
                    "delta": {"type": "text_delta", "text": "ignored"}}),
            ),
            sse(
                "content_block_stop",
                serde_json::json!({"type": "content_block_stop", "index": 0}),
            ),
        ];

        let (message, _) = StreamReconstructor::rebuild(&chunks);
        assert_eq!(message.content, vec![ContentSegment::Passthrough(block)]);
    }

    /// 流中断：未关闭的块在 finish 时尽力关闭并记录警告
    #[test]
    fn test_unclosed_block_finalized_on_finish() {
        let chunks = vec![
            sse(
                "content_block_start",
                serde_json::json!({"type": "content_block_start", "index": 0,
                    "content_block": {"type": "text", "text": ""}}),
            ),
            // 最后一帧没有结尾空行
            "event: content_block_delta\ndata: {\"type\":\"content_block_delta\",\"index\":0,\"delta\":{\"type\":\"text_delta\",\"text\":\"partial\"}}".to_string(),
        ];

        let (message, warnings) = StreamReconstructor::rebuild(&chunks);
        assert_eq!(warnings.len(), 1);
        assert_eq!(
            message.content,
            vec![ContentSegment::Text {
                text: "partial".to_string()
            }]
        );
    }

    #[test]
    fn test_message_delta_keeps_existing_role_and_merges_usage() {
        let chunks = vec![
            sse(
                "message_delta",
                serde_json::json!({"type": "message_delta",
                    "delta": {"stop_reason": "end_turn", "role": "assistant"},
                    "usage": {"output_tokens": 5, "input_tokens": 3}}),
            ),
            sse(
                "message_delta",
                serde_json::json!({"type": "message_delta",
                    "delta": {"role": "user"},
                    "usage": {"output_tokens": 9}}),
            ),
        ];

        let (message, _) = StreamReconstructor::rebuild(&chunks);
        assert_eq!(message.role(), Some("assistant"));
        assert_eq!(message.stop_reason(), Some("end_turn"));
        let usage = message.usage().unwrap();
        assert_eq!(usage["output_tokens"], 9);
        assert_eq!(usage["input_tokens"], 3);
    }

    #[test]
    fn test_error_event_recorded() {
        let chunks = vec![sse(
            "error",
            serde_json::json!({"type": "error", "error": {"type": "overloaded_error", "message": "Overloaded"}}),
        )];
        let (message, _) = StreamReconstructor::rebuild(&chunks);
        assert_eq!(message.to_value()["error"]["type"], "overloaded_error");
    }

    /// 文档中给出的最小场景
    #[test]
    fn test_minimal_text_scenario() {
        let chunks = [
            "event: content_block_start\ndata: {\"type\":\"content_block_start\",\"index\":0,\"content_block\":{\"type\":\"text\",\"text\":\"\"}}\n\n",
            "event: content_block_delta\ndata: {\"type\":\"content_block_delta\",\"index\":0,\"delta\":{\"type\":\"text_delta\",\"text\":\"Hi\"}}\n\n",
            "event: content_block_stop\ndata: {\"type\":\"content_block_stop\",\"index\":0}\n\n",
        ];
        let (message, _) = StreamReconstructor::rebuild(&chunks);
        assert_eq!(
            message.to_value()["content"],
            serde_json::json!([{"type": "text", "text": "Hi"}])
        );
    }
}
