//! 交互记录数据模型

use std::borrow::Cow;
use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::metrics::types::{AgentTag, AnalyzerResult, MetricField, TokenUsage, ToolMetrics};
use crate::stream::StreamReconstructor;

/// 一次被捕获的调用
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InteractionRecord {
    /// 旧记录可能缺失，读取时从文件名补全
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub timestamp: String,
    pub method: String,
    pub path: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub query: Option<String>,
    /// 捕获在完成前失败时缺失
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
    pub request: RecordedRequest,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response: Option<RecordedResponse>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token_usage: Option<TokenUsage>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent_tag: Option<AgentTag>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_metrics: Option<ToolMetrics>,
}

/// 请求快照
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordedRequest {
    /// 敏感值已脱敏
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<Value>,
}

/// 响应快照
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordedResponse {
    pub status: u16,
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<Value>,
    /// 仅流式响应：按到达顺序的原始片段
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stream_chunks: Option<Vec<String>>,
    /// 仅传输失败或流被中断
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl InteractionRecord {
    /// 创建新的记录（请求开始时）
    pub fn new(
        id: impl Into<String>,
        method: impl Into<String>,
        path: impl Into<String>,
        query: Option<String>,
    ) -> Self {
        Self {
            id: id.into(),
            timestamp: chrono::Utc::now().to_rfc3339(),
            method: method.into(),
            path: path.into(),
            query,
            duration_ms: None,
            request: RecordedRequest::default(),
            response: None,
            token_usage: None,
            agent_tag: None,
            tool_metrics: None,
        }
    }

    /// 请求体中的 model
    pub fn model(&self) -> Option<&str> {
        self.request
            .body
            .as_ref()
            .and_then(|b| b.get("model"))
            .and_then(|v| v.as_str())
    }

    /// 是否为 Messages API 调用（不含 count_tokens）
    pub fn is_messages_call(&self) -> bool {
        self.path.trim_end_matches('/').ends_with("/messages")
    }

    pub fn status(&self) -> Option<u16> {
        self.response.as_ref().map(|r| r.status)
    }

    pub fn is_error(&self) -> bool {
        match &self.response {
            Some(resp) => resp.status >= 400 || resp.error.is_some(),
            None => true,
        }
    }

    pub fn is_streamed(&self) -> bool {
        self.response
            .as_ref()
            .is_some_and(|r| r.stream_chunks.is_some())
    }

    /// 响应消息：优先使用已存储的 body，否则从 stream chunks 重建
    pub fn response_message(&self) -> Option<Cow<'_, Value>> {
        let response = self.response.as_ref()?;
        if let Some(body) = &response.body {
            return Some(Cow::Borrowed(body));
        }
        let chunks = response.stream_chunks.as_ref()?;
        let (message, _) = StreamReconstructor::rebuild(chunks.as_slice());
        Some(Cow::Owned(message.to_value()))
    }

    pub fn has_field(&self, field: MetricField) -> bool {
        match field {
            MetricField::TokenUsage => self.token_usage.is_some(),
            MetricField::AgentTag => self.agent_tag.is_some(),
            MetricField::ToolMetrics => self.tool_metrics.is_some(),
        }
    }

    pub fn clear_field(&mut self, field: MetricField) {
        match field {
            MetricField::TokenUsage => self.token_usage = None,
            MetricField::AgentTag => self.agent_tag = None,
            MetricField::ToolMetrics => self.tool_metrics = None,
        }
    }

    /// 清除全部派生指标（强制重算前调用）
    pub fn clear_metrics(&mut self) {
        for field in MetricField::ALL {
            self.clear_field(field);
        }
    }

    /// 写入 analyzer 结果；只填充原本缺失的字段，返回是否发生了写入
    pub fn apply_result(&mut self, result: AnalyzerResult) -> bool {
        if self.has_field(result.field()) {
            return false;
        }
        match result {
            AnalyzerResult::TokenUsage(v) => self.token_usage = Some(v),
            AnalyzerResult::AgentTag(v) => self.agent_tag = Some(v),
            AnalyzerResult::ToolMetrics(v) => self.tool_metrics = Some(v),
        }
        true
    }
}
