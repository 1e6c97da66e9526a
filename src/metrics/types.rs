//! 派生指标数据结构
//!
//! 每种结构由一个 analyzer 独占，对应 `InteractionRecord` 上的一个字段。

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Token 数来源
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TokenSource {
    /// 上游响应中的 usage（权威）
    Response,
    /// 外部 count_tokens API
    Api,
    /// 本地估算
    Estimate,
}

/// 请求侧 token 分布（估算或 API 计数）
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenBreakdown {
    pub system: u64,
    pub tools: u64,
    pub messages: u64,
}

/// Token 使用量
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenUsage {
    pub input_tokens: u64,
    pub output_tokens: u64,
    #[serde(default)]
    pub cache_creation_input_tokens: u64,
    #[serde(default)]
    pub cache_read_input_tokens: u64,
    pub total_tokens: u64,
    pub source: TokenSource,
    #[serde(default)]
    pub breakdown: TokenBreakdown,
}

/// 调用方分类标签
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentTag {
    /// main-agent / sub-agent / compaction / title-generator / quota-check / utility
    pub tag: String,
    /// 判定依据
    pub reason: String,
}

/// 工具使用统计
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolMetrics {
    /// 请求中声明的工具数
    pub defined_tools: u32,
    /// 响应中各工具的调用次数
    pub tool_calls: BTreeMap<String, u32>,
    pub total_tool_calls: u32,
    /// 请求中携带的 tool_result 数
    pub tool_results: u32,
    /// 其中 is_error = true 的数量
    pub tool_errors: u32,
}

/// analyzer 的产出
#[derive(Debug, Clone, PartialEq)]
pub enum AnalyzerResult {
    TokenUsage(TokenUsage),
    AgentTag(AgentTag),
    ToolMetrics(ToolMetrics),
}

impl AnalyzerResult {
    /// 该结果对应的记录字段
    pub fn field(&self) -> MetricField {
        match self {
            AnalyzerResult::TokenUsage(_) => MetricField::TokenUsage,
            AnalyzerResult::AgentTag(_) => MetricField::AgentTag,
            AnalyzerResult::ToolMetrics(_) => MetricField::ToolMetrics,
        }
    }
}

/// 记录上的派生指标字段
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum MetricField {
    TokenUsage,
    AgentTag,
    ToolMetrics,
}

impl MetricField {
    pub const ALL: [MetricField; 3] = [
        MetricField::TokenUsage,
        MetricField::AgentTag,
        MetricField::ToolMetrics,
    ];

    /// JSON 中的键名
    pub fn key(&self) -> &'static str {
        match self {
            MetricField::TokenUsage => "tokenUsage",
            MetricField::AgentTag => "agentTag",
            MetricField::ToolMetrics => "toolMetrics",
        }
    }
}

impl std::fmt::Display for MetricField {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.key())
    }
}
