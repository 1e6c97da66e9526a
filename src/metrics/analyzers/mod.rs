//! 内置 analyzer

mod agent_tag;
mod token_usage;
mod tool_metrics;

use std::sync::Arc;

use serde_json::Value;

pub use agent_tag::AgentTagAnalyzer;
pub use token_usage::TokenUsageAnalyzer;
pub use tool_metrics::ToolMetricsAnalyzer;

use super::analyzer::AnalyzerRegistry;
use crate::token::CountTokensClient;

/// 构建包含全部内置 analyzer 的注册表
pub fn default_registry(counter: Option<CountTokensClient>) -> anyhow::Result<AnalyzerRegistry> {
    let mut registry = AnalyzerRegistry::new();
    registry.register(Arc::new(TokenUsageAnalyzer::new(counter)))?;
    registry.register(Arc::new(AgentTagAnalyzer))?;
    registry.register(Arc::new(ToolMetricsAnalyzer))?;
    Ok(registry)
}

/// system 字段的纯文本（字符串或 text 块数组）
pub(crate) fn system_text(body: &Value) -> String {
    match body.get("system") {
        Some(Value::String(s)) => s.clone(),
        Some(Value::Array(blocks)) => blocks
            .iter()
            .filter_map(|b| b.get("text").and_then(|t| t.as_str()))
            .collect::<Vec<_>>()
            .join("\n"),
        _ => String::new(),
    }
}

/// 请求中声明的工具名
pub(crate) fn tool_names(body: &Value) -> Vec<&str> {
    body.get("tools")
        .and_then(|v| v.as_array())
        .map(|tools| {
            tools
                .iter()
                .filter_map(|t| t.get("name").and_then(|n| n.as_str()))
                .collect()
        })
        .unwrap_or_default()
}

/// 最后一条 user 消息
pub(crate) fn last_user_message(body: &Value) -> Option<&Value> {
    body.get("messages")
        .and_then(|v| v.as_array())?
        .iter()
        .rev()
        .find(|m| m.get("role").and_then(|r| r.as_str()) == Some("user"))
}

/// 消息 content 的纯文本
pub(crate) fn message_text(message: &Value) -> String {
    match message.get("content") {
        Some(Value::String(s)) => s.clone(),
        Some(Value::Array(blocks)) => blocks
            .iter()
            .filter(|b| b.get("type").and_then(|t| t.as_str()) == Some("text"))
            .filter_map(|b| b.get("text").and_then(|t| t.as_str()))
            .collect::<Vec<_>>()
            .join("\n"),
        _ => String::new(),
    }
}
