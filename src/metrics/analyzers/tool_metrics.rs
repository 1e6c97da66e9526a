//! 工具使用统计

use serde_json::Value;

use crate::metrics::analyzer::Analyzer;
use crate::metrics::types::{AnalyzerResult, MetricField, ToolMetrics};
use crate::store::InteractionRecord;

use super::{last_user_message, tool_names};

pub struct ToolMetricsAnalyzer;

/// 统计最后一条 user 消息中的 tool_result（之前的已在上一轮调用中统计过）
fn count_results(body: &Value) -> (u32, u32) {
    let Some(blocks) = last_user_message(body)
        .and_then(|m| m.get("content"))
        .and_then(|c| c.as_array())
    else {
        return (0, 0);
    };

    blocks
        .iter()
        .filter(|b| b.get("type").and_then(|t| t.as_str()) == Some("tool_result"))
        .fold((0, 0), |(results, errors), b| {
            let is_error = b.get("is_error").and_then(|v| v.as_bool()).unwrap_or(false);
            (results + 1, errors + u32::from(is_error))
        })
}

#[async_trait::async_trait]
impl Analyzer for ToolMetricsAnalyzer {
    fn name(&self) -> &'static str {
        "tool_metrics"
    }

    fn field(&self) -> MetricField {
        MetricField::ToolMetrics
    }

    fn applies_to(&self, record: &InteractionRecord) -> bool {
        record.is_messages_call() && record.request.body.is_some()
    }

    async fn analyze(&self, record: &InteractionRecord) -> anyhow::Result<Option<AnalyzerResult>> {
        if !self.applies_to(record) {
            return Ok(None);
        }
        let Some(body) = record.request.body.as_ref() else {
            return Ok(None);
        };

        let mut metrics = ToolMetrics {
            defined_tools: tool_names(body).len() as u32,
            ..Default::default()
        };
        (metrics.tool_results, metrics.tool_errors) = count_results(body);

        if let Some(message) = record.response_message()
            && let Some(content) = message.get("content").and_then(|c| c.as_array())
        {
            for block in content {
                if block.get("type").and_then(|t| t.as_str()) != Some("tool_use") {
                    continue;
                }
                let name = block
                    .get("name")
                    .and_then(|n| n.as_str())
                    .unwrap_or("unknown");
                *metrics.tool_calls.entry(name.to_string()).or_default() += 1;
                metrics.total_tool_calls += 1;
            }
        }

        Ok(Some(AnalyzerResult::ToolMetrics(metrics)))
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::store::RecordedResponse;

    #[tokio::test]
    async fn test_counts_tools_calls_and_results() {
        let mut record = InteractionRecord::new("m", "POST", "/v1/messages", None);
        record.request.body = Some(json!({
            "tools": [{"name": "Read"}, {"name": "Bash"}, {"name": "Grep"}],
            "messages": [
                {"role": "user", "content": [
                    {"type": "tool_result", "tool_use_id": "old", "content": "stale"}
                ]},
                {"role": "assistant", "content": [{"type": "tool_use", "id": "a", "name": "Read", "input": {}}]},
                {"role": "user", "content": [
                    {"type": "tool_result", "tool_use_id": "a", "content": "ok"},
                    {"type": "tool_result", "tool_use_id": "b", "content": "fail", "is_error": true}
                ]}
            ]
        }));
        record.response = Some(RecordedResponse {
            status: 200,
            body: Some(json!({"content": [
                {"type": "text", "text": "running"},
                {"type": "tool_use", "id": "c", "name": "Bash", "input": {}},
                {"type": "tool_use", "id": "d", "name": "Read", "input": {}},
                {"type": "tool_use", "id": "e", "name": "Bash", "input": {}}
            ]})),
            ..Default::default()
        });

        let metrics = match ToolMetricsAnalyzer.analyze(&record).await.unwrap() {
            Some(AnalyzerResult::ToolMetrics(m)) => m,
            other => panic!("unexpected result: {:?}", other),
        };
        assert_eq!(metrics.defined_tools, 3);
        assert_eq!(metrics.tool_results, 2);
        assert_eq!(metrics.tool_errors, 1);
        assert_eq!(metrics.total_tool_calls, 3);
        assert_eq!(metrics.tool_calls.get("Bash"), Some(&2));
        assert_eq!(metrics.tool_calls.get("Read"), Some(&1));
    }

    #[tokio::test]
    async fn test_failed_call_still_counts_request_side() {
        let mut record = InteractionRecord::new("m", "POST", "/v1/messages", None);
        record.request.body = Some(json!({"tools": [{"name": "Read"}], "messages": []}));
        record.response = Some(RecordedResponse {
            status: 502,
            error: Some("Upstream request failed".to_string()),
            ..Default::default()
        });

        let metrics = match ToolMetricsAnalyzer.analyze(&record).await.unwrap() {
            Some(AnalyzerResult::ToolMetrics(m)) => m,
            other => panic!("unexpected result: {:?}", other),
        };
        assert_eq!(metrics.defined_tools, 1);
        assert_eq!(metrics.total_tool_calls, 0);
    }
}
