//! Token 使用量
//!
//! 上游响应带 usage 时以其为准（source = response）；
//! 否则输入侧走 count_tokens API（若已配置）或本地估算，输出侧按响应内容估算。

use serde_json::Value;

use crate::metrics::analyzer::Analyzer;
use crate::metrics::types::{AnalyzerResult, MetricField, TokenSource, TokenUsage};
use crate::store::InteractionRecord;
use crate::token::{self, CountTokensClient};

pub struct TokenUsageAnalyzer {
    counter: Option<CountTokensClient>,
}

impl TokenUsageAnalyzer {
    pub fn new(counter: Option<CountTokensClient>) -> Self {
        Self { counter }
    }

    /// 请求侧输入 token：API 优先，失败时退回估算
    async fn input_tokens(&self, record: &InteractionRecord, body: &Value, estimate: u64) -> (u64, TokenSource) {
        let Some(counter) = &self.counter else {
            return (estimate, TokenSource::Estimate);
        };
        match counter.count(body).await {
            Ok(n) => (n, TokenSource::Api),
            Err(e) => {
                tracing::warn!(record_id = %record.id, "count_tokens 调用失败，使用估算值: {:#}", e);
                (estimate, TokenSource::Estimate)
            }
        }
    }
}

fn usage_u64(usage: &Value, key: &str) -> Option<u64> {
    usage.get(key).and_then(|v| v.as_u64())
}

/// 响应消息内容的估算输出 token
fn estimate_output(message: Option<&Value>) -> u64 {
    message
        .and_then(|m| m.get("content"))
        .map(token::count_content)
        .unwrap_or(0)
}

#[async_trait::async_trait]
impl Analyzer for TokenUsageAnalyzer {
    fn name(&self) -> &'static str {
        "token_usage"
    }

    fn field(&self) -> MetricField {
        MetricField::TokenUsage
    }

    fn applies_to(&self, record: &InteractionRecord) -> bool {
        record.is_messages_call()
            && record.request.body.is_some()
            && record
                .response
                .as_ref()
                .is_some_and(|r| (200..300).contains(&r.status) && r.error.is_none())
    }

    async fn analyze(&self, record: &InteractionRecord) -> anyhow::Result<Option<AnalyzerResult>> {
        if !self.applies_to(record) {
            return Ok(None);
        }
        let Some(body) = record.request.body.as_ref() else {
            return Ok(None);
        };

        let breakdown = token::estimate_request(body);
        let message = record.response_message();
        let message = message.as_deref();
        let usage = message
            .and_then(|m| m.get("usage"))
            .filter(|u| u.get("input_tokens").is_some_and(|v| v.is_u64()));

        let result = match usage {
            Some(usage) => {
                let input_tokens = usage_u64(usage, "input_tokens").unwrap_or(0);
                let output_tokens = usage_u64(usage, "output_tokens")
                    .unwrap_or_else(|| estimate_output(message));
                let cache_creation = usage_u64(usage, "cache_creation_input_tokens").unwrap_or(0);
                let cache_read = usage_u64(usage, "cache_read_input_tokens").unwrap_or(0);
                TokenUsage {
                    input_tokens,
                    output_tokens,
                    cache_creation_input_tokens: cache_creation,
                    cache_read_input_tokens: cache_read,
                    total_tokens: input_tokens + output_tokens + cache_creation + cache_read,
                    source: TokenSource::Response,
                    breakdown,
                }
            }
            None => {
                let estimate = breakdown.system + breakdown.tools + breakdown.messages;
                let (input_tokens, source) = self.input_tokens(record, body, estimate).await;
                let output_tokens = estimate_output(message);
                TokenUsage {
                    input_tokens,
                    output_tokens,
                    cache_creation_input_tokens: 0,
                    cache_read_input_tokens: 0,
                    total_tokens: input_tokens + output_tokens,
                    source,
                    breakdown,
                }
            }
        };

        Ok(Some(AnalyzerResult::TokenUsage(result)))
    }
}

#[cfg(test)]
mod tests {
    use axum::{Json, Router, routing::post};
    use serde_json::json;

    use super::*;
    use crate::store::RecordedResponse;

    fn record(response_body: Value) -> InteractionRecord {
        let mut record = InteractionRecord::new("t", "POST", "/v1/messages", None);
        record.request.body = Some(json!({
            "model": "claude-sonnet-4-5",
            "system": "abcdefgh",
            "messages": [{"role": "user", "content": "abcd"}]
        }));
        record.response = Some(RecordedResponse {
            status: 200,
            body: Some(response_body),
            ..Default::default()
        });
        record
    }

    fn unwrap_usage(result: Option<AnalyzerResult>) -> TokenUsage {
        match result {
            Some(AnalyzerResult::TokenUsage(u)) => u,
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_uses_response_usage_when_present() {
        let record = record(json!({
            "content": [{"type": "text", "text": "hello"}],
            "usage": {
                "input_tokens": 10,
                "output_tokens": 5,
                "cache_read_input_tokens": 100
            }
        }));

        let usage = unwrap_usage(TokenUsageAnalyzer::new(None).analyze(&record).await.unwrap());
        assert_eq!(usage.source, TokenSource::Response);
        assert_eq!(usage.input_tokens, 10);
        assert_eq!(usage.output_tokens, 5);
        assert_eq!(usage.cache_read_input_tokens, 100);
        assert_eq!(usage.total_tokens, 115);
        assert_eq!(usage.breakdown.system, 2);
        assert_eq!(usage.breakdown.messages, 1);
    }

    #[tokio::test]
    async fn test_estimates_without_usage() {
        let record = record(json!({"content": [{"type": "text", "text": "abcdefgh"}]}));

        let usage = unwrap_usage(TokenUsageAnalyzer::new(None).analyze(&record).await.unwrap());
        assert_eq!(usage.source, TokenSource::Estimate);
        assert_eq!(usage.input_tokens, 3);
        assert_eq!(usage.output_tokens, 2);
        assert_eq!(usage.total_tokens, 5);
    }

    #[tokio::test]
    async fn test_not_applicable_to_failed_calls() {
        let mut record = record(json!({}));
        if let Some(resp) = record.response.as_mut() {
            resp.status = 502;
            resp.error = Some("boom".to_string());
        }
        let analyzer = TokenUsageAnalyzer::new(None);
        assert!(!analyzer.applies_to(&record));
        assert!(analyzer.analyze(&record).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_uses_count_tokens_api_when_configured() {
        let app = Router::new().route(
            "/v1/messages/count_tokens",
            post(|Json(body): Json<Value>| async move {
                assert_eq!(body["model"], "claude-sonnet-4-5");
                Json(json!({"input_tokens": 42}))
            }),
        );
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        let counter = CountTokensClient::new(
            reqwest::Client::new(),
            format!("http://{}/v1/messages/count_tokens", addr),
            Some("k".to_string()),
            "x-api-key",
        );
        let record = record(json!({"content": [{"type": "text", "text": "abcd"}]}));

        let usage = unwrap_usage(
            TokenUsageAnalyzer::new(Some(counter))
                .analyze(&record)
                .await
                .unwrap(),
        );
        assert_eq!(usage.source, TokenSource::Api);
        assert_eq!(usage.input_tokens, 42);
        assert_eq!(usage.output_tokens, 1);
    }
}
