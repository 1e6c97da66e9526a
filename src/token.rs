//! Token 计数
//!
//! - 本地估算：ASCII 约 4 字符 1 token，其余字符（CJK 等）按 1 字符 1 token
//! - 可选的外部 count_tokens API（配置 countTokensApiUrl 后启用）

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::metrics::types::TokenBreakdown;

/// 估算文本 token 数
pub fn count_tokens(text: &str) -> u64 {
    let (ascii, other) = text.chars().fold((0u64, 0u64), |(a, o), c| {
        if c.is_ascii() { (a + 1, o) } else { (a, o + 1) }
    });
    ascii.div_ceil(4) + other
}

/// 估算 JSON 值：字符串按文本计，其余按紧凑序列化结果计
fn count_value(value: &Value) -> u64 {
    match value {
        Value::Null => 0,
        Value::String(s) => count_tokens(s),
        other => count_tokens(&other.to_string()),
    }
}

/// 估算单个内容块
fn count_block(block: &Value) -> u64 {
    match block.get("type").and_then(|v| v.as_str()) {
        Some("text") => block.get("text").map(count_value).unwrap_or(0),
        Some("thinking") => block.get("thinking").map(count_value).unwrap_or(0),
        Some("tool_use") => {
            block.get("name").map(count_value).unwrap_or(0)
                + block.get("input").map(count_value).unwrap_or(0)
        }
        Some("tool_result") => match block.get("content") {
            Some(Value::Array(parts)) => parts.iter().map(count_block).sum(),
            Some(content) => count_value(content),
            None => 0,
        },
        // 图片等二进制内容按固定值估算
        Some("image") | Some("document") => 1_600,
        _ => count_value(block),
    }
}

/// 估算 content 字段（字符串或内容块数组）
pub fn count_content(content: &Value) -> u64 {
    match content {
        Value::Array(blocks) => blocks.iter().map(count_block).sum(),
        other => count_value(other),
    }
}

/// 估算 Messages 请求体各部分的 token 分布
pub fn estimate_request(body: &Value) -> TokenBreakdown {
    let system = body.get("system").map(count_content).unwrap_or(0);
    let tools = body
        .get("tools")
        .and_then(|v| v.as_array())
        .map(|tools| tools.iter().map(|t| count_tokens(&t.to_string())).sum())
        .unwrap_or(0);
    let messages = body
        .get("messages")
        .and_then(|v| v.as_array())
        .map(|messages| {
            messages
                .iter()
                .filter_map(|m| m.get("content"))
                .map(count_content)
                .sum()
        })
        .unwrap_or(0);

    TokenBreakdown {
        system,
        tools,
        messages,
    }
}

/// Token 计数请求
#[derive(Debug, Serialize)]
struct CountTokensRequest<'a> {
    model: &'a str,
    messages: &'a Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<&'a Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tools: Option<&'a Value>,
}

/// Token 计数响应
#[derive(Debug, Deserialize)]
struct CountTokensResponse {
    input_tokens: u64,
}

/// 外部 count_tokens API 客户端
#[derive(Debug, Clone)]
pub struct CountTokensClient {
    client: reqwest::Client,
    url: String,
    api_key: Option<String>,
    /// "x-api-key" 或 "bearer"
    auth_type: String,
}

impl CountTokensClient {
    pub fn new(
        client: reqwest::Client,
        url: impl Into<String>,
        api_key: Option<String>,
        auth_type: impl Into<String>,
    ) -> Self {
        Self {
            client,
            url: url.into(),
            api_key,
            auth_type: auth_type.into(),
        }
    }

    /// 计算请求体的输入 token 数
    pub async fn count(&self, body: &Value) -> anyhow::Result<u64> {
        let model = body
            .get("model")
            .and_then(|v| v.as_str())
            .ok_or_else(|| anyhow::anyhow!("请求体缺少 model"))?;
        let messages = body
            .get("messages")
            .ok_or_else(|| anyhow::anyhow!("请求体缺少 messages"))?;

        let payload = CountTokensRequest {
            model,
            messages,
            system: body.get("system"),
            tools: body.get("tools"),
        };

        let mut request = self
            .client
            .post(&self.url)
            .header("anthropic-version", "2023-06-01")
            .json(&payload);
        if let Some(key) = &self.api_key {
            request = if self.auth_type.eq_ignore_ascii_case("bearer") {
                request.bearer_auth(key)
            } else {
                request.header("x-api-key", key)
            };
        }

        let resp = request.send().await?;
        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            anyhow::bail!("count_tokens 返回 HTTP {}: {}", status, text);
        }
        let parsed: CountTokensResponse = resp.json().await?;
        Ok(parsed.input_tokens)
    }
}
