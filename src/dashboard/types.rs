//! Dashboard API 请求/响应类型

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::store::{DeleteOutcome, InteractionRecord};

/// 分页查询
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogQuery {
    pub page: Option<u32>,
    pub page_size: Option<u32>,
}

/// 分页响应
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LogListResponse {
    pub total: u64,
    pub page: u32,
    pub page_size: u32,
    pub records: Vec<LogSummary>,
}

/// 列表中的单条记录摘要
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LogSummary {
    pub id: String,
    pub timestamp: String,
    pub method: String,
    pub path: String,
    pub model: Option<String>,
    pub stream: bool,
    pub status: Option<u16>,
    pub duration_ms: Option<u64>,
    pub error: Option<String>,
    pub input_tokens: Option<u64>,
    pub output_tokens: Option<u64>,
    pub agent_tag: Option<String>,
}

impl From<&InteractionRecord> for LogSummary {
    fn from(record: &InteractionRecord) -> Self {
        Self {
            id: record.id.clone(),
            timestamp: record.timestamp.clone(),
            method: record.method.clone(),
            path: record.path.clone(),
            model: record.model().map(str::to_string),
            stream: record.is_streamed(),
            status: record.status(),
            duration_ms: record.duration_ms,
            error: record.response.as_ref().and_then(|r| r.error.clone()),
            input_tokens: record.token_usage.as_ref().map(|u| u.input_tokens),
            output_tokens: record.token_usage.as_ref().map(|u| u.output_tokens),
            agent_tag: record.agent_tag.as_ref().map(|t| t.tag.clone()),
        }
    }
}

/// DELETE /api/logs 请求体
#[derive(Debug, Deserialize)]
pub struct DeleteLogsRequest {
    pub ids: Vec<String>,
}

/// DELETE /api/logs 响应
#[derive(Debug, Serialize)]
pub struct DeleteLogsResponse {
    pub results: Vec<DeleteOutcome>,
}

/// 统计响应
#[derive(Debug, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatsResponse {
    pub total_requests: u64,
    pub error_count: u64,
    pub error_rate: f64,
    pub avg_duration_ms: f64,
    pub total_input_tokens: u64,
    pub total_output_tokens: u64,
    pub total_tokens: u64,
    /// 尚未补齐 token 统计的记录数
    pub pending_metrics: u64,
    pub tags: BTreeMap<String, u64>,
    pub models: Vec<ModelStats>,
}

#[derive(Debug, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelStats {
    pub model: String,
    pub count: u64,
    pub total_input_tokens: u64,
    pub total_output_tokens: u64,
}

impl StatsResponse {
    /// 由全部记录汇总
    pub fn from_records<'a>(records: impl IntoIterator<Item = &'a InteractionRecord>) -> Self {
        let mut stats = StatsResponse::default();
        let mut models: BTreeMap<String, ModelStats> = BTreeMap::new();
        let mut duration_sum = 0u64;
        let mut duration_count = 0u64;

        for record in records {
            stats.total_requests += 1;
            if record.is_error() {
                stats.error_count += 1;
            }
            if let Some(ms) = record.duration_ms {
                duration_sum += ms;
                duration_count += 1;
            }
            if let Some(tag) = &record.agent_tag {
                *stats.tags.entry(tag.tag.clone()).or_default() += 1;
            }

            let model = models
                .entry(record.model().unwrap_or("unknown").to_string())
                .or_insert_with_key(|name| ModelStats {
                    model: name.clone(),
                    ..Default::default()
                });
            model.count += 1;

            match &record.token_usage {
                Some(usage) => {
                    stats.total_input_tokens += usage.input_tokens;
                    stats.total_output_tokens += usage.output_tokens;
                    stats.total_tokens += usage.total_tokens;
                    model.total_input_tokens += usage.input_tokens;
                    model.total_output_tokens += usage.output_tokens;
                }
                None if record.is_messages_call() && !record.is_error() => {
                    stats.pending_metrics += 1;
                }
                None => {}
            }
        }

        if stats.total_requests > 0 {
            stats.error_rate = stats.error_count as f64 / stats.total_requests as f64;
        }
        if duration_count > 0 {
            stats.avg_duration_ms = duration_sum as f64 / duration_count as f64;
        }
        stats.models = models.into_values().collect();
        stats.models.sort_by(|a, b| b.count.cmp(&a.count).then(a.model.cmp(&b.model)));
        stats
    }
}
