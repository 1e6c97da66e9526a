//! 调用方分类
//!
//! 按请求特征判定调用来自主 agent、子 agent 还是辅助调用，规则按顺序匹配：
//!
//! 1. `max_tokens == 1` → quota-check
//! 2. 最后一条 user 消息是会话压缩/总结指令 → compaction
//! 3. system 提到 title 且未声明工具 → title-generator
//! 4. 工具中包含 Task / Agent（可派生子 agent）→ main-agent
//! 5. 声明了其它工具 → sub-agent
//! 6. 其它 → utility

use crate::metrics::analyzer::Analyzer;
use crate::metrics::types::{AgentTag, AnalyzerResult, MetricField};
use crate::store::InteractionRecord;

use super::{last_user_message, message_text, system_text, tool_names};

/// 可派生子 agent 的工具名
const DISPATCH_TOOLS: &[&str] = &["Task", "Agent"];

/// 压缩指令特征（小写匹配）
const COMPACTION_MARKERS: &[&str] = &[
    "detailed summary of the conversation",
    "summary of the conversation so far",
    "summarize the conversation",
    "summarize this conversation",
    "compact the conversation",
];

pub struct AgentTagAnalyzer;

fn tag(tag: &str, reason: impl Into<String>) -> AgentTag {
    AgentTag {
        tag: tag.to_string(),
        reason: reason.into(),
    }
}

#[async_trait::async_trait]
impl Analyzer for AgentTagAnalyzer {
    fn name(&self) -> &'static str {
        "agent_tag"
    }

    fn field(&self) -> MetricField {
        MetricField::AgentTag
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

        if body.get("max_tokens").and_then(|v| v.as_u64()) == Some(1) {
            return Ok(Some(AnalyzerResult::AgentTag(tag("quota-check", "max_tokens = 1"))));
        }

        if let Some(message) = last_user_message(body) {
            let text = message_text(message).to_lowercase();
            if let Some(marker) = COMPACTION_MARKERS.iter().find(|m| text.contains(**m)) {
                return Ok(Some(AnalyzerResult::AgentTag(tag(
                    "compaction",
                    format!("user message contains \"{}\"", marker),
                ))));
            }
        }

        let tools = tool_names(body);
        let system = system_text(body).to_lowercase();

        let result = if tools.is_empty() && system.contains("title") {
            tag("title-generator", "system prompt mentions title, no tools")
        } else if let Some(dispatch) = tools.iter().find(|t| DISPATCH_TOOLS.contains(*t)) {
            tag("main-agent", format!("declares {} tool", dispatch))
        } else if !tools.is_empty() {
            tag("sub-agent", format!("{} tools, none dispatch agents", tools.len()))
        } else {
            tag("utility", "no tools declared")
        };

        Ok(Some(AnalyzerResult::AgentTag(result)))
    }
}
