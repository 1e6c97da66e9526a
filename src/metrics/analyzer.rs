//! Analyzer 注册表
//!
//! analyzer 只负责计算；是否需要运行由注册表统一判定：
//! 记录上已有对应字段且未强制重算时跳过，避免每轮重复计算（部分 analyzer 会调用外部 API）。

use std::sync::Arc;

use crate::store::InteractionRecord;

use super::types::{AnalyzerResult, MetricField};

/// 派生指标计算器
///
/// 实现必须幂等且无副作用，唯一输出是返回值。
#[async_trait::async_trait]
pub trait Analyzer: Send + Sync {
    /// 名称（用于日志）
    fn name(&self) -> &'static str;

    /// 该 analyzer 独占的记录字段
    fn field(&self) -> MetricField;

    /// 廉价的适用性判断；不适用的记录不计入“缺失指标”
    fn applies_to(&self, _record: &InteractionRecord) -> bool {
        true
    }

    /// 计算指标；`Ok(None)` 表示不适用，不是错误
    async fn analyze(&self, record: &InteractionRecord) -> anyhow::Result<Option<AnalyzerResult>>;
}

/// 单个 analyzer 的失败
#[derive(Debug, Clone)]
pub struct AnalyzerFailure {
    pub analyzer: &'static str,
    pub error: String,
}

/// 一次注册表运行的结果
#[derive(Debug, Default)]
pub struct AnalysisReport {
    /// 新产出的字段值
    pub results: Vec<AnalyzerResult>,
    /// 实际被调用的 analyzer
    pub invoked: Vec<&'static str>,
    /// 因字段已存在而跳过的 analyzer
    pub skipped: Vec<&'static str>,
    pub failures: Vec<AnalyzerFailure>,
}

/// Analyzer 注册表（显式构造后注入 worker）
#[derive(Default)]
pub struct AnalyzerRegistry {
    analyzers: Vec<Arc<dyn Analyzer>>,
}

impl AnalyzerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// 注册 analyzer；同一字段只能有一个所有者
    pub fn register(&mut self, analyzer: Arc<dyn Analyzer>) -> anyhow::Result<()> {
        if let Some(existing) = self
            .analyzers
            .iter()
            .find(|a| a.field() == analyzer.field())
        {
            anyhow::bail!(
                "字段 {} 已由 analyzer {} 负责，无法注册 {}",
                analyzer.field(),
                existing.name(),
                analyzer.name()
            );
        }
        tracing::debug!(analyzer = analyzer.name(), field = %analyzer.field(), "注册 analyzer");
        self.analyzers.push(analyzer);
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.analyzers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.analyzers.is_empty()
    }

    /// 适用但字段仍缺失的指标
    pub fn missing_fields(&self, record: &InteractionRecord) -> Vec<MetricField> {
        self.analyzers
            .iter()
            .filter(|a| a.applies_to(record) && !record.has_field(a.field()))
            .map(|a| a.field())
            .collect()
    }

    /// 对一条记录运行所有需要运行的 analyzer
    ///
    /// 单个 analyzer 出错只记录失败，不影响其它 analyzer。
    pub async fn run(&self, record: &InteractionRecord, force: bool) -> AnalysisReport {
        let mut report = AnalysisReport::default();

        for analyzer in &self.analyzers {
            if !analyzer.applies_to(record) {
                continue;
            }
            if !force && record.has_field(analyzer.field()) {
                report.skipped.push(analyzer.name());
                continue;
            }

            report.invoked.push(analyzer.name());
            match analyzer.analyze(record).await {
                Ok(Some(result)) if result.field() == analyzer.field() => {
                    report.results.push(result);
                }
                Ok(Some(result)) => report.failures.push(AnalyzerFailure {
                    analyzer: analyzer.name(),
                    error: format!(
                        "产出字段 {} 与声明字段 {} 不一致",
                        result.field(),
                        analyzer.field()
                    ),
                }),
                Ok(None) => {}
                Err(e) => {
                    tracing::warn!(
                        analyzer = analyzer.name(),
                        record_id = %record.id,
                        "analyzer 执行失败: {:#}",
                        e
                    );
                    report.failures.push(AnalyzerFailure {
                        analyzer: analyzer.name(),
                        error: format!("{:#}", e),
                    });
                }
            }
        }

        report
    }
}
