//! 指标后台任务
//!
//! 三个触发源共用同一个幂等的 [`MetricsWorker::process`]：
//! 启动时全量扫描、文件系统变更通知、定期对账扫描。
//! 正确性由 pending 集合去重和注册表的跳过规则保证，任一触发源关闭只影响延迟。
//! 强制重算不跳过 pending 记录，而是等待正在进行的处理结束后再执行。

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use futures::{StreamExt, stream};
use notify::{EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::{OwnedMutexGuard, Semaphore, mpsc};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::store::LogStore;
use crate::store::file_store::id_from_path;

use super::analyzer::AnalyzerRegistry;
use super::types::MetricField;

/// 文件事件队列容量，溢出的事件由对账扫描兜底
const EVENT_QUEUE_CAPACITY: usize = 1024;

/// Worker 配置
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// 对账扫描间隔
    pub poll_interval: Duration,
    /// 跨记录并发上限
    pub max_concurrency: usize,
    /// 是否订阅文件系统通知
    pub watch: bool,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(30),
            max_concurrency: 4,
            watch: true,
        }
    }
}

/// 单条记录的处理结果
#[derive(Debug, Clone, PartialEq)]
pub enum ProcessOutcome {
    /// 写回了新字段
    Updated { fields: Vec<MetricField> },
    /// 无需写回
    Unchanged,
    /// 该记录正在被处理
    AlreadyPending,
    NotFound,
    Failed(String),
}

/// 一次扫描的汇总
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SweepSummary {
    pub total: usize,
    pub updated: usize,
    pub unchanged: usize,
    pub pending: usize,
    pub failed: usize,
}

impl SweepSummary {
    fn add(&mut self, outcome: &ProcessOutcome) {
        self.total += 1;
        match outcome {
            ProcessOutcome::Updated { .. } => self.updated += 1,
            ProcessOutcome::Unchanged | ProcessOutcome::NotFound => self.unchanged += 1,
            ProcessOutcome::AlreadyPending => self.pending += 1,
            ProcessOutcome::Failed(_) => self.failed += 1,
        }
    }
}

/// 正在处理的记录 ID → 处理期间一直被持有的锁
type PendingMap = Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>;

/// pending 集合中的占位，离开作用域时自动移除
struct PendingGuard<'a> {
    pending: &'a PendingMap,
    id: String,
    // 在 drop 中移除表项之后才释放，等待者醒来时表项已不存在
    _held: OwnedMutexGuard<()>,
}

impl<'a> PendingGuard<'a> {
    /// 记录已在处理中时返回 None
    fn try_acquire(pending: &'a PendingMap, id: &str) -> Option<Self> {
        let mut map = pending.lock();
        if map.contains_key(id) {
            return None;
        }
        let slot = Arc::new(tokio::sync::Mutex::new(()));
        let held = slot.clone().try_lock_owned().ok()?;
        map.insert(id.to_string(), slot);
        Some(Self {
            pending,
            id: id.to_string(),
            _held: held,
        })
    }

    /// 等待正在进行的处理结束后占位
    async fn acquire(pending: &'a PendingMap, id: &str) -> Self {
        loop {
            if let Some(guard) = Self::try_acquire(pending, id) {
                return guard;
            }
            let slot = pending.lock().get(id).cloned();
            if let Some(slot) = slot {
                drop(slot.lock_owned().await);
            }
        }
    }
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        self.pending.lock().remove(&self.id);
    }
}

/// 指标 worker，派生指标的唯一回写路径
pub struct MetricsWorker {
    store: LogStore,
    registry: Arc<AnalyzerRegistry>,
    pending: PendingMap,
    /// 扫描与变更通知共用的并发许可
    permits: Semaphore,
    config: WorkerConfig,
}

impl MetricsWorker {
    pub fn new(store: LogStore, registry: Arc<AnalyzerRegistry>, config: WorkerConfig) -> Self {
        Self {
            store,
            registry,
            pending: Mutex::new(HashMap::new()),
            permits: Semaphore::new(config.max_concurrency.max(1)),
            config,
        }
    }

    /// 处理单条记录：运行需要运行的 analyzer，合并新字段后最多写回一次
    ///
    /// `force` 为 true 时先清空全部派生字段，再整体替换；
    /// 记录正在处理时等待其完成，而不是跳过。
    pub async fn process(&self, id: &str, force: bool) -> ProcessOutcome {
        let Ok(_permit) = self.permits.acquire().await else {
            return ProcessOutcome::Failed("并发许可已关闭".to_string());
        };

        let _guard = if force {
            PendingGuard::acquire(&self.pending, id).await
        } else {
            match PendingGuard::try_acquire(&self.pending, id) {
                Some(guard) => guard,
                None => {
                    tracing::debug!(record_id = %id, "记录正在处理中，跳过");
                    return ProcessOutcome::AlreadyPending;
                }
            }
        };

        // 不读取重建后的 body，回写只带回派生字段
        let mut record = match self.store.read_stored(id).await {
            Ok(Some(record)) => record,
            Ok(None) => return ProcessOutcome::NotFound,
            Err(e) => {
                tracing::warn!(record_id = %id, "读取记录失败，本轮跳过: {}", e);
                return ProcessOutcome::Failed(e.to_string());
            }
        };

        let original = force.then(|| record.clone());
        if force {
            record.clear_metrics();
        } else if self.registry.missing_fields(&record).is_empty() {
            return ProcessOutcome::Unchanged;
        }

        let report = self.registry.run(&record, force).await;
        for failure in &report.failures {
            tracing::debug!(
                record_id = %id,
                analyzer = failure.analyzer,
                "analyzer 失败: {}",
                failure.error
            );
        }

        let mut fields = Vec::new();
        for result in report.results {
            let field = result.field();
            if record.apply_result(result) {
                fields.push(field);
            }
        }

        let changed = match &original {
            Some(original) => *original != record,
            None => !fields.is_empty(),
        };
        if !changed {
            return ProcessOutcome::Unchanged;
        }

        match self.store.update(id, record).await {
            Ok(true) => {}
            Ok(false) => {
                tracing::debug!(record_id = %id, "记录已被删除，放弃写回");
                return ProcessOutcome::NotFound;
            }
            Err(e) => {
                tracing::error!(record_id = %id, "写回指标失败: {}", e);
                return ProcessOutcome::Failed(e.to_string());
            }
        }

        tracing::debug!(record_id = %id, ?fields, "指标已写回");
        ProcessOutcome::Updated { fields }
    }

    /// 扫描全部记录（与变更通知共享 max_concurrency 个许可）
    pub async fn sweep(&self, force: bool) -> SweepSummary {
        let ids = match self.store.list().await {
            Ok(ids) => ids,
            Err(e) => {
                tracing::error!("列出记录失败: {}", e);
                return SweepSummary::default();
            }
        };

        let outcomes: Vec<ProcessOutcome> = stream::iter(ids)
            .map(|id| async move { self.process(&id, force).await })
            .buffer_unordered(self.config.max_concurrency.max(1))
            .collect()
            .await;

        let mut summary = SweepSummary::default();
        for outcome in &outcomes {
            summary.add(outcome);
        }
        summary
    }

    /// 强制重算全部记录
    pub async fn recompute_all(&self) -> SweepSummary {
        tracing::info!("开始强制重算全部记录指标");
        let summary = self.sweep(true).await;
        tracing::info!(
            total = summary.total,
            updated = summary.updated,
            failed = summary.failed,
            "强制重算完成"
        );
        summary
    }

    /// 启动后台循环，直到 `shutdown` 被取消
    pub fn start(self: Arc<Self>, shutdown: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move { self.run(shutdown).await })
    }

    async fn run(self: Arc<Self>, shutdown: CancellationToken) {
        let summary = self.sweep(false).await;
        tracing::info!(
            total = summary.total,
            updated = summary.updated,
            failed = summary.failed,
            "启动扫描完成"
        );

        let (tx, mut rx) = mpsc::channel::<String>(EVENT_QUEUE_CAPACITY);
        let _watcher = if self.config.watch {
            match self.watch(tx.clone()) {
                Ok(watcher) => Some(watcher),
                Err(e) => {
                    tracing::warn!("文件监听启动失败，仅依赖定期扫描: {}", e);
                    None
                }
            }
        } else {
            None
        };

        let mut ticker = tokio::time::interval(self.config.poll_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        // 首个 tick 立即返回，启动扫描已覆盖
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    tracing::info!("指标 worker 已停止");
                    break;
                }
                _ = ticker.tick() => {
                    let summary = tokio::select! {
                        summary = self.sweep(false) => summary,
                        _ = shutdown.cancelled() => {
                            tracing::info!("指标 worker 已停止");
                            break;
                        }
                    };
                    if summary.updated > 0 || summary.failed > 0 {
                        tracing::info!(
                            updated = summary.updated,
                            failed = summary.failed,
                            "对账扫描完成"
                        );
                    }
                }
                Some(id) = rx.recv() => {
                    // 许可在任务内获取，主循环不因并发已满而阻塞
                    let worker = self.clone();
                    tokio::spawn(async move {
                        if let ProcessOutcome::Updated { fields } = worker.process(&id, false).await {
                            tracing::debug!(record_id = %id, ?fields, "变更通知触发的指标计算完成");
                        }
                    });
                }
            }
        }

        drop(tx);
    }

    /// 订阅日志目录的创建/修改事件，事件经有界队列转交主循环
    fn watch(&self, tx: mpsc::Sender<String>) -> notify::Result<RecommendedWatcher> {
        let mut watcher = notify::recommended_watcher(move |res: notify::Result<notify::Event>| {
            let event = match res {
                Ok(event) => event,
                Err(e) => {
                    tracing::warn!("文件监听错误: {}", e);
                    return;
                }
            };
            if !matches!(event.kind, EventKind::Create(_) | EventKind::Modify(_)) {
                return;
            }
            for path in &event.paths {
                if let Some(id) = id_from_path(path)
                    && tx.try_send(id).is_err()
                {
                    tracing::debug!(path = %path.display(), "事件队列已满，留待对账扫描");
                }
            }
        })?;
        watcher.watch(self.store.dir(), RecursiveMode::NonRecursive)?;
        tracing::info!(dir = %self.store.dir().display(), "已开始监听日志目录");
        Ok(watcher)
    }
}
