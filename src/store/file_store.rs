//! 交互记录文件存储
//!
//! 每条记录一个 `<id>.json` 文件：
//! - 写入先落临时文件再 rename，读者不会看到半写入的内容
//! - 读取时补全旧记录（缺失的 id、未重建的流式 body）
//! - 指标回写只更新仍存在的文件，与删除互斥，已删除的记录不会被复活
//! - 同步实现 + `spawn_blocking` 异步外观

use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::Mutex;
use serde::Serialize;

use super::model::InteractionRecord;
use crate::stream::StreamReconstructor;

/// 存储错误
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("非法的记录 ID: {0}")]
    InvalidId(String),
    #[error("记录 {id} 已损坏: {source}")]
    Corrupt {
        id: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("序列化记录失败: {0}")]
    Serialize(#[source] serde_json::Error),
    #[error("文件读写失败: {0}")]
    Io(#[from] std::io::Error),
    #[error("后台任务失败: {0}")]
    Task(String),
}

/// 单个 ID 的删除结果
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeleteOutcome {
    pub id: String,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// 校验 ID，只允许字母数字、`-`、`_`、`.`，且不能以 `.` 开头
pub fn validate_id(id: &str) -> Result<(), StoreError> {
    let valid = !id.is_empty()
        && id.len() <= 128
        && !id.starts_with('.')
        && id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.');
    if valid {
        Ok(())
    } else {
        Err(StoreError::InvalidId(id.to_string()))
    }
}

/// 从记录文件路径提取 ID（临时文件、隐藏文件返回 None）
pub fn id_from_path(path: &Path) -> Option<String> {
    if path.extension().and_then(|e| e.to_str()) != Some("json") {
        return None;
    }
    let stem = path.file_stem()?.to_str()?;
    validate_id(stem).ok()?;
    Some(stem.to_string())
}

/// 读取时补全旧记录，返回是否做了修改
pub fn hydrate(record: &mut InteractionRecord, id: &str) -> bool {
    let mut changed = false;

    if record.id.is_empty() {
        record.id = id.to_string();
        changed = true;
    }

    if let Some(response) = record.response.as_mut() {
        if response.body.is_none() {
            if let Some(chunks) = response.stream_chunks.as_ref() {
                let (message, warnings) = StreamReconstructor::rebuild(chunks.as_slice());
                if !warnings.is_empty() {
                    tracing::debug!(id = %id, warnings = ?warnings, "重建流式响应时出现警告");
                }
                response.body = Some(message.to_value());
                changed = true;
            }
        }
    }

    changed
}

/// 底层文件存储（同步）
#[derive(Debug)]
struct FileStore {
    dir: PathBuf,
    /// rename 与 remove 串行，保证删除后不会被回写复活
    mutation: Mutex<()>,
}

impl FileStore {
    fn path_for(&self, id: &str) -> Result<PathBuf, StoreError> {
        validate_id(id)?;
        Ok(self.dir.join(format!("{}.json", id)))
    }

    /// 先写临时文件，再 rename 到 `<id>.json`
    fn replace(&self, id: &str, path: &Path, record: &InteractionRecord) -> Result<(), StoreError> {
        let json = serde_json::to_vec_pretty(record).map_err(StoreError::Serialize)?;

        let tmp_path = self
            .dir
            .join(format!(".{}.{}.tmp", id, uuid::Uuid::new_v4().simple()));
        std::fs::write(&tmp_path, json)?;
        if let Err(e) = std::fs::rename(&tmp_path, path) {
            let _ = std::fs::remove_file(&tmp_path);
            return Err(e.into());
        }
        Ok(())
    }

    fn write(&self, record: &InteractionRecord) -> Result<(), StoreError> {
        let path = self.path_for(&record.id)?;
        let _lock = self.mutation.lock();
        self.replace(&record.id, &path, record)
    }

    /// 仅当 `<id>.json` 仍存在时替换，返回是否写入
    fn update(&self, id: &str, record: &InteractionRecord) -> Result<bool, StoreError> {
        let path = self.path_for(id)?;
        let _lock = self.mutation.lock();
        if !path.is_file() {
            return Ok(false);
        }
        self.replace(id, &path, record)?;
        Ok(true)
    }

    /// 读取并反序列化，只补全缺失的 id
    fn load(&self, id: &str) -> Result<Option<InteractionRecord>, StoreError> {
        let path = self.path_for(id)?;
        let content = match std::fs::read(&path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        let mut record: InteractionRecord =
            serde_json::from_slice(&content).map_err(|source| StoreError::Corrupt {
                id: id.to_string(),
                source,
            })?;
        if record.id.is_empty() {
            record.id = id.to_string();
        }
        Ok(Some(record))
    }

    fn read(&self, id: &str) -> Result<Option<InteractionRecord>, StoreError> {
        let mut record = self.load(id)?;
        if let Some(record) = record.as_mut() {
            hydrate(record, id);
        }
        Ok(record)
    }

    /// ID 列表，最新的在前（ID 以时间戳开头）
    fn list(&self) -> Result<Vec<String>, StoreError> {
        let mut ids: Vec<String> = std::fs::read_dir(&self.dir)?
            .flatten()
            .filter(|entry| entry.file_type().map(|t| t.is_file()).unwrap_or(false))
            .filter_map(|entry| id_from_path(&entry.path()))
            .collect();
        ids.sort_unstable_by(|a, b| b.cmp(a));
        Ok(ids)
    }

    fn delete(&self, ids: &[String]) -> Vec<DeleteOutcome> {
        ids.iter()
            .map(|id| {
                let result = self.path_for(id).and_then(|path| {
                    let _lock = self.mutation.lock();
                    std::fs::remove_file(path).map_err(StoreError::from)
                });
                match result {
                    Ok(()) => DeleteOutcome {
                        id: id.clone(),
                        success: true,
                        error: None,
                    },
                    Err(StoreError::Io(e)) if e.kind() == std::io::ErrorKind::NotFound => {
                        DeleteOutcome {
                            id: id.clone(),
                            success: false,
                            error: Some("记录不存在".to_string()),
                        }
                    }
                    Err(e) => DeleteOutcome {
                        id: id.clone(),
                        success: false,
                        error: Some(e.to_string()),
                    },
                }
            })
            .collect()
    }
}

/// 交互记录存储（公开异步 API）
#[derive(Debug, Clone)]
pub struct LogStore {
    inner: Arc<FileStore>,
}

impl LogStore {
    /// 打开存储目录，不存在时创建
    pub fn open(dir: impl Into<PathBuf>) -> anyhow::Result<Self> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)
            .map_err(|e| anyhow::anyhow!("创建日志目录失败 {}: {}", dir.display(), e))?;
        Ok(Self {
            inner: Arc::new(FileStore {
                dir,
                mutation: Mutex::new(()),
            }),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.inner.dir
    }

    /// 整体替换写入
    pub async fn write(&self, record: InteractionRecord) -> Result<(), StoreError> {
        let store = self.inner.clone();
        tokio::task::spawn_blocking(move || store.write(&record))
            .await
            .map_err(|e| StoreError::Task(e.to_string()))?
    }

    /// 读取并补全记录；不存在返回 None
    pub async fn read(&self, id: &str) -> Result<Option<InteractionRecord>, StoreError> {
        let store = self.inner.clone();
        let id = id.to_string();
        tokio::task::spawn_blocking(move || store.read(&id))
            .await
            .map_err(|e| StoreError::Task(e.to_string()))?
    }

    /// 读取磁盘上的原样记录，不重建流式 body（回写前使用）
    pub async fn read_stored(&self, id: &str) -> Result<Option<InteractionRecord>, StoreError> {
        let store = self.inner.clone();
        let id = id.to_string();
        tokio::task::spawn_blocking(move || store.load(&id))
            .await
            .map_err(|e| StoreError::Task(e.to_string()))?
    }

    /// 回写到 `<id>.json`；文件已被删除时不写入并返回 false
    pub async fn update(&self, id: &str, record: InteractionRecord) -> Result<bool, StoreError> {
        let store = self.inner.clone();
        let id = id.to_string();
        tokio::task::spawn_blocking(move || store.update(&id, &record))
            .await
            .map_err(|e| StoreError::Task(e.to_string()))?
    }

    pub async fn list(&self) -> Result<Vec<String>, StoreError> {
        let store = self.inner.clone();
        tokio::task::spawn_blocking(move || store.list())
            .await
            .map_err(|e| StoreError::Task(e.to_string()))?
    }

    pub async fn delete(&self, ids: Vec<String>) -> Result<Vec<DeleteOutcome>, StoreError> {
        let store = self.inner.clone();
        let outcomes = tokio::task::spawn_blocking(move || store.delete(&ids))
            .await
            .map_err(|e| StoreError::Task(e.to_string()))?;

        let deleted = outcomes.iter().filter(|o| o.success).count();
        if deleted > 0 {
            tracing::info!(deleted = deleted, requested = outcomes.len(), "已删除交互记录");
        }
        Ok(outcomes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::model::RecordedResponse;

    fn open_temp() -> (tempfile::TempDir, LogStore) {
        let dir = tempfile::TempDir::new().unwrap();
        let store = LogStore::open(dir.path()).unwrap();
        (dir, store)
    }

    fn sample(id: &str) -> InteractionRecord {
        let mut record = InteractionRecord::new(id, "POST", "/v1/messages", None);
        record.response = Some(RecordedResponse {
            status: 200,
            body: Some(serde_json::json!({"content": []})),
            ..Default::default()
        });
        record
    }

    #[tokio::test]
    async fn test_write_then_read() {
        let (_dir, store) = open_temp();
        let record = sample("20260101T000000000_aaaa");
        store.write(record.clone()).await.unwrap();

        let loaded = store.read(&record.id).await.unwrap().unwrap();
        assert_eq!(loaded, record);
        assert!(store.read("missing").await.unwrap().is_none());
    }

    /// 写入不留下临时文件，重复写入整体替换
    #[tokio::test]
    async fn test_write_replaces_and_leaves_no_temp_files() {
        let (dir, store) = open_temp();
        let mut record = sample("r1");
        store.write(record.clone()).await.unwrap();
        record.duration_ms = Some(99);
        store.write(record.clone()).await.unwrap();

        let names: Vec<String> = std::fs::read_dir(dir.path())
            .unwrap()
            .flatten()
            .map(|e| e.file_name().to_string_lossy().to_string())
            .collect();
        assert_eq!(names, vec!["r1.json".to_string()]);
        assert_eq!(store.read("r1").await.unwrap().unwrap().duration_ms, Some(99));
    }

    #[tokio::test]
    async fn test_list_newest_first_and_ignores_other_files() {
        let (dir, store) = open_temp();
        for id in ["20260101T000000000_a", "20260301T000000000_c", "20260201T000000000_b"] {
            store.write(sample(id)).await.unwrap();
        }
        std::fs::write(dir.path().join("notes.txt"), "x").unwrap();
        std::fs::write(dir.path().join(".half.json.tmp"), "{").unwrap();

        let ids = store.list().await.unwrap();
        assert_eq!(
            ids,
            vec![
                "20260301T000000000_c",
                "20260201T000000000_b",
                "20260101T000000000_a"
            ]
        );
    }

    #[tokio::test]
    async fn test_delete_reports_per_id() {
        let (_dir, store) = open_temp();
        store.write(sample("keep")).await.unwrap();
        store.write(sample("drop")).await.unwrap();

        let outcomes = store
            .delete(vec!["drop".to_string(), "nope".to_string(), "../etc".to_string()])
            .await
            .unwrap();
        assert!(outcomes[0].success);
        assert!(!outcomes[1].success);
        assert!(!outcomes[2].success);
        assert_eq!(store.list().await.unwrap(), vec!["keep"]);
    }

    #[tokio::test]
    async fn test_invalid_ids_rejected() {
        let (_dir, store) = open_temp();
        for bad in ["", "../x", "a/b", ".hidden", "a\\b"] {
            assert!(matches!(
                store.read(bad).await,
                Err(StoreError::InvalidId(_))
            ));
        }
    }

    #[tokio::test]
    async fn test_corrupt_file_is_error() {
        let (dir, store) = open_temp();
        std::fs::write(dir.path().join("broken.json"), "{\"method\": ").unwrap();
        assert!(matches!(
            store.read("broken").await,
            Err(StoreError::Corrupt { .. })
        ));
    }

    /// 旧记录：只有 streamChunks、没有 id 和 body，读取时补全
    #[tokio::test]
    async fn test_read_hydrates_legacy_stream_record() {
        let (dir, store) = open_temp();
        let legacy = serde_json::json!({
            "timestamp": "2026-01-01T00:00:00Z",
            "method": "POST",
            "path": "/v1/messages",
            "request": {"headers": {}},
            "response": {
                "status": 200,
                "headers": {},
                "streamChunks": [
                    "event: content_block_start\ndata: {\"type\":\"content_block_start\",\"index\":0,\"content_block\":{\"type\":\"text\",\"text\":\"\"}}\n\n",
                    "event: content_block_delta\ndata: {\"type\":\"content_block_delta\",\"index\":0,\"delta\":{\"type\":\"text_delta\",\"text\":\"Hi\"}}\n\n",
                    "event: content_block_stop\ndata: {\"type\":\"content_block_stop\",\"index\":0}\n\n"
                ]
            }
        });
        std::fs::write(
            dir.path().join("legacy.json"),
            serde_json::to_string(&legacy).unwrap(),
        )
        .unwrap();

        let record = store.read("legacy").await.unwrap().unwrap();
        assert_eq!(record.id, "legacy");
        let body = record.response.unwrap().body.unwrap();
        assert_eq!(
            body["content"],
            serde_json::json!([{"type": "text", "text": "Hi"}])
        );
    }

    #[tokio::test]
    async fn test_update_does_not_resurrect_deleted_record() {
        let (dir, store) = open_temp();
        let record = sample("gone");
        store.write(record.clone()).await.unwrap();
        store.delete(vec!["gone".to_string()]).await.unwrap();

        assert!(!store.update("gone", record).await.unwrap());
        assert!(!dir.path().join("gone.json").exists());
        assert!(store.read("gone").await.unwrap().is_none());
    }

    /// 文件内 id 与文件名不一致时，回写落在被读取的文件上
    #[tokio::test]
    async fn test_update_targets_file_that_was_read() {
        let (dir, store) = open_temp();
        let mut record = sample("inner");
        std::fs::write(
            dir.path().join("outer.json"),
            serde_json::to_vec(&record).unwrap(),
        )
        .unwrap();

        record.duration_ms = Some(5);
        assert!(store.update("outer", record).await.unwrap());
        assert_eq!(store.list().await.unwrap(), vec!["outer"]);
        assert_eq!(
            store.read("outer").await.unwrap().unwrap().duration_ms,
            Some(5)
        );
    }

    #[tokio::test]
    async fn test_read_stored_skips_body_reconstruction() {
        let (dir, store) = open_temp();
        let legacy = serde_json::json!({
            "timestamp": "2026-01-01T00:00:00Z",
            "method": "POST",
            "path": "/v1/messages",
            "request": {"headers": {}},
            "response": {"status": 200, "headers": {}, "streamChunks": []}
        });
        std::fs::write(
            dir.path().join("raw.json"),
            serde_json::to_string(&legacy).unwrap(),
        )
        .unwrap();

        let record = store.read_stored("raw").await.unwrap().unwrap();
        assert_eq!(record.id, "raw");
        assert!(record.response.unwrap().body.is_none());
    }

    #[test]
    fn test_id_from_path() {
        assert_eq!(
            id_from_path(Path::new("/logs/abc_1.json")),
            Some("abc_1".to_string())
        );
        assert_eq!(id_from_path(Path::new("/logs/.abc.123.tmp")), None);
        assert_eq!(id_from_path(Path::new("/logs/abc.txt")), None);
    }
}
