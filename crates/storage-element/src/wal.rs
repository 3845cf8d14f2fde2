use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use serde_json::Value;
use storage_domain::{WalEntry, WalOperation, WalStatus};
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::error::SeError;

/// Durable log of in-flight bytes/sidecar/cache mutations for the
/// attribute-first write protocol. One entry per transaction, keyed by
/// `transaction_id`; a crash between `begin` and `commit` leaves an entry a
/// future consistency check or restart-time recovery can see and roll back.
#[async_trait]
pub trait WriteAheadLog: Send + Sync {
    async fn begin(&self, operation: WalOperation, payload: Value) -> Result<WalEntry, SeError>;
    async fn mark_committed(&self, transaction_id: Uuid) -> Result<(), SeError>;
    async fn mark_rolled_back(&self, transaction_id: Uuid) -> Result<(), SeError>;
    async fn get(&self, transaction_id: Uuid) -> Result<Option<WalEntry>, SeError>;
    async fn list_pending(&self) -> Result<Vec<WalEntry>, SeError>;
}

/// One JSON file per transaction under `{wal_dir}/wal_{transaction_id}.json`,
/// overwritten on every status transition. Suitable for a single SE
/// process; an in-memory variant below covers ephemeral tests.
pub struct FileWal {
    dir: PathBuf,
}

impl FileWal {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn path_for(&self, id: Uuid) -> PathBuf {
        self.dir.join(format!("wal_{id}.json"))
    }

    async fn write_entry(&self, entry: &WalEntry) -> Result<(), SeError> {
        tokio::fs::create_dir_all(&self.dir)
            .await
            .map_err(|e| SeError::Internal(format!("wal dir: {e}")))?;
        let bytes = serde_json::to_vec_pretty(entry)
            .map_err(|e| SeError::Internal(format!("wal encode: {e}")))?;
        let path = self.path_for(entry.transaction_id);
        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, &bytes)
            .await
            .map_err(|e| SeError::Internal(format!("wal write: {e}")))?;
        tokio::fs::rename(&tmp, &path)
            .await
            .map_err(|e| SeError::Internal(format!("wal rename: {e}")))?;
        Ok(())
    }

    async fn read_entry(&self, path: &Path) -> Result<WalEntry, SeError> {
        let bytes = tokio::fs::read(path)
            .await
            .map_err(|e| SeError::Internal(format!("wal read: {e}")))?;
        serde_json::from_slice(&bytes).map_err(|e| SeError::Internal(format!("wal decode: {e}")))
    }
}

#[async_trait]
impl WriteAheadLog for FileWal {
    async fn begin(&self, operation: WalOperation, payload: Value) -> Result<WalEntry, SeError> {
        let entry = WalEntry::begin(operation, payload, Utc::now());
        self.write_entry(&entry).await?;
        Ok(entry)
    }

    async fn mark_committed(&self, transaction_id: Uuid) -> Result<(), SeError> {
        let mut entry = self
            .get(transaction_id)
            .await?
            .ok_or_else(|| SeError::Internal(format!("unknown wal transaction {transaction_id}")))?;
        entry.status = WalStatus::Committed;
        entry.committed_at = Some(Utc::now());
        self.write_entry(&entry).await
    }

    async fn mark_rolled_back(&self, transaction_id: Uuid) -> Result<(), SeError> {
        let mut entry = self
            .get(transaction_id)
            .await?
            .ok_or_else(|| SeError::Internal(format!("unknown wal transaction {transaction_id}")))?;
        entry.status = WalStatus::RolledBack;
        self.write_entry(&entry).await
    }

    async fn get(&self, transaction_id: Uuid) -> Result<Option<WalEntry>, SeError> {
        let path = self.path_for(transaction_id);
        if !path.exists() {
            return Ok(None);
        }
        Ok(Some(self.read_entry(&path).await?))
    }

    async fn list_pending(&self) -> Result<Vec<WalEntry>, SeError> {
        let mut out = Vec::new();
        let mut rd = match tokio::fs::read_dir(&self.dir).await {
            Ok(rd) => rd,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(out),
            Err(e) => return Err(SeError::Internal(format!("wal scan: {e}"))),
        };
        while let Some(entry) = rd
            .next_entry()
            .await
            .map_err(|e| SeError::Internal(format!("wal scan: {e}")))?
        {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let wal_entry = self.read_entry(&path).await?;
            if matches!(wal_entry.status, WalStatus::Pending | WalStatus::InProgress) {
                out.push(wal_entry);
            }
        }
        Ok(out)
    }
}

/// In-memory WAL for ephemeral tests.
#[derive(Default)]
pub struct InMemoryWal {
    entries: Arc<Mutex<HashMap<Uuid, WalEntry>>>,
}

impl InMemoryWal {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl WriteAheadLog for InMemoryWal {
    async fn begin(&self, operation: WalOperation, payload: Value) -> Result<WalEntry, SeError> {
        let entry = WalEntry::begin(operation, payload, Utc::now());
        self.entries.lock().await.insert(entry.transaction_id, entry.clone());
        Ok(entry)
    }

    async fn mark_committed(&self, transaction_id: Uuid) -> Result<(), SeError> {
        let mut guard = self.entries.lock().await;
        let entry = guard
            .get_mut(&transaction_id)
            .ok_or_else(|| SeError::Internal(format!("unknown wal transaction {transaction_id}")))?;
        entry.status = WalStatus::Committed;
        entry.committed_at = Some(Utc::now());
        Ok(())
    }

    async fn mark_rolled_back(&self, transaction_id: Uuid) -> Result<(), SeError> {
        let mut guard = self.entries.lock().await;
        let entry = guard
            .get_mut(&transaction_id)
            .ok_or_else(|| SeError::Internal(format!("unknown wal transaction {transaction_id}")))?;
        entry.status = WalStatus::RolledBack;
        Ok(())
    }

    async fn get(&self, transaction_id: Uuid) -> Result<Option<WalEntry>, SeError> {
        Ok(self.entries.lock().await.get(&transaction_id).cloned())
    }

    async fn list_pending(&self) -> Result<Vec<WalEntry>, SeError> {
        Ok(self
            .entries
            .lock()
            .await
            .values()
            .filter(|e| matches!(e.status, WalStatus::Pending | WalStatus::InProgress))
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn file_wal_round_trips_through_commit() {
        let dir = tempfile::tempdir().unwrap();
        let wal = FileWal::new(dir.path());
        let entry = wal.begin(WalOperation::Upload, json!({"file_id": "f1"})).await.unwrap();
        assert_eq!(entry.status, WalStatus::Pending);
        wal.mark_committed(entry.transaction_id).await.unwrap();
        let reloaded = wal.get(entry.transaction_id).await.unwrap().unwrap();
        assert_eq!(reloaded.status, WalStatus::Committed);
        assert!(reloaded.committed_at.is_some());
    }

    #[tokio::test]
    async fn pending_list_excludes_committed() {
        let dir = tempfile::tempdir().unwrap();
        let wal = FileWal::new(dir.path());
        let pending = wal.begin(WalOperation::Upload, json!({})).await.unwrap();
        let done = wal.begin(WalOperation::Delete, json!({})).await.unwrap();
        wal.mark_committed(done.transaction_id).await.unwrap();
        let still_pending = wal.list_pending().await.unwrap();
        assert_eq!(still_pending.len(), 1);
        assert_eq!(still_pending[0].transaction_id, pending.transaction_id);
    }

    #[tokio::test]
    async fn in_memory_wal_rollback() {
        let wal = InMemoryWal::new();
        let entry = wal.begin(WalOperation::Delete, json!({})).await.unwrap();
        wal.mark_rolled_back(entry.transaction_id).await.unwrap();
        let reloaded = wal.get(entry.transaction_id).await.unwrap().unwrap();
        assert_eq!(reloaded.status, WalStatus::RolledBack);
    }
}
