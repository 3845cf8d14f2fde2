use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use storage_domain::{FileEvent, FileId, SeId};
use tokio::sync::RwLock;
use tracing::warn;

/// One file as Query currently believes it to be, built up entirely from the
/// `file-events` stream — Query never reads Admin's registry directly.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheEntry {
    pub file_id: FileId,
    pub storage_element_id: SeId,
    pub metadata: Option<serde_json::Value>,
    pub updated_at: DateTime<Utc>,
    pub deleted: bool,
}

/// Local read cache kept in sync by [`crate::consumer::EventConsumer`].
/// Idempotency is enforced on `FileEvent::dedup_key()`: a redelivered event
/// (from XCLAIM after a crash mid-handler) is a silent no-op rather than
/// reapplying its effect.
#[derive(Default)]
pub struct Cache {
    entries: RwLock<HashMap<FileId, CacheEntry>>,
    applied: RwLock<HashSet<String>>,
}

impl Cache {
    pub fn new() -> Self {
        Cache::default()
    }

    pub async fn get(&self, file_id: &FileId) -> Option<CacheEntry> {
        self.entries.read().await.get(file_id).cloned()
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn all(&self) -> Vec<CacheEntry> {
        self.entries.read().await.values().cloned().collect()
    }

    /// Applies `event` to the cache. Returns `false` for a duplicate
    /// delivery (already applied dedup key), in which case the caller still
    /// acks the stream entry — a duplicate is not a handler failure.
    pub async fn apply(&self, event: &FileEvent) -> bool {
        let key = event.dedup_key();
        {
            let mut applied = self.applied.write().await;
            if !applied.insert(key) {
                return false;
            }
        }

        let mut entries = self.entries.write().await;
        match event {
            FileEvent::Created { file_id, storage_element_id, metadata, timestamp }
            | FileEvent::Updated { file_id, storage_element_id, metadata, timestamp } => {
                entries.insert(
                    *file_id,
                    CacheEntry {
                        file_id: *file_id,
                        storage_element_id: storage_element_id.clone(),
                        metadata: metadata.clone(),
                        updated_at: *timestamp,
                        deleted: false,
                    },
                );
            }
            FileEvent::Deleted { file_id, storage_element_id, metadata, timestamp } => {
                entries.insert(
                    *file_id,
                    CacheEntry {
                        file_id: *file_id,
                        storage_element_id: storage_element_id.clone(),
                        metadata: metadata.clone(),
                        updated_at: *timestamp,
                        deleted: true,
                    },
                );
            }
        }
        true
    }

    fn snapshot_path(dir: &Path) -> PathBuf {
        dir.join("query_cache_snapshot.json")
    }

    /// Warm-start snapshot: lets Query serve reads immediately after a
    /// restart instead of blocking until the full stream backlog replays.
    /// The stream itself remains the source of truth — a missing or corrupt
    /// snapshot just means starting from an empty cache.
    pub async fn load_snapshot(&self, dir: &Path) {
        let path = Self::snapshot_path(dir);
        let bytes = match tokio::fs::read(&path).await {
            Ok(b) => b,
            Err(_) => return,
        };
        match serde_json::from_slice::<Vec<CacheEntry>>(&bytes) {
            Ok(rows) => {
                let mut entries = self.entries.write().await;
                for row in rows {
                    entries.insert(row.file_id, row);
                }
            }
            Err(e) => warn!(error = %e, path = %path.display(), "discarding unreadable cache snapshot"),
        }
    }

    pub async fn save_snapshot(&self, dir: &Path) {
        if let Err(e) = tokio::fs::create_dir_all(dir).await {
            warn!(error = %e, dir = %dir.display(), "could not create cache snapshot directory");
            return;
        }
        let rows: Vec<CacheEntry> = self.entries.read().await.values().cloned().collect();
        let bytes = match serde_json::to_vec(&rows) {
            Ok(b) => b,
            Err(e) => {
                warn!(error = %e, "failed to serialize cache snapshot");
                return;
            }
        };
        if let Err(e) = tokio::fs::write(Self::snapshot_path(dir), bytes).await {
            warn!(error = %e, dir = %dir.display(), "failed to write cache snapshot");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn created(file_id: FileId, se: &str, ts: DateTime<Utc>) -> FileEvent {
        FileEvent::Created { file_id, storage_element_id: SeId::new(se), metadata: None, timestamp: ts }
    }

    #[tokio::test]
    async fn apply_created_then_get_round_trips() {
        let cache = Cache::new();
        let id = FileId::new();
        assert!(cache.apply(&created(id, "se-1", Utc::now())).await);
        let entry = cache.get(&id).await.unwrap();
        assert_eq!(entry.storage_element_id, SeId::new("se-1"));
        assert!(!entry.deleted);
    }

    #[tokio::test]
    async fn redelivered_event_is_a_no_op_second_time() {
        let cache = Cache::new();
        let id = FileId::new();
        let event = created(id, "se-1", Utc::now());
        assert!(cache.apply(&event).await);
        assert!(!cache.apply(&event).await);
        assert_eq!(cache.len().await, 1);
    }

    #[tokio::test]
    async fn deleted_event_marks_entry_deleted_without_removing_it() {
        let cache = Cache::new();
        let id = FileId::new();
        cache.apply(&created(id, "se-1", Utc::now())).await;
        cache
            .apply(&FileEvent::Deleted {
                file_id: id,
                storage_element_id: SeId::new("se-1"),
                metadata: None,
                timestamp: Utc::now(),
            })
            .await;
        assert!(cache.get(&id).await.unwrap().deleted);
    }

    #[tokio::test]
    async fn snapshot_round_trips_through_disk() {
        let dir = tempfile::tempdir().unwrap();
        let cache = Cache::new();
        let id = FileId::new();
        cache.apply(&created(id, "se-1", Utc::now())).await;
        cache.save_snapshot(dir.path()).await;

        let restored = Cache::new();
        restored.load_snapshot(dir.path()).await;
        assert_eq!(restored.get(&id).await.unwrap().storage_element_id, SeId::new("se-1"));
    }
}
