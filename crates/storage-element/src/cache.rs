use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use storage_domain::{FileId, SeMetadataCacheRow};
use tokio::sync::RwLock;

/// The metadata-cache table: one row per file, refreshed lazily or by the
/// rebuild operations in [`crate::consistency`]. Held in-process; a real
/// deployment might back this with `sled`/`redb`, but nothing here requires
/// cross-process sharing of a single SE's cache, so a
/// `RwLock<HashMap<..>>` is sufficient.
#[derive(Default)]
pub struct MetadataCache {
    rows: RwLock<HashMap<FileId, SeMetadataCacheRow>>,
}

impl MetadataCache {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub async fn get(&self, file_id: &FileId) -> Option<SeMetadataCacheRow> {
        self.rows.read().await.get(file_id).cloned()
    }

    pub async fn insert(&self, row: SeMetadataCacheRow) {
        self.rows.write().await.insert(row.file_id, row);
    }

    pub async fn remove(&self, file_id: &FileId) {
        self.rows.write().await.remove(file_id);
    }

    pub async fn truncate(&self) {
        self.rows.write().await.clear();
    }

    pub async fn all(&self) -> Vec<SeMetadataCacheRow> {
        self.rows.read().await.values().cloned().collect()
    }

    pub async fn len(&self) -> usize {
        self.rows.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    pub async fn expired(&self, now: DateTime<Utc>) -> Vec<FileId> {
        self.rows
            .read()
            .await
            .values()
            .filter(|row| row.is_stale(now))
            .map(|row| row.file_id)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(id: FileId, expires_at: DateTime<Utc>) -> SeMetadataCacheRow {
        SeMetadataCacheRow {
            file_id: id,
            storage_path: "2026/01/01/00/x".to_string(),
            storage_filename: "x".to_string(),
            size_bytes: 10,
            checksum_sha256: "abc".to_string(),
            cached_at: Utc::now(),
            expires_at,
        }
    }

    #[tokio::test]
    async fn insert_then_get_round_trips() {
        let cache = MetadataCache::new();
        let id = FileId::new();
        cache.insert(row(id, Utc::now() + chrono::Duration::hours(1))).await;
        assert!(cache.get(&id).await.is_some());
        assert_eq!(cache.len().await, 1);
    }

    #[tokio::test]
    async fn truncate_clears_all_rows() {
        let cache = MetadataCache::new();
        cache.insert(row(FileId::new(), Utc::now() + chrono::Duration::hours(1))).await;
        cache.insert(row(FileId::new(), Utc::now() + chrono::Duration::hours(1))).await;
        cache.truncate().await;
        assert!(cache.is_empty().await);
    }

    #[tokio::test]
    async fn expired_lists_only_stale_rows() {
        let cache = MetadataCache::new();
        let fresh = FileId::new();
        let stale = FileId::new();
        cache.insert(row(fresh, Utc::now() + chrono::Duration::hours(1))).await;
        cache.insert(row(stale, Utc::now() - chrono::Duration::hours(1))).await;
        let expired = cache.expired(Utc::now()).await;
        assert_eq!(expired, vec![stale]);
    }
}
