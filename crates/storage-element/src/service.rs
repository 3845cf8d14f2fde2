use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

use chrono::Utc;
use serde_json::json;
use storage_backend::{FileSource, StorageBackend};
use storage_domain::{
    AttributeSidecar, CapacityRecord, CapacityStatus, FileId, SeId, SeMetadataCacheRow, SeMode,
    WalOperation,
};
use tokio::io::AsyncRead;

use crate::cache::MetadataCache;
use crate::error::SeError;
use crate::hashing::HashingReader;
use crate::lock::{CacheLockManager, LockPriority};
use crate::partition::{attr_path, partition_path};
use crate::partition_lock::PartitionLocks;
use crate::wal::WriteAheadLog;

/// Outcome of a successful upload, returned to the caller as `{file_id,
/// file_size, checksum}`.
#[derive(Debug)]
pub struct UploadOutcome {
    pub file_id: FileId,
    pub storage_filename: String,
    pub storage_path: String,
    pub file_size: u64,
    pub checksum_sha256: String,
}

/// Core durability engine for one storage element process. Owns the
/// backend, WAL, metadata cache, and cache lock manager; every HTTP handler
/// is a thin wrapper over one of these methods.
pub struct FileService {
    pub se_id: SeId,
    mode: RwLock<SeMode>,
    pub priority: u32,
    pub capacity_total_bytes: u64,
    backend_label: String,
    location: Option<String>,
    endpoint: Option<String>,
    backend: Arc<dyn StorageBackend>,
    wal: Arc<dyn WriteAheadLog>,
    cache: Arc<MetadataCache>,
    lock_mgr: Arc<CacheLockManager>,
    partition_locks: PartitionLocks,
    used_bytes: AtomicU64,
}

impl FileService {
    pub fn new(
        se_id: SeId,
        mode: SeMode,
        priority: u32,
        capacity_total_bytes: u64,
        backend_label: String,
        location: Option<String>,
        endpoint: Option<String>,
        backend: Arc<dyn StorageBackend>,
        wal: Arc<dyn WriteAheadLog>,
        cache: Arc<MetadataCache>,
        lock_mgr: Arc<CacheLockManager>,
    ) -> Self {
        Self {
            se_id,
            mode: RwLock::new(mode),
            priority,
            capacity_total_bytes,
            backend_label,
            location,
            endpoint,
            backend,
            wal,
            cache,
            lock_mgr,
            partition_locks: PartitionLocks::new(),
            used_bytes: AtomicU64::new(0),
        }
    }

    pub fn mode(&self) -> SeMode {
        *self.mode.read().expect("mode lock is never held across a panic")
    }

    /// Advances this SE's mode forward along the EDIT -> RW -> RO -> AR
    /// lattice, rejecting any attempt to move backward or skip validation
    /// via [`SeMode::can_transition_to`]. Driven by Admin's operator-facing
    /// mode-change flow.
    pub fn transition_mode(&self, next: SeMode) -> Result<SeMode, SeError> {
        let mut guard = self.mode.write().expect("mode lock is never held across a panic");
        if !guard.can_transition_to(next) {
            return Err(SeError::InvalidModeTransition { from: guard.to_string(), to: next.to_string() });
        }
        *guard = next;
        Ok(next)
    }

    pub fn backend(&self) -> &Arc<dyn StorageBackend> {
        &self.backend
    }

    pub fn cache(&self) -> &Arc<MetadataCache> {
        &self.cache
    }

    pub fn lock_mgr(&self) -> &Arc<CacheLockManager> {
        &self.lock_mgr
    }

    pub fn capacity_record(&self) -> CapacityRecord {
        let now = Utc::now();
        CapacityRecord {
            se_id: self.se_id.clone(),
            mode: self.mode(),
            total_bytes: self.capacity_total_bytes,
            used_bytes: self.used_bytes.load(Ordering::Relaxed),
            priority: self.priority,
            updated_at: now,
            health: storage_domain::SeLifecycleStatus::Ready,
            backend: self.backend_label.clone(),
            location: self.location.clone(),
            endpoint: self.endpoint.clone(),
            last_poll: now,
        }
    }

    /// Attribute-first write protocol: WAL begin, bytes, sidecar,
    /// cache row, WAL commit — with a best-effort rollback of every
    /// already-applied step on any failure in between.
    pub async fn create_file(
        &self,
        original_name: &str,
        uploader: &str,
        content_type: Option<String>,
        expected_size: Option<u64>,
        custom_attributes: std::collections::HashMap<String, String>,
        body: Pin<Box<dyn AsyncRead + Send + Sync + '_>>,
    ) -> Result<UploadOutcome, SeError> {
        if !self.mode().accepts_writes() {
            return Err(SeError::InvalidMode { mode: self.mode().to_string() });
        }

        let record = self.capacity_record();
        if let Some(expected) = expected_size {
            if !record.can_accept_file(expected) {
                return Err(SeError::InsufficientStorage {
                    needed: expected,
                    available: record.available_bytes(),
                });
            }
        } else if record.status() == CapacityStatus::Full {
            return Err(SeError::InsufficientStorage { needed: 0, available: 0 });
        }

        let now = Utc::now();
        let file_id = FileId::new();
        let storage_filename = storage_domain::generate_storage_filename(original_name, uploader, now);
        let storage_path = partition_path(now, &storage_filename);
        let attr_file_path = attr_path(&storage_path);

        let wal_entry = self
            .wal
            .begin(
                WalOperation::Upload,
                json!({
                    "file_id": file_id.to_string(),
                    "storage_path": storage_path,
                    "storage_filename": storage_filename,
                    "content_type": content_type,
                }),
            )
            .await?;

        let _guard = self.partition_locks.lock(&storage_path).await;

        let result = self
            .write_body_and_sidecar(
                &storage_path,
                &attr_file_path,
                file_id,
                original_name,
                &storage_filename,
                content_type,
                expected_size,
                uploader,
                now,
                custom_attributes,
                body,
            )
            .await;

        match result {
            Ok((size, checksum)) => {
                self.wal.mark_committed(wal_entry.transaction_id).await?;
                self.used_bytes.fetch_add(size, Ordering::Relaxed);
                Ok(UploadOutcome {
                    file_id,
                    storage_filename,
                    storage_path,
                    file_size: size,
                    checksum_sha256: checksum,
                })
            }
            Err(e) => {
                // Best-effort cleanup of whatever made it to durable storage
                // before the failure; the sidecar and cache row may or may
                // not exist depending on where the pipeline broke.
                let _ = self.backend.delete_file(&storage_path).await;
                let _ = self.backend.delete_attr_file(&attr_file_path).await;
                self.cache.remove(&file_id).await;
                self.wal.mark_rolled_back(wal_entry.transaction_id).await?;
                Err(e)
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    async fn write_body_and_sidecar(
        &self,
        storage_path: &str,
        attr_file_path: &str,
        file_id: FileId,
        original_name: &str,
        storage_filename: &str,
        content_type: Option<String>,
        expected_size: Option<u64>,
        uploader: &str,
        now: chrono::DateTime<Utc>,
        custom_attributes: std::collections::HashMap<String, String>,
        body: FileSource<'_>,
    ) -> Result<(u64, String), SeError> {
        let (hashing, handle) = HashingReader::new(body);
        let size = self
            .backend
            .write_file(storage_path, Box::pin(hashing))
            .await?;
        let (checksum, observed_size) = handle.finalize();
        if let Some(expected) = expected_size {
            if expected != observed_size {
                return Err(SeError::ChecksumMismatch {
                    expected: expected.to_string(),
                    actual: observed_size.to_string(),
                });
            }
        }
        let _ = size; // size returned by the backend and observed_size must agree by construction

        let sidecar = AttributeSidecar {
            schema_version: storage_domain::SIDECAR_SCHEMA_VERSION_CURRENT,
            file_id,
            original_name: original_name.to_string(),
            content_type,
            checksum_sha256: checksum.clone(),
            size_bytes: observed_size,
            uploaded_by: uploader.to_string(),
            created_at: now,
            custom_attributes,
        };
        let encoded = sidecar
            .encode()
            .map_err(|e| SeError::SidecarTooLarge(e.to_string()))?;
        self.backend.write_attr_file(attr_file_path, &encoded).await?;

        self.cache
            .insert(SeMetadataCacheRow {
                file_id,
                storage_path: storage_path.to_string(),
                storage_filename: storage_filename.to_string(),
                size_bytes: observed_size,
                checksum_sha256: checksum.clone(),
                cached_at: now,
                expires_at: now + chrono::Duration::hours(self.mode().cache_ttl_hours()),
            })
            .await;

        Ok((observed_size, checksum))
    }

    /// Mode-independent read; triggers the lazy-rebuild check first so a
    /// stale cache row is refreshed before metadata is returned.
    pub async fn read_file(
        &self,
        file_id: &FileId,
    ) -> Result<(SeMetadataCacheRow, Pin<Box<dyn AsyncRead + Send>>), SeError> {
        let row = self.metadata(file_id).await?;
        let reader = self.backend.read_file(&row.storage_path).await?;
        Ok((row, reader))
    }

    /// Metadata only, with the same lazy-rebuild-on-stale-read behavior as
    /// [`Self::read_file`] but without opening the byte stream.
    pub async fn metadata(&self, file_id: &FileId) -> Result<SeMetadataCacheRow, SeError> {
        let row = self.cache.get(file_id).await.ok_or_else(|| SeError::FileNotFound(file_id.to_string()))?;
        if row.is_stale(Utc::now()) {
            self.lazy_rebuild_one(file_id, &row).await
        } else {
            Ok(row)
        }
    }

    /// Attempt a non-blocking LAZY_REBUILD of a single stale row. On success,
    /// re-reads the sidecar and refreshes the row; on lock contention, serves
    /// the stale row unchanged — never raises.
    async fn lazy_rebuild_one(
        &self,
        file_id: &FileId,
        stale: &SeMetadataCacheRow,
    ) -> Result<SeMetadataCacheRow, SeError> {
        let Some(_guard) = self.lock_mgr.try_acquire(LockPriority::LazyRebuild).await else {
            return Ok(stale.clone());
        };
        let attr_file_path = attr_path(&stale.storage_path);
        let bytes = match self.backend.read_attr_file(&attr_file_path).await {
            Ok(bytes) => bytes,
            Err(_) => return Ok(stale.clone()),
        };
        let sidecar = match AttributeSidecar::decode(&bytes) {
            Ok(s) => s,
            Err(_) => return Ok(stale.clone()),
        };
        let now = Utc::now();
        let refreshed = SeMetadataCacheRow {
            file_id: *file_id,
            storage_path: stale.storage_path.clone(),
            storage_filename: stale.storage_filename.clone(),
            size_bytes: sidecar.size_bytes,
            checksum_sha256: sidecar.checksum_sha256,
            cached_at: now,
            expires_at: now + chrono::Duration::hours(self.mode().cache_ttl_hours()),
        };
        self.cache.insert(refreshed.clone()).await;
        Ok(refreshed)
    }

    /// PATCH: allowed only in EDIT/RW mode. Rewrites the sidecar
    /// atomically and refreshes the cache row in-place.
    pub async fn update_metadata(
        &self,
        file_id: &FileId,
        content_type: Option<String>,
        custom_attributes: std::collections::HashMap<String, String>,
    ) -> Result<SeMetadataCacheRow, SeError> {
        if !self.mode().accepts_writes() {
            return Err(SeError::InvalidMode { mode: self.mode().to_string() });
        }
        let row = self.cache.get(file_id).await.ok_or_else(|| SeError::FileNotFound(file_id.to_string()))?;
        let attr_file_path = attr_path(&row.storage_path);

        let _guard = self.partition_locks.lock(&row.storage_path).await;
        let bytes = self.backend.read_attr_file(&attr_file_path).await?;
        let mut sidecar = AttributeSidecar::decode(&bytes)?;
        sidecar.content_type = content_type;
        for (k, v) in custom_attributes {
            sidecar.custom_attributes.insert(k, v);
        }
        let encoded = sidecar.encode().map_err(|e| SeError::SidecarTooLarge(e.to_string()))?;
        self.backend.write_attr_file(&attr_file_path, &encoded).await?;

        let now = Utc::now();
        let refreshed = SeMetadataCacheRow {
            file_id: *file_id,
            storage_path: row.storage_path.clone(),
            storage_filename: row.storage_filename.clone(),
            size_bytes: sidecar.size_bytes,
            checksum_sha256: sidecar.checksum_sha256,
            cached_at: now,
            expires_at: now + chrono::Duration::hours(self.mode().cache_ttl_hours()),
        };
        self.cache.insert(refreshed.clone()).await;
        Ok(refreshed)
    }

    /// DELETE: only legal in EDIT mode. Writes a WAL `DELETE`
    /// entry first, then removes bytes, sidecar, and cache row in that
    /// order. A second delete of an already-gone file is 404, which GC
    /// treats as success.
    pub async fn delete_file(&self, file_id: &FileId) -> Result<(), SeError> {
        if !self.mode().accepts_deletes() {
            return Err(SeError::InvalidMode { mode: self.mode().to_string() });
        }
        let row = self.cache.get(file_id).await.ok_or_else(|| SeError::FileNotFound(file_id.to_string()))?;
        let attr_file_path = attr_path(&row.storage_path);

        let wal_entry = self
            .wal
            .begin(WalOperation::Delete, json!({"file_id": file_id.to_string(), "storage_path": row.storage_path}))
            .await?;

        let _guard = self.partition_locks.lock(&row.storage_path).await;
        self.backend.delete_file(&row.storage_path).await?;
        self.backend.delete_attr_file(&attr_file_path).await?;
        self.cache.remove(file_id).await;
        self.used_bytes.fetch_sub(row.size_bytes.min(self.used_bytes.load(Ordering::Relaxed)), Ordering::Relaxed);
        self.wal.mark_committed(wal_entry.transaction_id).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wal::InMemoryWal;
    use storage_backend::LocalBackend;
    use tokio::io::AsyncReadExt;

    fn body(bytes: &'static [u8]) -> Pin<Box<dyn AsyncRead + Send + Sync>> {
        Box::pin(std::io::Cursor::new(bytes))
    }

    fn service(mode: SeMode, root: &std::path::Path) -> FileService {
        FileService::new(
            SeId::new("se-1"),
            mode,
            100,
            1_000_000,
            "local".into(),
            None,
            None,
            Arc::new(LocalBackend::new(root)),
            Arc::new(InMemoryWal::new()),
            MetadataCache::new(),
            Arc::new(CacheLockManager::new()),
        )
    }

    #[tokio::test]
    async fn create_then_read_round_trips_bytes_and_checksum() {
        let dir = tempfile::tempdir().unwrap();
        let svc = service(SeMode::Rw, dir.path());
        let outcome = svc
            .create_file("report.pdf", "alice", Some("application/pdf".to_string()), None, Default::default(), body(b"hello world"))
            .await
            .unwrap();
        assert_eq!(outcome.file_size, 11);

        let (row, mut reader) = svc.read_file(&outcome.file_id).await.unwrap();
        assert_eq!(row.checksum_sha256, outcome.checksum_sha256);
        let mut buf = Vec::new();
        reader.read_to_end(&mut buf).await.unwrap();
        assert_eq!(buf, b"hello world");
    }

    #[tokio::test]
    async fn create_rejected_on_read_only_se() {
        let dir = tempfile::tempdir().unwrap();
        let svc = service(SeMode::Ro, dir.path());
        let err = svc
            .create_file("x.txt", "bob", None, None, Default::default(), body(b"x"))
            .await
            .unwrap_err();
        assert!(matches!(err, SeError::InvalidMode { .. }));
    }

    #[tokio::test]
    async fn create_rejects_size_mismatch_and_rolls_back() {
        let dir = tempfile::tempdir().unwrap();
        let svc = service(SeMode::Edit, dir.path());
        let err = svc
            .create_file("x.txt", "bob", None, Some(999), Default::default(), body(b"short"))
            .await
            .unwrap_err();
        assert!(matches!(err, SeError::ChecksumMismatch { .. }));
        assert_eq!(svc.cache.len().await, 0);
    }

    #[tokio::test]
    async fn delete_only_allowed_in_edit_mode() {
        let dir = tempfile::tempdir().unwrap();
        let svc = service(SeMode::Rw, dir.path());
        let outcome = svc
            .create_file("x.txt", "bob", None, None, Default::default(), body(b"data"))
            .await
            .unwrap();
        let err = svc.delete_file(&outcome.file_id).await.unwrap_err();
        assert!(matches!(err, SeError::InvalidMode { .. }));
    }

    #[tokio::test]
    async fn delete_then_delete_again_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let svc = service(SeMode::Edit, dir.path());
        let outcome = svc
            .create_file("x.txt", "bob", None, None, Default::default(), body(b"data"))
            .await
            .unwrap();
        svc.delete_file(&outcome.file_id).await.unwrap();
        let err = svc.delete_file(&outcome.file_id).await.unwrap_err();
        assert!(matches!(err, SeError::FileNotFound(_)));
    }

    #[tokio::test]
    async fn update_metadata_merges_custom_attributes() {
        let dir = tempfile::tempdir().unwrap();
        let svc = service(SeMode::Rw, dir.path());
        let mut attrs = std::collections::HashMap::new();
        attrs.insert("team".to_string(), "platform".to_string());
        let outcome = svc
            .create_file("x.txt", "bob", None, None, attrs, body(b"data"))
            .await
            .unwrap();

        let mut more = std::collections::HashMap::new();
        more.insert("owner".to_string(), "bob".to_string());
        svc.update_metadata(&outcome.file_id, Some("text/plain".to_string()), more)
            .await
            .unwrap();

        let row = svc.metadata(&outcome.file_id).await.unwrap();
        assert_eq!(row.checksum_sha256, outcome.checksum_sha256);
    }

    #[tokio::test]
    async fn insufficient_storage_rejected_up_front() {
        let dir = tempfile::tempdir().unwrap();
        let svc = service(SeMode::Rw, dir.path());
        let err = svc
            .create_file("x.bin", "bob", None, Some(10_000_000), Default::default(), body(b"x"))
            .await
            .unwrap_err();
        assert!(matches!(err, SeError::InsufficientStorage { .. }));
    }
}
