use async_trait::async_trait;
use storage_domain::{CleanupQueueEntry, FileId, FileRecord, FinalizeTransaction, RetentionPolicy, SeId};
use uuid::Uuid;

use crate::error::RegistryError;
use crate::events::AdminAuditEvent;

/// Filters + pagination for `GET /api/v1/files`. `page` is 1-based.
#[derive(Debug, Clone, Default)]
pub struct FileListFilter {
    pub retention_policy: Option<RetentionPolicy>,
    pub storage_element_id: Option<SeId>,
    pub include_deleted: bool,
    pub page: u32,
    pub page_size: u32,
}

/// Durable persistence for everything Admin owns: the file registry, in-flight
/// finalize transactions, the cleanup queue, and the administrative audit
/// trail. Mirrors the original's Postgres-backed `file_records` /
/// `finalize_transactions` / `cleanup_queue` tables behind one trait so tests
/// and single-node deployments can run against [`crate::memory::InMemoryRegistry`]
/// instead of a real database.
#[async_trait]
pub trait DurableRegistry: Send + Sync + 'static {
    /// Cheapest possible round-trip to the backing store, used by the
    /// `/health/ready` handler to distinguish "process is up" from "process
    /// can actually serve requests."
    async fn ping(&self) -> Result<(), RegistryError>;

    async fn get_file(&self, id: &FileId) -> Result<Option<FileRecord>, RegistryError>;
    async fn list_files_by_se(&self, se_id: &SeId) -> Result<Vec<FileRecord>, RegistryError>;
    /// Paginated, filtered listing ordered `created_at DESC`, backing
    /// `GET /api/v1/files?page=&page_size=&retention_policy=&storage_element_id=&include_deleted=`.
    async fn list_files(&self, filter: &FileListFilter) -> Result<Vec<FileRecord>, RegistryError>;
    async fn upsert_file(&self, record: &FileRecord) -> Result<(), RegistryError>;
    async fn mark_file_deleted(&self, id: &FileId, at: chrono::DateTime<chrono::Utc>) -> Result<(), RegistryError>;
    /// Non-deleted TEMPORARY files whose `ttl_expires_at` is at or before
    /// `now`, for the GC module's TTL-expiry strategy.
    async fn list_expired_temporary(&self, now: chrono::DateTime<chrono::Utc>) -> Result<Vec<FileRecord>, RegistryError>;
    /// Finalize transactions that reached `Completed` at or before `cutoff`,
    /// for the GC module's finalized-source cleanup strategy: the source copy
    /// on `source_se` is retained briefly after finalization in case the
    /// target needs a rollback, then swept up once `cutoff` has passed.
    async fn list_completed_finalizations_before(
        &self,
        cutoff: chrono::DateTime<chrono::Utc>,
    ) -> Result<Vec<FinalizeTransaction>, RegistryError>;

    async fn get_finalize_tx(&self, id: Uuid) -> Result<Option<FinalizeTransaction>, RegistryError>;
    async fn upsert_finalize_tx(&self, tx: &FinalizeTransaction) -> Result<(), RegistryError>;
    /// Transactions still in flight (not Completed/Failed/RolledBack), used to
    /// resume or time out stalled finalizations after a restart.
    async fn list_pending_finalizations(&self) -> Result<Vec<FinalizeTransaction>, RegistryError>;

    async fn enqueue_cleanup(&self, entry: &CleanupQueueEntry) -> Result<(), RegistryError>;
    /// Atomically claim and remove the next cleanup entry ordered by
    /// `scheduled_at ASC, priority DESC`. Returns `None` when the queue is empty.
    async fn claim_next_cleanup(&self) -> Result<Option<CleanupQueueEntry>, RegistryError>;
    async fn cleanup_queue_len(&self) -> Result<usize, RegistryError>;

    async fn append_event(&self, event: &AdminAuditEvent) -> Result<(), RegistryError>;
    async fn list_events(&self, file_id: Option<&FileId>, limit: u32) -> Result<Vec<AdminAuditEvent>, RegistryError>;
}
