use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use storage_domain::{CleanupPriority, CleanupQueueEntry, FileId, FileRecord, FinalizeTransaction, SeId};
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::error::RegistryError;
use crate::events::AdminAuditEvent;
use crate::registry::{DurableRegistry, FileListFilter};

fn priority_rank(p: CleanupPriority) -> u8 {
    match p {
        CleanupPriority::Low => 0,
        CleanupPriority::Normal => 1,
        CleanupPriority::High => 2,
    }
}

#[derive(Default)]
struct Inner {
    files: HashMap<FileId, FileRecord>,
    finalizations: HashMap<Uuid, FinalizeTransaction>,
    cleanup_queue: Vec<CleanupQueueEntry>,
    events: Vec<AdminAuditEvent>,
}

/// In-memory [`DurableRegistry`]. All data is lost on process exit; suitable
/// for tests and single-instance deployments.
#[derive(Clone, Default)]
pub struct InMemoryRegistry {
    inner: Arc<RwLock<Inner>>,
}

impl InMemoryRegistry {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl DurableRegistry for InMemoryRegistry {
    async fn ping(&self) -> Result<(), RegistryError> {
        Ok(())
    }


    async fn get_file(&self, id: &FileId) -> Result<Option<FileRecord>, RegistryError> {
        let guard = self.inner.read().await;
        Ok(guard.files.get(id).cloned())
    }

    async fn list_files_by_se(&self, se_id: &SeId) -> Result<Vec<FileRecord>, RegistryError> {
        let guard = self.inner.read().await;
        Ok(guard
            .files
            .values()
            .filter(|f| &f.storage_element_id == se_id)
            .cloned()
            .collect())
    }

    async fn list_files(&self, filter: &FileListFilter) -> Result<Vec<FileRecord>, RegistryError> {
        let guard = self.inner.read().await;
        let mut matched: Vec<FileRecord> = guard
            .files
            .values()
            .filter(|f| filter.include_deleted || f.deleted_at.is_none())
            .filter(|f| filter.retention_policy.map_or(true, |rp| rp == f.retention_policy))
            .filter(|f| {
                filter
                    .storage_element_id
                    .as_ref()
                    .map_or(true, |se| se == &f.storage_element_id)
            })
            .cloned()
            .collect();
        matched.sort_by(|a, b| b.created_at.cmp(&a.created_at));

        let page = filter.page.max(1) as usize;
        let page_size = filter.page_size.max(1) as usize;
        let start = (page - 1) * page_size;
        Ok(matched.into_iter().skip(start).take(page_size).collect())
    }

    async fn upsert_file(&self, record: &FileRecord) -> Result<(), RegistryError> {
        let mut guard = self.inner.write().await;
        guard.files.insert(record.file_id, record.clone());
        Ok(())
    }

    async fn mark_file_deleted(&self, id: &FileId, at: DateTime<Utc>) -> Result<(), RegistryError> {
        let mut guard = self.inner.write().await;
        let record = guard
            .files
            .get_mut(id)
            .ok_or_else(|| RegistryError::FileNotFound(id.to_string()))?;
        record.deleted_at = Some(at);
        Ok(())
    }

    async fn list_expired_temporary(&self, now: DateTime<Utc>) -> Result<Vec<FileRecord>, RegistryError> {
        use storage_domain::RetentionPolicy;
        let guard = self.inner.read().await;
        Ok(guard
            .files
            .values()
            .filter(|f| {
                f.deleted_at.is_none()
                    && matches!(f.retention_policy, RetentionPolicy::Temporary)
                    && f.ttl_expires_at.is_some_and(|ttl| ttl <= now)
            })
            .cloned()
            .collect())
    }

    async fn list_completed_finalizations_before(
        &self,
        cutoff: DateTime<Utc>,
    ) -> Result<Vec<FinalizeTransaction>, RegistryError> {
        use storage_domain::FinalizeStatus;
        let guard = self.inner.read().await;
        Ok(guard
            .finalizations
            .values()
            .filter(|tx| {
                tx.status == FinalizeStatus::Completed && tx.completed_at.is_some_and(|at| at <= cutoff)
            })
            .cloned()
            .collect())
    }

    async fn get_finalize_tx(&self, id: Uuid) -> Result<Option<FinalizeTransaction>, RegistryError> {
        let guard = self.inner.read().await;
        Ok(guard.finalizations.get(&id).cloned())
    }

    async fn upsert_finalize_tx(&self, tx: &FinalizeTransaction) -> Result<(), RegistryError> {
        let mut guard = self.inner.write().await;
        guard.finalizations.insert(tx.transaction_id, tx.clone());
        Ok(())
    }

    async fn list_pending_finalizations(&self) -> Result<Vec<FinalizeTransaction>, RegistryError> {
        use storage_domain::FinalizeStatus;
        let guard = self.inner.read().await;
        Ok(guard
            .finalizations
            .values()
            .filter(|tx| {
                !matches!(
                    tx.status,
                    FinalizeStatus::Completed | FinalizeStatus::Failed | FinalizeStatus::RolledBack
                )
            })
            .cloned()
            .collect())
    }

    async fn enqueue_cleanup(&self, entry: &CleanupQueueEntry) -> Result<(), RegistryError> {
        let mut guard = self.inner.write().await;
        if guard.cleanup_queue.iter().any(|e| e.id == entry.id) {
            return Ok(());
        }
        guard.cleanup_queue.push(entry.clone());
        Ok(())
    }

    async fn claim_next_cleanup(&self) -> Result<Option<CleanupQueueEntry>, RegistryError> {
        let mut guard = self.inner.write().await;
        let best = guard
            .cleanup_queue
            .iter()
            .enumerate()
            .min_by(|(_, a), (_, b)| {
                a.scheduled_at
                    .cmp(&b.scheduled_at)
                    .then_with(|| priority_rank(b.priority).cmp(&priority_rank(a.priority)))
            })
            .map(|(idx, _)| idx);
        Ok(best.map(|idx| guard.cleanup_queue.remove(idx)))
    }

    async fn cleanup_queue_len(&self) -> Result<usize, RegistryError> {
        let guard = self.inner.read().await;
        Ok(guard.cleanup_queue.len())
    }

    async fn append_event(&self, event: &AdminAuditEvent) -> Result<(), RegistryError> {
        let mut guard = self.inner.write().await;
        guard.events.push(event.clone());
        Ok(())
    }

    async fn list_events(&self, file_id: Option<&FileId>, limit: u32) -> Result<Vec<AdminAuditEvent>, RegistryError> {
        let guard = self.inner.read().await;
        let filtered: Vec<AdminAuditEvent> = guard
            .events
            .iter()
            .filter(|ev| file_id.map_or(true, |fid| ev.file_id().as_ref() == Some(fid)))
            .cloned()
            .collect();
        let start = filtered.len().saturating_sub(limit as usize);
        Ok(filtered[start..].to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use storage_domain::{CleanupReason, FinalizeStatus, RetentionPolicy};

    fn dummy_file(id: FileId, se: &str) -> FileRecord {
        FileRecord {
            file_id: id,
            original_name: "a.txt".into(),
            storage_filename: "a_u_20260101T000000_00000000000000000000000000000000.txt".into(),
            storage_element_id: SeId::new(se),
            retention_policy: RetentionPolicy::Permanent,
            size_bytes: 10,
            checksum_sha256: "deadbeef".into(),
            uploaded_by: "u".into(),
            created_at: Utc::now(),
            finalized_at: None,
            ttl_expires_at: None,
            deleted_at: None,
        }
    }

    fn finalize_tx(status: FinalizeStatus) -> FinalizeTransaction {
        FinalizeTransaction {
            transaction_id: Uuid::new_v4(),
            file_id: FileId::new(),
            source_se: SeId::new("se-1"),
            target_se: SeId::new("se-2"),
            status,
            checksum_source: "abc".into(),
            checksum_target: None,
            retry_count: 0,
            created_at: Utc::now(),
            completed_at: None,
        }
    }

    #[tokio::test]
    async fn upsert_and_get_file() {
        let reg = InMemoryRegistry::new();
        let id = FileId::new();
        reg.upsert_file(&dummy_file(id, "se-1")).await.unwrap();
        let got = reg.get_file(&id).await.unwrap().unwrap();
        assert_eq!(got.storage_element_id, SeId::new("se-1"));
    }

    #[tokio::test]
    async fn list_files_by_se_filters_correctly() {
        let reg = InMemoryRegistry::new();
        reg.upsert_file(&dummy_file(FileId::new(), "se-1")).await.unwrap();
        reg.upsert_file(&dummy_file(FileId::new(), "se-2")).await.unwrap();
        let list = reg.list_files_by_se(&SeId::new("se-1")).await.unwrap();
        assert_eq!(list.len(), 1);
    }

    #[tokio::test]
    async fn list_files_filters_and_paginates() {
        let reg = InMemoryRegistry::new();
        for i in 0..5 {
            let mut f = dummy_file(FileId::new(), "se-1");
            f.created_at = Utc::now() + chrono::Duration::seconds(i);
            reg.upsert_file(&f).await.unwrap();
        }
        reg.upsert_file(&dummy_file(FileId::new(), "se-2")).await.unwrap();

        let page1 = reg
            .list_files(&FileListFilter {
                storage_element_id: Some(SeId::new("se-1")),
                page: 1,
                page_size: 2,
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(page1.len(), 2);

        let all_se1 = reg
            .list_files(&FileListFilter {
                storage_element_id: Some(SeId::new("se-1")),
                page: 1,
                page_size: 100,
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(all_se1.len(), 5);
        // Newest first.
        assert!(all_se1[0].created_at >= all_se1[1].created_at);
    }

    #[tokio::test]
    async fn list_files_excludes_deleted_unless_requested() {
        let reg = InMemoryRegistry::new();
        let id = FileId::new();
        reg.upsert_file(&dummy_file(id, "se-1")).await.unwrap();
        reg.mark_file_deleted(&id, Utc::now()).await.unwrap();

        let visible = reg.list_files(&FileListFilter { page: 1, page_size: 10, ..Default::default() }).await.unwrap();
        assert!(visible.is_empty());

        let with_deleted = reg
            .list_files(&FileListFilter { include_deleted: true, page: 1, page_size: 10, ..Default::default() })
            .await
            .unwrap();
        assert_eq!(with_deleted.len(), 1);
    }

    #[tokio::test]
    async fn mark_file_deleted_sets_timestamp() {
        let reg = InMemoryRegistry::new();
        let id = FileId::new();
        reg.upsert_file(&dummy_file(id, "se-1")).await.unwrap();
        let now = Utc::now();
        reg.mark_file_deleted(&id, now).await.unwrap();
        assert_eq!(reg.get_file(&id).await.unwrap().unwrap().deleted_at, Some(now));
    }

    #[tokio::test]
    async fn claim_next_cleanup_orders_by_schedule_then_priority() {
        let reg = InMemoryRegistry::new();
        let now = Utc::now();
        let later = now + chrono::Duration::seconds(60);

        let low_now = CleanupQueueEntry {
            id: Uuid::new_v4(),
            file_id: FileId::new(),
            storage_element_id: SeId::new("se-1"),
            reason: CleanupReason::TtlExpired,
            priority: CleanupPriority::Low,
            scheduled_at: now,
            retry_count: 0,
        };
        let high_later = CleanupQueueEntry {
            id: Uuid::new_v4(),
            file_id: FileId::new(),
            storage_element_id: SeId::new("se-1"),
            reason: CleanupReason::Manual,
            priority: CleanupPriority::High,
            scheduled_at: later,
            retry_count: 0,
        };
        reg.enqueue_cleanup(&high_later).await.unwrap();
        reg.enqueue_cleanup(&low_now).await.unwrap();

        // Earliest scheduled_at wins even though its priority is lower.
        let claimed = reg.claim_next_cleanup().await.unwrap().unwrap();
        assert_eq!(claimed.id, low_now.id);
        let claimed2 = reg.claim_next_cleanup().await.unwrap().unwrap();
        assert_eq!(claimed2.id, high_later.id);
        assert!(reg.claim_next_cleanup().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn list_expired_temporary_filters_by_policy_and_ttl() {
        let reg = InMemoryRegistry::new();
        let now = Utc::now();

        let mut expired = dummy_file(FileId::new(), "se-1");
        expired.retention_policy = RetentionPolicy::Temporary;
        expired.ttl_expires_at = Some(now - chrono::Duration::seconds(1));
        reg.upsert_file(&expired).await.unwrap();

        let mut not_yet = dummy_file(FileId::new(), "se-1");
        not_yet.retention_policy = RetentionPolicy::Temporary;
        not_yet.ttl_expires_at = Some(now + chrono::Duration::seconds(60));
        reg.upsert_file(&not_yet).await.unwrap();

        // Permanent files are never eligible regardless of ttl_expires_at.
        reg.upsert_file(&dummy_file(FileId::new(), "se-1")).await.unwrap();

        let expired_list = reg.list_expired_temporary(now).await.unwrap();
        assert_eq!(expired_list.len(), 1);
        assert_eq!(expired_list[0].file_id, expired.file_id);
    }

    #[tokio::test]
    async fn list_completed_finalizations_before_requires_completed_status_and_cutoff() {
        let reg = InMemoryRegistry::new();
        let now = Utc::now();

        let mut stale = finalize_tx(FinalizeStatus::Completed);
        stale.completed_at = Some(now - chrono::Duration::hours(25));
        reg.upsert_finalize_tx(&stale).await.unwrap();

        let mut fresh = finalize_tx(FinalizeStatus::Completed);
        fresh.completed_at = Some(now - chrono::Duration::hours(1));
        reg.upsert_finalize_tx(&fresh).await.unwrap();

        let mut rolled_back = finalize_tx(FinalizeStatus::RolledBack);
        rolled_back.completed_at = Some(now - chrono::Duration::hours(25));
        reg.upsert_finalize_tx(&rolled_back).await.unwrap();

        let cutoff = now - chrono::Duration::hours(24);
        let list = reg.list_completed_finalizations_before(cutoff).await.unwrap();
        assert_eq!(list.len(), 1);
        assert_eq!(list[0].transaction_id, stale.transaction_id);
    }

    #[tokio::test]
    async fn pending_finalizations_excludes_terminal_states() {
        let reg = InMemoryRegistry::new();
        let in_flight = FinalizeTransaction {
            transaction_id: Uuid::new_v4(),
            file_id: FileId::new(),
            source_se: SeId::new("se-1"),
            target_se: SeId::new("se-2"),
            status: FinalizeStatus::Copying,
            checksum_source: "abc".into(),
            checksum_target: None,
            retry_count: 0,
            created_at: Utc::now(),
            completed_at: None,
        };
        let mut done = in_flight.clone();
        done.transaction_id = Uuid::new_v4();
        done.status = FinalizeStatus::Completed;

        reg.upsert_finalize_tx(&in_flight).await.unwrap();
        reg.upsert_finalize_tx(&done).await.unwrap();

        let pending = reg.list_pending_finalizations().await.unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].transaction_id, in_flight.transaction_id);
    }
}
