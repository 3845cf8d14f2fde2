use std::sync::Arc;
use std::time::Duration;

use admin_store::{AdminAuditEvent, DurableRegistry};
use chrono::Utc;
use reqwest::StatusCode;
use storage_domain::{CleanupPriority, CleanupQueueEntry, CleanupReason, FileId, SeId};
use tracing::{info, warn};
use uuid::Uuid;

use crate::se_registry::SeRegistry;

/// Deterministic cleanup-queue id for (file_id, reason) so the periodic
/// enqueue strategies (TTL expiry, finalized-source cleanup) are idempotent
/// across runs: re-running `run_once` before a prior entry has been claimed
/// enqueues the same id again, which both [`admin_store::InMemoryRegistry`]
/// and [`admin_store::PostgresRegistry`] treat as a no-op.
fn cleanup_id(file_id: FileId, reason: CleanupReason) -> Uuid {
    Uuid::new_v5(&Uuid::NAMESPACE_OID, format!("{file_id}:{reason:?}").as_bytes())
}

#[derive(Debug, Default)]
pub struct GcReport {
    pub cleaned: usize,
    pub enqueued: usize,
    pub skipped_offline: usize,
    pub errors: Vec<String>,
}

/// Runs the four garbage-collection strategies in order, isolating
/// per-item failures into [`GcReport::errors`] rather than aborting the
/// whole pass — one bad item should never block every other item's cleanup.
pub struct GarbageCollector {
    registry: Arc<dyn DurableRegistry>,
    se_registry: Arc<SeRegistry>,
    client: reqwest::Client,
    auth_token: String,
    batch_size: usize,
    completed_tx_retention: chrono::Duration,
}

impl GarbageCollector {
    pub fn new(
        registry: Arc<dyn DurableRegistry>,
        se_registry: Arc<SeRegistry>,
        auth_token: String,
        batch_size: u32,
        completed_tx_retention_hours: u64,
    ) -> Self {
        GarbageCollector {
            registry,
            se_registry,
            client: reqwest::Client::builder().timeout(Duration::from_secs(15)).build().expect("reqwest client builds"),
            auth_token,
            batch_size: batch_size.max(1) as usize,
            completed_tx_retention: chrono::Duration::hours(completed_tx_retention_hours as i64),
        }
    }

    pub async fn run_once(&self) -> GcReport {
        let _ = self
            .registry
            .append_event(&AdminAuditEvent::GcRunStarted { id: Uuid::new_v4(), at: Utc::now() })
            .await;

        let mut report = GcReport::default();

        if let Err(e) = self.enqueue_expired_temporary(&mut report).await {
            report.errors.push(format!("ttl expiry scan: {e}"));
        }
        if let Err(e) = self.enqueue_finalized_sources(&mut report).await {
            report.errors.push(format!("finalized-source scan: {e}"));
        }
        self.process_cleanup_queue(&mut report).await;

        info!(cleaned = report.cleaned, enqueued = report.enqueued, errors = report.errors.len(), "gc run complete");
        let _ = self
            .registry
            .append_event(&AdminAuditEvent::GcRunCompleted {
                id: Uuid::new_v4(),
                at: Utc::now(),
                cleaned: report.cleaned,
                errors: report.errors.len(),
            })
            .await;
        report
    }

    /// Strategy 2: TEMPORARY files past their TTL get a cleanup entry if one
    /// isn't already queued.
    async fn enqueue_expired_temporary(&self, report: &mut GcReport) -> Result<(), admin_store::RegistryError> {
        let now = Utc::now();
        for file in self.registry.list_expired_temporary(now).await? {
            let entry = CleanupQueueEntry {
                id: cleanup_id(file.file_id, CleanupReason::TtlExpired),
                file_id: file.file_id,
                storage_element_id: file.storage_element_id,
                reason: CleanupReason::TtlExpired,
                priority: CleanupPriority::Normal,
                scheduled_at: now,
                retry_count: 0,
            };
            if let Err(e) = self.registry.enqueue_cleanup(&entry).await {
                report.errors.push(format!("enqueue ttl cleanup for {}: {e}", file.file_id));
                continue;
            }
            report.enqueued += 1;
        }
        Ok(())
    }

    /// Strategy 3: the source copy of a finalized file is retained for
    /// `completed_tx_retention_hours` after finalization, then queued for
    /// cleanup on `source_se`.
    async fn enqueue_finalized_sources(&self, report: &mut GcReport) -> Result<(), admin_store::RegistryError> {
        let cutoff = Utc::now() - self.completed_tx_retention;
        for tx in self.registry.list_completed_finalizations_before(cutoff).await? {
            let entry = CleanupQueueEntry {
                id: cleanup_id(tx.file_id, CleanupReason::Finalized),
                file_id: tx.file_id,
                storage_element_id: tx.source_se,
                reason: CleanupReason::Finalized,
                priority: CleanupPriority::Low,
                scheduled_at: Utc::now(),
                retry_count: 0,
            };
            if let Err(e) = self.registry.enqueue_cleanup(&entry).await {
                report.errors.push(format!("enqueue finalized-source cleanup for {}: {e}", tx.file_id));
                continue;
            }
            report.enqueued += 1;
        }
        Ok(())
    }

    /// Strategy 1: drain up to `batch_size` cleanup entries, issuing a
    /// `DELETE` to each entry's owning SE. 204/404 are both success (404
    /// means already gone); 5xx or a connection failure re-enqueues the
    /// entry with an incremented `retry_count`; an offline SE is skipped
    /// without touching `retry_count` at all.
    async fn process_cleanup_queue(&self, report: &mut GcReport) {
        for _ in 0..self.batch_size {
            let entry = match self.registry.claim_next_cleanup().await {
                Ok(Some(entry)) => entry,
                Ok(None) => break,
                Err(e) => {
                    report.errors.push(format!("claim next cleanup: {e}"));
                    break;
                }
            };

            if !self.se_registry.is_reachable(&entry.storage_element_id).await {
                report.skipped_offline += 1;
                if let Err(e) = self.registry.enqueue_cleanup(&entry).await {
                    report.errors.push(format!("re-enqueue offline-skip for {}: {e}", entry.file_id));
                }
                continue;
            }

            match self.delete_on_se(&entry).await {
                Ok(true) => {
                    if let Err(e) = self.registry.mark_file_deleted(&entry.file_id, Utc::now()).await {
                        report.errors.push(format!("mark deleted {}: {e}", entry.file_id));
                        continue;
                    }
                    let _ = self
                        .registry
                        .append_event(&AdminAuditEvent::CleanupCompleted {
                            id: Uuid::new_v4(),
                            at: Utc::now(),
                            file_id: entry.file_id,
                        })
                        .await;
                    report.cleaned += 1;
                }
                Ok(false) => {
                    let mut retried = entry.clone();
                    retried.retry_count += 1;
                    retried.scheduled_at = Utc::now();
                    if let Err(e) = self.registry.enqueue_cleanup(&retried).await {
                        report.errors.push(format!("re-enqueue failed delete for {}: {e}", entry.file_id));
                    }
                    report.errors.push(format!("delete {} on {} failed, retry {}", entry.file_id, entry.storage_element_id, retried.retry_count));
                }
                Err(e) => {
                    warn!(file_id = %entry.file_id, se = %entry.storage_element_id, error = %e, "cleanup delete request could not be sent");
                    let mut retried = entry.clone();
                    retried.retry_count += 1;
                    retried.scheduled_at = Utc::now();
                    if let Err(e) = self.registry.enqueue_cleanup(&retried).await {
                        report.errors.push(format!("re-enqueue unreachable delete for {}: {e}", entry.file_id));
                    }
                    report.errors.push(format!("delete {} on {}: {e}", entry.file_id, entry.storage_element_id));
                }
            }
        }
    }

    /// Returns `Ok(true)` for 204/404 (success, counting an already-gone file
    /// as success per the idempotent-delete law), `Ok(false)` for any other
    /// status (treated as a retryable failure), and `Err` if the request
    /// itself could not be sent.
    async fn delete_on_se(&self, entry: &CleanupQueueEntry) -> Result<bool, reqwest::Error> {
        let Some(base_url) = self.se_registry.resolve_url(&entry.storage_element_id).await else {
            return Ok(false);
        };
        let url = format!("{}/api/v1/files/{}", base_url.trim_end_matches('/'), entry.file_id);
        let resp = self.client.delete(&url).bearer_auth(&self.auth_token).send().await?;
        Ok(matches!(resp.status(), StatusCode::NO_CONTENT | StatusCode::NOT_FOUND))
    }

    /// Strategy 4 (on-demand): given the file ids an SE reports it actually
    /// has on disk, enqueue a cleanup for any id Admin's registry doesn't
    /// recognize as belonging to that SE.
    pub async fn detect_orphans(&self, se_id: &SeId, file_ids_on_storage: &[FileId]) -> GcReport {
        let mut report = GcReport::default();
        let known = match self.registry.list_files_by_se(se_id).await {
            Ok(files) => files.into_iter().map(|f| f.file_id).collect::<std::collections::HashSet<_>>(),
            Err(e) => {
                report.errors.push(format!("list files for {se_id}: {e}"));
                return report;
            }
        };

        for file_id in file_ids_on_storage {
            if known.contains(file_id) {
                continue;
            }
            let entry = CleanupQueueEntry {
                id: cleanup_id(*file_id, CleanupReason::Orphaned),
                file_id: *file_id,
                storage_element_id: se_id.clone(),
                reason: CleanupReason::Orphaned,
                priority: CleanupPriority::High,
                scheduled_at: Utc::now(),
                retry_count: 0,
            };
            if let Err(e) = self.registry.enqueue_cleanup(&entry).await {
                report.errors.push(format!("enqueue orphan cleanup for {file_id}: {e}"));
                continue;
            }
            report.enqueued += 1;
        }
        report
    }
}

/// Runs [`GarbageCollector::run_once`] on `interval`, looping forever.
pub async fn run_loop(gc: Arc<GarbageCollector>, interval: Duration) {
    let mut ticker = tokio::time::interval(interval);
    loop {
        ticker.tick().await;
        gc.run_once().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use admin_store::InMemoryRegistry;
    use storage_domain::{FileRecord, RetentionPolicy};
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn dummy_file(id: FileId, se: &str, retention: RetentionPolicy) -> FileRecord {
        FileRecord {
            file_id: id,
            original_name: "a.txt".into(),
            storage_filename: "a_u_20260101T000000_00000000000000000000000000000000.txt".into(),
            storage_element_id: SeId::new(se),
            retention_policy: retention,
            size_bytes: 10,
            checksum_sha256: "deadbeef".into(),
            uploaded_by: "u".into(),
            created_at: Utc::now(),
            finalized_at: None,
            ttl_expires_at: None,
            deleted_at: None,
        }
    }

    #[tokio::test]
    async fn ttl_expiry_strategy_enqueues_and_then_drains_the_queue() {
        let se = MockServer::start().await;
        Mock::given(method("GET")).and(path("/api/v1/capacity")).respond_with(
            ResponseTemplate::new(200).set_body_json(&storage_domain::CapacityRecord {
                se_id: SeId::new("se-1"),
                mode: storage_domain::SeMode::Edit,
                total_bytes: 100,
                used_bytes: 10,
                priority: 1,
                updated_at: Utc::now(),
                health: storage_domain::SeLifecycleStatus::Ready,
                backend: "local".into(),
                location: None,
                endpoint: None,
                last_poll: Utc::now(),
            }),
        ).mount(&se).await;
        Mock::given(method("DELETE")).respond_with(ResponseTemplate::new(204)).mount(&se).await;

        let registry: Arc<dyn DurableRegistry> = Arc::new(InMemoryRegistry::new());
        let mut file = dummy_file(FileId::new(), "se-1", RetentionPolicy::Temporary);
        file.ttl_expires_at = Some(Utc::now() - chrono::Duration::seconds(1));
        registry.upsert_file(&file).await.unwrap();

        let se_registry = Arc::new(SeRegistry::new(vec![se.uri()], "secret".into()));
        se_registry.sync_once().await;

        let gc = GarbageCollector::new(registry.clone(), se_registry, "secret".into(), 10, 24);
        let report = gc.run_once().await;

        assert_eq!(report.enqueued, 1);
        assert_eq!(report.cleaned, 1);
        assert!(registry.get_file(&file.file_id).await.unwrap().unwrap().deleted_at.is_some());
    }

    #[tokio::test]
    async fn cleanup_queue_item_for_offline_se_is_skipped_and_requeued() {
        let registry: Arc<dyn DurableRegistry> = Arc::new(InMemoryRegistry::new());
        let entry = CleanupQueueEntry {
            id: Uuid::new_v4(),
            file_id: FileId::new(),
            storage_element_id: SeId::new("se-offline"),
            reason: CleanupReason::Manual,
            priority: CleanupPriority::Normal,
            scheduled_at: Utc::now(),
            retry_count: 0,
        };
        registry.enqueue_cleanup(&entry).await.unwrap();

        let se_registry = Arc::new(SeRegistry::new(vec![], "secret".into()));
        let gc = GarbageCollector::new(registry.clone(), se_registry, "secret".into(), 10, 24);
        let report = gc.run_once().await;

        assert_eq!(report.skipped_offline, 1);
        assert_eq!(report.cleaned, 0);
        assert_eq!(registry.cleanup_queue_len().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn detect_orphans_enqueues_only_unknown_ids() {
        let registry: Arc<dyn DurableRegistry> = Arc::new(InMemoryRegistry::new());
        let known_id = FileId::new();
        registry.upsert_file(&dummy_file(known_id, "se-1", RetentionPolicy::Permanent)).await.unwrap();

        let se_registry = Arc::new(SeRegistry::new(vec![], "secret".into()));
        let gc = GarbageCollector::new(registry.clone(), se_registry, "secret".into(), 10, 24);

        let orphan_id = FileId::new();
        let report = gc.detect_orphans(&SeId::new("se-1"), &[known_id, orphan_id]).await;

        assert_eq!(report.enqueued, 1);
        assert_eq!(registry.cleanup_queue_len().await.unwrap(), 1);
    }
}
