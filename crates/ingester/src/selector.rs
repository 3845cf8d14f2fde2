use std::sync::Arc;

use serde::Deserialize;
use storage_coordination::store::CoordinationStore;
use storage_domain::{RetentionPolicy, SeId, SeMode};
use thiserror::Error;
use tracing::warn;

/// Bounded retry budget for "selector handed us an SE that then turned out
/// full" — the selector's view can lag the SE's real state between polls.
pub const MAX_SELECTION_RETRIES: u32 = 3;

#[derive(Debug, Error)]
pub enum SelectionError {
    #[error("no storage element currently has room for this upload")]
    NoAvailableStorage,

    #[error("admin fallback request failed: {0}")]
    AdminFallback(#[from] reqwest::Error),
}

#[derive(Deserialize)]
struct AvailableSeResponse {
    storage_elements: Vec<String>,
}

/// Picks a storage element for a new upload using the Sequential-Fill
/// algorithm: ascending priority, then ascending percent-used, then
/// ascending SE id as a final deterministic tie-break — the same order the
/// coordination store's available-set sorted set already sorts by, since
/// `update_available`'s score encodes priority and percent_used and ties on
/// score are broken by member (SE id) ordering.
///
/// Falls back to asking Admin directly (`GET
/// /api/v1/internal/storage-elements/available`) when the coordination
/// store's view is empty, e.g. right after the capacity monitor's first
/// poll hasn't landed yet.
pub struct StorageSelector {
    store: Arc<dyn CoordinationStore>,
    client: reqwest::Client,
    admin_base_url: String,
    auth_token: String,
}

impl StorageSelector {
    pub fn new(store: Arc<dyn CoordinationStore>, admin_base_url: String, auth_token: String) -> Self {
        StorageSelector { store, client: reqwest::Client::new(), admin_base_url, auth_token }
    }

    /// Excludes SEs already tried and rejected this upload attempt (bounded
    /// by [`MAX_SELECTION_RETRIES`] at the call site). `min_free_bytes` is
    /// the upload's expected size; `0` (unknown size) skips the capacity
    /// filter entirely rather than rejecting every candidate.
    pub async fn select(&self, retention: RetentionPolicy, excluded: &[SeId], min_free_bytes: u64) -> Result<SeId, SelectionError> {
        let mode = retention.upload_mode();
        self.select_for_mode(mode, excluded, min_free_bytes).await
    }

    async fn select_for_mode(&self, mode: SeMode, excluded: &[SeId], min_free_bytes: u64) -> Result<SeId, SelectionError> {
        match self.store.list_available(mode).await {
            Ok(ids) => {
                for id in ids {
                    if excluded.contains(&id) {
                        continue;
                    }
                    if !self.has_room(&id, min_free_bytes).await {
                        continue;
                    }
                    return Ok(id);
                }
            }
            Err(e) => warn!(error = %e, "coordination store unavailable, falling back to admin"),
        }
        self.select_via_admin_fallback(mode, excluded, min_free_bytes).await
    }

    /// `min_free_bytes == 0` means the caller doesn't know the upload size
    /// yet, so every candidate passes; otherwise a missing capacity record
    /// (the monitor hasn't polled it yet) also passes rather than stalling
    /// selection on a gap in our own cache.
    async fn has_room(&self, se_id: &SeId, min_free_bytes: u64) -> bool {
        if min_free_bytes == 0 {
            return true;
        }
        match self.store.get_capacity(se_id).await {
            Ok(Some(record)) => record.available_bytes() >= min_free_bytes,
            Ok(None) | Err(_) => true,
        }
    }

    async fn select_via_admin_fallback(&self, mode: SeMode, excluded: &[SeId], min_free_bytes: u64) -> Result<SeId, SelectionError> {
        let url = format!(
            "{}/api/v1/internal/storage-elements/available?mode={}&min_free_bytes={}",
            self.admin_base_url.trim_end_matches('/'),
            mode,
            min_free_bytes
        );
        let resp = self
            .client
            .get(&url)
            .bearer_auth(&self.auth_token)
            .send()
            .await?
            .error_for_status()?
            .json::<AvailableSeResponse>()
            .await?;

        resp.storage_elements
            .into_iter()
            .map(SeId::new)
            .find(|id| !excluded.contains(id))
            .ok_or(SelectionError::NoAvailableStorage)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use storage_coordination::memory::InMemoryCoordinationStore;
    use storage_domain::CapacityRecord;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn picks_lowest_scored_available_se() {
        let store = Arc::new(InMemoryCoordinationStore::new());
        store.update_available(SeMode::Rw, &SeId::new("se-b"), 2.0).await.unwrap();
        store.update_available(SeMode::Rw, &SeId::new("se-a"), 1.0).await.unwrap();

        let selector = StorageSelector::new(store, "http://admin".into(), "t".into());
        let chosen = selector.select(RetentionPolicy::Permanent, &[], 0).await.unwrap();
        assert_eq!(chosen, SeId::new("se-a"));
    }

    #[tokio::test]
    async fn excludes_previously_rejected_se() {
        let store = Arc::new(InMemoryCoordinationStore::new());
        store.update_available(SeMode::Rw, &SeId::new("se-a"), 1.0).await.unwrap();
        store.update_available(SeMode::Rw, &SeId::new("se-b"), 2.0).await.unwrap();

        let selector = StorageSelector::new(store, "http://admin".into(), "t".into());
        let chosen = selector.select(RetentionPolicy::Permanent, &[SeId::new("se-a")], 0).await.unwrap();
        assert_eq!(chosen, SeId::new("se-b"));
    }

    #[tokio::test]
    async fn falls_back_to_admin_when_store_is_empty() {
        let admin = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/v1/internal/storage-elements/available"))
            .and(query_param("mode", "RW"))
            .and(query_param("min_free_bytes", "0"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "storage_elements": ["se-fallback"]
            })))
            .mount(&admin)
            .await;

        let store = Arc::new(InMemoryCoordinationStore::new());
        let selector = StorageSelector::new(store, admin.uri(), "t".into());
        let chosen = selector.select(RetentionPolicy::Permanent, &[], 0).await.unwrap();
        assert_eq!(chosen, SeId::new("se-fallback"));
    }

    #[tokio::test]
    async fn no_available_storage_anywhere_is_an_error() {
        let admin = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/v1/internal/storage-elements/available"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({ "storage_elements": [] })))
            .mount(&admin)
            .await;

        let store = Arc::new(InMemoryCoordinationStore::new());
        let selector = StorageSelector::new(store, admin.uri(), "t".into());
        let err = selector.select(RetentionPolicy::Permanent, &[], 0).await.unwrap_err();
        assert!(matches!(err, SelectionError::NoAvailableStorage));
    }

    #[tokio::test]
    async fn excludes_se_without_enough_free_space() {
        let store = Arc::new(InMemoryCoordinationStore::new());
        store.update_available(SeMode::Rw, &SeId::new("se-small"), 1.0).await.unwrap();
        store.update_available(SeMode::Rw, &SeId::new("se-big"), 2.0).await.unwrap();
        store
            .set_capacity(
                &CapacityRecord {
                    se_id: SeId::new("se-small"),
                    mode: SeMode::Rw,
                    total_bytes: 100,
                    used_bytes: 95,
                    priority: 1,
                    updated_at: chrono::Utc::now(),
                    health: storage_domain::SeLifecycleStatus::Ready,
                    backend: "local".into(),
                    location: None,
                    endpoint: None,
                    last_poll: chrono::Utc::now(),
                },
                Duration::from_secs(60),
            )
            .await
            .unwrap();
        store
            .set_capacity(
                &CapacityRecord {
                    se_id: SeId::new("se-big"),
                    mode: SeMode::Rw,
                    total_bytes: 100,
                    used_bytes: 10,
                    priority: 2,
                    updated_at: chrono::Utc::now(),
                    health: storage_domain::SeLifecycleStatus::Ready,
                    backend: "local".into(),
                    location: None,
                    endpoint: None,
                    last_poll: chrono::Utc::now(),
                },
                Duration::from_secs(60),
            )
            .await
            .unwrap();

        let selector = StorageSelector::new(store, "http://admin".into(), "t".into());
        let chosen = selector.select(RetentionPolicy::Permanent, &[], 20).await.unwrap();
        assert_eq!(chosen, SeId::new("se-big"));
    }
}
