use std::collections::HashMap;
use std::time::Duration;

use storage_domain::{CapacityRecord, SeId, SeMode};
use tokio::sync::RwLock;
use tracing::{debug, warn};

/// Admin's own view of fleet capacity, built by directly polling every
/// configured storage element's `/api/v1/capacity` on a fixed cadence
/// (`scheduler.health_check_interval_secs`). Distinct from the Ingester
/// fleet's adaptive, leader-elected [`storage_coordination::CoordinationStore`]
/// view: Admin is a single instance, so there is no fan-out to avoid and no
/// need for a distributed lock, only a plain background loop.
pub struct SeRegistry {
    client: reqwest::Client,
    auth_token: String,
    storage_elements: Vec<String>,
    snapshots: RwLock<HashMap<SeId, CapacityRecord>>,
    /// Reverse lookup from SE id to the base URL it last answered at, so GC
    /// can reach a specific SE by id without polling all of them again.
    base_urls: RwLock<HashMap<SeId, String>>,
}

impl SeRegistry {
    pub fn new(storage_elements: Vec<String>, auth_token: String) -> Self {
        SeRegistry {
            client: reqwest::Client::builder()
                .timeout(Duration::from_secs(10))
                .build()
                .expect("reqwest client builds"),
            auth_token,
            storage_elements,
            snapshots: RwLock::new(HashMap::new()),
            base_urls: RwLock::new(HashMap::new()),
        }
    }

    /// Polls every configured SE once, replacing stale entries with fresh
    /// ones and dropping SEs that failed to answer (treated as unhealthy,
    /// hence absent from [`Self::available`] until they answer again).
    pub async fn sync_once(&self) {
        for base_url in &self.storage_elements {
            let url = format!("{}/api/v1/capacity", base_url.trim_end_matches('/'));
            let result = self
                .client
                .get(&url)
                .bearer_auth(&self.auth_token)
                .send()
                .await
                .and_then(|r| r.error_for_status());

            match result {
                Ok(resp) => match resp.json::<CapacityRecord>().await {
                    Ok(record) => {
                        debug!(se = %record.se_id, "health sync refreshed capacity");
                        self.base_urls.write().await.insert(record.se_id.clone(), base_url.clone());
                        self.snapshots.write().await.insert(record.se_id.clone(), record);
                    }
                    Err(e) => warn!(se = base_url, error = %e, "malformed capacity response during health sync"),
                },
                Err(e) => {
                    warn!(se = base_url, error = %e, "health sync could not reach storage element");
                    if let Some(se_id) = self.se_id_for_base_url(base_url).await {
                        self.snapshots.write().await.remove(&se_id);
                    }
                }
            }
        }
    }

    /// Writable SEs in `mode` with at least `min_free_bytes` available,
    /// ordered ascending priority then ascending percent-used then ascending
    /// id, matching the Ingester fleet's Sequential-Fill tie-break so the
    /// fallback path picks the same SE the primary path would have.
    pub async fn available(&self, mode: SeMode, min_free_bytes: u64) -> Vec<SeId> {
        let guard = self.snapshots.read().await;
        let mut candidates: Vec<&CapacityRecord> = guard
            .values()
            .filter(|r| r.mode == mode && r.is_writable() && r.available_bytes() >= min_free_bytes)
            .collect();
        candidates.sort_by(|a, b| {
            a.priority
                .cmp(&b.priority)
                .then_with(|| a.percent_used().partial_cmp(&b.percent_used()).unwrap())
                .then_with(|| a.se_id.as_str().cmp(b.se_id.as_str()))
        });
        candidates.into_iter().map(|r| r.se_id.clone()).collect()
    }

    async fn se_id_for_base_url(&self, base_url: &str) -> Option<SeId> {
        self.base_urls
            .read()
            .await
            .iter()
            .find(|(_, url)| url.as_str() == base_url)
            .map(|(id, _)| id.clone())
    }

    /// The base URL an SE last answered a health-sync poll at, for GC's
    /// per-file DELETE calls. `None` if it has never been reached, in which
    /// case GC treats it as offline and skips cleanup-queue entries for it.
    pub async fn resolve_url(&self, se_id: &SeId) -> Option<String> {
        self.base_urls.read().await.get(se_id).cloned()
    }

    /// Whether the registry currently believes `se_id` to be reachable,
    /// i.e. it answered the most recent health-sync poll.
    pub async fn is_reachable(&self, se_id: &SeId) -> bool {
        self.snapshots.read().await.contains_key(se_id)
    }
}

/// Runs [`SeRegistry::sync_once`] on `interval`, looping forever. Spawned as
/// a background task from `main`.
pub async fn run_loop(registry: std::sync::Arc<SeRegistry>, interval: Duration) {
    let mut ticker = tokio::time::interval(interval);
    loop {
        ticker.tick().await;
        registry.sync_once().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    async fn mock_se(se_id: &str, priority: u32, used_bytes: u64, total_bytes: u64, mode: SeMode) -> MockServer {
        let server = MockServer::start().await;
        let record = CapacityRecord {
            se_id: SeId::new(se_id),
            mode,
            total_bytes,
            used_bytes,
            priority,
            updated_at: Utc::now(),
            health: storage_domain::SeLifecycleStatus::Ready,
            backend: "local".into(),
            location: None,
            endpoint: None,
            last_poll: Utc::now(),
        };
        Mock::given(method("GET"))
            .and(path("/api/v1/capacity"))
            .respond_with(ResponseTemplate::new(200).set_body_json(&record))
            .mount(&server)
            .await;
        server
    }

    #[tokio::test]
    async fn sync_once_populates_available_sorted_by_priority() {
        let se_a = mock_se("se-a", 2, 10, 100, SeMode::Rw).await;
        let se_b = mock_se("se-b", 1, 10, 100, SeMode::Rw).await;
        let registry = SeRegistry::new(vec![se_a.uri(), se_b.uri()], "secret".into());

        registry.sync_once().await;
        let available = registry.available(SeMode::Rw, 0).await;
        assert_eq!(available, vec![SeId::new("se-b"), SeId::new("se-a")]);
    }

    #[tokio::test]
    async fn available_excludes_se_without_enough_free_space() {
        let se = mock_se("se-a", 1, 95, 100, SeMode::Rw).await;
        let registry = SeRegistry::new(vec![se.uri()], "secret".into());

        registry.sync_once().await;
        assert!(registry.available(SeMode::Rw, 10).await.is_empty());
        assert_eq!(registry.available(SeMode::Rw, 1).await, vec![SeId::new("se-a")]);
    }

    #[tokio::test]
    async fn resolve_url_returns_last_known_base_url() {
        let se = mock_se("se-a", 1, 10, 100, SeMode::Rw).await;
        let registry = SeRegistry::new(vec![se.uri()], "secret".into());

        registry.sync_once().await;
        assert_eq!(registry.resolve_url(&SeId::new("se-a")).await, Some(se.uri()));
        assert!(registry.is_reachable(&SeId::new("se-a")).await);
        assert!(!registry.is_reachable(&SeId::new("se-unknown")).await);
    }

    #[tokio::test]
    async fn unreachable_se_is_absent_from_available() {
        let registry = SeRegistry::new(vec!["http://127.0.0.1:1".into()], "secret".into());
        registry.sync_once().await;
        assert!(registry.available(SeMode::Rw, 0).await.is_empty());
    }
}
