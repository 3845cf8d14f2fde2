use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use storage_config::CapacityMonitorConfig;
use storage_coordination::leader::LeaderElector;
use storage_coordination::store::CoordinationStore;
use storage_domain::{CapacityRecord, SeId};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

const CAPACITY_TTL: Duration = Duration::from_secs(600);
const MIN_POLL_INTERVAL_SECS: u64 = 10;
const MAX_POLL_INTERVAL_SECS: u64 = 300;
const STABLE_POLLS_BEFORE_BACKOFF: u32 = 3;

/// Elects a leader among ingester instances and polls every storage
/// element's `GET /api/v1/capacity` on its behalf, writing the results into
/// the shared [`CoordinationStore`] so every instance's selector sees the
/// same view without each of them hammering every SE.
///
/// The poll cadence adapts: it widens toward [`MAX_POLL_INTERVAL_SECS`] after
/// a run of polls that changed nothing, and snaps back to the configured
/// base the moment something does change, mirroring the original's
/// stability-counter backoff.
pub struct CapacityMonitor {
    store: Arc<dyn CoordinationStore>,
    leader: Arc<LeaderElector>,
    client: reqwest::Client,
    storage_elements: Vec<String>,
    auth_token: String,
    cfg: CapacityMonitorConfig,
    current_interval_secs: AtomicU64,
    stable_polls: AtomicU64,
    last_snapshot: Mutex<BTreeMap<String, (bool, u64)>>,
    /// Reverse lookup from SE id to the base URL it was last reached at,
    /// since the coordination store's available set only carries ids.
    se_urls: Mutex<HashMap<String, String>>,
}

#[derive(Debug, Default)]
pub struct PollSummary {
    pub polled: usize,
    pub healthy: usize,
    pub changed: bool,
}

impl CapacityMonitor {
    pub fn new(
        store: Arc<dyn CoordinationStore>,
        leader: Arc<LeaderElector>,
        storage_elements: Vec<String>,
        auth_token: String,
        cfg: CapacityMonitorConfig,
    ) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(cfg.request_timeout_secs))
            .build()
            .expect("reqwest client builds");
        CapacityMonitor {
            store,
            leader,
            client,
            storage_elements,
            auth_token,
            current_interval_secs: AtomicU64::new(cfg.poll_interval_secs),
            cfg,
            stable_polls: AtomicU64::new(0),
            last_snapshot: Mutex::new(BTreeMap::new()),
            se_urls: Mutex::new(HashMap::new()),
        }
    }

    pub fn current_interval(&self) -> Duration {
        Duration::from_secs(self.current_interval_secs.load(Ordering::Relaxed))
    }

    /// The base URL an SE was last successfully reached at, learned from
    /// capacity polling. `None` if the SE has never answered a poll.
    pub async fn resolve_url(&self, se_id: &SeId) -> Option<String> {
        self.se_urls.lock().await.get(se_id.as_str()).cloned()
    }

    /// Reverse lookup of [`Self::se_urls`], for the failure path of a poll
    /// that has only a base URL and needs the SE id it last belonged to.
    async fn se_id_for_base_url(&self, base_url: &str) -> Option<SeId> {
        self.se_urls
            .lock()
            .await
            .iter()
            .find(|(_, url)| url.as_str() == base_url)
            .map(|(id, _)| SeId::new(id.clone()))
    }

    /// One election/renewal attempt followed by a poll pass if this instance
    /// currently holds the leader lock. Intended to be called on a fixed
    /// short cadence ([`storage_coordination::leader::LEADER_RENEWAL_INTERVAL`]);
    /// the poll itself is only as frequent as `current_interval`.
    pub async fn tick(&self) -> Option<PollSummary> {
        self.leader.tick().await;
        if !self.leader.is_leader() {
            return None;
        }
        Some(self.poll_once().await)
    }

    async fn poll_one(&self, base_url: &str) -> Option<CapacityRecord> {
        let url = format!("{}/api/v1/capacity", base_url.trim_end_matches('/'));
        let mut attempt = 0;
        loop {
            attempt += 1;
            let result = self
                .client
                .get(&url)
                .bearer_auth(&self.auth_token)
                .send()
                .await
                .and_then(|r| r.error_for_status());

            match result {
                Ok(resp) => match resp.json::<CapacityRecord>().await {
                    Ok(record) => return Some(record),
                    Err(e) => warn!(se = base_url, error = %e, "malformed capacity response"),
                },
                Err(e) if attempt >= self.cfg.max_retries => {
                    warn!(se = base_url, error = %e, attempt, "capacity poll failed, giving up");
                    return None;
                }
                Err(e) => {
                    debug!(se = base_url, error = %e, attempt, "capacity poll failed, retrying");
                    let backoff = self.cfg.backoff_base_secs.saturating_mul(1 << (attempt - 1));
                    tokio::time::sleep(Duration::from_secs(backoff)).await;
                }
            }
        }
    }

    /// Polls every configured storage element once and refreshes the
    /// coordination store's capacity/health/available-set view. Only
    /// meaningful when this instance holds the leader lock, but callable
    /// directly in tests without needing one.
    pub async fn poll_once(&self) -> PollSummary {
        let mut summary = PollSummary { polled: self.storage_elements.len(), ..Default::default() };
        let mut snapshot = BTreeMap::new();

        for base_url in &self.storage_elements {
            match self.poll_one(base_url).await {
                Some(record) => {
                    summary.healthy += 1;
                    snapshot.insert(record.se_id.as_str().to_string(), (true, record.used_bytes));
                    self.se_urls.lock().await.insert(record.se_id.as_str().to_string(), base_url.clone());

                    let _ = self.store.set_capacity(&record, CAPACITY_TTL).await;
                    let _ = self.store.set_health(&record.se_id, true, CAPACITY_TTL).await;

                    let score = record.priority as f64 * 10_000.0 + record.percent_used();
                    if record.is_writable() {
                        let _ = self.store.update_available(record.mode, &record.se_id, score).await;
                    } else {
                        let _ = self.store.remove_available(record.mode, &record.se_id).await;
                    }
                }
                None => {
                    // Record unhealthiness by URL for the change-detection snapshot;
                    // the coordination store's health key can't be refreshed without
                    // an se_id and is left to expire via its TTL instead. But if this
                    // SE answered a previous poll we do know its id, and a previously
                    // healthy SE must be evicted from the available set immediately
                    // rather than staying selectable until that TTL lapses.
                    snapshot.insert(base_url.clone(), (false, 0));
                    if let Some(se_id) = self.se_id_for_base_url(base_url).await {
                        for mode in [storage_domain::SeMode::Edit, storage_domain::SeMode::Rw, storage_domain::SeMode::Ro, storage_domain::SeMode::Ar] {
                            let _ = self.store.remove_available(mode, &se_id).await;
                        }
                    }
                }
            }
        }

        let mut last = self.last_snapshot.lock().await;
        summary.changed = *last != snapshot;
        *last = snapshot;
        self.adapt_interval(summary.changed);
        summary
    }

    fn adapt_interval(&self, changed: bool) {
        if changed {
            self.stable_polls.store(0, Ordering::Relaxed);
            self.current_interval_secs.store(self.cfg.poll_interval_secs, Ordering::Relaxed);
            return;
        }

        let stable = self.stable_polls.fetch_add(1, Ordering::Relaxed) + 1;
        if stable >= STABLE_POLLS_BEFORE_BACKOFF as u64 {
            let current = self.current_interval_secs.load(Ordering::Relaxed);
            let grown = ((current as f64) * 1.5) as u64;
            let next = grown.clamp(MIN_POLL_INTERVAL_SECS, MAX_POLL_INTERVAL_SECS);
            self.current_interval_secs.store(next, Ordering::Relaxed);
        }
    }

    /// A single storage element reported 507 on an upload attempt: re-poll
    /// it immediately and shrink the adaptive interval, since a capacity
    /// surprise means our cached view is stale.
    pub async fn trigger_lazy_update(&self, se_id: &SeId, base_url: &str) {
        info!(se = %se_id, "lazy capacity re-poll triggered by 507");
        if let Some(record) = self.poll_one(base_url).await {
            self.se_urls.lock().await.insert(record.se_id.as_str().to_string(), base_url.to_string());
            let _ = self.store.set_capacity(&record, CAPACITY_TTL).await;
            let score = record.priority as f64 * 10_000.0 + record.percent_used();
            if record.is_writable() {
                let _ = self.store.update_available(record.mode, &record.se_id, score).await;
            } else {
                let _ = self.store.remove_available(record.mode, &record.se_id).await;
            }
        }
        self.current_interval_secs.store(MIN_POLL_INTERVAL_SECS, Ordering::Relaxed);
        self.stable_polls.store(0, Ordering::Relaxed);
    }
}

/// Drives [`CapacityMonitor::tick`] on [`storage_coordination::leader::LEADER_RENEWAL_INTERVAL`],
/// looping forever. Run as a background task from `main`.
pub async fn run_loop(monitor: Arc<CapacityMonitor>) {
    loop {
        if let Some(summary) = monitor.tick().await {
            debug!(polled = summary.polled, healthy = summary.healthy, changed = summary.changed, "capacity poll complete");
        }
        tokio::time::sleep(storage_coordination::leader::LEADER_RENEWAL_INTERVAL).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use storage_coordination::memory::InMemoryCoordinationStore;
    use storage_domain::SeMode;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    async fn mock_se(se_id: &str, priority: u32, used_bytes: u64, total_bytes: u64) -> MockServer {
        let server = MockServer::start().await;
        let record = CapacityRecord {
            se_id: SeId::new(se_id),
            mode: SeMode::Rw,
            total_bytes,
            used_bytes,
            priority,
            updated_at: chrono::Utc::now(),
            health: storage_domain::SeLifecycleStatus::Ready,
            backend: "local".into(),
            location: None,
            endpoint: None,
            last_poll: chrono::Utc::now(),
        };
        Mock::given(method("GET"))
            .and(path("/api/v1/capacity"))
            .and(header("Authorization", "Bearer secret"))
            .respond_with(ResponseTemplate::new(200).set_body_json(&record))
            .mount(&server)
            .await;
        server
    }

    fn cfg() -> CapacityMonitorConfig {
        CapacityMonitorConfig { poll_interval_secs: 30, request_timeout_secs: 5, max_retries: 2, backoff_base_secs: 0 }
    }

    #[tokio::test]
    async fn poll_once_populates_capacity_and_available_set() {
        let se = mock_se("se-1", 1, 10, 100).await;
        let store = Arc::new(InMemoryCoordinationStore::new());
        let leader = Arc::new(LeaderElector::new(store.clone()));
        let monitor = CapacityMonitor::new(store.clone(), leader, vec![se.uri()], "secret".into(), cfg());

        let summary = monitor.poll_once().await;
        assert_eq!(summary.healthy, 1);

        let record = store.get_capacity(&SeId::new("se-1")).await.unwrap().unwrap();
        assert_eq!(record.used_bytes, 10);

        let available = store.list_available(SeMode::Rw).await.unwrap();
        assert_eq!(available, vec![SeId::new("se-1")]);
    }

    #[tokio::test]
    async fn unreachable_se_is_not_added_to_available_set() {
        let store = Arc::new(InMemoryCoordinationStore::new());
        let leader = Arc::new(LeaderElector::new(store.clone()));
        let monitor = CapacityMonitor::new(store.clone(), leader, vec!["http://127.0.0.1:1".into()], "secret".into(), cfg());

        let summary = monitor.poll_once().await;
        assert_eq!(summary.healthy, 0);
        assert!(store.list_available(SeMode::Rw).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn repeated_unchanged_polls_widen_the_interval() {
        let se = mock_se("se-1", 1, 10, 100).await;
        let store = Arc::new(InMemoryCoordinationStore::new());
        let leader = Arc::new(LeaderElector::new(store));
        let backing = Arc::new(InMemoryCoordinationStore::new());
        let monitor = CapacityMonitor::new(backing, leader, vec![se.uri()], "secret".into(), cfg());

        for _ in 0..4 {
            monitor.poll_once().await;
        }
        assert!(monitor.current_interval() > Duration::from_secs(30));
    }

    #[tokio::test]
    async fn poll_once_records_se_url_for_later_lookup() {
        let se = mock_se("se-1", 1, 10, 100).await;
        let store = Arc::new(InMemoryCoordinationStore::new());
        let leader = Arc::new(LeaderElector::new(store.clone()));
        let monitor = CapacityMonitor::new(store, leader, vec![se.uri()], "secret".into(), cfg());

        monitor.poll_once().await;
        assert_eq!(monitor.resolve_url(&SeId::new("se-1")).await, Some(se.uri()));
        assert_eq!(monitor.resolve_url(&SeId::new("se-unknown")).await, None);
    }

    #[tokio::test]
    async fn se_that_goes_unreachable_is_evicted_from_available_set() {
        let se = MockServer::start().await;
        let record = CapacityRecord {
            se_id: SeId::new("se-1"),
            mode: SeMode::Rw,
            total_bytes: 100,
            used_bytes: 10,
            priority: 1,
            updated_at: chrono::Utc::now(),
            health: storage_domain::SeLifecycleStatus::Ready,
            backend: "local".into(),
            location: None,
            endpoint: None,
            last_poll: chrono::Utc::now(),
        };
        let mock = Mock::given(method("GET"))
            .and(path("/api/v1/capacity"))
            .respond_with(ResponseTemplate::new(200).set_body_json(&record))
            .up_to_n_times(1)
            .mount_as_scoped(&se)
            .await;

        let store = Arc::new(InMemoryCoordinationStore::new());
        let leader = Arc::new(LeaderElector::new(store.clone()));
        let monitor = CapacityMonitor::new(store.clone(), leader, vec![se.uri()], "secret".into(), cfg());

        monitor.poll_once().await;
        assert_eq!(store.list_available(SeMode::Rw).await.unwrap(), vec![SeId::new("se-1")]);

        drop(mock);
        Mock::given(method("GET")).and(path("/api/v1/capacity")).respond_with(ResponseTemplate::new(500)).mount(&se).await;

        monitor.poll_once().await;
        assert!(store.list_available(SeMode::Rw).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn tick_only_polls_when_leader() {
        let store = Arc::new(InMemoryCoordinationStore::new());
        let leader_a = Arc::new(LeaderElector::new(store.clone()));
        let leader_b = Arc::new(LeaderElector::new(store.clone()));
        let se = mock_se("se-1", 1, 10, 100).await;

        let monitor_a = CapacityMonitor::new(store.clone(), leader_a, vec![se.uri()], "secret".into(), cfg());
        let monitor_b = CapacityMonitor::new(store, leader_b, vec![se.uri()], "secret".into(), cfg());

        assert!(monitor_a.tick().await.is_some());
        assert!(monitor_b.tick().await.is_none());
    }
}
