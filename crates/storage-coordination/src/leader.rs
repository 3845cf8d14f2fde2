use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use uuid::Uuid;

use crate::store::CoordinationStore;

pub const LEADER_LOCK_KEY: &str = "capacity_monitor:leader_lock";
pub const LEADER_TTL: Duration = Duration::from_secs(30);
pub const LEADER_RENEWAL_INTERVAL: Duration = Duration::from_secs(10);

/// Tracks whether this process currently holds the capacity-monitor leader
/// lock. `instance_id` is a v4 UUID generated once per process and used as
/// the lock's holder identity.
pub struct LeaderElector {
    store: Arc<dyn CoordinationStore>,
    instance_id: String,
    is_leader: AtomicBool,
}

impl LeaderElector {
    pub fn new(store: Arc<dyn CoordinationStore>) -> Self {
        Self {
            store,
            instance_id: Uuid::new_v4().to_string(),
            is_leader: AtomicBool::new(false),
        }
    }

    pub fn instance_id(&self) -> &str {
        &self.instance_id
    }

    pub fn is_leader(&self) -> bool {
        self.is_leader.load(Ordering::Acquire)
    }

    /// Single election attempt: try to acquire, or renew if already leader.
    /// Call from a loop on a fixed cadence ([`LEADER_RENEWAL_INTERVAL`]).
    pub async fn tick(&self) {
        if self.is_leader() {
            match self.store.renew_lock(LEADER_LOCK_KEY, &self.instance_id, LEADER_TTL).await {
                Ok(true) => info!(instance = %self.instance_id, "leader_renewed"),
                Ok(false) => {
                    warn!(instance = %self.instance_id, "leader_lost");
                    self.is_leader.store(false, Ordering::Release);
                }
                Err(e) => warn!(instance = %self.instance_id, error = %e, "leader renewal failed"),
            }
            return;
        }

        match self.store.try_acquire_lock(LEADER_LOCK_KEY, &self.instance_id, LEADER_TTL).await {
            Ok(true) => {
                info!(instance = %self.instance_id, "leader_acquired");
                self.is_leader.store(true, Ordering::Release);
            }
            Ok(false) => {}
            Err(e) => warn!(instance = %self.instance_id, error = %e, "leader acquire failed"),
        }
    }

    /// Release the lock if still held. Best-effort; called during graceful
    /// shutdown so a newer instance doesn't have to wait out the full TTL.
    pub async fn step_down(&self) {
        if self.is_leader.swap(false, Ordering::AcqRel) {
            let _ = self.store.release_lock(LEADER_LOCK_KEY, &self.instance_id).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::InMemoryCoordinationStore;

    #[tokio::test]
    async fn single_instance_becomes_leader() {
        let store = Arc::new(InMemoryCoordinationStore::new());
        let elector = LeaderElector::new(store);
        elector.tick().await;
        assert!(elector.is_leader());
    }

    #[tokio::test]
    async fn only_one_of_two_instances_becomes_leader() {
        let store = Arc::new(InMemoryCoordinationStore::new());
        let a = LeaderElector::new(store.clone());
        let b = LeaderElector::new(store);
        a.tick().await;
        b.tick().await;
        assert!(a.is_leader());
        assert!(!b.is_leader());
    }

    #[tokio::test]
    async fn step_down_releases_lock_for_others() {
        let store = Arc::new(InMemoryCoordinationStore::new());
        let a = LeaderElector::new(store.clone());
        let b = LeaderElector::new(store);
        a.tick().await;
        assert!(a.is_leader());
        a.step_down().await;
        b.tick().await;
        assert!(b.is_leader());
    }
}
