use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};
use std::time::{Duration, Instant};
use storage_domain::{CapacityRecord, SeId, SeMode};
use tokio::sync::RwLock;

use crate::error::CoordinationError;
use crate::store::CoordinationStore;

struct LockEntry {
    holder: String,
    expires_at: Instant,
}

struct CacheEntry<T> {
    value: T,
    expires_at: Instant,
}

#[derive(Default)]
struct Inner {
    locks: HashMap<String, LockEntry>,
    capacity: HashMap<SeId, CacheEntry<CapacityRecord>>,
    health: HashMap<SeId, CacheEntry<bool>>,
    // mode -> (se_id -> score), kept sorted on read.
    available: HashMap<SeMode, BTreeMap<SeId, f64>>,
}

/// In-memory [`CoordinationStore`]. Suitable for tests and single-instance
/// deployments where no cross-process coordination is required.
#[derive(Default)]
pub struct InMemoryCoordinationStore {
    inner: RwLock<Inner>,
}

impl InMemoryCoordinationStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CoordinationStore for InMemoryCoordinationStore {
    async fn ping(&self) -> Result<(), CoordinationError> {
        Ok(())
    }

    async fn try_acquire_lock(
        &self,
        key: &str,
        holder: &str,
        ttl: Duration,
    ) -> Result<bool, CoordinationError> {
        let mut guard = self.inner.write().await;
        let now = Instant::now();
        let acquired = match guard.locks.get(key) {
            Some(existing) if existing.expires_at > now && existing.holder != holder => false,
            _ => true,
        };
        if acquired {
            guard.locks.insert(
                key.to_string(),
                LockEntry { holder: holder.to_string(), expires_at: now + ttl },
            );
        }
        Ok(acquired)
    }

    async fn renew_lock(
        &self,
        key: &str,
        holder: &str,
        ttl: Duration,
    ) -> Result<bool, CoordinationError> {
        let mut guard = self.inner.write().await;
        let now = Instant::now();
        match guard.locks.get_mut(key) {
            Some(entry) if entry.holder == holder && entry.expires_at > now => {
                entry.expires_at = now + ttl;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn release_lock(&self, key: &str, holder: &str) -> Result<(), CoordinationError> {
        let mut guard = self.inner.write().await;
        if let Some(entry) = guard.locks.get(key) {
            if entry.holder == holder {
                guard.locks.remove(key);
            }
        }
        Ok(())
    }

    async fn set_capacity(
        &self,
        record: &CapacityRecord,
        ttl: Duration,
    ) -> Result<(), CoordinationError> {
        let mut guard = self.inner.write().await;
        guard.capacity.insert(
            record.se_id.clone(),
            CacheEntry { value: record.clone(), expires_at: Instant::now() + ttl },
        );
        Ok(())
    }

    async fn get_capacity(&self, se_id: &SeId) -> Result<Option<CapacityRecord>, CoordinationError> {
        let guard = self.inner.read().await;
        Ok(guard
            .capacity
            .get(se_id)
            .filter(|e| e.expires_at > Instant::now())
            .map(|e| e.value.clone()))
    }

    async fn set_health(
        &self,
        se_id: &SeId,
        healthy: bool,
        ttl: Duration,
    ) -> Result<(), CoordinationError> {
        let mut guard = self.inner.write().await;
        guard.health.insert(
            se_id.clone(),
            CacheEntry { value: healthy, expires_at: Instant::now() + ttl },
        );
        Ok(())
    }

    async fn get_health(&self, se_id: &SeId) -> Result<Option<bool>, CoordinationError> {
        let guard = self.inner.read().await;
        Ok(guard
            .health
            .get(se_id)
            .filter(|e| e.expires_at > Instant::now())
            .map(|e| e.value))
    }

    async fn update_available(
        &self,
        mode: SeMode,
        se_id: &SeId,
        score: f64,
    ) -> Result<(), CoordinationError> {
        let mut guard = self.inner.write().await;
        guard.available.entry(mode).or_default().insert(se_id.clone(), score);
        Ok(())
    }

    async fn remove_available(&self, mode: SeMode, se_id: &SeId) -> Result<(), CoordinationError> {
        let mut guard = self.inner.write().await;
        if let Some(set) = guard.available.get_mut(&mode) {
            set.remove(se_id);
        }
        Ok(())
    }

    async fn list_available(&self, mode: SeMode) -> Result<Vec<SeId>, CoordinationError> {
        let guard = self.inner.read().await;
        let mut entries: Vec<(SeId, f64)> = guard
            .available
            .get(&mode)
            .map(|set| set.iter().map(|(id, score)| (id.clone(), *score)).collect())
            .unwrap_or_default();
        entries.sort_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(std::cmp::Ordering::Equal));
        Ok(entries.into_iter().map(|(id, _)| id).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn lock_is_exclusive_until_expiry() {
        let store = InMemoryCoordinationStore::new();
        assert!(store.try_acquire_lock("leader", "a", Duration::from_millis(50)).await.unwrap());
        assert!(!store.try_acquire_lock("leader", "b", Duration::from_millis(50)).await.unwrap());
        // same holder re-acquiring is fine (renewal-by-acquire)
        assert!(store.try_acquire_lock("leader", "a", Duration::from_millis(50)).await.unwrap());
    }

    #[tokio::test]
    async fn renew_fails_for_non_holder() {
        let store = InMemoryCoordinationStore::new();
        store.try_acquire_lock("leader", "a", Duration::from_secs(30)).await.unwrap();
        assert!(!store.renew_lock("leader", "b", Duration::from_secs(30)).await.unwrap());
        assert!(store.renew_lock("leader", "a", Duration::from_secs(30)).await.unwrap());
    }

    #[tokio::test]
    async fn release_only_by_owning_holder() {
        let store = InMemoryCoordinationStore::new();
        store.try_acquire_lock("leader", "a", Duration::from_secs(30)).await.unwrap();
        store.release_lock("leader", "b").await.unwrap();
        // still held by a
        assert!(!store.try_acquire_lock("leader", "c", Duration::from_secs(30)).await.unwrap());
        store.release_lock("leader", "a").await.unwrap();
        assert!(store.try_acquire_lock("leader", "c", Duration::from_secs(30)).await.unwrap());
    }

    #[tokio::test]
    async fn available_set_sorted_ascending() {
        let store = InMemoryCoordinationStore::new();
        store.update_available(SeMode::Rw, &SeId::new("se-2"), 5.0).await.unwrap();
        store.update_available(SeMode::Rw, &SeId::new("se-1"), 1.0).await.unwrap();
        let list = store.list_available(SeMode::Rw).await.unwrap();
        assert_eq!(list, vec![SeId::new("se-1"), SeId::new("se-2")]);
    }
}
