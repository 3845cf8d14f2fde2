use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::Instant;

/// Priority order for the cache lock manager, highest first. The
/// discriminant order doubles as the preemption rank: a higher-ranked
/// acquirer preempts a pending lower-ranked one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum LockPriority {
    BackgroundCleanup,
    LazyRebuild,
    ManualCheck,
    ManualRebuild,
}

impl LockPriority {
    pub fn max_hold(&self) -> Duration {
        match self {
            LockPriority::LazyRebuild => Duration::from_secs(30),
            LockPriority::ManualCheck => Duration::from_secs(600),
            LockPriority::ManualRebuild => Duration::from_secs(1800),
            LockPriority::BackgroundCleanup => Duration::from_secs(300),
        }
    }
}

struct Holder {
    priority: LockPriority,
    acquired_at: Instant,
}

/// A single priority-ordered lock protecting cache-mutating operations.
/// Acquisition below the currently-held priority fails immediately
/// ("skipped") rather than blocking; acquisition at or above the
/// held priority waits for the hold's max-hold expiry, mirroring "higher
/// priority acquirers preempt pending lower-priority requests" by simply
/// never admitting a lower one in the first place.
pub struct CacheLockManager {
    holder: Arc<Mutex<Option<Holder>>>,
}

impl Default for CacheLockManager {
    fn default() -> Self {
        Self::new()
    }
}

impl CacheLockManager {
    pub fn new() -> Self {
        Self { holder: Arc::new(Mutex::new(None)) }
    }

    /// Non-blocking acquire. Returns a guard on success; `None` ("skipped")
    /// if a holder of equal or higher priority is active and not yet expired.
    pub async fn try_acquire(&self, priority: LockPriority) -> Option<CacheLockGuard> {
        let mut guard = self.holder.lock().await;
        if let Some(current) = guard.as_ref() {
            let expired = current.acquired_at.elapsed() >= current.priority.max_hold();
            if !expired && current.priority >= priority {
                return None;
            }
        }
        *guard = Some(Holder { priority, acquired_at: Instant::now() });
        Some(CacheLockGuard { holder: self.holder.clone(), priority })
    }
}

pub struct CacheLockGuard {
    holder: Arc<Mutex<Option<Holder>>>,
    priority: LockPriority,
}

impl Drop for CacheLockGuard {
    fn drop(&mut self) {
        let holder = self.holder.clone();
        let priority = self.priority;
        tokio::spawn(async move {
            let mut guard = holder.lock().await;
            if matches!(guard.as_ref(), Some(h) if h.priority == priority) {
                *guard = None;
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn lower_priority_is_skipped_while_higher_held() {
        let mgr = CacheLockManager::new();
        let _high = mgr.try_acquire(LockPriority::ManualRebuild).await.unwrap();
        assert!(mgr.try_acquire(LockPriority::LazyRebuild).await.is_none());
    }

    #[tokio::test]
    async fn equal_priority_is_skipped_not_reentrant() {
        let mgr = CacheLockManager::new();
        let _first = mgr.try_acquire(LockPriority::BackgroundCleanup).await.unwrap();
        assert!(mgr.try_acquire(LockPriority::BackgroundCleanup).await.is_none());
    }

    #[tokio::test]
    async fn lock_is_free_again_after_guard_drops() {
        let mgr = CacheLockManager::new();
        {
            let _g = mgr.try_acquire(LockPriority::LazyRebuild).await.unwrap();
        }
        // Give the drop's spawned release task a chance to run.
        tokio::task::yield_now().await;
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(mgr.try_acquire(LockPriority::LazyRebuild).await.is_some());
    }

    #[tokio::test]
    async fn priority_ordering_is_as_specified() {
        assert!(LockPriority::ManualRebuild > LockPriority::ManualCheck);
        assert!(LockPriority::ManualCheck > LockPriority::LazyRebuild);
        assert!(LockPriority::LazyRebuild > LockPriority::BackgroundCleanup);
    }
}
