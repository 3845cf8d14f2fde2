use async_trait::async_trait;
use std::time::Duration;
use storage_domain::{CapacityRecord, SeId, SeMode};

use crate::error::CoordinationError;

/// Shared cross-process coordination primitives needed by the capacity
/// monitor's leader election and the Sequential-Fill selector's
/// priority-ordered view of writable storage elements.
///
/// Implementations: [`crate::memory::InMemoryCoordinationStore`] for tests
/// and single-node deployments, [`crate::redis_store::RedisCoordinationStore`]
/// for multi-instance Ingester fleets.
#[async_trait]
pub trait CoordinationStore: Send + Sync + 'static {
    /// Cheapest possible round-trip to the backing store, used by the
    /// `/health/ready` handler to distinguish "process is up" from "process
    /// can actually reach its coordination backend."
    async fn ping(&self) -> Result<(), CoordinationError>;

    /// Atomic compare-and-set acquire: succeeds only if `key` is absent or
    /// already held by `holder`. Returns whether the lock is now held.
    async fn try_acquire_lock(
        &self,
        key: &str,
        holder: &str,
        ttl: Duration,
    ) -> Result<bool, CoordinationError>;

    /// Extend the TTL, but only if `holder` still owns the lock. Returns
    /// `false` (not an error) if another holder has since taken it — the
    /// caller must then step down as leader.
    async fn renew_lock(
        &self,
        key: &str,
        holder: &str,
        ttl: Duration,
    ) -> Result<bool, CoordinationError>;

    /// Compare-and-delete by value: removes `key` only if still held by
    /// `holder`. A no-op (not an error) if the lock already expired or was
    /// taken by someone else.
    async fn release_lock(&self, key: &str, holder: &str) -> Result<(), CoordinationError>;

    async fn set_capacity(
        &self,
        record: &CapacityRecord,
        ttl: Duration,
    ) -> Result<(), CoordinationError>;

    async fn get_capacity(&self, se_id: &SeId) -> Result<Option<CapacityRecord>, CoordinationError>;

    async fn set_health(
        &self,
        se_id: &SeId,
        healthy: bool,
        ttl: Duration,
    ) -> Result<(), CoordinationError>;

    async fn get_health(&self, se_id: &SeId) -> Result<Option<bool>, CoordinationError>;

    /// Insert/update `se_id` in the priority-ordered available set for `mode`.
    /// Lower `score` sorts first (priority ascending, then percent_used).
    async fn update_available(
        &self,
        mode: SeMode,
        se_id: &SeId,
        score: f64,
    ) -> Result<(), CoordinationError>;

    async fn remove_available(&self, mode: SeMode, se_id: &SeId) -> Result<(), CoordinationError>;

    /// List SE ids for `mode` in ascending score order.
    async fn list_available(&self, mode: SeMode) -> Result<Vec<SeId>, CoordinationError>;
}
