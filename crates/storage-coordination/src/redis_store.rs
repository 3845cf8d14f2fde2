use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Script};
use std::time::Duration;
use storage_domain::{CapacityRecord, SeId, SeMode};

use crate::error::CoordinationError;
use crate::store::CoordinationStore;

// Compare-and-delete: only remove the key if its value still matches the
// caller's holder id. Mirrors the original's Lua-script release so a leader
// that has already lost the lock to a newer holder can never delete it out
// from under them.
const RELEASE_SCRIPT: &str = r#"
if redis.call("GET", KEYS[1]) == ARGV[1] then
    return redis.call("DEL", KEYS[1])
else
    return 0
end
"#;

// Compare-and-extend: only reset the TTL if still held by `holder`.
const RENEW_SCRIPT: &str = r#"
if redis.call("GET", KEYS[1]) == ARGV[1] then
    return redis.call("PEXPIRE", KEYS[1], ARGV[2])
else
    return 0
end
"#;

/// Redis-backed [`CoordinationStore`]. Leader election uses `SET key value NX
/// PX ttl_ms`; renewal and release use small Lua scripts for atomic
/// compare-and-swap semantics, matching the original capacity monitor's use
/// of a Lua release script to avoid deleting a lock it no longer owns.
///
/// Capacity/health are stored as JSON strings with a Redis TTL
/// (`capacity:{se_id}` / `health:{se_id}`, 600s per the distilled spec).
/// The available-SE view is a Redis sorted set keyed `available:{mode}`.
#[derive(Clone)]
pub struct RedisCoordinationStore {
    conn: ConnectionManager,
}

impl RedisCoordinationStore {
    pub async fn connect(url: &str) -> Result<Self, CoordinationError> {
        let client = redis::Client::open(url)?;
        let conn = client.get_connection_manager().await?;
        Ok(Self { conn })
    }

    fn capacity_key(se_id: &SeId) -> String {
        format!("capacity:{}", se_id.as_str())
    }

    fn health_key(se_id: &SeId) -> String {
        format!("health:{}", se_id.as_str())
    }

    fn available_key(mode: SeMode) -> String {
        format!("capacity:{mode}:available")
    }
}

#[async_trait]
impl CoordinationStore for RedisCoordinationStore {
    async fn ping(&self) -> Result<(), CoordinationError> {
        let mut conn = self.conn.clone();
        let _: String = redis::cmd("PING").query_async(&mut conn).await?;
        Ok(())
    }

    async fn try_acquire_lock(
        &self,
        key: &str,
        holder: &str,
        ttl: Duration,
    ) -> Result<bool, CoordinationError> {
        let mut conn = self.conn.clone();
        let result: Option<String> = redis::cmd("SET")
            .arg(key)
            .arg(holder)
            .arg("NX")
            .arg("PX")
            .arg(ttl.as_millis() as u64)
            .query_async(&mut conn)
            .await?;
        Ok(result.is_some())
    }

    async fn renew_lock(
        &self,
        key: &str,
        holder: &str,
        ttl: Duration,
    ) -> Result<bool, CoordinationError> {
        let mut conn = self.conn.clone();
        let result: i64 = Script::new(RENEW_SCRIPT)
            .key(key)
            .arg(holder)
            .arg(ttl.as_millis() as u64)
            .invoke_async(&mut conn)
            .await?;
        Ok(result == 1)
    }

    async fn release_lock(&self, key: &str, holder: &str) -> Result<(), CoordinationError> {
        let mut conn = self.conn.clone();
        let _: i64 = Script::new(RELEASE_SCRIPT)
            .key(key)
            .arg(holder)
            .invoke_async(&mut conn)
            .await?;
        Ok(())
    }

    async fn set_capacity(
        &self,
        record: &CapacityRecord,
        ttl: Duration,
    ) -> Result<(), CoordinationError> {
        let mut conn = self.conn.clone();
        let json = serde_json::to_string(record)?;
        conn.set_ex::<_, _, ()>(Self::capacity_key(&record.se_id), json, ttl.as_secs())
            .await?;
        Ok(())
    }

    async fn get_capacity(&self, se_id: &SeId) -> Result<Option<CapacityRecord>, CoordinationError> {
        let mut conn = self.conn.clone();
        let raw: Option<String> = conn.get(Self::capacity_key(se_id)).await?;
        raw.map(|s| serde_json::from_str(&s)).transpose().map_err(Into::into)
    }

    async fn set_health(
        &self,
        se_id: &SeId,
        healthy: bool,
        ttl: Duration,
    ) -> Result<(), CoordinationError> {
        let mut conn = self.conn.clone();
        conn.set_ex::<_, _, ()>(Self::health_key(se_id), healthy as u8, ttl.as_secs())
            .await?;
        Ok(())
    }

    async fn get_health(&self, se_id: &SeId) -> Result<Option<bool>, CoordinationError> {
        let mut conn = self.conn.clone();
        let raw: Option<u8> = conn.get(Self::health_key(se_id)).await?;
        Ok(raw.map(|v| v != 0))
    }

    async fn update_available(
        &self,
        mode: SeMode,
        se_id: &SeId,
        score: f64,
    ) -> Result<(), CoordinationError> {
        let mut conn = self.conn.clone();
        conn.zadd::<_, _, _, ()>(Self::available_key(mode), se_id.as_str(), score)
            .await?;
        Ok(())
    }

    async fn remove_available(&self, mode: SeMode, se_id: &SeId) -> Result<(), CoordinationError> {
        let mut conn = self.conn.clone();
        conn.zrem::<_, _, ()>(Self::available_key(mode), se_id.as_str()).await?;
        Ok(())
    }

    async fn list_available(&self, mode: SeMode) -> Result<Vec<SeId>, CoordinationError> {
        let mut conn = self.conn.clone();
        let ids: Vec<String> = conn.zrange(Self::available_key(mode), 0, -1).await?;
        Ok(ids.into_iter().map(SeId::new).collect())
    }
}
