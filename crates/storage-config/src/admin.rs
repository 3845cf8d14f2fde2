use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::common::read_yaml;
use crate::error::ConfigError;

#[derive(Debug, Deserialize, Serialize)]
struct RawScheduler {
    #[serde(default = "default_gc_interval_secs")]
    gc_interval_secs: u64,
    #[serde(default = "default_finalize_stale_after_secs")]
    finalize_stale_after_secs: u64,
    #[serde(default = "default_completed_tx_retention_hours")]
    completed_tx_retention_hours: u64,
    #[serde(default = "default_health_check_interval_secs")]
    health_check_interval_secs: u64,
    #[serde(default = "default_gc_batch_size")]
    gc_batch_size: u32,
}

fn default_gc_interval_secs() -> u64 {
    60
}
fn default_finalize_stale_after_secs() -> u64 {
    300
}
fn default_completed_tx_retention_hours() -> u64 {
    24
}
fn default_health_check_interval_secs() -> u64 {
    30
}
fn default_gc_batch_size() -> u32 {
    100
}

#[derive(Debug, Deserialize, Serialize)]
struct RawAdminConfig {
    #[serde(default = "default_bind")]
    bind_addr: String,
    auth_token: String,
    #[serde(default)]
    admin_token: Option<String>,
    database_url: String,
    event_redis_url: String,
    storage_elements: Vec<String>,
    #[serde(default)]
    scheduler: Option<RawScheduler>,
}

fn default_bind() -> String {
    "0.0.0.0:8083".to_string()
}

#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    pub gc_interval_secs: u64,
    pub finalize_stale_after_secs: u64,
    pub completed_tx_retention_hours: u64,
    pub health_check_interval_secs: u64,
    pub gc_batch_size: u32,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            gc_interval_secs: default_gc_interval_secs(),
            finalize_stale_after_secs: default_finalize_stale_after_secs(),
            completed_tx_retention_hours: default_completed_tx_retention_hours(),
            health_check_interval_secs: default_health_check_interval_secs(),
            gc_batch_size: default_gc_batch_size(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct AdminConfig {
    pub bind_addr: String,
    pub auth_token: String,
    pub admin_token: String,
    pub database_url: String,
    pub event_redis_url: String,
    pub storage_elements: Vec<String>,
    pub scheduler: SchedulerConfig,
}

pub fn load_admin_config(path: &Path) -> Result<AdminConfig, ConfigError> {
    let raw: RawAdminConfig = read_yaml(path)?;
    let scheduler = raw
        .scheduler
        .map(|r| SchedulerConfig {
            gc_interval_secs: r.gc_interval_secs,
            finalize_stale_after_secs: r.finalize_stale_after_secs,
            completed_tx_retention_hours: r.completed_tx_retention_hours,
            health_check_interval_secs: r.health_check_interval_secs,
            gc_batch_size: r.gc_batch_size,
        })
        .unwrap_or_default();
    Ok(AdminConfig {
        bind_addr: raw.bind_addr,
        admin_token: raw.admin_token.clone().unwrap_or_else(|| raw.auth_token.clone()),
        auth_token: raw.auth_token,
        database_url: raw.database_url,
        event_redis_url: raw.event_redis_url,
        storage_elements: raw.storage_elements,
        scheduler,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn loads_with_defaulted_scheduler() {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        write!(
            f,
            "auth_token: t\ndatabase_url: postgres://x\nevent_redis_url: redis://x\nstorage_elements:\n  - http://se-1\n"
        )
        .unwrap();
        let cfg = load_admin_config(f.path()).unwrap();
        assert_eq!(cfg.scheduler.gc_interval_secs, 60);
    }

    #[test]
    fn honors_overridden_scheduler_values() {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        write!(
            f,
            "auth_token: t\ndatabase_url: postgres://x\nevent_redis_url: redis://x\nstorage_elements:\n  - http://se-1\nscheduler:\n  gc_interval_secs: 120\n"
        )
        .unwrap();
        let cfg = load_admin_config(f.path()).unwrap();
        assert_eq!(cfg.scheduler.gc_interval_secs, 120);
        assert_eq!(cfg.scheduler.finalize_stale_after_secs, 300);
    }
}
