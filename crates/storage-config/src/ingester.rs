use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::common::read_yaml;
use crate::error::ConfigError;

#[derive(Debug, Deserialize, Serialize)]
struct RawCapacityMonitor {
    #[serde(default = "default_poll_interval_secs")]
    poll_interval_secs: u64,
    #[serde(default = "default_request_timeout_secs")]
    request_timeout_secs: u64,
    #[serde(default = "default_max_retries")]
    max_retries: u32,
    #[serde(default = "default_backoff_base_secs")]
    backoff_base_secs: u64,
}

fn default_poll_interval_secs() -> u64 {
    30
}
fn default_request_timeout_secs() -> u64 {
    15
}
fn default_max_retries() -> u32 {
    3
}
fn default_backoff_base_secs() -> u64 {
    2
}

#[derive(Debug, Deserialize, Serialize)]
struct RawIngesterConfig {
    #[serde(default = "default_bind")]
    bind_addr: String,
    auth_token: String,
    coordination_redis_url: String,
    admin_base_url: String,
    database_url: String,
    storage_elements: Vec<String>,
    #[serde(default)]
    capacity_monitor: Option<RawCapacityMonitor>,
}

fn default_bind() -> String {
    "0.0.0.0:8082".to_string()
}

#[derive(Debug, Clone)]
pub struct CapacityMonitorConfig {
    pub poll_interval_secs: u64,
    pub request_timeout_secs: u64,
    pub max_retries: u32,
    pub backoff_base_secs: u64,
}

impl Default for CapacityMonitorConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: default_poll_interval_secs(),
            request_timeout_secs: default_request_timeout_secs(),
            max_retries: default_max_retries(),
            backoff_base_secs: default_backoff_base_secs(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct IngesterConfig {
    pub bind_addr: String,
    pub auth_token: String,
    pub coordination_redis_url: String,
    pub admin_base_url: String,
    pub database_url: String,
    pub storage_elements: Vec<String>,
    pub capacity_monitor: CapacityMonitorConfig,
}

pub fn load_ingester_config(path: &Path) -> Result<IngesterConfig, ConfigError> {
    let raw: RawIngesterConfig = read_yaml(path)?;
    if raw.storage_elements.is_empty() {
        return Err(ConfigError::Validation {
            path: path.display().to_string(),
            message: "storage_elements must list at least one storage element".to_string(),
        });
    }
    let capacity_monitor = raw
        .capacity_monitor
        .map(|r| CapacityMonitorConfig {
            poll_interval_secs: r.poll_interval_secs,
            request_timeout_secs: r.request_timeout_secs,
            max_retries: r.max_retries,
            backoff_base_secs: r.backoff_base_secs,
        })
        .unwrap_or_default();
    Ok(IngesterConfig {
        bind_addr: raw.bind_addr,
        auth_token: raw.auth_token,
        coordination_redis_url: raw.coordination_redis_url,
        admin_base_url: raw.admin_base_url,
        database_url: raw.database_url,
        storage_elements: raw.storage_elements,
        capacity_monitor,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn loads_with_defaulted_capacity_monitor() {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        write!(
            f,
            "auth_token: t\ncoordination_redis_url: redis://localhost\nadmin_base_url: http://admin\ndatabase_url: memory://test\nstorage_elements:\n  - http://se-1\n"
        )
        .unwrap();
        let cfg = load_ingester_config(f.path()).unwrap();
        assert_eq!(cfg.capacity_monitor.poll_interval_secs, 30);
        assert_eq!(cfg.storage_elements, vec!["http://se-1".to_string()]);
    }

    #[test]
    fn rejects_empty_storage_elements() {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        write!(
            f,
            "auth_token: t\ncoordination_redis_url: redis://localhost\nadmin_base_url: http://admin\ndatabase_url: memory://test\nstorage_elements: []\n"
        )
        .unwrap();
        assert!(load_ingester_config(f.path()).is_err());
    }
}
