use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::common::read_yaml;
use crate::error::ConfigError;

#[derive(Debug, Deserialize, Serialize)]
struct RawQueryConfig {
    #[serde(default = "default_bind")]
    bind_addr: String,
    auth_token: String,
    redis_url: String,
    #[serde(default = "default_stream_name")]
    stream_name: String,
    #[serde(default = "default_consumer_group")]
    consumer_group: String,
    #[serde(default = "default_batch_size")]
    batch_size: u32,
    #[serde(default = "default_block_ms")]
    block_ms: u64,
    #[serde(default = "default_pending_retry_ms")]
    pending_retry_ms: u64,
    #[serde(default = "default_pending_idle_ms")]
    pending_idle_ms: u64,
    cache_dir: String,
    storage_elements: Vec<String>,
}

fn default_bind() -> String {
    "0.0.0.0:8084".to_string()
}
fn default_stream_name() -> String {
    "file-events".to_string()
}
fn default_consumer_group() -> String {
    "query-module-consumers".to_string()
}
fn default_batch_size() -> u32 {
    10
}
fn default_block_ms() -> u64 {
    5000
}
fn default_pending_retry_ms() -> u64 {
    30_000
}
fn default_pending_idle_ms() -> u64 {
    60_000
}

#[derive(Debug, Clone)]
pub struct QueryConfig {
    pub bind_addr: String,
    pub auth_token: String,
    pub redis_url: String,
    pub stream_name: String,
    pub consumer_group: String,
    pub batch_size: u32,
    pub block_ms: u64,
    pub pending_retry_ms: u64,
    pub pending_idle_ms: u64,
    pub cache_dir: String,
    pub storage_elements: Vec<String>,
}

pub fn load_query_config(path: &Path) -> Result<QueryConfig, ConfigError> {
    let raw: RawQueryConfig = read_yaml(path)?;
    Ok(QueryConfig {
        bind_addr: raw.bind_addr,
        auth_token: raw.auth_token,
        redis_url: raw.redis_url,
        stream_name: raw.stream_name,
        consumer_group: raw.consumer_group,
        batch_size: raw.batch_size,
        block_ms: raw.block_ms,
        pending_retry_ms: raw.pending_retry_ms,
        pending_idle_ms: raw.pending_idle_ms,
        cache_dir: raw.cache_dir,
        storage_elements: raw.storage_elements,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn loads_with_stream_defaults() {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        write!(
            f,
            "auth_token: t\nredis_url: redis://x\ncache_dir: /var/cache/query\nstorage_elements:\n  - http://se-1\n"
        )
        .unwrap();
        let cfg = load_query_config(f.path()).unwrap();
        assert_eq!(cfg.stream_name, "file-events");
        assert_eq!(cfg.consumer_group, "query-module-consumers");
        assert_eq!(cfg.batch_size, 10);
        assert_eq!(cfg.pending_idle_ms, 60_000);
    }
}
