use std::path::Path;

use serde::{Deserialize, Serialize};
use storage_domain::SeMode;

use crate::common::read_yaml;
use crate::error::ConfigError;

#[derive(Debug, Deserialize, Serialize)]
struct RawSeConfig {
    se_id: String,
    mode: String,
    backend: RawBackend,
    wal_dir: String,
    #[serde(default = "default_bind")]
    bind_addr: String,
    auth_token: String,
    #[serde(default = "default_priority")]
    priority: u32,
    #[serde(default = "default_capacity_total_bytes")]
    capacity_total_bytes: u64,
    #[serde(default)]
    datacenter_location: Option<String>,
}

fn default_priority() -> u32 {
    100
}

fn default_capacity_total_bytes() -> u64 {
    1_000_000_000_000
}

#[derive(Debug, Deserialize, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
enum RawBackend {
    Local { root: String },
    S3 { endpoint: String, bucket: String, region: String, access_key: String, secret_key: String, app_folder: String },
}

fn default_bind() -> String {
    "0.0.0.0:8081".to_string()
}

#[derive(Debug, Clone)]
pub enum BackendConfig {
    Local { root: String },
    S3 { endpoint: String, bucket: String, region: String, access_key: String, secret_key: String, app_folder: String },
}

#[derive(Debug, Clone)]
pub struct SeConfig {
    pub se_id: String,
    pub mode: SeMode,
    pub backend: BackendConfig,
    pub wal_dir: String,
    pub bind_addr: String,
    pub auth_token: String,
    pub priority: u32,
    pub capacity_total_bytes: u64,
    pub datacenter_location: Option<String>,
}

fn parse_mode(s: &str, path: &Path) -> Result<SeMode, ConfigError> {
    match s.to_uppercase().as_str() {
        "EDIT" => Ok(SeMode::Edit),
        "RW" => Ok(SeMode::Rw),
        "RO" => Ok(SeMode::Ro),
        "AR" => Ok(SeMode::Ar),
        other => Err(ConfigError::Validation {
            path: path.display().to_string(),
            message: format!("unknown mode '{other}'"),
        }),
    }
}

pub fn load_se_config(path: &Path) -> Result<SeConfig, ConfigError> {
    let raw: RawSeConfig = read_yaml(path)?;
    let mode = parse_mode(&raw.mode, path)?;
    let backend = match raw.backend {
        RawBackend::Local { root } => BackendConfig::Local { root },
        RawBackend::S3 { endpoint, bucket, region, access_key, secret_key, app_folder } => {
            BackendConfig::S3 { endpoint, bucket, region, access_key, secret_key, app_folder }
        }
    };
    Ok(SeConfig {
        se_id: raw.se_id,
        mode,
        backend,
        wal_dir: raw.wal_dir,
        bind_addr: raw.bind_addr,
        auth_token: raw.auth_token,
        priority: raw.priority,
        capacity_total_bytes: raw.capacity_total_bytes,
        datacenter_location: raw.datacenter_location,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn loads_local_backend_config() {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        write!(
            f,
            "se_id: se-1\nmode: rw\nwal_dir: /var/lib/se-1/wal\nauth_token: secret\nbackend:\n  kind: local\n  root: /var/lib/se-1/data\n"
        )
        .unwrap();
        let cfg = load_se_config(f.path()).unwrap();
        assert_eq!(cfg.se_id, "se-1");
        assert_eq!(cfg.mode, SeMode::Rw);
        assert!(matches!(cfg.backend, BackendConfig::Local { ref root } if root == "/var/lib/se-1/data"));
    }

    #[test]
    fn rejects_unknown_mode() {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        write!(
            f,
            "se_id: se-1\nmode: bogus\nwal_dir: /x\nauth_token: t\nbackend:\n  kind: local\n  root: /x\n"
        )
        .unwrap();
        assert!(load_se_config(f.path()).is_err());
    }
}
