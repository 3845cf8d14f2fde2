use std::path::Path;

use serde::de::DeserializeOwned;

use crate::error::ConfigError;

/// Read and parse a YAML config file. Every service's `load_*_config`
/// delegates here so file-not-found and parse errors are reported
/// consistently.
pub fn read_yaml<T: DeserializeOwned>(path: &Path) -> Result<T, ConfigError> {
    let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Io {
        path: path.display().to_string(),
        source: e,
    })?;
    serde_yaml::from_str(&content).map_err(|e| ConfigError::YamlParse {
        path: path.display().to_string(),
        source: e,
    })
}
