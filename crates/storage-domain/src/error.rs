use thiserror::Error;

#[derive(Debug, Error)]
pub enum DomainError {
    #[error("invalid storage filename: {0}")]
    InvalidStorageFilename(String),

    #[error("illegal mode transition: {from} -> {to}")]
    IllegalModeTransition { from: String, to: String },

    #[error("attribute sidecar exceeds 4096 bytes ({size} bytes)")]
    SidecarTooLarge { size: usize },

    #[error("retention policy {policy} is incompatible with mode {mode}")]
    RetentionModeMismatch { policy: String, mode: String },

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}
