use thiserror::Error;

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("file not found: {0}")]
    FileNotFound(String),

    #[error("finalize transaction not found: {0}")]
    TransactionNotFound(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("internal registry error: {0}")]
    Internal(String),
}
