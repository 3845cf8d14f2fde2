use thiserror::Error;

#[derive(Debug, Error)]
pub enum StorageBackendError {
    #[error("file not found: {0}")]
    NotFound(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("backend returned unexpected status {status}: {body}")]
    UnexpectedStatus { status: u16, body: String },

    #[error("checksum mismatch for {path}: expected {expected}, got {actual}")]
    ChecksumMismatch { path: String, expected: String, actual: String },

    #[error("{0}")]
    Other(String),
}
