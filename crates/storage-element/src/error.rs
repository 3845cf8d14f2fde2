use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use http_api::ApiError;
use storage_backend::StorageBackendError;
use storage_domain::DomainError;
use thiserror::Error;

/// Error kinds for a single storage element process: `InvalidMode`,
/// `FileNotFound`, `InsufficientStorage`, `ChecksumMismatch`, `WalRollback`,
/// `LockContention`, `StorageBackendError`.
#[derive(Debug, Error)]
pub enum SeError {
    #[error("file not found: {0}")]
    FileNotFound(String),

    #[error("mode {mode} does not permit this operation")]
    InvalidMode { mode: String },

    #[error("cannot transition mode from {from} to {to}: the lattice only moves forward")]
    InvalidModeTransition { from: String, to: String },

    #[error("insufficient storage: need {needed} bytes, {available} available")]
    InsufficientStorage { needed: u64, available: u64 },

    #[error("checksum mismatch: expected {expected}, got {actual}")]
    ChecksumMismatch { expected: String, actual: String },

    #[error("write rolled back: {0}")]
    WalRollback(String),

    #[error("cache lock held by a higher-priority operation")]
    LockContention,

    #[error("sidecar exceeds size cap: {0}")]
    SidecarTooLarge(String),

    #[error(transparent)]
    Backend(#[from] StorageBackendError),

    #[error(transparent)]
    Domain(#[from] DomainError),

    #[error("internal error: {0}")]
    Internal(String),
}

/// HTTP status the 507 code needs, since axum's `StatusCode` has no named
/// constant for it.
fn insufficient_storage_status() -> StatusCode {
    StatusCode::from_u16(507).expect("507 is a valid status code")
}

impl From<SeError> for ApiError {
    fn from(err: SeError) -> Self {
        match err {
            SeError::FileNotFound(_) => ApiError::not_found(err.to_string()),
            SeError::InvalidMode { .. } => ApiError::bad_request(err.to_string()),
            SeError::InvalidModeTransition { .. } => ApiError::conflict(err.to_string()),
            SeError::InsufficientStorage { .. } => ApiError {
                status: insufficient_storage_status(),
                message: err.to_string(),
                retry_after_secs: None,
            },
            SeError::ChecksumMismatch { .. } => ApiError::internal(err.to_string()),
            SeError::WalRollback(_) => ApiError::internal(err.to_string()),
            SeError::LockContention => ApiError::conflict(err.to_string()),
            SeError::SidecarTooLarge(_) => ApiError::bad_request(err.to_string()),
            SeError::Backend(StorageBackendError::NotFound(_)) => {
                ApiError::not_found(err.to_string())
            }
            SeError::Backend(_) => ApiError {
                status: StatusCode::BAD_GATEWAY,
                message: err.to_string(),
                retry_after_secs: None,
            },
            SeError::Domain(_) => ApiError::bad_request(err.to_string()),
            SeError::Internal(_) => ApiError::internal(err.to_string()),
        }
    }
}

impl IntoResponse for SeError {
    fn into_response(self) -> Response {
        ApiError::from(self).into_response()
    }
}
