use http_api::ApiError;
use thiserror::Error;

use crate::selector::SelectionError;

#[derive(Debug, Error)]
pub enum IngestError {
    #[error(transparent)]
    Selection(#[from] SelectionError),

    #[error("storage element for this upload could not be reached: {0}")]
    SeUnreachable(#[from] reqwest::Error),

    #[error("{0}")]
    BadRequest(String),

    #[error("finalize transaction not found: {0}")]
    TransactionNotFound(String),

    #[error("storage element {0} has no known address yet")]
    UnknownStorageElement(String),
}

impl From<IngestError> for ApiError {
    fn from(err: IngestError) -> Self {
        match err {
            IngestError::Selection(SelectionError::NoAvailableStorage) => {
                ApiError::service_unavailable(err.to_string(), 30)
            }
            IngestError::Selection(_) => ApiError::internal(err.to_string()),
            IngestError::SeUnreachable(_) => ApiError::internal(err.to_string()),
            IngestError::BadRequest(_) => ApiError::bad_request(err.to_string()),
            IngestError::TransactionNotFound(_) => ApiError::not_found(err.to_string()),
            IngestError::UnknownStorageElement(_) => ApiError::not_found(err.to_string()),
        }
    }
}

impl axum::response::IntoResponse for IngestError {
    fn into_response(self) -> axum::response::Response {
        ApiError::from(self).into_response()
    }
}
