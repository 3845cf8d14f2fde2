use admin_store::RegistryError;
use http_api::ApiError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AdminError {
    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error("{0}")]
    BadRequest(String),

    #[error("file not found: {0}")]
    FileNotFound(String),

    #[error("cannot change retention policy from PERMANENT back to TEMPORARY")]
    IrreversibleRetention,

    #[error("event publish failed: {0}")]
    EventPublish(String),

    #[error("no storage element currently available: {0}")]
    NoStorageAvailable(String),

    #[error("this operation requires an admin token")]
    Forbidden,
}

impl From<AdminError> for ApiError {
    fn from(err: AdminError) -> Self {
        match err {
            AdminError::Registry(RegistryError::FileNotFound(_)) => ApiError::not_found(err.to_string()),
            AdminError::Registry(RegistryError::TransactionNotFound(_)) => ApiError::not_found(err.to_string()),
            AdminError::Registry(_) => ApiError::internal(err.to_string()),
            AdminError::BadRequest(_) => ApiError::bad_request(err.to_string()),
            AdminError::FileNotFound(_) => ApiError::not_found(err.to_string()),
            AdminError::IrreversibleRetention => ApiError::conflict(err.to_string()),
            AdminError::EventPublish(_) => ApiError::internal(err.to_string()),
            AdminError::NoStorageAvailable(_) => ApiError::service_unavailable(err.to_string(), 5),
            AdminError::Forbidden => ApiError::forbidden(err.to_string()),
        }
    }
}

impl axum::response::IntoResponse for AdminError {
    fn into_response(self) -> axum::response::Response {
        ApiError::from(self).into_response()
    }
}
