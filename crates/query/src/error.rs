use http_api::ApiError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum QueryError {
    #[error("file not found: {0}")]
    FileNotFound(String),

    #[error("unknown storage element: {0}")]
    UnknownStorageElement(String),

    #[error("{0}")]
    BadRequest(String),

    #[error(transparent)]
    Upstream(#[from] reqwest::Error),
}

impl From<QueryError> for ApiError {
    fn from(err: QueryError) -> Self {
        match &err {
            QueryError::FileNotFound(_) => ApiError::not_found(err.to_string()),
            QueryError::UnknownStorageElement(_) => ApiError::service_unavailable(err.to_string(), 5),
            QueryError::BadRequest(_) => ApiError::bad_request(err.to_string()),
            QueryError::Upstream(_) => ApiError::internal(err.to_string()),
        }
    }
}

impl axum::response::IntoResponse for QueryError {
    fn into_response(self) -> axum::response::Response {
        ApiError::from(self).into_response()
    }
}
