use thiserror::Error;

#[derive(Debug, Error)]
pub enum CoordinationError {
    #[error("redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("internal coordination error: {0}")]
    Internal(String),
}
