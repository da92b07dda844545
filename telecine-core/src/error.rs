use thiserror::Error;

use telecine_model::ModelError;

#[derive(Error, Debug)]
pub enum TelecineError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("HTTP client error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Invalid data: {0}")]
    InvalidData(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<ModelError> for TelecineError {
    fn from(err: ModelError) -> Self {
        TelecineError::InvalidData(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, TelecineError>;
