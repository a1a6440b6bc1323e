use thiserror::Error;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("store has no key prefix configured; refusing Clear/Len")]
    NoKeyPrefix,
    #[error("redis backend error: {0}")]
    Backend(#[from] redis::RedisError),
    #[error("failed to (de)serialize stored record: {0}")]
    Serde(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, StorageError>;
