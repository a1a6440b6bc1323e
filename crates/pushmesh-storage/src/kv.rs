//! The `KvStore` trait: an abstraction over a TTL-capable byte-value map,
//! plus its two implementations.

use std::time::Duration;

use async_trait::async_trait;

use crate::error::Result;

/// Default TTL applied when a record carries no explicit `max_age` (2 days).
pub const DEFAULT_TTL: Duration = Duration::from_secs(2 * 24 * 60 * 60);

#[async_trait]
pub trait KvStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>>;
    async fn set(&self, key: &str, value: Vec<u8>, ttl: Duration) -> Result<()>;
    async fn delete(&self, key: &str) -> Result<()>;
    /// Delete every key under this store's prefix. Fails with
    /// `StorageError::NoKeyPrefix` if the store has none configured.
    async fn clear(&self) -> Result<()>;
    /// Count keys under this store's prefix. Fails with
    /// `StorageError::NoKeyPrefix` if the store has none configured.
    async fn len(&self) -> Result<i64>;
    /// The configured key prefix, if any (used by callers that need to
    /// build full keys themselves, e.g. `SessionStore`/`TopicStore`).
    fn key_prefix(&self) -> Option<&str>;
}
