//! Real KV backend: a `redis` multiplexed connection behind a single
//! `tokio::sync::Mutex`. This is intentional: the underlying connection is
//! not pipelined, so only one request is ever in flight per store
//! connection.

use std::time::Duration;

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use tokio::sync::Mutex;

use crate::error::{Result, StorageError};
use crate::kv::KvStore;

/// Connection parameters for a `RedisKvStore`: a `{Port, ConnectTimeout,
/// ReadTimeout, WriteTimeout}` block, plus the key prefix every
/// `SessionStore`/`TopicStore` built on top of it shares (e.g. `"push"`).
#[derive(Debug, Clone)]
pub struct RedisStoreOptions {
    pub address: String,
    pub connect_timeout: Duration,
    pub read_timeout: Duration,
    pub write_timeout: Duration,
    pub key_prefix: Option<String>,
}

pub struct RedisKvStore {
    conn: Mutex<ConnectionManager>,
    opts: RedisStoreOptions,
}

impl RedisKvStore {
    pub async fn connect(opts: RedisStoreOptions) -> Result<Self> {
        let client = redis::Client::open(format!("redis://{}", opts.address))?;
        let conn = tokio::time::timeout(opts.connect_timeout, client.get_connection_manager())
            .await
            .map_err(|_| {
                StorageError::Backend(redis::RedisError::from((
                    redis::ErrorKind::IoError,
                    "connect timed out",
                )))
            })??;
        Ok(Self {
            conn: Mutex::new(conn),
            opts,
        })
    }

    fn full_key(&self, key: &str) -> String {
        match &self.opts.key_prefix {
            Some(prefix) if !prefix.is_empty() => format!("{prefix}:{key}"),
            _ => key.to_string(),
        }
    }
}

#[async_trait]
impl KvStore for RedisKvStore {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let full_key = self.full_key(key);
        let mut conn = self.conn.lock().await;
        let value: Option<Vec<u8>> = tokio::time::timeout(
            self.opts.read_timeout,
            conn.get(&full_key),
        )
        .await
        .map_err(|_| {
            StorageError::Backend(redis::RedisError::from((
                redis::ErrorKind::IoError,
                "read timed out",
            )))
        })??;
        Ok(value)
    }

    async fn set(&self, key: &str, value: Vec<u8>, ttl: Duration) -> Result<()> {
        let full_key = self.full_key(key);
        let mut conn = self.conn.lock().await;
        tokio::time::timeout(
            self.opts.write_timeout,
            conn.set_ex::<_, _, ()>(&full_key, value, ttl.as_secs().max(1)),
        )
        .await
        .map_err(|_| {
            StorageError::Backend(redis::RedisError::from((
                redis::ErrorKind::IoError,
                "write timed out",
            )))
        })??;
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let full_key = self.full_key(key);
        let mut conn = self.conn.lock().await;
        tokio::time::timeout(self.opts.write_timeout, conn.del::<_, ()>(&full_key))
            .await
            .map_err(|_| {
                StorageError::Backend(redis::RedisError::from((
                    redis::ErrorKind::IoError,
                    "write timed out",
                )))
            })??;
        Ok(())
    }

    async fn clear(&self) -> Result<()> {
        let prefix = self
            .opts
            .key_prefix
            .as_ref()
            .filter(|p| !p.is_empty())
            .ok_or(StorageError::NoKeyPrefix)?;
        let mut conn = self.conn.lock().await;
        let keys: Vec<String> = conn.keys(format!("{prefix}:*")).await?;
        if !keys.is_empty() {
            let _: () = redis::pipe()
                .atomic()
                .del(&keys)
                .query_async(&mut *conn)
                .await?;
        }
        Ok(())
    }

    async fn len(&self) -> Result<i64> {
        let prefix = self
            .opts
            .key_prefix
            .as_ref()
            .filter(|p| !p.is_empty())
            .ok_or(StorageError::NoKeyPrefix)?;
        let mut conn = self.conn.lock().await;
        let keys: Vec<String> = conn.keys(format!("{prefix}:*")).await?;
        Ok(keys.len() as i64)
    }

    fn key_prefix(&self) -> Option<&str> {
        self.opts.key_prefix.as_deref()
    }
}
