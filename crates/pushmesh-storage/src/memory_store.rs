//! In-memory fake `KvStore`, used only under `#[cfg(test)]` by this crate
//! and by the msgserver/manager crates' unit tests. Never compiled into a
//! release binary.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::error::{Result, StorageError};
use crate::kv::KvStore;

struct Entry {
    value: Vec<u8>,
    expires_at: Instant,
}

pub struct InMemoryKvStore {
    entries: Mutex<HashMap<String, Entry>>,
    key_prefix: Option<String>,
}

impl InMemoryKvStore {
    pub fn new(key_prefix: Option<String>) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            key_prefix,
        }
    }

    fn full_key(&self, key: &str) -> String {
        match &self.key_prefix {
            Some(prefix) if !prefix.is_empty() => format!("{prefix}:{key}"),
            _ => key.to_string(),
        }
    }
}

#[async_trait]
impl KvStore for InMemoryKvStore {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let full_key = self.full_key(key);
        let mut entries = self.entries.lock().await;
        if let Some(entry) = entries.get(&full_key) {
            if entry.expires_at <= Instant::now() {
                entries.remove(&full_key);
                return Ok(None);
            }
            return Ok(Some(entry.value.clone()));
        }
        Ok(None)
    }

    async fn set(&self, key: &str, value: Vec<u8>, ttl: Duration) -> Result<()> {
        let full_key = self.full_key(key);
        let mut entries = self.entries.lock().await;
        entries.insert(
            full_key,
            Entry {
                value,
                expires_at: Instant::now() + ttl,
            },
        );
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let full_key = self.full_key(key);
        self.entries.lock().await.remove(&full_key);
        Ok(())
    }

    async fn clear(&self) -> Result<()> {
        let prefix = self
            .key_prefix
            .as_ref()
            .filter(|p| !p.is_empty())
            .ok_or(StorageError::NoKeyPrefix)?;
        let mut entries = self.entries.lock().await;
        let dotted = format!("{prefix}:");
        entries.retain(|k, _| !k.starts_with(&dotted));
        Ok(())
    }

    async fn len(&self) -> Result<i64> {
        let prefix = self
            .key_prefix
            .as_ref()
            .filter(|p| !p.is_empty())
            .ok_or(StorageError::NoKeyPrefix)?;
        let entries = self.entries.lock().await;
        let dotted = format!("{prefix}:");
        Ok(entries.keys().filter(|k| k.starts_with(&dotted)).count() as i64)
    }

    fn key_prefix(&self) -> Option<&str> {
        self.key_prefix.as_deref()
    }
}
