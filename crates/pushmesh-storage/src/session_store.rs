//! Typed wrapper over any `KvStore` for `Session` records, keyed
//! `<prefix>:<ClientID>`.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::kv::{KvStore, DEFAULT_TTL};

/// The record persisted at `<prefix>:<ClientID>`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionStoreData {
    #[serde(rename = "ClientID")]
    pub client_id: String,
    #[serde(rename = "ClientAddr")]
    pub client_addr: String,
    #[serde(rename = "MsgServerAddr")]
    pub msg_server_addr: String,
    #[serde(rename = "ID")]
    pub id: String,
    /// TTL in seconds; `0` means "use the store's default" (2 days).
    #[serde(rename = "MaxAge", default)]
    pub max_age_secs: u64,
}

impl SessionStoreData {
    pub fn new(client_id: String, client_addr: String, msg_server_addr: String, id: String) -> Self {
        Self {
            client_id,
            client_addr,
            msg_server_addr,
            id,
            max_age_secs: 0,
        }
    }

    pub fn ttl(&self) -> Duration {
        if self.max_age_secs == 0 {
            DEFAULT_TTL
        } else {
            Duration::from_secs(self.max_age_secs)
        }
    }
}

#[derive(Clone)]
pub struct SessionStore {
    kv: Arc<dyn KvStore>,
}

impl SessionStore {
    pub fn new(kv: Arc<dyn KvStore>) -> Self {
        Self { kv }
    }

    pub async fn get(&self, client_id: &str) -> Result<Option<SessionStoreData>> {
        match self.kv.get(client_id).await? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    pub async fn set(&self, session: &SessionStoreData) -> Result<()> {
        let ttl = session.ttl();
        let bytes = serde_json::to_vec(session)?;
        self.kv.set(&session.client_id, bytes, ttl).await
    }

    pub async fn delete(&self, client_id: &str) -> Result<()> {
        self.kv.delete(client_id).await
    }

    pub async fn clear(&self) -> Result<()> {
        self.kv.clear().await
    }

    pub async fn len(&self) -> Result<i64> {
        self.kv.len().await
    }
}
