//! Typed wrapper over any `KvStore` for `Topic` records, keyed
//! `<prefix>:topic:<Name>`.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::kv::{KvStore, DEFAULT_TTL};

/// The record persisted at `<prefix>:topic:<Name>`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TopicStoreData {
    #[serde(rename = "Name")]
    pub name: String,
    #[serde(rename = "CreatorID")]
    pub creator_id: String,
    #[serde(rename = "MemberList")]
    pub member_list: Vec<String>,
    /// Reserved for durability; not consulted by the routing core.
    #[serde(rename = "PersistentPolicy", default)]
    pub persistent_policy: bool,
}

impl TopicStoreData {
    pub fn new(name: String, creator_id: String) -> Self {
        Self {
            member_list: vec![creator_id.clone()],
            name,
            creator_id,
            persistent_policy: false,
        }
    }
}

fn topic_key(name: &str) -> String {
    format!("topic:{name}")
}

#[derive(Clone)]
pub struct TopicStore {
    kv: Arc<dyn KvStore>,
}

impl TopicStore {
    pub fn new(kv: Arc<dyn KvStore>) -> Self {
        Self { kv }
    }

    pub async fn get(&self, name: &str) -> Result<Option<TopicStoreData>> {
        match self.kv.get(&topic_key(name)).await? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    pub async fn set(&self, topic: &TopicStoreData) -> Result<()> {
        let bytes = serde_json::to_vec(topic)?;
        self.kv.set(&topic_key(&topic.name), bytes, DEFAULT_TTL).await
    }

    pub async fn delete(&self, name: &str) -> Result<()> {
        self.kv.delete(&topic_key(name)).await
    }
}
