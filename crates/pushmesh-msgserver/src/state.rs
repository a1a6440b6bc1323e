//! The MsgServer's in-process tables: sessions, control channels, topics.

use std::collections::{HashMap, HashSet};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use pushmesh_proto::CONTROL_CHANNELS;
use pushmesh_storage::{SessionStore, TopicStore};
use tokio::sync::{mpsc, RwLock};
use tracing::warn;

/// One live client TCP connection's entry in the local session table.
pub struct SessionEntry {
    pub client_addr: SocketAddr,
    pub msg_server_addr: String,
    /// Transport session id, used only for logging and the stored record.
    pub id: String,
    /// Liveness flag flipped by the sweeper and re-armed by `SEND_PING_CMD`
    /// (the alive/probing/evicted state machine — see `sweeper`).
    pub alive: AtomicBool,
    /// The connection's single outbound write queue. Every writer —
    /// the owning read loop never writes directly, cross-node forwards,
    /// and channel broadcasts — goes through this one `mpsc` so writes to a
    /// socket are always serialized.
    pub tx: mpsc::UnboundedSender<Bytes>,
}

impl SessionEntry {
    pub fn mark_alive(&self) {
        self.alive.store(true, Ordering::Relaxed);
    }
}

/// An in-process fan-out group. Subscribers are keyed by
/// whatever id they subscribed with (a Manager's UUID), not by `ClientID` —
/// control-channel subscribers are never entries in the `sessions` table.
#[derive(Default)]
pub struct ChannelState {
    subscribers: RwLock<HashMap<String, mpsc::UnboundedSender<Bytes>>>,
}

impl ChannelState {
    pub async fn subscribe(&self, subscriber_id: String, tx: mpsc::UnboundedSender<Bytes>) {
        self.subscribers.write().await.insert(subscriber_id, tx);
    }

    /// Send `bytes` once to every current subscriber. A subscriber whose
    /// queue is closed (peer gone) is dropped from the set; there is no
    /// retry and no backfill for a Manager that reconnects later.
    pub async fn broadcast(&self, bytes: Bytes) {
        let mut subscribers = self.subscribers.write().await;
        subscribers.retain(|id, tx| match tx.send(bytes.clone()) {
            Ok(()) => true,
            Err(_) => {
                warn!(subscriber = %id, "channel subscriber gone, dropping");
                false
            }
        });
    }
}

/// A named multicast group.
#[derive(Debug, Clone)]
pub struct Topic {
    pub name: String,
    pub creator_id: String,
    pub member_list: Vec<String>,
    pub persistent_policy: bool,
}

impl Topic {
    pub fn new(name: String, creator_id: String) -> Self {
        Self {
            member_list: vec![creator_id.clone()],
            name,
            creator_id,
            persistent_policy: false,
        }
    }

    /// Append `client_id` to the member list unless already present: a
    /// member list holds each `ClientID` at most once, and repeated joins
    /// from the same client must be idempotent.
    pub fn add_member(&mut self, client_id: &str) {
        if !self.member_list.iter().any(|m| m == client_id) {
            self.member_list.push(client_id.to_string());
        }
    }
}

impl From<pushmesh_storage::TopicStoreData> for Topic {
    fn from(data: pushmesh_storage::TopicStoreData) -> Self {
        Self {
            name: data.name,
            creator_id: data.creator_id,
            member_list: data.member_list,
            persistent_policy: data.persistent_policy,
        }
    }
}

impl From<&Topic> for pushmesh_storage::TopicStoreData {
    fn from(topic: &Topic) -> Self {
        Self {
            name: topic.name.clone(),
            creator_id: topic.creator_id.clone(),
            member_list: topic.member_list.clone(),
            persistent_policy: topic.persistent_policy,
        }
    }
}

/// The single top-level state struct for the MsgServer process, constructed
/// once in `main` and shared (via `Arc`) with every spawned task.
pub struct MsgServerState {
    pub own_addr: String,
    pub sessions: RwLock<HashMap<String, Arc<SessionEntry>>>,
    pub channels: HashMap<&'static str, ChannelState>,
    pub topics: RwLock<HashMap<String, Topic>>,
    pub session_store: SessionStore,
    pub topic_store: TopicStore,
}

impl MsgServerState {
    pub fn new(own_addr: String, session_store: SessionStore, topic_store: TopicStore) -> Self {
        let mut channels = HashMap::new();
        for name in CONTROL_CHANNELS {
            channels.insert(*name, ChannelState::default());
        }
        Self {
            own_addr,
            sessions: RwLock::new(HashMap::new()),
            channels,
            topics: RwLock::new(HashMap::new()),
            session_store,
            topic_store,
        }
    }

    pub fn channel(&self, name: &str) -> Option<&ChannelState> {
        self.channels.get(name)
    }
}

/// A snapshot of the local session table's keys, used by the sweeper so it
/// never holds the table lock while it evicts — other workers may freely
/// insert or delete sessions during a scan.
pub async fn session_id_snapshot(state: &MsgServerState) -> HashSet<String> {
    state.sessions.read().await.keys().cloned().collect()
}
