//! Liveness sweeper: a ticker fires every `scan_dead_session_timeout`
//! seconds. For each session, a dead tick evicts it from both the local
//! table and the KV store; a live tick flips it back to "not yet proven
//! alive" so the next tick without a ping evicts it (the
//! alive/probing/evicted state machine).
//!
//! This sweeper runs for the process lifetime; it has no one-shot timer
//! that would terminate the loop. `expire_secs` is accepted in config for
//! wire compatibility only and does not bound the sweeper's lifetime.

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};

use crate::state::{session_id_snapshot, MsgServerState};

pub async fn run(state: Arc<MsgServerState>, scan_interval: Duration) {
    let mut ticker = tokio::time::interval(scan_interval);
    // The first tick fires immediately; skip it so a session isn't evicted
    // before it has had a chance to register.
    ticker.tick().await;
    loop {
        ticker.tick().await;
        sweep_once(&state).await;
    }
}

async fn sweep_once(state: &Arc<MsgServerState>) {
    let ids = session_id_snapshot(state).await;
    for client_id in ids {
        let was_alive = {
            let sessions = state.sessions.read().await;
            match sessions.get(&client_id) {
                Some(entry) => entry.alive.load(Ordering::Relaxed),
                None => continue, // evicted by its own disconnect since the snapshot
            }
        };

        if was_alive {
            if let Some(entry) = state.sessions.read().await.get(&client_id) {
                entry.alive.store(false, Ordering::Relaxed);
            }
            continue;
        }

        state.sessions.write().await.remove(&client_id);
        if let Err(err) = state.session_store.delete(&client_id).await {
            warn!(%client_id, %err, "failed to delete evicted session from KV");
        } else {
            info!(%client_id, "evicted dead session");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::SessionEntry;
    use pushmesh_storage::{InMemoryKvStore, SessionStore, SessionStoreData, TopicStore};
    use std::net::SocketAddr;
    use std::sync::atomic::AtomicBool;
    use tokio::sync::mpsc;

    fn make_state() -> Arc<MsgServerState> {
        let kv = Arc::new(InMemoryKvStore::new(Some("push".into())));
        Arc::new(MsgServerState::new(
            "10.0.0.1:8000".into(),
            SessionStore::new(kv.clone()),
            TopicStore::new(kv),
        ))
    }

    async fn insert_session(state: &Arc<MsgServerState>, client_id: &str, alive: bool) -> mpsc::UnboundedReceiver<bytes::Bytes> {
        let (tx, rx) = mpsc::unbounded_channel();
        let entry = Arc::new(SessionEntry {
            client_addr: "127.0.0.1:1".parse::<SocketAddr>().unwrap(),
            msg_server_addr: state.own_addr.clone(),
            id: "conn-1".into(),
            alive: AtomicBool::new(alive),
            tx,
        });
        state.sessions.write().await.insert(client_id.to_string(), entry);
        state
            .session_store
            .set(&SessionStoreData::new(
                client_id.into(),
                "127.0.0.1:1".into(),
                state.own_addr.clone(),
                "conn-1".into(),
            ))
            .await
            .unwrap();
        rx
    }

    #[tokio::test]
    async fn alive_session_survives_one_tick_but_is_rearmed() {
        let state = make_state();
        let _rx = insert_session(&state, "alice", true).await;

        sweep_once(&state).await;
        assert!(state.sessions.read().await.contains_key("alice"));
        assert!(!state.sessions.read().await.get("alice").unwrap().alive.load(Ordering::Relaxed));
    }

    #[tokio::test]
    async fn two_ticks_without_a_ping_evicts_locally_and_from_kv() {
        let state = make_state();
        let _rx = insert_session(&state, "alice", true).await;

        sweep_once(&state).await; // ALIVE -> PROBING
        sweep_once(&state).await; // PROBING -> EVICTED

        assert!(!state.sessions.read().await.contains_key("alice"));
        assert_eq!(state.session_store.get("alice").await.unwrap(), None);
    }

    #[tokio::test]
    async fn a_ping_between_ticks_rearms_and_prevents_eviction() {
        let state = make_state();
        let _rx = insert_session(&state, "alice", true).await;

        sweep_once(&state).await; // ALIVE -> PROBING
        state.sessions.read().await.get("alice").unwrap().mark_alive(); // re-armed by SEND_PING_CMD
        sweep_once(&state).await; // ALIVE -> PROBING again, not evicted

        assert!(state.sessions.read().await.contains_key("alice"));
    }
}
