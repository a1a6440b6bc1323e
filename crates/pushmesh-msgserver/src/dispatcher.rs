//! Protocol dispatcher: one task per accepted connection, a read loop that
//! parses each frame into a `Command` and handles it. The `match` is
//! exhaustive over every known variant plus `Command::Unknown`, so a new
//! `CmdName` can never silently fall through unhandled.

use std::net::SocketAddr;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use pushmesh_proto::{
    Command, DeleteTopicCmd, StoreSessionCmd, StoreTopicCmd, SYSCTRL_CLIENT_STATUS,
    SYSCTRL_TOPIC_STATUS,
};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::peer::PeerPool;
use crate::state::{MsgServerState, SessionEntry, Topic};

struct ConnCtx {
    id: String,
    client_addr: SocketAddr,
    tx: mpsc::UnboundedSender<Bytes>,
    client_id: Option<String>,
}

/// Drive one accepted connection until it closes. Spawns its own writer
/// task so every outbound write — from this read loop, a cross-node
/// forward, or a channel broadcast — goes through the same single-consumer
/// queue.
pub async fn handle_connection(state: Arc<MsgServerState>, peers: Arc<PeerPool>, stream: TcpStream) {
    let client_addr = match stream.peer_addr() {
        Ok(addr) => addr,
        Err(err) => {
            warn!(%err, "failed to read peer addr, dropping connection");
            return;
        }
    };

    let (write_half, mut read_half) = pushmesh_proto::framed(stream).split();
    let (tx, rx) = mpsc::unbounded_channel();
    tokio::spawn(run_writer(write_half, rx));

    let mut ctx = ConnCtx {
        id: uuid::Uuid::new_v4().to_string(),
        client_addr,
        tx,
        client_id: None,
    };

    info!(%client_addr, conn_id = %ctx.id, "client in");

    while let Some(frame) = read_half.next().await {
        let bytes = match frame {
            Ok(bytes) => bytes,
            Err(err) => {
                warn!(%client_addr, %err, "socket read error, closing");
                break;
            }
        };

        let cmd = match Command::decode(&bytes) {
            Ok(cmd) => cmd,
            Err(err) => {
                // Parse errors are logged and dropped; the connection stays
                // open, repeat offenders are not banned.
                warn!(%client_addr, %err, "malformed command, dropping frame");
                continue;
            }
        };

        handle_command(&state, &peers, &mut ctx, cmd).await;
    }

    if let Some(client_id) = ctx.client_id.take() {
        evict_if_current(&state, &client_id, &ctx.id).await;
        teardown_owned_topics(&state, &client_id).await;
    }
    info!(%client_addr, conn_id = %ctx.id, "client out");
}

async fn run_writer(
    mut sink: futures::stream::SplitSink<pushmesh_proto::Framed, Bytes>,
    mut rx: mpsc::UnboundedReceiver<Bytes>,
) {
    while let Some(bytes) = rx.recv().await {
        if sink.send(bytes).await.is_err() {
            break;
        }
    }
}

async fn handle_command(
    state: &Arc<MsgServerState>,
    peers: &Arc<PeerPool>,
    ctx: &mut ConnCtx,
    cmd: Command,
) {
    match cmd {
        Command::SendPing => {
            if let Some(client_id) = &ctx.client_id {
                if let Some(entry) = state.sessions.read().await.get(client_id) {
                    entry.mark_alive();
                }
            }
        }

        Command::SendClientId { client_id } => {
            handle_send_client_id(state, ctx, client_id).await;
        }

        Command::SubscribeChannel { channel, subscriber_uuid } => {
            let subscriber_id = subscriber_uuid.unwrap_or_else(|| ctx.id.clone());
            match state.channel(&channel) {
                Some(chan) => {
                    chan.subscribe(subscriber_id.clone(), ctx.tx.clone()).await;
                    debug!(%channel, subscriber = %subscriber_id, "subscribed");
                }
                None => warn!(%channel, "subscribe to unknown channel, dropping"),
            }
        }

        Command::SendMessageP2p { dest_client_id, payload } => {
            route_p2p(state, peers, &dest_client_id, payload.into_bytes()).await;
        }

        Command::RouteMessageP2p { dest_client_id, payload } => {
            // Inbound from a peer: deliver locally only, no re-routing loop.
            if !deliver_local(state, &dest_client_id, Bytes::from(payload.into_bytes())).await {
                debug!(dest = %dest_client_id, "routed message has no local target, dropping");
            }
        }

        Command::CreateTopic { name } => {
            handle_create_topic(state, ctx, name).await;
        }

        Command::JoinTopic { name } => {
            handle_join_topic(state, ctx, name).await;
        }

        Command::SendMessageTopic { name, payload } => {
            handle_send_message_topic(state, peers, name, payload).await;
        }

        Command::Unknown(cmd_name) => {
            warn!(%cmd_name, "unknown command, dropping");
        }
    }
}

async fn handle_send_client_id(state: &Arc<MsgServerState>, ctx: &mut ConnCtx, client_id: String) {
    let entry = Arc::new(SessionEntry {
        client_addr: ctx.client_addr,
        msg_server_addr: state.own_addr.clone(),
        id: ctx.id.clone(),
        alive: AtomicBool::new(true),
        tx: ctx.tx.clone(),
    });

    // Check-and-insert must happen under one write-lock acquisition: two
    // SEND_CLIENT_ID_CMD frames for the same ClientID arriving on
    // different connections must not both observe an empty slot and both
    // think they won.
    {
        let mut sessions = state.sessions.write().await;
        match sessions.entry(client_id.clone()) {
            std::collections::hash_map::Entry::Occupied(_) => {
                warn!(%client_id, "DUPLICATE_ID, dropping");
                return;
            }
            std::collections::hash_map::Entry::Vacant(slot) => {
                slot.insert(entry);
            }
        }
    }
    ctx.client_id = Some(client_id.clone());

    let store_cmd = StoreSessionCmd::new(client_id.clone(), ctx.client_addr.to_string(), state.own_addr.clone());
    if let Some(chan) = state.channel(SYSCTRL_CLIENT_STATUS) {
        chan.broadcast(Bytes::from(store_cmd.encode())).await;
    }
    info!(%client_id, "registered");
}

/// Deliver `payload` to a locally held client session. Returns `false` if
/// no such local session exists.
async fn deliver_local(state: &Arc<MsgServerState>, client_id: &str, payload: Bytes) -> bool {
    let sessions = state.sessions.read().await;
    match sessions.get(client_id) {
        Some(entry) => {
            let _ = entry.tx.send(payload);
            true
        }
        None => false,
    }
}

/// `SEND_MESSAGE_P2P_CMD`: local delivery first, else KV lookup + forward,
/// else silent drop. The protocol is fire-and-forget: no reply is ever
/// sent back to the sender.
async fn route_p2p(state: &Arc<MsgServerState>, peers: &Arc<PeerPool>, dest_client_id: &str, payload: Vec<u8>) {
    if deliver_local(state, dest_client_id, Bytes::from(payload.clone())).await {
        return;
    }

    match state.session_store.get(dest_client_id).await {
        Ok(Some(record)) => {
            let frame = Command::RouteMessageP2p {
                dest_client_id: dest_client_id.to_string(),
                payload: String::from_utf8_lossy(&payload).into_owned(),
            }
            .encode();
            peers.forward(&record.msg_server_addr, Bytes::from(frame)).await;
        }
        Ok(None) => {
            debug!(dest = %dest_client_id, "unknown destination, dropping");
        }
        Err(err) => {
            warn!(dest = %dest_client_id, %err, "KV lookup failed, dropping");
        }
    }
}

async fn handle_create_topic(state: &Arc<MsgServerState>, ctx: &mut ConnCtx, name: String) {
    let Some(creator_id) = ctx.client_id.clone() else {
        warn!(%name, "CREATE_TOPIC_CMD before SEND_CLIENT_ID_CMD, dropping");
        return;
    };

    {
        let topics = state.topics.read().await;
        if topics.contains_key(&name) {
            warn!(%name, "TOPIC_EXISTS (local), dropping");
            return;
        }
    }
    match state.topic_store.get(&name).await {
        Ok(Some(_)) => {
            warn!(%name, "TOPIC_EXISTS (cluster), dropping");
            return;
        }
        Err(err) => {
            warn!(%name, %err, "KV lookup failed during CREATE_TOPIC_CMD, dropping");
            return;
        }
        Ok(None) => {}
    }

    let topic = Topic::new(name.clone(), creator_id.clone());
    let store_cmd = StoreTopicCmd::new(name.clone(), creator_id, topic.member_list.clone());
    state.topics.write().await.insert(name.clone(), topic);

    if let Some(chan) = state.channel(SYSCTRL_TOPIC_STATUS) {
        chan.broadcast(Bytes::from(store_cmd.encode())).await;
    }
    info!(%name, "topic created");
}

async fn handle_join_topic(state: &Arc<MsgServerState>, ctx: &mut ConnCtx, name: String) {
    let Some(client_id) = ctx.client_id.clone() else {
        warn!(%name, "JOIN_TOPIC_CMD before SEND_CLIENT_ID_CMD, dropping");
        return;
    };

    // Merge this node's local view with the cluster-wide KV record before
    // mutating: another node may have added members since this node last
    // touched the topic, and re-broadcasting from a stale local copy would
    // clobber their update. Cluster-wide membership is only ever
    // authoritative in the KV record the Manager writes, never in any
    // single node's local table.
    let local = state.topics.read().await.get(&name).cloned();
    let kv_data = match state.topic_store.get(&name).await {
        Ok(data) => data,
        Err(err) => {
            warn!(%name, %err, "KV lookup failed during JOIN_TOPIC_CMD, dropping");
            return;
        }
    };

    let mut topic = match (local, kv_data) {
        (Some(mut topic), Some(data)) => {
            for member in data.member_list {
                topic.add_member(&member);
            }
            topic
        }
        (Some(topic), None) => topic,
        (None, Some(data)) => data.into(),
        (None, None) => {
            warn!(%name, "JOIN_TOPIC_CMD for unknown topic, dropping");
            return;
        }
    };
    topic.add_member(&client_id);
    state.topics.write().await.insert(name.clone(), topic.clone());

    let store_cmd = StoreTopicCmd::new(topic.name.clone(), topic.creator_id.clone(), topic.member_list.clone());
    if let Some(chan) = state.channel(SYSCTRL_TOPIC_STATUS) {
        chan.broadcast(Bytes::from(store_cmd.encode())).await;
    }
    info!(%name, %client_id, "joined topic");
}

/// `SEND_MESSAGE_TOPIC_CMD`: visit `MemberList` in order, local-deliver or
/// forward per member, continuing past a member that cannot be reached.
async fn handle_send_message_topic(
    state: &Arc<MsgServerState>,
    peers: &Arc<PeerPool>,
    name: String,
    payload: String,
) {
    // Prefer the cluster-wide KV record over this node's local copy, which
    // may be missing members another node admitted after this node last
    // created or joined the topic (see handle_join_topic).
    let member_list = match state.topic_store.get(&name).await {
        Ok(Some(data)) => data.member_list,
        Ok(None) => {
            let topics = state.topics.read().await;
            match topics.get(&name).map(|t| t.member_list.clone()) {
                Some(list) => list,
                None => {
                    debug!(%name, "SEND_MESSAGE_TOPIC_CMD for unknown topic, dropping");
                    return;
                }
            }
        }
        Err(err) => {
            warn!(%name, %err, "KV lookup failed during SEND_MESSAGE_TOPIC_CMD, dropping");
            return;
        }
    };

    for member_id in member_list {
        if deliver_local(state, &member_id, Bytes::from(payload.clone().into_bytes())).await {
            continue;
        }
        match state.session_store.get(&member_id).await {
            Ok(Some(record)) => {
                let frame = Command::RouteMessageP2p {
                    dest_client_id: member_id.clone(),
                    payload: payload.clone(),
                }
                .encode();
                peers.forward(&record.msg_server_addr, Bytes::from(frame)).await;
            }
            Ok(None) => debug!(member = %member_id, "topic member has no reachable session, dropping"),
            Err(err) => warn!(member = %member_id, %err, "KV lookup failed, dropping"),
        }
    }
}

/// Remove `client_id`'s table entry only if it still belongs to this
/// connection — a faster reconnect under the same id may have already
/// replaced it.
async fn evict_if_current(state: &Arc<MsgServerState>, client_id: &str, conn_id: &str) {
    let mut sessions = state.sessions.write().await;
    if sessions.get(client_id).map(|e| e.id.as_str()) == Some(conn_id) {
        sessions.remove(client_id);
        drop(sessions);
        if let Err(err) = state.session_store.delete(client_id).await {
            warn!(%client_id, %err, "failed to delete session from KV on disconnect");
        }
    }
}

/// Tear down every topic this node knows `client_id` created, as part of
/// connection teardown. Only topics this node holds locally are in scope
/// — a topic is created on, and torn down from, the node that
/// held the creator's session. The delete is broadcast on
/// `SYSCTRL_TOPIC_STATUS` so the Manager removes the cluster-wide KV
/// record the same way it writes one on creation/join.
async fn teardown_owned_topics(state: &Arc<MsgServerState>, client_id: &str) {
    let owned: Vec<String> = {
        let topics = state.topics.read().await;
        topics
            .values()
            .filter(|topic| topic.creator_id == client_id)
            .map(|topic| topic.name.clone())
            .collect()
    };
    if owned.is_empty() {
        return;
    }

    let mut topics = state.topics.write().await;
    for name in &owned {
        topics.remove(name);
    }
    drop(topics);

    for name in owned {
        if let Some(chan) = state.channel(SYSCTRL_TOPIC_STATUS) {
            chan.broadcast(Bytes::from(DeleteTopicCmd::new(name.clone()).encode())).await;
        }
        info!(topic = %name, creator = %client_id, "torn down topic on creator disconnect");
    }
}
