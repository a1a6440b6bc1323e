//! Per-MsgServer subscription: dial, subscribe to both control channels,
//! read forever, mirror into the KV stores.

use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use pushmesh_proto::{Command, ManagerInboundCmd, SYSCTRL_CLIENT_STATUS, SYSCTRL_TOPIC_STATUS};
use pushmesh_storage::{SessionStore, SessionStoreData, TopicStore, TopicStoreData};
use tokio::net::TcpStream;
use tracing::{info, warn};

#[derive(Debug, thiserror::Error)]
pub enum DialError {
    #[error("failed to connect to msg server {addr}: {source}")]
    Connect {
        addr: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to send subscribe command to {addr}: {source}")]
    Subscribe {
        addr: String,
        #[source]
        source: std::io::Error,
    },
}

/// Dial `addr` and send the two `SUBSCRIBE_CHANNEL_CMD` frames every
/// Manager sends on startup, returning the framed connection ready for a
/// read loop.
pub async fn dial_and_subscribe(addr: &str, uuid: &str) -> Result<pushmesh_proto::Framed, DialError> {
    let stream = TcpStream::connect(addr)
        .await
        .map_err(|source| DialError::Connect { addr: addr.to_string(), source })?;
    let mut framed = pushmesh_proto::framed(stream);

    for channel in [SYSCTRL_CLIENT_STATUS, SYSCTRL_TOPIC_STATUS] {
        let cmd = Command::SubscribeChannel {
            channel: channel.to_string(),
            subscriber_uuid: Some(uuid.to_string()),
        };
        framed
            .send(Bytes::from(cmd.encode()))
            .await
            .map_err(|source| DialError::Subscribe { addr: addr.to_string(), source })?;
    }

    Ok(framed)
}

/// Read `framed` forever, mirroring every `STORE_SESSION_CMD` /
/// `STORE_TOPIC_CMD` into the KV stores. Returns when the connection
/// closes — the Manager does not reconnect automatically.
pub async fn run_mirror_loop(
    msg_server_addr: String,
    mut framed: pushmesh_proto::Framed,
    session_store: SessionStore,
    topic_store: TopicStore,
) {
    while let Some(frame) = framed.next().await {
        let bytes = match frame {
            Ok(bytes) => bytes,
            Err(err) => {
                warn!(addr = %msg_server_addr, %err, "read error on control channel");
                break;
            }
        };

        let cmd = match ManagerInboundCmd::decode(&bytes) {
            Ok(cmd) => cmd,
            Err(err) => {
                warn!(addr = %msg_server_addr, %err, "malformed control-channel frame, dropping");
                continue;
            }
        };

        match cmd {
            ManagerInboundCmd::StoreSession(store_cmd) => {
                let record = SessionStoreData::new(
                    store_cmd.client_id.clone(),
                    store_cmd.client_addr,
                    store_cmd.msg_server_addr,
                    store_cmd.client_id.clone(),
                );
                if let Err(err) = session_store.set(&record).await {
                    // Logged and discarded, no rollback: the local MsgServer
                    // entry still exists, so routing from that node keeps
                    // working even though cross-node routing to this client
                    // is impossible until it reconnects.
                    warn!(client_id = %store_cmd.client_id, %err, "failed to mirror session into KV");
                } else {
                    info!(client_id = %store_cmd.client_id, "mirrored session into KV");
                }
            }
            ManagerInboundCmd::StoreTopic(store_cmd) => {
                let record = TopicStoreData {
                    name: store_cmd.name.clone(),
                    creator_id: store_cmd.creator_id,
                    member_list: store_cmd.member_list,
                    persistent_policy: false,
                };
                if let Err(err) = topic_store.set(&record).await {
                    warn!(topic = %store_cmd.name, %err, "failed to mirror topic into KV");
                } else {
                    info!(topic = %store_cmd.name, "mirrored topic into KV");
                }
            }
            ManagerInboundCmd::DeleteTopic(delete_cmd) => {
                if let Err(err) = topic_store.delete(&delete_cmd.name).await {
                    warn!(topic = %delete_cmd.name, %err, "failed to delete torn-down topic from KV");
                } else {
                    info!(topic = %delete_cmd.name, "deleted torn-down topic from KV");
                }
            }
            ManagerInboundCmd::Unknown(cmd_name) => {
                warn!(%cmd_name, "unexpected command on control channel, dropping");
            }
        }
    }
    info!(addr = %msg_server_addr, "control channel closed, no automatic reconnect");
}
