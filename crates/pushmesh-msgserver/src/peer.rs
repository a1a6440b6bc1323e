//! Outbound connections to peer MsgServers, used to forward
//! `ROUTE_MESSAGE_P2P_CMD` frames. One connection per peer address, dialed
//! lazily and cached; writes go through the same single-consumer queue
//! pattern as client sessions.

use std::collections::HashMap;

use bytes::Bytes;
use futures::SinkExt;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, Mutex};
use tracing::warn;

#[derive(Default)]
pub struct PeerPool {
    peers: Mutex<HashMap<String, mpsc::UnboundedSender<Bytes>>>,
}

impl PeerPool {
    /// Forward `bytes` to the MsgServer at `addr`, dialing a fresh
    /// connection if none is cached (or the cached one is dead). Failures
    /// are logged and the frame is dropped — forwarding is fire-and-forget.
    pub async fn forward(&self, addr: &str, bytes: Bytes) {
        {
            let mut peers = self.peers.lock().await;
            if let Some(tx) = peers.get(addr) {
                if tx.send(bytes.clone()).is_ok() {
                    return;
                }
                peers.remove(addr);
            }
        }

        // Dial without holding the pool lock: a slow or unreachable peer
        // must not stall forwards to every other already-connected peer.
        let stream = match TcpStream::connect(addr).await {
            Ok(stream) => stream,
            Err(err) => {
                warn!(%addr, %err, "failed to dial peer msg server, dropping forward");
                return;
            }
        };

        // Another task may have dialed and cached a connection for `addr`
        // while we were connecting. Re-check under the lock: if a live
        // entry is already there, hand it the frame and let our own
        // just-dialed connection drop unused; otherwise install ours.
        let mut peers = self.peers.lock().await;
        if let Some(existing) = peers.get(addr) {
            if existing.send(bytes.clone()).is_ok() {
                return;
            }
            peers.remove(addr);
        }

        let (tx, rx) = mpsc::unbounded_channel();
        let _ = tx.send(bytes);
        tokio::spawn(run_peer_writer(pushmesh_proto::framed(stream), rx));
        peers.insert(addr.to_string(), tx);
    }
}

async fn run_peer_writer(
    mut framed: pushmesh_proto::Framed,
    mut rx: mpsc::UnboundedReceiver<Bytes>,
) {
    while let Some(bytes) = rx.recv().await {
        if let Err(err) = framed.send(bytes).await {
            warn!(%err, "peer connection write failed, dropping");
            break;
        }
    }
}
