//! Gateway core: accept one TCP connection, reply with one MsgServer
//! address, close. No state is retained across connections.

use bytes::Bytes;
use futures::SinkExt;
use pushmesh_config::GatewayConfig;
use rand::seq::SliceRandom;
use tokio::net::{TcpListener, TcpStream};
use tracing::{info, warn};

/// Pick one address uniformly at random from the first `msg_server_num`
/// entries of `list`. Returns `None` if the eligible slice is empty.
pub fn select_server(list: &[String], msg_server_num: usize) -> Option<&String> {
    let eligible_len = msg_server_num.min(list.len());
    list[..eligible_len].choose(&mut rand::thread_rng())
}

pub async fn run(cfg: GatewayConfig, listener: TcpListener) -> anyhow::Result<()> {
    info!(addr = %listener.local_addr()?, "gateway listening");
    loop {
        tokio::select! {
            accepted = listener.accept() => {
                let (stream, peer) = match accepted {
                    Ok(pair) => pair,
                    Err(err) => {
                        warn!(%err, "accept failed");
                        continue;
                    }
                };
                info!(%peer, "client in");
                let cfg = cfg.clone();
                tokio::spawn(async move {
                    handle_connection(stream, &cfg).await;
                });
            }
            _ = tokio::signal::ctrl_c() => {
                info!("shutdown signal received");
                return Ok(());
            }
        }
    }
}

async fn handle_connection(stream: TcpStream, cfg: &GatewayConfig) {
    let peer = stream
        .peer_addr()
        .map(|a| a.to_string())
        .unwrap_or_else(|_| "unknown".to_string());

    let Some(addr) = select_server(&cfg.msg_server_list, cfg.msg_server_num) else {
        warn!(%peer, "msg server pool empty, closing without a reply");
        return;
    };

    let mut framed = pushmesh_proto::framed(stream);
    if let Err(err) = framed.send(Bytes::from(addr.clone().into_bytes())).await {
        warn!(%peer, %err, "failed to send msg server address");
        return;
    }
    info!(%peer, %addr, "client out");
}
