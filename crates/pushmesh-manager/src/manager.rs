//! Startup orchestration: dial every configured MsgServer, subscribe, and
//! spawn a mirror loop per connection.

use pushmesh_config::ManagerConfig;
use pushmesh_storage::{SessionStore, TopicStore};
use tracing::{error, warn};

use crate::subscriber::{dial_and_subscribe, run_mirror_loop};

/// Connect to every `msg_server_list` entry and spawn its mirror loop.
///
/// When `cfg.strict_cluster` is `true` (the default), a single dial
/// failure aborts the whole startup and this returns `Err` — partial
/// clusters never come up silently. When `false`, a failed MsgServer is
/// logged and skipped, and the Manager proceeds with whichever subset
/// connected.
pub async fn connect_all(
    cfg: &ManagerConfig,
    session_store: SessionStore,
    topic_store: TopicStore,
) -> anyhow::Result<()> {
    let mut connected = 0usize;

    for addr in &cfg.msg_server_list {
        match dial_and_subscribe(addr, &cfg.uuid).await {
            Ok(framed) => {
                connected += 1;
                let addr = addr.clone();
                let session_store = session_store.clone();
                let topic_store = topic_store.clone();
                tokio::spawn(async move {
                    run_mirror_loop(addr, framed, session_store, topic_store).await;
                });
            }
            Err(err) => {
                if cfg.strict_cluster {
                    error!(%addr, %err, "strict_cluster: aborting on dial failure");
                    anyhow::bail!("failed to connect to msg server {addr}: {err}");
                } else {
                    warn!(%addr, %err, "dial failed, skipping (strict_cluster=false)");
                }
            }
        }
    }

    if connected == 0 && !cfg.msg_server_list.is_empty() {
        warn!("connected to zero of the configured msg servers");
    }

    Ok(())
}
