use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use pushmesh_config::MsgServerConfig;
use pushmesh_msgserver::dispatcher;
use pushmesh_msgserver::peer::PeerPool;
use pushmesh_msgserver::state::MsgServerState;
use pushmesh_msgserver::sweeper;
use pushmesh_storage::{RedisKvStore, RedisStoreOptions, SessionStore, TopicStore};
use tokio::net::TcpListener;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "pushmesh-msgserver", about = "Session/topic router for pushmesh")]
struct Cli {
    /// Path to the msgserver JSON config file.
    #[arg(long = "conf-file", default_value = "msg_server.json")]
    conf_file: PathBuf,
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into()))
        .init();

    let cli = Cli::parse();

    let cfg: MsgServerConfig = match pushmesh_config::load(&cli.conf_file) {
        Ok(cfg) => cfg,
        Err(err) => {
            error!(%err, "failed to load config");
            return ExitCode::FAILURE;
        }
    };

    let redis_opts = RedisStoreOptions {
        address: cfg.redis.port.clone(),
        connect_timeout: Duration::from_millis(cfg.redis.connect_timeout_ms),
        read_timeout: Duration::from_millis(cfg.redis.read_timeout_ms),
        write_timeout: Duration::from_millis(cfg.redis.write_timeout_ms),
        key_prefix: Some(cfg.redis.key_prefix.clone()),
    };
    let kv = match RedisKvStore::connect(redis_opts).await {
        Ok(kv) => Arc::new(kv),
        Err(err) => {
            error!(%err, "failed to connect to redis");
            return ExitCode::FAILURE;
        }
    };

    let listener = match TcpListener::bind(&cfg.listen).await {
        Ok(listener) => listener,
        Err(err) => {
            error!(%err, addr = %cfg.listen, "failed to bind listener");
            return ExitCode::FAILURE;
        }
    };

    if cfg.expire_secs != 0 {
        warn!(
            expire_secs = cfg.expire_secs,
            "Expire is accepted for config compatibility but does not terminate the sweeper"
        );
    }

    let state = Arc::new(MsgServerState::new(
        cfg.listen.clone(),
        SessionStore::new(kv.clone()),
        TopicStore::new(kv),
    ));
    let peers = Arc::new(PeerPool::default());

    tokio::spawn(sweeper::run(
        state.clone(),
        Duration::from_secs(cfg.scan_dead_session_timeout_secs),
    ));

    info!(addr = %cfg.listen, "msgserver listening");
    loop {
        tokio::select! {
            accepted = listener.accept() => {
                let (stream, _peer) = match accepted {
                    Ok(pair) => pair,
                    Err(err) => {
                        warn!(%err, "accept failed");
                        continue;
                    }
                };
                let state = state.clone();
                let peers = peers.clone();
                tokio::spawn(async move {
                    dispatcher::handle_connection(state, peers, stream).await;
                });
            }
            _ = tokio::signal::ctrl_c() => {
                info!("shutdown signal received");
                return ExitCode::SUCCESS;
            }
        }
    }
}
