use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use pushmesh_config::ManagerConfig;
use pushmesh_storage::{RedisKvStore, RedisStoreOptions, SessionStore, TopicStore};
use tracing::error;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "pushmesh-manager", about = "KV mirror daemon for pushmesh")]
struct Cli {
    /// Path to the manager JSON config file.
    #[arg(long = "conf-file", default_value = "manager.json")]
    conf_file: PathBuf,
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into()))
        .init();

    let cli = Cli::parse();

    let cfg: ManagerConfig = match pushmesh_config::load(&cli.conf_file) {
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

    let session_store = SessionStore::new(kv.clone());
    let topic_store = TopicStore::new(kv);

    if let Err(err) = pushmesh_manager::manager::connect_all(&cfg, session_store, topic_store).await {
        error!(%err, "failed to connect to msg server cluster");
        return ExitCode::FAILURE;
    }

    // The Manager does no further work of its own; mirror loops run as
    // spawned tasks. Block forever (or until a signal) so the process
    // stays up for them — it exits early only if a strict-cluster dial
    // fails during startup.
    let _ = tokio::signal::ctrl_c().await;
    ExitCode::SUCCESS
}
