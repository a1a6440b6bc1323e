use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use pushmesh_config::GatewayConfig;
use pushmesh_gateway::gateway;
use tokio::net::TcpListener;
use tracing::error;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "pushmesh-gateway", about = "Stateless edge for pushmesh")]
struct Cli {
    /// Path to the gateway JSON config file.
    #[arg(long = "conf-file", default_value = "gateway.json")]
    conf_file: PathBuf,
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into()))
        .init();

    let cli = Cli::parse();

    let cfg: GatewayConfig = match pushmesh_config::load(&cli.conf_file) {
        Ok(cfg) => cfg,
        Err(err) => {
            error!(%err, "failed to load config");
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

    match gateway::run(cfg, listener).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!(%err, "gateway exited with error");
            ExitCode::FAILURE
        }
    }
}
