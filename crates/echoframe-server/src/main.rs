//! echoframe-server binary.

use clap::Parser;
use echoframe_core::{SystemEnv, Transport};
use echoframe_server::{Server, ServerConfig, TcpTransport};
use tokio::sync::watch;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = ServerConfig::parse();

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let transport = TcpTransport::bind(config.bind).await?;
    info!(addr = %transport.local_addr()?, path = %config.path, "echo server starting");

    let (stop_tx, stop_rx) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("interrupt received");
            let _ = stop_tx.send(true);
        }
    });

    let stats = Server::echo(transport, SystemEnv::new(), config.session_config()).run(stop_rx).await?;
    info!(?stats, "server stopped");
    Ok(())
}
