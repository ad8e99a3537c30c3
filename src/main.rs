use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use scribe::config::AppConfig;
use scribe::server;
use scribe::state::AppState;
use scribe_cluster::MemoryCoordinator;
use scribe_pubsub::MemoryBus;
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing::warn;
use tracing_subscriber::EnvFilter;

/// Collaborative editor synchronization node.
#[derive(Debug, Parser)]
#[command(name = "scribe-node", version, about)]
struct Cli {
    /// Stable instance id; defaults to SCRIBE_INSTANCE_ID or a
    /// generated one.
    #[arg(long)]
    instance_id: Option<String>,

    /// Listen host, overriding SCRIBE_HOST.
    #[arg(long)]
    host: Option<String>,

    /// Listen port, overriding SCRIBE_PORT.
    #[arg(long)]
    port: Option<u16>,

    /// Durable storage directory, overriding SCRIBE_DATA_DIR.
    /// Omit both for in-memory storage.
    #[arg(long)]
    data_dir: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let mut config = AppConfig::load()?;
    if let Some(instance_id) = cli.instance_id {
        config.node.instance_id = instance_id;
    }
    if let Some(host) = cli.host {
        config.node.host = host;
    }
    if let Some(port) = cli.port {
        config.node.port = port;
    }
    if let Some(data_dir) = cli.data_dir {
        config.storage.data_dir = Some(data_dir);
    }

    let shutdown = CancellationToken::new();

    // Single-process wiring: coordination and fan-out run in memory.
    // A multi-machine deployment swaps in networked implementations
    // of the Coordinator and EditBus seams.
    let coordinator = Arc::new(MemoryCoordinator::new());
    let bus = Arc::new(MemoryBus::default());
    let state = AppState::launch(&config, coordinator, bus, shutdown.clone()).await?;

    let addr: SocketAddr = format!("{}:{}", config.node.host, config.node.port)
        .parse()
        .map_err(|error| anyhow::anyhow!("invalid listen address: {error}"))?;

    let serve_state = Arc::clone(&state);
    let server = tokio::spawn(server::serve(serve_state, addr, shutdown.clone()));

    tokio::signal::ctrl_c().await?;
    info!("shutdown requested");
    shutdown.cancel();

    // Drain buffered edits before exit so nothing accepted is lost.
    if let Err(error) = state.buffer.flush_all().await {
        warn!(%error, "some buffers could not be flushed");
    }
    server.await??;
    Ok(())
}
