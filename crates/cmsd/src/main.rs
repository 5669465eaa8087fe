//! cmsd - reference Cluster Management Service
//!
//! Serves maintenance tasks over a Unix socket and grants node locks
//! according to each task's availability mode.

use anyhow::Result;
use clap::Parser;
use cmsd::{create_shared_state, rpc_server, CmsdConfig};
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "cmsd")]
#[command(about = "Cluster Management Service for maintenance locks", long_about = None)]
#[command(version = maint_common::VERSION)]
struct Cli {
    /// Socket to listen on
    #[arg(long, default_value = maint_common::SOCKET_PATH)]
    socket: PathBuf,

    /// Cluster layout and limits
    #[arg(long)]
    config: Option<PathBuf>,

    /// Log at debug level
    #[arg(long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .with_writer(std::io::stderr)
        .init();

    info!("cmsd v{} starting", maint_common::VERSION);

    let config = CmsdConfig::load(cli.config.as_deref())?;
    info!(
        "Cluster has {} nodes (strong={}, weak={})",
        config.nodes.len(),
        config.limits.strong_max_unavailable,
        config.limits.weak_max_unavailable
    );

    let state = create_shared_state(config);
    let listener = rpc_server::bind(&cli.socket).await?;

    rpc_server::serve(listener, state, async {
        let _ = tokio::signal::ctrl_c().await;
    })
    .await?;

    let _ = tokio::fs::remove_file(&cli.socket).await;
    info!("Shutting down gracefully");
    Ok(())
}
