//! OPCN node — entry point.
//!
//! Starts an OPCN node with configuration from a TOML file or defaults.

use clap::Parser;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

use opcn_node::{Node, NodeConfig};

/// OPCN Node
#[derive(Parser, Debug)]
#[command(name = "opcn-node", version, about = "OPCN payment channel network node")]
struct Args {
    /// Path to the configuration file (TOML).
    #[arg(short, long, default_value = "opcn.toml")]
    config: PathBuf,

    /// Override the node identifier.
    #[arg(long)]
    id: Option<String>,

    /// Override the data directory.
    #[arg(long)]
    data_dir: Option<PathBuf>,

    /// Override the log level (trace, debug, info, warn, error).
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Generate a default config file and exit.
    #[arg(long)]
    init: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .init();

    if args.init {
        let config = NodeConfig::default();
        config.save(&args.config)?;
        tracing::info!(path = %args.config.display(), "wrote default config");
        return Ok(());
    }

    let mut config = NodeConfig::load(&args.config)?;
    if let Some(id) = args.id {
        config.node.id = id;
    }
    if let Some(data_dir) = args.data_dir {
        config.storage.data_dir = Some(data_dir);
    }
    config.logging.level = args.log_level;

    tracing::info!("OPCN node v{}", env!("CARGO_PKG_VERSION"));

    let node = Node::new(config)?;
    node.start();
    tracing::info!(node = %node.id(), "node running; press ctrl-c to stop");

    tokio::signal::ctrl_c().await?;
    tracing::info!("received shutdown signal");
    node.shutdown().await;
    tracing::info!("OPCN node exited cleanly");
    Ok(())
}
