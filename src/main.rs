//! Arcane - multi-environment Docker fleet manager control plane
//!
//! Mediates between operators and one-or-more Docker daemons: scheduling,
//! image updates, volume backups, notifications and GitOps sync all live
//! behind the control plane wired up in `cmd::root`.

use anyhow::Result;
use clap::Parser;
use tracing::{error, info};

mod cmd;

#[derive(Parser)]
#[command(name = "arcane")]
#[command(about = "Arcane Docker fleet manager control plane")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Option<cmd::Commands>,

    /// Path to configuration file
    #[arg(short, long, default_value = "config.toml")]
    config: String,

    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let log_level = if cli.debug { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| format!("arcane={}", log_level).into()))
        .init();

    info!("Starting Arcane v{}", env!("CARGO_PKG_VERSION"));

    match cli.command {
        Some(cmd::Commands::Configure) => {
            cmd::configure::run().await?;
        }
        Some(cmd::Commands::Diagnostics) => {
            cmd::diagnostics::run().await?;
        }
        None => {
            if let Err(e) = cmd::root::run(&cli.config).await {
                error!("control plane error: {}", e);
                std::process::exit(1);
            }
        }
    }

    Ok(())
}
