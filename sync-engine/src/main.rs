//! # tablesync
//!
//! Keeps two JSON row files reconciled.
//!
//! ## Commands
//!
//! - `run`: Perform one reconciliation and print its log entries
//! - `serve`: Reconcile on a timer until Ctrl-C
//! - `stats`: Perform one reconciliation and print run and queue counters
//!
//! ## Example
//!
//! ```bash
//! tablesync --config tablesync.toml run
//! TABLESYNC_LOG=debug tablesync serve
//! ```

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

use sync_engine::{Config, JsonFileStore, Reconciler};
use sync_types::Side;

mod commands;

use commands::{run, serve, stats};

/// Reconcile two row stores.
#[derive(Parser, Debug)]
#[command(name = "tablesync")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Configuration file (defaults apply when it does not exist)
    #[arg(long, short, global = true, default_value = "tablesync.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Perform one reconciliation and print its log entries as JSON
    Run,

    /// Reconcile on a timer until Ctrl-C
    Serve,

    /// Perform one reconciliation, then print run and queue stats as JSON
    Stats,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_env("TABLESYNC_LOG").unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let config = load_config(&cli.config)?;

    let side_a = JsonFileStore::new(Side::SideA, &config.stores.side_a);
    let side_b = JsonFileStore::new(Side::SideB, &config.stores.side_b);
    let reconciler = Arc::new(Reconciler::new(
        Arc::new(side_a),
        Arc::new(side_b),
        config.engine.engine_config(),
    ));

    match cli.command {
        Commands::Run => run::run(&reconciler).await?,
        Commands::Serve => serve::run(reconciler, config.scheduler.scheduler_config()).await?,
        Commands::Stats => stats::run(reconciler, config.scheduler.scheduler_config()).await?,
    }

    Ok(())
}

/// Load the config file, falling back to defaults when it is absent.
fn load_config(path: &Path) -> Result<Config> {
    if !path.exists() {
        tracing::info!("No config file at {}, using defaults", path.display());
        return Ok(Config::default());
    }
    Config::from_file(path).with_context(|| format!("Failed to load {}", path.display()))
}
