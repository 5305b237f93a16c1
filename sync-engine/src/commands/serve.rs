//! Reconcile on a timer until interrupted.

use anyhow::{Context, Result};
use std::sync::Arc;

use sync_engine::{Reconciler, Scheduler, SchedulerConfig};

use super::stats::report;

/// Run the serve command.
pub async fn run(reconciler: Arc<Reconciler>, config: SchedulerConfig) -> Result<()> {
    if config.interval.is_none() {
        anyhow::bail!("Polling is disabled (scheduler.interval_secs = 0), nothing to serve");
    }

    let scheduler = Scheduler::start(Arc::clone(&reconciler), config);

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for Ctrl-C")?;
    tracing::info!("Received shutdown signal");

    scheduler.shutdown().await;

    println!("{}", report(&reconciler, &scheduler)?);
    Ok(())
}
