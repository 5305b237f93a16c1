//! Perform a single reconciliation.

use anyhow::{Context, Result};

use sync_engine::Reconciler;

/// Run the run command.
pub async fn run(reconciler: &Reconciler) -> Result<()> {
    let entries = reconciler
        .perform_sync()
        .await
        .context("Reconciliation failed")?;

    println!("{}", serde_json::to_string_pretty(&entries)?);
    Ok(())
}
