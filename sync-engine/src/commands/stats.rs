//! Perform a reconciliation through the scheduler and report counters.

use anyhow::Result;
use chrono::Utc;
use serde_json::json;
use std::sync::Arc;

use sync_engine::{Reconciler, Scheduler, SchedulerConfig};

/// Run the stats command.
pub async fn run(reconciler: Arc<Reconciler>, config: SchedulerConfig) -> Result<()> {
    let config = SchedulerConfig {
        interval: None,
        ..config
    };
    let scheduler = Scheduler::start(Arc::clone(&reconciler), config);

    let handle = scheduler.trigger_run()?;
    let state = handle.wait().await;
    tracing::info!("Run finished: {:?}", state);

    scheduler.shutdown().await;

    println!("{}", report(&reconciler, &scheduler)?);
    Ok(())
}

/// Run and queue counters as pretty JSON.
pub fn report(reconciler: &Reconciler, scheduler: &Scheduler) -> Result<String> {
    let stats = reconciler.run_stats();
    let report = json!({
        "runs": stats,
        "successRate": stats.success_rate(),
        "lastRunAgo": stats.last_run_ago(Utc::now()),
        "queue": scheduler.queue_stats(),
    });
    Ok(serde_json::to_string_pretty(&report)?)
}
