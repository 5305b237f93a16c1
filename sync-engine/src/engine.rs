//! Reconciliation engine.
//!
//! One call to [`Reconciler::perform_sync`] is one run:
//!
//! 1. Fetch both snapshots concurrently; either failure aborts the run
//! 2. Compute the diff
//! 3. Apply side A's batch, then side B's batch
//! 4. Commit this run's log entries and stats in a single critical section
//!
//! The engine never retries; failures are recorded and handed back to the
//! scheduler.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock, RwLockWriteGuard};
use std::time::Duration;

use async_trait::async_trait;
use sync_core::{compute_diff, resolve_with_reason, RunLogBuffer, DEFAULT_LOG_CAPACITY};
use sync_types::{now_millis, LogAction, LogSource, Row, RunLog, RunStats, Side};
use tokio::time::{timeout, Instant};

use crate::error::{Result, StoreError, SyncError};
use crate::scheduler::RunExecutor;
use crate::store::RowStore;

/// Runtime settings for the reconciler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineConfig {
    /// Minimum spacing of `no-op` log entries.
    pub quiet_interval: Duration,
    /// Number of log entries retained.
    pub log_capacity: usize,
    /// Budget for each adapter call.
    pub operation_timeout: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            quiet_interval: Duration::from_secs(30),
            log_capacity: DEFAULT_LOG_CAPACITY,
            operation_timeout: Duration::from_secs(30),
        }
    }
}

/// Run log, counters and the no-op throttle, committed together.
#[derive(Debug)]
struct Journal {
    logs: RunLogBuffer,
    stats: RunStats,
    /// When any entry was last appended.
    last_logged: Option<Instant>,
}

impl Journal {
    fn new(capacity: usize) -> Self {
        Self {
            logs: RunLogBuffer::new(capacity),
            stats: RunStats::default(),
            last_logged: None,
        }
    }

    fn quiet_for(&self, interval: Duration) -> bool {
        self.last_logged
            .map_or(true, |at| at.elapsed() > interval)
    }

    fn append(&mut self, entries: &[RunLog]) {
        if entries.is_empty() {
            return;
        }
        self.logs.extend(entries.iter().cloned());
        self.last_logged = Some(Instant::now());
    }
}

/// Reconciles two row stores.
pub struct Reconciler {
    side_a: Arc<dyn RowStore>,
    side_b: Arc<dyn RowStore>,
    config: EngineConfig,
    journal: RwLock<Journal>,
}

impl Reconciler {
    /// Create a reconciler over the two stores.
    pub fn new(side_a: Arc<dyn RowStore>, side_b: Arc<dyn RowStore>, config: EngineConfig) -> Self {
        let journal = RwLock::new(Journal::new(config.log_capacity));
        Self {
            side_a,
            side_b,
            config,
            journal,
        }
    }

    /// Run one reconciliation and return the log entries it produced.
    ///
    /// # Errors
    ///
    /// Returns the first fetch, validation or write failure. An `error` entry
    /// and a failed run are recorded before returning. A side whose batch was
    /// already committed stays committed.
    pub async fn perform_sync(&self) -> Result<Vec<RunLog>> {
        let started = Instant::now();
        tracing::info!("Starting reconciliation run");

        let mut entries = Vec::new();
        let outcome = self.reconcile(&mut entries).await;

        let mut journal = self.journal_mut();
        match outcome {
            Ok(changed) => {
                if changed == 0 && journal.quiet_for(self.config.quiet_interval) {
                    entries.push(RunLog::new(
                        now_millis(),
                        LogAction::NoOp,
                        LogSource::System,
                        0,
                        "no changes detected",
                    ));
                }
                journal.append(&entries);
                journal.stats.record_success(now_millis());
                tracing::info!(
                    "Reconciliation run finished: {} rows changed in {:?}",
                    changed,
                    started.elapsed()
                );
                Ok(entries)
            }
            Err(e) => {
                entries.push(RunLog::new(
                    now_millis(),
                    LogAction::Error,
                    LogSource::System,
                    0,
                    e.to_string(),
                ));
                journal.append(&entries);
                journal.stats.record_failure(e.to_string());
                tracing::error!("Reconciliation run failed: {}", e);
                Err(e)
            }
        }
    }

    /// Retained log entries, most recent last.
    pub fn run_logs(&self) -> Vec<RunLog> {
        self.journal().logs.snapshot()
    }

    /// Snapshot of the run counters.
    pub fn run_stats(&self) -> RunStats {
        self.journal().stats.clone()
    }

    /// Record a run abandoned after exceeding `budget`.
    pub fn record_timeout(&self, budget: Duration) {
        let error = SyncError::Timeout {
            operation: "reconciliation run".into(),
            budget,
        };
        let entry = RunLog::new(
            now_millis(),
            LogAction::Error,
            LogSource::System,
            0,
            error.to_string(),
        );

        let mut journal = self.journal_mut();
        journal.append(&[entry]);
        journal.stats.record_failure(error.to_string());
    }

    /// Drop all log entries and reset the counters.
    pub fn clear_history(&self) {
        let mut journal = self.journal_mut();
        *journal = Journal::new(self.config.log_capacity);
        tracing::info!("Run history cleared");
    }

    /// Fetch, diff and apply. Entries for committed batches are pushed as
    /// they land so a later failure still reports them.
    async fn reconcile(&self, entries: &mut Vec<RunLog>) -> Result<usize> {
        let (rows_a, rows_b) = tokio::try_join!(self.fetch(Side::SideA), self.fetch(Side::SideB))?;
        tracing::debug!(
            "Fetched {} rows from side A and {} rows from side B",
            rows_a.len(),
            rows_b.len()
        );

        let diff = compute_diff(&rows_a, &rows_b, now_millis())?;
        trace_resolutions(&rows_a, &rows_b);
        tracing::info!(
            "Diff: side A +{} ~{}, side B +{} ~{}",
            diff.to_insert_a.len(),
            diff.to_update_a.len(),
            diff.to_insert_b.len(),
            diff.to_update_b.len()
        );

        for side in [Side::SideA, Side::SideB] {
            let (inserts, updates) = diff.for_side(side);
            if inserts.is_empty() && updates.is_empty() {
                continue;
            }

            self.apply(side, inserts, updates).await?;

            let source = LogSource::from(side.other());
            if !inserts.is_empty() {
                entries.push(RunLog::new(
                    now_millis(),
                    LogAction::Insert,
                    source,
                    inserts.len(),
                    format!("inserted {} rows into {}", inserts.len(), side),
                ));
            }
            if !updates.is_empty() {
                entries.push(RunLog::new(
                    now_millis(),
                    LogAction::Update,
                    source,
                    updates.len(),
                    format!("updated {} rows in {}", updates.len(), side),
                ));
            }
        }

        Ok(diff.total())
    }

    async fn fetch(&self, side: Side) -> Result<Vec<Row>> {
        let budget = self.config.operation_timeout;
        match timeout(budget, self.store(side).fetch_all_rows()).await {
            Ok(Ok(rows)) => Ok(rows),
            Ok(Err(source)) => Err(SyncError::Fetch { side, source }),
            Err(_) => Err(SyncError::Fetch {
                side,
                source: StoreError::Unavailable(format!("no response within {:?}", budget)),
            }),
        }
    }

    async fn apply(&self, side: Side, inserts: &[Row], updates: &[Row]) -> Result<()> {
        let budget = self.config.operation_timeout;
        match timeout(budget, self.store(side).apply_batch(inserts, updates)).await {
            Ok(Ok(())) => {
                tracing::info!(
                    "Applied batch to {}: {} inserts, {} updates",
                    side,
                    inserts.len(),
                    updates.len()
                );
                Ok(())
            }
            Ok(Err(source)) => Err(SyncError::Write { side, source }),
            Err(_) => Err(SyncError::Write {
                side,
                source: StoreError::Unavailable(format!("no response within {:?}", budget)),
            }),
        }
    }

    fn store(&self, side: Side) -> &dyn RowStore {
        match side {
            Side::SideA => self.side_a.as_ref(),
            Side::SideB => self.side_b.as_ref(),
        }
    }

    fn journal(&self) -> std::sync::RwLockReadGuard<'_, Journal> {
        self.journal.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn journal_mut(&self) -> RwLockWriteGuard<'_, Journal> {
        self.journal.write().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl RunExecutor for Reconciler {
    async fn execute(&self) -> Result<usize> {
        let entries = self.perform_sync().await?;
        Ok(entries.iter().map(|entry| entry.rows_affected).sum())
    }

    fn record_timeout(&self, budget: Duration) {
        Reconciler::record_timeout(self, budget);
    }

    fn clear_history(&self) {
        Reconciler::clear_history(self);
    }
}

/// Log which rule decided each paired row that will propagate.
fn trace_resolutions(rows_a: &[Row], rows_b: &[Row]) {
    if !tracing::enabled!(tracing::Level::DEBUG) {
        return;
    }

    let by_id: HashMap<&str, &Row> = rows_b.iter().map(|row| (row.id.as_str(), row)).collect();
    for a in rows_a {
        let Some(b) = by_id.get(a.id.as_str()) else {
            continue;
        };
        let (winner, reason) = resolve_with_reason(a, b);
        if let Some(side) = winner.side() {
            tracing::debug!("Row {}: {} wins ({:?})", a.id, side, reason);
        }
    }
}
