//! Run records: the per-run log entries and the process-lifetime counters.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::Side;

/// What a log entry records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum LogAction {
    /// Rows were inserted into a store.
    Insert,
    /// Rows were updated in a store.
    Update,
    /// Nothing needed to change.
    NoOp,
    /// The run failed.
    Error,
}

/// Where the change in a log entry originated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum LogSource {
    /// Values came from side A.
    SideA,
    /// Values came from side B.
    SideB,
    /// Not attributable to a side (no-op and error entries).
    System,
}

impl From<Side> for LogSource {
    fn from(side: Side) -> Self {
        match side {
            Side::SideA => LogSource::SideA,
            Side::SideB => LogSource::SideB,
        }
    }
}

/// Immutable record of one action group of a reconciliation run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunLog {
    /// When the entry was written.
    pub timestamp: DateTime<Utc>,
    /// Kind of action.
    pub action: LogAction,
    /// Origin of the propagated values.
    pub source: LogSource,
    /// Number of rows touched.
    pub rows_affected: usize,
    /// Human-readable detail.
    pub details: String,
}

impl RunLog {
    /// Create a log entry.
    pub fn new(
        timestamp: DateTime<Utc>,
        action: LogAction,
        source: LogSource,
        rows_affected: usize,
        details: impl Into<String>,
    ) -> Self {
        Self {
            timestamp,
            action,
            source,
            rows_affected,
            details: details.into(),
        }
    }
}

/// Process-lifetime counters for reconciliation runs.
///
/// Purely additive; only [`RunStats::default`] resets them.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunStats {
    /// Runs attempted.
    pub total_runs: u64,
    /// Runs that completed without error.
    pub successful_runs: u64,
    /// Runs that ended in an error.
    pub failed_runs: u64,
    /// When the last successful run finished.
    pub last_run_at: Option<DateTime<Utc>>,
    /// Message of the most recent failure, cleared by the next success.
    pub last_error: Option<String>,
}

impl RunStats {
    /// Count a successful run finishing at `at`.
    pub fn record_success(&mut self, at: DateTime<Utc>) {
        self.total_runs += 1;
        self.successful_runs += 1;
        self.last_run_at = Some(at);
        self.last_error = None;
    }

    /// Count a failed run.
    pub fn record_failure(&mut self, error: impl Into<String>) {
        self.total_runs += 1;
        self.failed_runs += 1;
        self.last_error = Some(error.into());
    }

    /// Percentage of successful runs, rounded. Zero before the first run.
    pub fn success_rate(&self) -> u8 {
        if self.total_runs == 0 {
            return 0;
        }
        let rate = (self.successful_runs as f64 / self.total_runs as f64) * 100.0;
        rate.round() as u8
    }

    /// Whole seconds since the last successful run, if any.
    pub fn last_run_ago(&self, now: DateTime<Utc>) -> Option<i64> {
        self.last_run_at
            .map(|at| (now - at).num_milliseconds().max(0))
            .map(|ms| (ms as f64 / 1000.0).round() as i64)
    }
}
