//! Error types for sync-engine.

use std::time::Duration;
use sync_types::{RowError, Side};

/// Failures reported by a row store adapter.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// The store could not be reached.
    #[error("store unavailable: {0}")]
    Unavailable(String),

    /// The store refused the operation.
    #[error("store rejected the operation: {0}")]
    Rejected(String),

    /// An update targeted a row the store does not hold.
    #[error("row not found: {id}")]
    NotFound {
        /// The missing row id.
        id: String,
    },

    /// An insert targeted an id the store already holds.
    #[error("row already exists: {id}")]
    AlreadyExists {
        /// The conflicting row id.
        id: String,
    },

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Stored rows could not be encoded or decoded.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Main error type for a reconciliation run.
#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    /// Reading a snapshot failed; the run is aborted before any diffing.
    #[error("fetch from {side} failed: {source}")]
    Fetch {
        /// Store that failed.
        side: Side,
        /// Underlying adapter error.
        #[source]
        source: StoreError,
    },

    /// Applying a batch failed; that side's batch was rolled back.
    #[error("write to {side} failed: {source}")]
    Write {
        /// Store that failed.
        side: Side,
        /// Underlying adapter error.
        #[source]
        source: StoreError,
    },

    /// An adapter call or the whole run exceeded its time budget.
    #[error("{operation} timed out after {budget:?}")]
    Timeout {
        /// What was being waited for.
        operation: String,
        /// The budget that elapsed.
        budget: Duration,
    },

    /// A snapshot violated the row preconditions.
    #[error("invalid rows: {0}")]
    InvalidRows(#[from] RowError),
}

/// Errors returned by the run scheduler's control surface.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SchedulerError {
    /// `shutdown()` has been called.
    #[error("scheduler is shutting down")]
    ShuttingDown,

    /// The run queue is at capacity.
    #[error("run queue full (capacity: {capacity})")]
    QueueFull {
        /// Queue capacity.
        capacity: usize,
    },
}

/// Result type alias for run operations.
pub type Result<T> = std::result::Result<T, SyncError>;

/// Result type alias for store operations.
pub type StoreResult<T> = std::result::Result<T, StoreError>;
