//! # sync-core
//!
//! Pure reconciliation logic for TableSync (no I/O, instant tests).
//!
//! This crate implements the conflict resolver, the diff engine and the run
//! state machine without any network or disk I/O, enabling fast unit tests.
//!
//! ## Design Philosophy
//!
//! All modules in this crate are **pure** - they take input and produce output
//! without side effects. Even the clock is an argument: [`compute_diff`] takes
//! the timestamp to stamp on propagated rows.
//!
//! The actual I/O (fetching snapshots, writing batches) is performed by
//! `sync-engine`, which applies the diffs and drives the state machines.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod diff;
pub mod journal;
pub mod resolve;
pub mod run;

pub use diff::{compute_diff, Diff};
pub use journal::{RunLogBuffer, DEFAULT_LOG_CAPACITY};
pub use resolve::{
    completeness, data_quality, resolve, resolve_with_reason, rows_equal, DataQuality, Reason,
    Winner, NEAR_SIMULTANEOUS_WINDOW_MS,
};
pub use run::{RetryPolicy, RunAction, RunEvent, RunState};
