//! # sync-types
//!
//! Wire format types for TableSync two-way table reconciliation.
//!
//! This crate provides the foundational types used across all TableSync crates:
//! - [`Row`], [`Side`] - The unit of synchronization and the store it came from
//! - [`RunLog`], [`LogAction`], [`LogSource`] - Records of reconciliation runs
//! - [`RunStats`] - Process-lifetime run counters
//! - [`RowError`] - Precondition violations on row sets

#![warn(missing_docs)]
#![warn(clippy::all)]

mod error;
mod log;
mod row;

pub use error::RowError;
pub use log::{LogAction, LogSource, RunLog, RunStats};
pub use row::{now_millis, Row, Side};
