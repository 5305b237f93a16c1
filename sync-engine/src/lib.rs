//! # sync-engine
//!
//! Two-way reconciliation between two row stores for TableSync.
//!
//! This crate drives the pure logic in `sync-core` against real stores:
//! - Fetches both snapshots concurrently and applies the diff per side
//! - Keeps a bounded run log and run counters
//! - Serializes runs through a single-worker scheduler with retry/backoff
//!
//! ## Architecture
//!
//! ```text
//!  timer / trigger_run()
//!          │
//!  ┌───────▼────────┐      ┌──────────────────────────────┐
//!  │   Scheduler    │─────►│ Reconciler::perform_sync()   │
//!  │ (1 worker)     │      │  fetch A ║ fetch B           │
//!  └────────────────┘      │  compute_diff (sync-core)    │
//!                          │  apply A, then apply B       │
//!                          └──────┬───────────────┬───────┘
//!                                 │               │
//!                          ┌──────▼─────┐   ┌─────▼──────┐
//!                          │ RowStore A │   │ RowStore B │
//!                          └────────────┘   └────────────┘
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod config;
pub mod engine;
pub mod error;
pub mod scheduler;
pub mod store;

pub use config::{Config, ConfigError};
pub use engine::{EngineConfig, Reconciler};
pub use error::{SchedulerError, StoreError, SyncError};
pub use scheduler::{QueueStats, RunExecutor, RunHandle, Scheduler, SchedulerConfig};
pub use store::{JsonFileStore, MemoryStore, RowStore};
