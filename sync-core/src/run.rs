//! Run lifecycle state machine for TableSync.
//!
//! This module provides a pure, side-effect-free state machine for one
//! scheduled reconciliation run. The state machine takes events as input and
//! produces a new state plus a list of actions to execute.
//!
//! ```text
//! Queued{1} ─Started─► Running{1} ─Succeeded─► Completed
//!     ▲                    │
//!     └──ScheduleRetry─────┤ Errored (attempt < max)
//!                          └ Errored (attempt == max) ─► Failed
//! ```
//!
//! The actual waiting and executing is performed by the scheduler in
//! sync-engine, not by this module.

use serde::Serialize;
use std::time::Duration;

/// Retry limits for a failed run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total executions allowed, including the first (default: 3).
    pub max_attempts: u32,
    /// Delay before the first retry; doubles for each later retry (default: 2s).
    pub base_delay: Duration,
}

impl RetryPolicy {
    /// Create a policy.
    pub fn new(max_attempts: u32, base_delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay,
        }
    }

    /// Delay after the given failed attempt (1-based): `base * 2^(attempt-1)`.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(16);
        self.base_delay.saturating_mul(1u32 << exponent)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(3, Duration::from_secs(2))
    }
}

/// Lifecycle of a scheduled run - NO I/O, just state transitions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "camelCase")]
pub enum RunState {
    /// Waiting for the worker (or for a retry delay to elapse).
    Queued {
        /// The attempt that will execute next (1-based).
        attempt: u32,
    },
    /// Executing on the worker.
    Running {
        /// Current attempt (1-based).
        attempt: u32,
    },
    /// Finished without error.
    Completed {
        /// Executions it took.
        attempts: u32,
    },
    /// Gave up.
    Failed {
        /// Executions performed.
        attempts: u32,
        /// Last error message.
        error: String,
    },
}

impl RunState {
    /// A freshly enqueued run.
    pub fn new() -> Self {
        Self::Queued { attempt: 1 }
    }

    /// Process an event and return the new state plus actions to execute.
    ///
    /// This is a pure function - no side effects. The caller is responsible
    /// for executing the returned actions.
    pub fn on_event(self, event: RunEvent, policy: &RetryPolicy) -> (Self, Vec<RunAction>) {
        match (self, event) {
            (Self::Queued { attempt }, RunEvent::Started) => {
                (Self::Running { attempt }, vec![RunAction::Execute])
            }

            (Self::Running { attempt }, RunEvent::Succeeded) => (
                Self::Completed { attempts: attempt },
                vec![RunAction::Finish],
            ),
            (Self::Running { attempt }, RunEvent::Errored { .. })
                if attempt < policy.max_attempts =>
            {
                (
                    Self::Queued {
                        attempt: attempt + 1,
                    },
                    vec![RunAction::ScheduleRetry {
                        delay: policy.backoff(attempt),
                    }],
                )
            }
            (Self::Running { attempt }, RunEvent::Errored { error }) => (
                Self::Failed {
                    attempts: attempt,
                    error,
                },
                vec![RunAction::Finish],
            ),

            (Self::Queued { attempt }, RunEvent::Cancelled { reason }) => (
                Self::Failed {
                    attempts: attempt.saturating_sub(1),
                    error: reason,
                },
                vec![RunAction::Finish],
            ),
            (Self::Running { attempt }, RunEvent::Cancelled { reason }) => (
                Self::Failed {
                    attempts: attempt,
                    error: reason,
                },
                vec![RunAction::Finish],
            ),

            // Invalid transitions - stay in current state
            (state, _) => (state, vec![]),
        }
    }

    /// Check if the run reached `Completed` or `Failed`.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed { .. } | Self::Failed { .. })
    }
}

impl Default for RunState {
    fn default() -> Self {
        Self::new()
    }
}

/// Events in a run's lifecycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunEvent {
    /// The worker picked the run up.
    Started,
    /// The attempt finished without error.
    Succeeded,
    /// The attempt failed.
    Errored {
        /// Error message describing the failure.
        error: String,
    },
    /// The scheduler is shutting down.
    Cancelled {
        /// Why the run was abandoned.
        reason: String,
    },
}

/// Actions to be executed by the scheduler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunAction {
    /// Execute one reconciliation attempt.
    Execute,
    /// Wait, then start the next attempt.
    ScheduleRetry {
        /// Delay before the next attempt.
        delay: Duration,
    },
    /// The run reached a terminal state.
    Finish,
}
