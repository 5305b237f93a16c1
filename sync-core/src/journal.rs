//! Bounded run log for TableSync.
//!
//! This module provides a ring buffer of [`RunLog`] entries with:
//! - Insertion order preserved (oldest first, most recent last)
//! - A fixed capacity; the oldest entry is evicted when a new one arrives
//!
//! The buffer is owned by the reconciliation engine; callers only ever see
//! cloned snapshots.

use std::collections::VecDeque;
use sync_types::RunLog;

/// Number of entries retained by default.
pub const DEFAULT_LOG_CAPACITY: usize = 100;

/// Ring buffer of the most recent run log entries.
#[derive(Debug, Clone)]
pub struct RunLogBuffer {
    capacity: usize,
    entries: VecDeque<RunLog>,
}

impl RunLogBuffer {
    /// Create a buffer retaining at most `capacity` entries (minimum 1).
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            entries: VecDeque::with_capacity(capacity),
        }
    }

    /// Append an entry, evicting the oldest if full.
    pub fn push(&mut self, entry: RunLog) {
        if self.entries.len() == self.capacity {
            self.entries.pop_front();
        }
        self.entries.push_back(entry);
    }

    /// Append entries in order.
    pub fn extend(&mut self, entries: impl IntoIterator<Item = RunLog>) {
        for entry in entries {
            self.push(entry);
        }
    }

    /// Copy of the retained entries, most recent last.
    pub fn snapshot(&self) -> Vec<RunLog> {
        self.entries.iter().cloned().collect()
    }

    /// Most recent entry.
    pub fn last(&self) -> Option<&RunLog> {
        self.entries.back()
    }

    /// Number of retained entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Check if the buffer is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Maximum number of retained entries.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Drop every entry.
    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

impl Default for RunLogBuffer {
    fn default() -> Self {
        Self::new(DEFAULT_LOG_CAPACITY)
    }
}
