//! In-memory row store.
//!
//! Allows seeding rows, simulating local edits and injecting failures, and
//! records how often the engine called it.

use super::{merge_batch, RowStore};
use crate::error::{StoreError, StoreResult};
use async_trait::async_trait;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use sync_types::{now_millis, Row, Side};

/// In-memory row store.
///
/// Clones share state, so a test can keep a handle while the engine owns another.
#[derive(Debug)]
pub struct MemoryStore {
    side: Side,
    inner: Arc<Mutex<MemoryStoreInner>>,
}

#[derive(Debug, Default)]
struct MemoryStoreInner {
    rows: Vec<Row>,
    fail_next_fetch: Option<String>,
    fail_next_write: Option<String>,
    fetch_delay: Option<Duration>,
    write_delay: Option<Duration>,
    fetch_calls: u64,
    batches_applied: u64,
}

impl MemoryStore {
    /// Create an empty store for `side`.
    pub fn new(side: Side) -> Self {
        Self {
            side,
            inner: Arc::new(Mutex::new(MemoryStoreInner::default())),
        }
    }

    /// Create a store holding `rows`.
    pub fn with_rows(side: Side, rows: Vec<Row>) -> Self {
        let store = Self::new(side);
        store.seed(rows);
        store
    }

    /// Replace the stored rows verbatim.
    pub fn seed(&self, rows: Vec<Row>) {
        let mut inner = self.lock();
        inner.rows = rows;
    }

    /// Copy of the stored rows, in store order.
    pub fn rows(&self) -> Vec<Row> {
        let inner = self.lock();
        inner.rows.clone()
    }

    /// Look up a row by id.
    pub fn get(&self, id: &str) -> Option<Row> {
        let inner = self.lock();
        inner.rows.iter().find(|row| row.id == id).cloned()
    }

    /// Simulate a user editing (or creating) a row directly in this store.
    ///
    /// The row is stamped now and attributed to this side.
    pub fn edit(&self, row: Row) {
        let row = row.with_updated_at(now_millis()).with_last_updated_by(self.side);
        let mut inner = self.lock();
        match inner.rows.iter_mut().find(|existing| existing.id == row.id) {
            Some(existing) => *existing = row,
            None => inner.rows.push(row),
        }
    }

    /// Cause the next fetch to fail with the given error.
    pub fn fail_next_fetch(&self, error: &str) {
        let mut inner = self.lock();
        inner.fail_next_fetch = Some(error.to_string());
    }

    /// Cause the next write to fail with the given error.
    pub fn fail_next_write(&self, error: &str) {
        let mut inner = self.lock();
        inner.fail_next_write = Some(error.to_string());
    }

    /// Delay every fetch by `delay`.
    pub fn set_fetch_delay(&self, delay: Duration) {
        let mut inner = self.lock();
        inner.fetch_delay = Some(delay);
    }

    /// Delay every write by `delay`.
    pub fn set_write_delay(&self, delay: Duration) {
        let mut inner = self.lock();
        inner.write_delay = Some(delay);
    }

    /// Number of fetches served (including failed ones).
    pub fn fetch_calls(&self) -> u64 {
        let inner = self.lock();
        inner.fetch_calls
    }

    /// Number of batches committed.
    pub fn batches_applied(&self) -> u64 {
        let inner = self.lock();
        inner.batches_applied
    }

    fn lock(&self) -> MutexGuard<'_, MemoryStoreInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Clone for MemoryStore {
    fn clone(&self) -> Self {
        Self {
            side: self.side,
            inner: Arc::clone(&self.inner),
        }
    }
}

#[async_trait]
impl RowStore for MemoryStore {
    fn side(&self) -> Side {
        self.side
    }

    async fn fetch_all_rows(&self) -> StoreResult<Vec<Row>> {
        let delay = self.lock().fetch_delay;
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let mut inner = self.lock();
        inner.fetch_calls += 1;

        // Check for forced failure
        if let Some(error) = inner.fail_next_fetch.take() {
            return Err(StoreError::Unavailable(error));
        }

        Ok(inner.rows.clone())
    }

    async fn apply_inserts(&self, rows: &[Row]) -> StoreResult<()> {
        self.apply_batch(rows, &[]).await
    }

    async fn apply_updates(&self, rows: &[Row]) -> StoreResult<()> {
        self.apply_batch(&[], rows).await
    }

    async fn apply_batch(&self, inserts: &[Row], updates: &[Row]) -> StoreResult<()> {
        let delay = self.lock().write_delay;
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let mut inner = self.lock();

        // Check for forced failure
        if let Some(error) = inner.fail_next_write.take() {
            return Err(StoreError::Rejected(error));
        }

        let mut staged = inner.rows.clone();
        merge_batch(&mut staged, inserts, updates)?;
        inner.rows = staged;
        inner.batches_applied += 1;
        Ok(())
    }
}
