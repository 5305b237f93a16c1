//! Row store adapters for sync-engine.
//!
//! The engine never talks to a spreadsheet or a database directly; it only
//! calls the [`RowStore`] contract. Two adapters ship with the crate:
//!
//! - [`MemoryStore`] - shared in-memory rows with fault injection, for tests
//! - [`JsonFileStore`] - a row set persisted as a JSON array file
//!
//! # Example
//!
//! ```ignore
//! let store = MemoryStore::new(Side::SideA);
//! store.seed(vec![row]);
//! let rows = store.fetch_all_rows().await?;
//! store.apply_batch(&inserts, &updates).await?;
//! ```

mod json;
mod memory;

pub use json::JsonFileStore;
pub use memory::MemoryStore;

use crate::error::{StoreError, StoreResult};
use async_trait::async_trait;
use std::collections::HashMap;
use sync_types::{Row, Side};

/// Contract consumed by the reconciliation engine for one side.
#[async_trait]
pub trait RowStore: Send + Sync {
    /// Which side this store is.
    fn side(&self) -> Side;

    /// Read every row in the store.
    async fn fetch_all_rows(&self) -> StoreResult<Vec<Row>>;

    /// Insert rows that do not exist yet.
    async fn apply_inserts(&self, rows: &[Row]) -> StoreResult<()>;

    /// Overwrite existing rows, matched by id.
    async fn apply_updates(&self, rows: &[Row]) -> StoreResult<()>;

    /// Apply one side's inserts and updates as a single batch.
    ///
    /// Implementations must be all-or-nothing: on error no row of the batch
    /// may remain applied. The default runs inserts then updates and is only
    /// suitable for stores whose individual calls are already atomic and
    /// which cannot fail between them; transactional stores override it.
    async fn apply_batch(&self, inserts: &[Row], updates: &[Row]) -> StoreResult<()> {
        if !inserts.is_empty() {
            self.apply_inserts(inserts).await?;
        }
        if !updates.is_empty() {
            self.apply_updates(updates).await?;
        }
        Ok(())
    }
}

/// Merge a batch into `rows` in place.
///
/// Inserts append in order; updates replace the row with the same id.
/// Callers merge into a copy so an error leaves the original untouched.
pub(crate) fn merge_batch(
    rows: &mut Vec<Row>,
    inserts: &[Row],
    updates: &[Row],
) -> StoreResult<()> {
    let mut positions: HashMap<String, usize> = rows
        .iter()
        .enumerate()
        .map(|(i, row)| (row.id.clone(), i))
        .collect();

    for row in inserts {
        if positions.contains_key(&row.id) {
            return Err(StoreError::AlreadyExists { id: row.id.clone() });
        }
        positions.insert(row.id.clone(), rows.len());
        rows.push(row.clone());
    }

    for row in updates {
        let index = *positions
            .get(&row.id)
            .ok_or_else(|| StoreError::NotFound { id: row.id.clone() })?;
        rows[index] = row.clone();
    }

    Ok(())
}
