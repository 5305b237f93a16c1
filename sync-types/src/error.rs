//! Error types for TableSync row sets.

use crate::Side;
use thiserror::Error;

/// Precondition violations detected before rows are paired across stores.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RowError {
    /// A row has an empty (or whitespace-only) identifier.
    #[error("row {index} from {side} has no id")]
    MissingId {
        /// Store the row was read from.
        side: Side,
        /// Position of the row in the fetched snapshot.
        index: usize,
    },

    /// Two rows in the same store share an identifier.
    #[error("duplicate id {id:?} in {side}")]
    DuplicateId {
        /// Store the rows were read from.
        side: Side,
        /// The repeated identifier.
        id: String,
    },

    /// A winning row cannot be propagated because its version is at the maximum.
    #[error("version of row {id:?} from {side} cannot be increased")]
    VersionExhausted {
        /// Store the winning copy came from.
        side: Side,
        /// Identifier of the row.
        id: String,
    },
}
