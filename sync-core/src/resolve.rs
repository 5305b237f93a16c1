//! Conflict resolution for rows present on both sides.
//!
//! [`resolve`] is a pure, total, deterministic decision function. It runs an
//! ordered rule chain and the first applicable rule decides:
//!
//! 1. **Equality** - trimmed payload and version identical: nothing to do.
//! 2. **Data-quality repair** - a row missing name or email loses to a complete one;
//!    two incomplete rows are compared by how many payload fields they fill.
//! 3. **Loop prevention** - a value just received from the other side is never
//!    bounced straight back.
//! 4. **Near-simultaneous tie-break** - edits less than 5 s apart are decided by version.
//! 5. **Recency** - the later `updated_at` wins; an exact tie goes to side B.

use serde::Serialize;
use sync_types::{Row, Side};

/// Edits closer together than this are treated as simultaneous.
pub const NEAR_SIMULTANEOUS_WINDOW_MS: i64 = 5_000;

/// Which side's value should propagate for a paired row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum Winner {
    /// Side A's value should overwrite side B.
    A,
    /// Side B's value should overwrite side A.
    B,
    /// No propagation.
    None,
}

impl Winner {
    /// The winning side, if any.
    pub fn side(self) -> Option<Side> {
        match self {
            Winner::A => Some(Side::SideA),
            Winner::B => Some(Side::SideB),
            Winner::None => None,
        }
    }

    fn of(side: Side) -> Self {
        match side {
            Side::SideA => Winner::A,
            Side::SideB => Winner::B,
        }
    }
}

/// The rule that produced a [`Winner`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum Reason {
    /// Rule 1: rows are equal after normalization.
    Equal,
    /// Rule 2: one side is missing name or email, the other is not.
    DataRepair,
    /// Rule 2: both sides incomplete, the fuller one wins.
    Completeness,
    /// Rule 3: the value on one side was received from the other.
    LoopPrevention,
    /// Rule 4: near-simultaneous edits, higher version wins.
    VersionTieBreak,
    /// Rule 5: the most recent edit wins.
    Recency,
}

/// Whether a row carries the fields needed to be trusted as a source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum DataQuality {
    /// Both name and email are present.
    Good,
    /// Name or email is empty.
    Bad,
}

fn filled(field: &str) -> bool {
    !field.trim().is_empty()
}

/// Classify a row: `Good` when both name and email are non-empty after trimming.
pub fn data_quality(row: &Row) -> DataQuality {
    if filled(&row.name) && filled(&row.email) {
        DataQuality::Good
    } else {
        DataQuality::Bad
    }
}

/// Number of non-empty payload fields among name, email and status (0..=3).
///
/// Each field is worth a third of a complete row.
pub fn completeness(row: &Row) -> u8 {
    [&row.name, &row.email, &row.status]
        .into_iter()
        .filter(|field| filled(field))
        .count() as u8
}

/// Rule 1: trimmed payload and version identical. Timestamps are ignored.
pub fn rows_equal(a: &Row, b: &Row) -> bool {
    a.name.trim() == b.name.trim()
        && a.email.trim() == b.email.trim()
        && a.status.trim() == b.status.trim()
        && a.version == b.version
}

/// Decide which side's value should propagate for a row present on both sides.
pub fn resolve(a: &Row, b: &Row) -> Winner {
    resolve_with_reason(a, b).0
}

/// Like [`resolve`], also reporting which rule decided.
pub fn resolve_with_reason(a: &Row, b: &Row) -> (Winner, Reason) {
    if rows_equal(a, b) {
        return (Winner::None, Reason::Equal);
    }

    match (data_quality(a), data_quality(b)) {
        (DataQuality::Good, DataQuality::Bad) => return (Winner::A, Reason::DataRepair),
        (DataQuality::Bad, DataQuality::Good) => return (Winner::B, Reason::DataRepair),
        (DataQuality::Bad, DataQuality::Bad) => {
            let (score_a, score_b) = (completeness(a), completeness(b));
            if score_a > score_b {
                return (Winner::A, Reason::Completeness);
            }
            if score_b > score_a {
                return (Winner::B, Reason::Completeness);
            }
        }
        (DataQuality::Good, DataQuality::Good) => {}
    }

    if a.last_updated_by == Side::SideB || b.last_updated_by == Side::SideA {
        return (Winner::None, Reason::LoopPrevention);
    }

    let a_ms = a.updated_at.timestamp_millis();
    let b_ms = b.updated_at.timestamp_millis();

    if (a_ms - b_ms).abs() < NEAR_SIMULTANEOUS_WINDOW_MS && a.version != b.version {
        let side = if a.version > b.version {
            Side::SideA
        } else {
            Side::SideB
        };
        return (Winner::of(side), Reason::VersionTieBreak);
    }

    // Exact ties go to side B so repeated runs never flip-flop.
    if a_ms > b_ms {
        (Winner::A, Reason::Recency)
    } else {
        (Winner::B, Reason::Recency)
    }
}
