//! Diff computation between two row snapshots.
//!
//! Rows are paired by `id` through hash maps, so a diff costs
//! O(|A| + |B|). Paired rows are adjudicated by [`resolve`]; unpaired rows
//! are staged for insertion into the side that lacks them.
//!
//! Deletion is not represented: a row missing from one side is always
//! treated as new on the other.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;
use sync_types::{Row, RowError, Side};

use crate::resolve::{resolve, Winner};

/// The four action sets produced by one diff.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Diff {
    /// Rows only side B has, to insert into side A.
    pub to_insert_a: Vec<Row>,
    /// Rows where side B won, to write into side A.
    pub to_update_a: Vec<Row>,
    /// Rows only side A has, to insert into side B.
    pub to_insert_b: Vec<Row>,
    /// Rows where side A won, to write into side B.
    pub to_update_b: Vec<Row>,
}

impl Diff {
    /// True when neither side needs any change.
    pub fn is_empty(&self) -> bool {
        self.total() == 0
    }

    /// Total number of staged rows across all four sets.
    pub fn total(&self) -> usize {
        self.to_insert_a.len()
            + self.to_update_a.len()
            + self.to_insert_b.len()
            + self.to_update_b.len()
    }

    /// The insert and update sets destined for `side`.
    pub fn for_side(&self, side: Side) -> (&[Row], &[Row]) {
        match side {
            Side::SideA => (&self.to_insert_a, &self.to_update_a),
            Side::SideB => (&self.to_insert_b, &self.to_update_b),
        }
    }
}

/// Compute the actions that bring both snapshots to the same row set.
///
/// `now` is stamped as `updated_at` on every propagated update.
///
/// # Errors
///
/// Returns [`RowError`] if either snapshot contains a row without an id or
/// two rows sharing an id, or if a propagated row has no version left to
/// take. No diff is produced in that case.
pub fn compute_diff(
    side_a: &[Row],
    side_b: &[Row],
    now: DateTime<Utc>,
) -> Result<Diff, RowError> {
    let index_a = index_rows(side_a, Side::SideA)?;
    let index_b = index_rows(side_b, Side::SideB)?;

    let mut diff = Diff::default();

    for a in side_a {
        let Some(b) = index_b.get(a.id.as_str()) else {
            diff.to_insert_b.push(a.clone().with_last_updated_by(Side::SideA));
            continue;
        };

        match resolve(a, b) {
            Winner::A if a.last_updated_by != Side::SideB => {
                diff.to_update_b.push(propagate(a, b, Side::SideA, now)?);
            }
            Winner::B if b.last_updated_by != Side::SideA => {
                diff.to_update_a.push(propagate(b, a, Side::SideB, now)?);
            }
            _ => {}
        }
    }

    for b in side_b {
        if !index_a.contains_key(b.id.as_str()) {
            diff.to_insert_a.push(b.clone().with_last_updated_by(Side::SideB));
        }
    }

    Ok(diff)
}

fn index_rows(rows: &[Row], side: Side) -> Result<HashMap<&str, &Row>, RowError> {
    let mut index = HashMap::with_capacity(rows.len());
    for (i, row) in rows.iter().enumerate() {
        row.validate(side, i)?;
        if index.insert(row.id.as_str(), row).is_some() {
            return Err(RowError::DuplicateId {
                side,
                id: row.id.clone(),
            });
        }
    }
    Ok(index)
}

/// The winner's value as it will be written to the losing side.
///
/// The version moves past both copies so the receiver's version strictly increases.
fn propagate(
    winner: &Row,
    loser: &Row,
    origin: Side,
    now: DateTime<Utc>,
) -> Result<Row, RowError> {
    let version = winner
        .version
        .max(loser.version)
        .checked_add(1)
        .ok_or_else(|| RowError::VersionExhausted {
            side: origin,
            id: winner.id.clone(),
        })?;

    Ok(Row {
        version,
        last_updated_by: origin,
        ..winner.clone()
    }
    .with_updated_at(now))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 12, 26, 6, 30, 0).unwrap()
    }

    fn now() -> DateTime<Utc> {
        t0() + Duration::hours(1)
    }

    fn row(id: &str, name: &str, status: &str, side: Side) -> Row {
        Row::new(id, name, format!("{}@x.com", name.to_lowercase()), status, side)
            .with_updated_at(t0())
    }

    /// Write a diff into both snapshots the way the stores would.
    fn apply(diff: &Diff, a: &mut Vec<Row>, b: &mut Vec<Row>) {
        fn upsert(rows: &mut Vec<Row>, inserts: &[Row], updates: &[Row]) {
            rows.extend(inserts.iter().cloned());
            for update in updates {
                let slot = rows.iter_mut().find(|r| r.id == update.id).unwrap();
                *slot = update.clone();
            }
        }
        upsert(a, &diff.to_insert_a, &diff.to_update_a);
        upsert(b, &diff.to_insert_b, &diff.to_update_b);
    }

    #[test]
    fn row_missing_from_b_is_inserted_into_b() {
        let jane =
            Row::new("1", "Jane", "jane@x.com", "active", Side::SideA).with_updated_at(t0());

        let diff = compute_diff(&[jane.clone()], &[], now()).unwrap();

        assert_eq!(diff.to_insert_b, vec![jane]);
        assert!(diff.to_insert_a.is_empty());
        assert!(diff.to_update_a.is_empty());
        assert!(diff.to_update_b.is_empty());
    }

    #[test]
    fn inserted_rows_are_tagged_with_origin() {
        // Side B holds a row whose tag says it came from A; copying it to A is a B-origin insert
        let stray = row("5", "Ann", "active", Side::SideA);

        let diff = compute_diff(&[], &[stray], now()).unwrap();

        assert_eq!(diff.to_insert_a.len(), 1);
        assert_eq!(diff.to_insert_a[0].last_updated_by, Side::SideB);
        assert_eq!(diff.to_insert_a[0].version, 1);
    }

    #[test]
    fn identical_rows_yield_no_action() {
        let a = row("2", "Jane", "active", Side::SideA);
        let b = row("2", "Jane", "active", Side::SideB)
            .with_updated_at(t0() + Duration::milliseconds(100));

        let diff = compute_diff(&[a], &[b], now()).unwrap();

        assert!(diff.is_empty());
    }

    #[test]
    fn winning_side_is_propagated_with_bumped_version() {
        let a = row("3", "Jane", "inactive", Side::SideA)
            .with_updated_at(t0() + Duration::minutes(10));
        let b = row("3", "Jane", "active", Side::SideB).with_version(4);

        let diff = compute_diff(&[a], &[b], now()).unwrap();

        assert_eq!(diff.to_update_b.len(), 1);
        let update = &diff.to_update_b[0];
        assert_eq!(update.status, "inactive");
        assert_eq!(update.version, 5);
        assert_eq!(update.updated_at, now());
        assert_eq!(update.last_updated_by, Side::SideA);
        assert!(diff.to_update_a.is_empty());
    }

    #[test]
    fn side_b_wins_are_written_to_a() {
        let a = row("3", "Jane", "active", Side::SideA).with_version(2);
        let b = row("3", "Jane", "archived", Side::SideB)
            .with_updated_at(t0() + Duration::minutes(1));

        let diff = compute_diff(&[a], &[b], now()).unwrap();

        assert_eq!(diff.to_update_a.len(), 1);
        assert_eq!(diff.to_update_a[0].status, "archived");
        assert_eq!(diff.to_update_a[0].version, 3);
        assert_eq!(diff.to_update_a[0].last_updated_by, Side::SideB);
    }

    #[test]
    fn data_repair_selects_complete_side() {
        let a = Row::new("4", "Jane", "", "active", Side::SideA)
            .with_updated_at(t0() + Duration::hours(2));
        let b =
            Row::new("4", "Jane", "jane@x.com", "active", Side::SideB).with_updated_at(t0());

        let diff = compute_diff(&[a], &[b], now()).unwrap();

        assert_eq!(diff.to_update_a.len(), 1);
        assert_eq!(diff.to_update_a[0].email, "jane@x.com");
        assert!(diff.to_update_b.is_empty());
    }

    #[test]
    fn winner_last_received_from_loser_is_not_sent_back() {
        // A wins on data quality, but A's value was itself received from B
        let a = Row::new("6", "Jane", "jane@x.com", "active", Side::SideB);
        let b = Row::new("6", "", "", "active", Side::SideB);

        let diff = compute_diff(&[a], &[b], now()).unwrap();

        assert!(diff.is_empty());
    }

    #[test]
    fn receiving_version_strictly_increases() {
        let a = row("7", "Jane", "active", Side::SideA)
            .with_version(2)
            .with_updated_at(t0() + Duration::minutes(30));
        let b = row("7", "Jane", "paused", Side::SideB).with_version(9);

        let diff = compute_diff(&[a], &[b.clone()], now()).unwrap();

        assert_eq!(diff.to_update_b.len(), 1);
        assert!(diff.to_update_b[0].version > b.version);
    }

    #[test]
    fn second_diff_after_apply_is_empty() {
        let mut a = vec![
            row("1", "Jane", "active", Side::SideA),
            row("3", "Bob", "inactive", Side::SideA)
                .with_updated_at(t0() + Duration::minutes(5)),
            row("4", "Eve", "active", Side::SideA),
        ];
        let mut b = vec![
            row("2", "Ann", "active", Side::SideB),
            row("3", "Bob", "active", Side::SideB),
            row("4", "Eve", "paused", Side::SideB)
                .with_updated_at(t0() + Duration::minutes(7)),
        ];

        let first = compute_diff(&a, &b, now()).unwrap();
        assert_eq!(first.total(), 4);
        apply(&first, &mut a, &mut b);

        let second = compute_diff(&a, &b, now() + Duration::seconds(30)).unwrap();
        assert!(second.is_empty(), "unexpected actions: {second:?}");
    }

    #[test]
    fn missing_id_is_rejected_before_pairing() {
        let good = row("1", "Jane", "active", Side::SideA);
        let blank = row("", "Ghost", "active", Side::SideB);

        let err = compute_diff(&[good], &[blank], now()).unwrap_err();

        assert_eq!(
            err,
            RowError::MissingId {
                side: Side::SideB,
                index: 0
            }
        );
    }

    #[test]
    fn duplicate_id_is_rejected() {
        let first = row("1", "Jane", "active", Side::SideA);
        let second = row("1", "Janet", "active", Side::SideA);

        let err = compute_diff(&[first, second], &[], now()).unwrap_err();

        assert!(matches!(
            err,
            RowError::DuplicateId {
                side: Side::SideA,
                ..
            }
        ));
    }

    #[test]
    fn exhausted_version_is_rejected_instead_of_wrapping() {
        let a = row("8", "Jane", "inactive", Side::SideA)
            .with_version(u64::MAX)
            .with_updated_at(t0() + Duration::minutes(10));
        let b = row("8", "Jane", "active", Side::SideB);

        let err = compute_diff(&[a], &[b], now()).unwrap_err();

        assert_eq!(
            err,
            RowError::VersionExhausted {
                side: Side::SideA,
                id: "8".to_string()
            }
        );
    }

    #[test]
    fn largest_loser_version_is_also_checked() {
        let a = row("9", "Jane", "active", Side::SideA).with_version(u64::MAX);
        let b = row("9", "Jane", "archived", Side::SideB)
            .with_updated_at(t0() + Duration::minutes(1));

        let err = compute_diff(&[a], &[b], now()).unwrap_err();

        assert!(matches!(
            err,
            RowError::VersionExhausted {
                side: Side::SideB,
                ..
            }
        ));
    }

    #[test]
    fn for_side_selects_sets() {
        let diff = compute_diff(
            &[row("1", "Jane", "active", Side::SideA)],
            &[row("2", "Ann", "active", Side::SideB)],
            now(),
        )
        .unwrap();

        let (inserts, updates) = diff.for_side(Side::SideA);
        assert_eq!(inserts.len(), 1);
        assert_eq!(inserts[0].id, "2");
        assert!(updates.is_empty());
        assert_eq!(diff.for_side(Side::SideB).0[0].id, "1");
    }
}
