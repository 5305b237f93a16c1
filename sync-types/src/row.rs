//! The row model exchanged between the two stores.
//!
//! A [`Row`] is the unit of synchronization. Rows are paired across stores
//! by `id`; the remaining fields are the syncable payload plus the metadata
//! the resolver needs (`version`, `updated_at`, `last_updated_by`).

use chrono::{DateTime, SubsecRound, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::RowError;

/// One of the two independently mutable stores being reconciled.
///
/// Side A is the spreadsheet-backed store, Side B the relational store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Side {
    /// Spreadsheet-backed store.
    #[serde(alias = "sheet")]
    SideA,
    /// Relational store.
    #[serde(alias = "db")]
    SideB,
}

impl Side {
    /// The opposite side.
    pub fn other(self) -> Self {
        match self {
            Side::SideA => Side::SideB,
            Side::SideB => Side::SideA,
        }
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Side::SideA => f.write_str("side A"),
            Side::SideB => f.write_str("side B"),
        }
    }
}

/// Current UTC time truncated to millisecond precision.
pub fn now_millis() -> DateTime<Utc> {
    Utc::now().trunc_subsecs(3)
}

/// A single synchronized row.
///
/// Wire form:
/// `{id, name, email, status, version, updated_at: ISO-8601, last_updated_by: "sideA"|"sideB"}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Row {
    /// Identity key, unique within each store and never changed after creation.
    pub id: String,
    /// Free-form payload field.
    pub name: String,
    /// Free-form payload field.
    pub email: String,
    /// Free-form payload field.
    pub status: String,
    /// Bumped by the engine whenever the row is propagated to the other side.
    pub version: u64,
    /// Time of the last mutation, millisecond precision.
    #[serde(with = "iso_millis")]
    pub updated_at: DateTime<Utc>,
    /// Which side produced the value currently held. Used for loop prevention only.
    pub last_updated_by: Side,
}

impl Row {
    /// Create a row at version 1, stamped now and attributed to `origin`.
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        email: impl Into<String>,
        status: impl Into<String>,
        origin: Side,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            email: email.into(),
            status: status.into(),
            version: 1,
            updated_at: now_millis(),
            last_updated_by: origin,
        }
    }

    /// Set the version.
    pub fn with_version(mut self, version: u64) -> Self {
        self.version = version;
        self
    }

    /// Set the mutation timestamp (truncated to milliseconds).
    pub fn with_updated_at(mut self, updated_at: DateTime<Utc>) -> Self {
        self.updated_at = updated_at.trunc_subsecs(3);
        self
    }

    /// Set the loop-prevention tag.
    pub fn with_last_updated_by(mut self, side: Side) -> Self {
        self.last_updated_by = side;
        self
    }

    /// Check the row is well formed when read from `side` at position `index`.
    ///
    /// # Errors
    ///
    /// Returns [`RowError::MissingId`] when the id is empty after trimming.
    pub fn validate(&self, side: Side, index: usize) -> Result<(), RowError> {
        if self.id.trim().is_empty() {
            return Err(RowError::MissingId { side, index });
        }
        Ok(())
    }
}

/// ISO-8601 timestamps with exactly three fractional digits and a `Z` suffix.
mod iso_millis {
    use chrono::{DateTime, SecondsFormat, SubsecRound, Utc};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(ts: &DateTime<Utc>, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&ts.to_rfc3339_opts(SecondsFormat::Millis, true))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<DateTime<Utc>, D::Error> {
        let raw = String::deserialize(d)?;
        DateTime::parse_from_rfc3339(raw.trim())
            .map(|dt| dt.with_timezone(&Utc).trunc_subsecs(3))
            .map_err(serde::de::Error::custom)
    }
}
