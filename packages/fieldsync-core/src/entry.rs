//! Wire and storage representation of a single field write.

use serde::{Deserialize, Serialize};

use crate::hlc::Timestamp;

/// A single `(dataset, row, column) -> value` write, stamped with the HLC
/// timestamp of the node that produced it.
///
/// This is both the op-log record shape and the JSON wire shape exchanged
/// during sync (§6): field names and casing are part of the external
/// contract and must not change independently on either side.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entry {
    pub dataset: String,
    pub row: String,
    pub column: String,
    pub value: serde_json::Value,
    pub timestamp: Timestamp,
}

impl Entry {
    pub fn new(
        dataset: impl Into<String>,
        row: impl Into<String>,
        column: impl Into<String>,
        value: serde_json::Value,
        timestamp: Timestamp,
    ) -> Self {
        Self {
            dataset: dataset.into(),
            row: row.into(),
            column: column.into(),
            value,
            timestamp,
        }
    }

    /// `true` if this entry's column is the tombstone convention (`"tombstone" -> 1`).
    pub fn is_tombstone(&self) -> bool {
        self.column == "tombstone" && self.value == serde_json::json!(1)
    }
}
