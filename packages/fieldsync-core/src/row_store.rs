//! The Row Store: an opaque `(dataset, row_id) -> (column -> value)` map,
//! the apply target for last-write-wins merges.

use std::collections::BTreeMap;
use std::sync::Arc;

use dashmap::DashMap;

use crate::error::SyncError;

/// A single row: column name to JSON value, ordered for deterministic
/// iteration and snapshot comparisons.
pub type Row = BTreeMap<String, serde_json::Value>;

/// Storage backend for row data. `fieldsync-core` only depends on this
/// trait; concrete backends (in-memory, on-disk, a real database) live in
/// the host crate.
pub trait RowStore {
    /// Returns the value currently stored at `(dataset, row, column)`, or
    /// `None` if no value has ever been written there.
    fn get(&self, dataset: &str, row: &str, column: &str) -> Result<Option<serde_json::Value>, SyncError>;

    /// Writes `value` at `(dataset, row, column)`, overwriting any previous
    /// value. Callers are responsible for only calling this when a
    /// last-write-wins comparison has already determined this write should
    /// win.
    fn put(&self, dataset: &str, row: &str, column: &str, value: serde_json::Value) -> Result<(), SyncError>;

    /// Returns a full snapshot of one row, or `None` if the row has no
    /// fields at all.
    fn get_row(&self, dataset: &str, row: &str) -> Result<Option<Row>, SyncError>;

    /// Returns every row in `dataset` for which `predicate` returns `true`,
    /// as `(row_id, row)` pairs. Order is unspecified.
    fn list(&self, dataset: &str, predicate: &dyn Fn(&Row) -> bool) -> Result<Vec<(String, Row)>, SyncError>;
}

/// Reference in-memory implementation backed by a concurrent hash map,
/// keyed by `(dataset, row)`.
#[derive(Debug, Default)]
pub struct InMemoryRowStore {
    rows: DashMap<(String, String), Row>,
}

impl InMemoryRowStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl RowStore for InMemoryRowStore {
    fn get(&self, dataset: &str, row: &str, column: &str) -> Result<Option<serde_json::Value>, SyncError> {
        let key = (dataset.to_string(), row.to_string());
        Ok(self.rows.get(&key).and_then(|r| r.get(column).cloned()))
    }

    fn put(&self, dataset: &str, row: &str, column: &str, value: serde_json::Value) -> Result<(), SyncError> {
        let key = (dataset.to_string(), row.to_string());
        self.rows.entry(key).or_default().insert(column.to_string(), value);
        Ok(())
    }

    fn get_row(&self, dataset: &str, row: &str) -> Result<Option<Row>, SyncError> {
        let key = (dataset.to_string(), row.to_string());
        Ok(self.rows.get(&key).map(|r| r.clone()))
    }

    fn list(&self, dataset: &str, predicate: &dyn Fn(&Row) -> bool) -> Result<Vec<(String, Row)>, SyncError> {
        Ok(self
            .rows
            .iter()
            .filter(|entry| entry.key().0 == dataset && predicate(entry.value()))
            .map(|entry| (entry.key().1.clone(), entry.value().clone()))
            .collect())
    }
}

impl<T: RowStore> RowStore for Arc<T> {
    fn get(&self, dataset: &str, row: &str, column: &str) -> Result<Option<serde_json::Value>, SyncError> {
        (**self).get(dataset, row, column)
    }

    fn put(&self, dataset: &str, row: &str, column: &str, value: serde_json::Value) -> Result<(), SyncError> {
        (**self).put(dataset, row, column, value)
    }

    fn get_row(&self, dataset: &str, row: &str) -> Result<Option<Row>, SyncError> {
        (**self).get_row(dataset, row)
    }

    fn list(&self, dataset: &str, predicate: &dyn Fn(&Row) -> bool) -> Result<Vec<(String, Row)>, SyncError> {
        (**self).list(dataset, predicate)
    }
}
