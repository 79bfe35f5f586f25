//! The Op-Log Store: an append-only log of [`Entry`] writes, indexed for two
//! query shapes the apply engine and sync protocol need: "the latest entry
//! for this field" and "every entry since this timestamp".

use dashmap::DashMap;

use crate::entry::Entry;
use crate::error::SyncError;
use crate::hlc::Timestamp;

/// Storage backend for the append-only op-log. `fieldsync-core` only
/// depends on this trait; concrete backends live in the host crate.
pub trait OpLogStore {
    /// Appends `entry` to the log. Appending is the only mutation this
    /// store supports — the log is never truncated or rewritten (§1
    /// Non-goals: no op-log deletion).
    fn append(&self, entry: Entry) -> Result<(), SyncError>;

    /// Returns the most recently appended entry for `(dataset, row,
    /// column)`, if any.
    fn latest(&self, dataset: &str, row: &str, column: &str) -> Result<Option<Entry>, SyncError>;

    /// Returns every entry with `timestamp >= since`, in append order. Used
    /// by the sync protocol to fetch the entries a peer is missing once a
    /// divergent minute bucket has been located.
    fn since(&self, since: &Timestamp) -> Result<Vec<Entry>, SyncError>;

    /// Returns every entry ever appended, in append order. Used to build a
    /// [`crate::merkle::MerkleIndex`] from scratch.
    fn all(&self) -> Result<Vec<Entry>, SyncError>;
}

/// Reference in-memory implementation: an append-only vector protected by
/// the log's own insertion order, plus a concurrent hash map tracking the
/// latest entry per field for O(1) `latest()` lookups.
#[derive(Debug, Default)]
pub struct InMemoryOpLogStore {
    log: parking_lot::Mutex<Vec<Entry>>,
    latest_index: DashMap<(String, String, String), usize>,
}

impl InMemoryOpLogStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl OpLogStore for InMemoryOpLogStore {
    fn append(&self, entry: Entry) -> Result<(), SyncError> {
        let key = (entry.dataset.clone(), entry.row.clone(), entry.column.clone());
        let mut log = self.log.lock();
        let index = log.len();
        log.push(entry);
        self.latest_index.insert(key, index);
        Ok(())
    }

    fn latest(&self, dataset: &str, row: &str, column: &str) -> Result<Option<Entry>, SyncError> {
        let key = (dataset.to_string(), row.to_string(), column.to_string());
        let log = self.log.lock();
        Ok(self.latest_index.get(&key).map(|idx| log[*idx].clone()))
    }

    fn since(&self, since: &Timestamp) -> Result<Vec<Entry>, SyncError> {
        let log = self.log.lock();
        Ok(log.iter().filter(|e| &e.timestamp >= since).cloned().collect())
    }

    fn all(&self) -> Result<Vec<Entry>, SyncError> {
        Ok(self.log.lock().clone())
    }
}
