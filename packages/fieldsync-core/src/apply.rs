//! The Apply Engine: idempotent last-write-wins apply of a single [`Entry`],
//! and the `Engine` aggregate that owns one node's clock, row store, and
//! op-log.

use crate::entry::Entry;
use crate::error::SyncError;
use crate::hlc::{hash_timestamp, Clock};
use crate::merkle::MerkleIndex;
use crate::oplog::OpLogStore;
use crate::row_store::RowStore;

/// Outcome of applying an entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Applied {
    /// The entry's timestamp is newer than anything seen for this field; the
    /// row store was updated and the entry was appended to the op-log.
    Applied,
    /// A strictly newer write already exists for this field; the row store
    /// was left untouched, but the entry was still appended to the op-log
    /// so the Merkle index reflects that it was seen.
    Ignored,
    /// An entry with this exact timestamp has already been applied
    /// (idempotent replay — same peer retrying, or the same entry arriving
    /// via two sync paths).
    Duplicate,
}

/// The explicit, non-global aggregate owning one node's clock, row store,
/// and op-log store. A host constructs exactly one `Engine` per logical
/// node and threads it (directly, or wrapped behind its own
/// synchronization) through every `apply`/`sync` call — there is no
/// crate-level mutable state.
pub struct Engine<R: RowStore, O: OpLogStore> {
    pub clock: Clock,
    pub rows: R,
    pub oplog: O,
    merkle: MerkleIndex,
}

impl<R: RowStore, O: OpLogStore> Engine<R, O> {
    /// Builds a fresh engine. If `oplog` already contains entries (e.g. a
    /// host restoring from disk), call [`Engine::rebuild_index`] afterward
    /// to repopulate the Merkle index from them.
    pub fn new(clock: Clock, rows: R, oplog: O) -> Self {
        Self { clock, rows, oplog, merkle: MerkleIndex::new() }
    }

    /// Rebuilds the Merkle index from every entry currently in the op-log.
    /// Needed after constructing an `Engine` around a non-empty op-log.
    pub fn rebuild_index(&mut self) -> Result<(), SyncError> {
        let mut index = MerkleIndex::new();
        for entry in self.oplog.all()? {
            index = index.insert(minute_bucket(entry.timestamp.physical_ms), hash_timestamp(&entry.timestamp))?;
        }
        self.merkle = index;
        Ok(())
    }

    /// The current Merkle index, used by the sync protocol as a divergence
    /// oracle against a peer's index.
    pub fn merkle_index(&self) -> &MerkleIndex {
        &self.merkle
    }

    /// Applies `entry` with last-write-wins semantics against the field it
    /// targets, per §4.6:
    ///
    /// 1. If the op-log already has an entry with this exact timestamp for
    ///    this field, return [`Applied::Duplicate`] without touching
    ///    anything.
    /// 2. Otherwise, append `entry` to the op-log and fold its timestamp
    ///    into the Merkle index unconditionally — the index must reflect
    ///    every entry ever seen, win or lose.
    /// 3. If `entry.timestamp` is strictly newer than the field's current
    ///    latest timestamp (or the field has never been written), write
    ///    `entry.value` into the row store and return [`Applied::Applied`].
    /// 4. Otherwise leave the row store untouched and return
    ///    [`Applied::Ignored`].
    pub fn apply(&mut self, entry: Entry) -> Result<Applied, SyncError> {
        let current_latest = self.oplog.latest(&entry.dataset, &entry.row, &entry.column)?;
        if let Some(existing) = &current_latest {
            if existing.timestamp == entry.timestamp {
                tracing::trace!(dataset = %entry.dataset, row = %entry.row, column = %entry.column, "apply: duplicate");
                return Ok(Applied::Duplicate);
            }
        }

        let wins = match &current_latest {
            Some(existing) => entry.timestamp > existing.timestamp,
            None => true,
        };

        self.merkle = self
            .merkle
            .insert(minute_bucket(entry.timestamp.physical_ms), hash_timestamp(&entry.timestamp))?;

        if wins {
            self.rows.put(&entry.dataset, &entry.row, &entry.column, entry.value.clone())?;
        }

        tracing::debug!(dataset = %entry.dataset, row = %entry.row, column = %entry.column, wins, "apply: entry recorded");

        self.oplog.append(entry)?;

        Ok(if wins { Applied::Applied } else { Applied::Ignored })
    }
}

/// Converts a millisecond timestamp into the minute bucket the Merkle index
/// keys on.
fn minute_bucket(physical_ms: u64) -> u64 {
    physical_ms / 60_000
}
