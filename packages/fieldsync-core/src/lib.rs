//! fieldsync-core: a client-side, per-field last-write-wins CRDT sync
//! engine.
//!
//! Generates Hybrid Logical Clock timestamps ([`hlc`]), accumulates them
//! into a persistent base-3 Merkle trie used to locate divergence between
//! peers ([`merkle`]), and drives idempotent apply and peer exchange
//! ([`apply`], [`sync`]) against storage the host provides through the
//! [`row_store::RowStore`] and [`oplog::OpLogStore`] traits.
//!
//! This crate performs no I/O and holds no global state: every operation
//! takes an explicit [`apply::Engine`] value.

pub mod apply;
pub mod entry;
pub mod error;
pub mod hlc;
pub mod merkle;
pub mod oplog;
pub mod row_store;
pub mod sync;

pub use apply::{Applied, Engine};
pub use entry::Entry;
pub use error::SyncError;
pub use hlc::{Clock, ClockSource, SystemClock, Timestamp};
pub use merkle::{MerkleIndex, MerkleWire};
pub use oplog::{InMemoryOpLogStore, OpLogStore};
pub use row_store::{InMemoryRowStore, Row, RowStore};
pub use sync::{sync, SyncRequest, SyncResponse, Transport};
