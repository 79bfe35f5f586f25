//! Tagged-sum error type for the sync engine.
//!
//! A single `#[derive(thiserror::Error)]` enum replaces the source system's
//! ad-hoc error strings and exception-hierarchy style: every failure the
//! engine can produce is one of these variants, and a caller matches on the
//! variant to decide whether to retry, surface to a user, or drop the peer.

use thiserror::Error;

/// Everything that can go wrong inside the sync engine.
#[derive(Debug, Error)]
pub enum SyncError {
    /// A timestamp string did not match the canonical
    /// `YYYY-MM-DDTHH:MM:SS.sssZ-CCCC-NNNNNNNNNNNNNNNN` form.
    #[error("malformed timestamp: {0}")]
    Format(String),

    /// A logical counter would have exceeded 16 bits.
    #[error("counter overflow")]
    Overflow,

    /// A remote timestamp's physical component exceeded the local clock by
    /// more than the configured drift bound (`recv`), or a local `send`
    /// disagreed with the wall clock by more than the bound.
    #[error("clock drift {drift_ms}ms exceeds max {max_drift_ms}ms")]
    ClockDrift { drift_ms: u64, max_drift_ms: u64 },

    /// `recv` observed a timestamp claiming to originate from this node's
    /// own node id.
    #[error("received timestamp claims our own node id {0}")]
    DuplicateNode(String),

    /// A Merkle path had fewer digits than required to resolve a minute.
    #[error("merkle path too short: got {got} digits, need at least {min}")]
    MerklePathTooShort { got: usize, min: usize },

    /// A base-3 digit outside `0..=2` was encountered while decoding a path.
    #[error("invalid base-3 digit: {0}")]
    InvalidDigit(u8),

    /// A minute value fell above the range representable in
    /// [`crate::merkle::PATH_DEPTH`] base-3 digits.
    #[error("minute value {0} exceeds the representable range")]
    MaxTimeError(u64),

    /// A minute value was negative (represented here as a parse failure on
    /// an out-of-range integer, since minutes are modeled as `u64`).
    #[error("minute value below the representable range")]
    MinTimeError,

    /// The op-log store could not be read or written.
    #[error("op-log store error: {0}")]
    OpLogStore(String),

    /// The row store could not be read or written.
    #[error("row store error: {0}")]
    RowStore(String),

    /// The sync protocol made no progress after the configured maximum
    /// number of rounds, or the divergence point reported by a peer exactly
    /// matched the divergence point from the prior round.
    #[error("sync stuck after {rounds} rounds with no progress")]
    SyncStuck { rounds: u32 },

    /// A peer transport call failed below the protocol layer.
    #[error("transport error: {0}")]
    Network(String),

    /// A peer responded with an explicit application-level error.
    #[error("peer reported error: {0}")]
    ServerError(String),
}
