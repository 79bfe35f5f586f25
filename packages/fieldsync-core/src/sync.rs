//! The Sync Protocol: peer exchange driven by the Merkle index as a
//! divergence-time oracle, converging two engines' op-logs within a bounded
//! number of rounds.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::apply::Engine;
use crate::entry::Entry;
use crate::error::SyncError;
use crate::hlc::Timestamp;
use crate::merkle::{MerkleIndex, MerkleWire};
use crate::oplog::OpLogStore;
use crate::row_store::RowStore;

/// Safety valve on the sync loop: if this many rounds pass without either
/// side converging, `sync` gives up with [`SyncError::SyncStuck`] instead of
/// looping forever. §4.7 guarantees convergence for well-behaved peers; this
/// bound exists for the degenerate case where an XOR collision (see
/// [`crate::merkle::MerkleIndex::diff`]) keeps reporting a divergence that
/// never resolves.
pub const MAX_SYNC_ROUNDS: u32 = 64;

/// One round's outbound payload: entries the sender believes the peer is
/// missing, plus the sender's full Merkle index so the peer (and the sender
/// itself, once the peer's reply comes back) can locate the first point of
/// disagreement.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncRequest {
    pub messages: Vec<Entry>,
    pub merkle: MerkleWire,
}

/// A peer's reply: entries the requester is missing, plus the peer's own
/// Merkle index.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncResponse {
    pub messages: Vec<Entry>,
    pub merkle: MerkleWire,
}

/// The collaborator a node talks to its peer through. `fieldsync-core`
/// defines only the shape of the exchange; `fieldsync-node` supplies
/// concrete HTTP and file-store implementations.
///
/// `exchange` is `async`: §5 frames sync as the engine's one asynchronous
/// I/O boundary ("sync is asynchronous I/O (single event loop)"), distinct
/// from the purely synchronous, CPU-bound apply/HLC/Merkle operations.
#[async_trait]
pub trait Transport {
    /// Sends `request` to the peer and returns its response.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::Network`] for transport-level failures and
    /// [`SyncError::ServerError`] if the peer responded with an explicit
    /// application error.
    async fn exchange(&mut self, request: SyncRequest) -> Result<SyncResponse, SyncError>;
}

/// A 16-character all-zero node id, lower than every real node id in
/// lexicographic order, used as the sentinel third component of the
/// synthetic `Timestamp(since, 0, "0")` that §4.7 step 1 constructs
/// to re-filter the op-log on each recursive round.
const SINCE_SENTINEL_NODE_ID: &str = "0000000000000000";

/// Runs the sync protocol described in §4.7 against `transport`:
///
/// 1. Send `initial` (or, on a recursive round, every local entry with
///    timestamp `>= since`) along with the local Merkle index.
/// 2. `recv` every timestamp in the peer's reply before applying any entry
///    in the batch (§4.6's batch-ordering requirement), then `apply` each.
/// 3. Diff the peer's pre-apply Merkle index against the local index
///    (now updated by the applies) to find the earliest remaining
///    divergence.
/// 4. If there is none, sync is converged. If the divergence is identical
///    to the `since` that produced this round's outgoing batch, the peers
///    cannot be reconciled further and this fails with
///    [`SyncError::SyncStuck`] (§4.7 step 7) — otherwise recurse with an
///    empty `initial` and the new divergence as `since`.
///
/// Entries whose `node_id` is this engine's own are not replayed through
/// `clock.recv` (a peer's op-log legitimately contains this node's own past
/// entries once they've been synced once; re-merging our own timestamp
/// against itself would spuriously trip [`SyncError::DuplicateNode`]). They
/// are still passed through `apply`, which is idempotent.
///
/// # Errors
///
/// Propagates apply and transport errors, and returns
/// [`SyncError::SyncStuck`] if [`MAX_SYNC_ROUNDS`] pass without the
/// divergence point ever resolving to `None`.
pub async fn sync<R: RowStore, O: OpLogStore, T: Transport + Send>(
    engine: &mut Engine<R, O>,
    transport: &mut T,
    initial: Vec<Entry>,
    since: Option<u64>,
) -> Result<u32, SyncError> {
    let mut outgoing = initial;
    let mut since = since;

    for round in 0..MAX_SYNC_ROUNDS {
        let request = SyncRequest { messages: outgoing, merkle: engine.merkle_index().to_wire() };
        let response = transport.exchange(request).await?;
        let remote_index = MerkleIndex::from_wire(&response.merkle);

        let local_node_id = engine.clock.node_id().to_string();
        for entry in &response.messages {
            if entry.timestamp.node_id != local_node_id {
                engine.clock.recv(&entry.timestamp)?;
            }
        }
        for entry in response.messages {
            engine.apply(entry)?;
        }

        match MerkleIndex::diff(&remote_index, engine.merkle_index()) {
            None => {
                tracing::debug!(round = round + 1, "sync: converged");
                return Ok(round + 1);
            }
            Some(d) if since == Some(d) => {
                tracing::warn!(round = round + 1, divergent_ms = d, "sync: divergence did not resolve across a round");
                return Err(SyncError::SyncStuck { rounds: round + 1 });
            }
            Some(d) => {
                tracing::trace!(round = round + 1, divergent_ms = d, "sync: divergence found, recursing");
                since = Some(d);
                let watermark = Timestamp { physical_ms: d, counter: 0, node_id: SINCE_SENTINEL_NODE_ID.to_string() };
                outgoing = engine.oplog.since(&watermark)?;
            }
        }
    }

    Err(SyncError::SyncStuck { rounds: MAX_SYNC_ROUNDS })
}
