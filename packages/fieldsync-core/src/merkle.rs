//! Persistent base-3 Merkle trie used as a divergence-time oracle.
//!
//! Each node accumulates the XOR of its children's hashes (leaves accumulate
//! the XOR of the [`crate::hlc::hash_timestamp`] values assigned to them).
//! Nodes are immutable and reference-counted: inserting a new entry rebuilds
//! only the path from the root to the affected leaf, and every untouched
//! subtree is shared by `Arc::clone` with the previous version of the index.
//!
//! Keys are "minutes since the Unix epoch", rendered as base-3 digits,
//! most-significant digit first, to a fixed depth of [`PATH_DEPTH`]
//! (`3^16` minutes, roughly 81 years of 1-minute buckets — a minute past
//! that range is out of the index's domain and [`time_to_path`] rejects it).

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::SyncError;

/// Number of base-3 digits in a full path: `3^16` distinct minute buckets.
pub const PATH_DEPTH: usize = 16;

/// A node in the persistent trie. Leaves (at `PATH_DEPTH`) have no children;
/// their `hash` is the XOR of every timestamp hash inserted at that minute.
/// Interior nodes have `hash` equal to the XOR of their present children's
/// hashes.
#[derive(Debug, Clone, Default)]
pub struct MerkleNode {
    pub hash: u32,
    pub children: [Option<Arc<MerkleNode>>; 3],
}

impl MerkleNode {
    fn child_hash(&self, digit: u8) -> u32 {
        self.children[digit as usize].as_deref().map_or(0, |c| c.hash)
    }
}

/// Wire representation of a [`MerkleNode`], per §6: a recursive JSON object
/// `{ "hash": i32, "0"?: Merkle, "1"?: Merkle, "2"?: Merkle }`. `hash` is
/// transmitted as a signed 32-bit integer (the external wire's declared type)
/// even though the in-memory accumulator treats it as an unsigned XOR value
/// — the two are bit-identical, only the sign interpretation differs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MerkleWire {
    pub hash: i32,
    #[serde(rename = "0", skip_serializing_if = "Option::is_none", default)]
    pub child0: Option<Box<MerkleWire>>,
    #[serde(rename = "1", skip_serializing_if = "Option::is_none", default)]
    pub child1: Option<Box<MerkleWire>>,
    #[serde(rename = "2", skip_serializing_if = "Option::is_none", default)]
    pub child2: Option<Box<MerkleWire>>,
}

impl MerkleNode {
    fn to_wire(&self) -> MerkleWire {
        MerkleWire {
            hash: self.hash as i32,
            child0: self.children[0].as_deref().map(|n| Box::new(n.to_wire())),
            child1: self.children[1].as_deref().map(|n| Box::new(n.to_wire())),
            child2: self.children[2].as_deref().map(|n| Box::new(n.to_wire())),
        }
    }

    fn from_wire(wire: &MerkleWire) -> MerkleNode {
        MerkleNode {
            hash: wire.hash as u32,
            children: [
                wire.child0.as_deref().map(|w| Arc::new(MerkleNode::from_wire(w))),
                wire.child1.as_deref().map(|w| Arc::new(MerkleNode::from_wire(w))),
                wire.child2.as_deref().map(|w| Arc::new(MerkleNode::from_wire(w))),
            ],
        }
    }
}

/// A versioned, persistent Merkle index. Cloning an index is `O(1)`
/// (`Arc::clone` of the root); `insert` returns a new index leaving `self`
/// untouched.
#[derive(Debug, Clone, Default)]
pub struct MerkleIndex {
    root: Arc<MerkleNode>,
}

/// Converts minutes-since-epoch into a fixed-length base-3 path,
/// most-significant digit first.
///
/// Zero maps to all-zero digits (`[0; PATH_DEPTH]`), not an empty path —
/// every valid minute value has a full-depth path.
///
/// # Errors
///
/// Returns [`SyncError::MaxTimeError`] if `minutes` does not fit in
/// [`PATH_DEPTH`] base-3 digits (`minutes >= 3^PATH_DEPTH`); such a value
/// would otherwise silently lose its high-order digits in the loop below.
pub fn time_to_path(minutes: u64) -> Result<[u8; PATH_DEPTH], SyncError> {
    if minutes >= 3u64.pow(PATH_DEPTH as u32) {
        return Err(SyncError::MaxTimeError(minutes));
    }
    let mut digits = [0u8; PATH_DEPTH];
    let mut m = minutes;
    for i in (0..PATH_DEPTH).rev() {
        digits[i] = (m % 3) as u8;
        m /= 3;
    }
    Ok(digits)
}

/// Reconstructs minutes-since-epoch from a base-3 path.
///
/// # Errors
///
/// Returns [`SyncError::MerklePathTooShort`] if `path` has fewer than
/// [`PATH_DEPTH`] digits, and [`SyncError::InvalidDigit`] if any digit is
/// outside `0..=2`.
pub fn path_to_time(path: &[u8]) -> Result<u64, SyncError> {
    if path.len() < PATH_DEPTH {
        return Err(SyncError::MerklePathTooShort { got: path.len(), min: PATH_DEPTH });
    }
    let mut minutes: u64 = 0;
    for &digit in &path[..PATH_DEPTH] {
        if digit > 2 {
            return Err(SyncError::InvalidDigit(digit));
        }
        minutes = minutes * 3 + u64::from(digit);
    }
    Ok(minutes)
}

impl MerkleIndex {
    /// An empty index: root hash `0`, no children.
    pub fn new() -> Self {
        Self::default()
    }

    /// The accumulated hash at the root. Two indexes with the same root hash
    /// are very likely (not certain — XOR accumulation is not a
    /// cryptographic authenticator) to contain the same entries.
    pub fn root_hash(&self) -> u32 {
        self.root.hash
    }

    /// Renders this index as the recursive `{hash, "0", "1", "2"}` wire
    /// shape exchanged with a peer during sync (§6).
    pub fn to_wire(&self) -> MerkleWire {
        self.root.to_wire()
    }

    /// Rebuilds a [`MerkleIndex`] from a wire tree received from a peer.
    pub fn from_wire(wire: &MerkleWire) -> MerkleIndex {
        MerkleIndex { root: Arc::new(MerkleNode::from_wire(wire)) }
    }

    /// Returns a new index with `leaf_hash` XORed into the bucket for
    /// `minutes`, sharing every untouched subtree with `self`.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::MaxTimeError`] if `minutes` is outside the
    /// index's representable range; see [`time_to_path`].
    pub fn insert(&self, minutes: u64, leaf_hash: u32) -> Result<MerkleIndex, SyncError> {
        let path = time_to_path(minutes)?;
        Ok(MerkleIndex {
            root: Arc::new(Self::insert_at(Some(&self.root), &path, leaf_hash)),
        })
    }

    fn insert_at(node: Option<&Arc<MerkleNode>>, path: &[u8], leaf_hash: u32) -> MerkleNode {
        let base_hash = node.map_or(0, |n| n.hash);

        if path.is_empty() {
            return MerkleNode { hash: base_hash ^ leaf_hash, children: Default::default() };
        }

        let digit = path[0] as usize;
        let mut children = node.map(|n| n.children.clone()).unwrap_or_default();
        let new_child = Self::insert_at(children[digit].as_ref(), &path[1..], leaf_hash);
        children[digit] = Some(Arc::new(new_child));

        let hash = children
            .iter()
            .map(|c| c.as_deref().map_or(0, |n| n.hash))
            .fold(0u32, |acc, h| acc ^ h);

        MerkleNode { hash, children }
    }

    /// Finds the earliest point at which `a` and `b` disagree, in
    /// milliseconds since the Unix epoch (the start of the divergent minute
    /// bucket — `minute * 60_000`, per §4.3's `diff` operation).
    ///
    /// Returns `None` if the roots agree (including the false-negative case
    /// where an XOR collision at an interior node happens to mask a real
    /// divergence below it — the index is a divergence *oracle*, not an
    /// authenticator, and this is accepted as a known limitation).
    pub fn diff(a: &MerkleIndex, b: &MerkleIndex) -> Option<u64> {
        if a.root.hash == b.root.hash {
            return None;
        }
        let path = Self::diff_at(&a.root, &b.root, PATH_DEPTH)?;
        path_to_time(&path).ok().map(|minutes| minutes * 60_000)
    }

    fn diff_at(a: &MerkleNode, b: &MerkleNode, depth_remaining: usize) -> Option<Vec<u8>> {
        if a.hash == b.hash {
            return None;
        }
        if depth_remaining == 0 {
            return Some(Vec::new());
        }
        for digit in 0u8..3 {
            let ah = a.child_hash(digit);
            let bh = b.child_hash(digit);
            if ah != bh {
                let empty = MerkleNode::default();
                let a_child = a.children[digit as usize].as_deref().unwrap_or(&empty);
                let b_child = b.children[digit as usize].as_deref().unwrap_or(&empty);
                let mut rest = Self::diff_at(a_child, b_child, depth_remaining - 1)?;
                rest.insert(0, digit);
                return Some(rest);
            }
        }
        // Root hashes differed but no child disagreed: an XOR collision.
        None
    }

    /// Returns a new index with every node limited to at most `n` children,
    /// keeping the first `n` in sorted (ascending digit) order and dropping
    /// the rest — applied at every level, not just the root. Node hashes are
    /// untouched, so `root_hash` and a well-behaved `diff` against another
    /// full index are unaffected; only divergence *below* a dropped child is
    /// no longer resolvable, since that subtree is no longer transmitted.
    /// Bounds the number of nodes on the wire to a branching factor the
    /// caller picks instead of `3`.
    pub fn prune(&self, n: usize) -> MerkleIndex {
        MerkleIndex { root: Arc::new(Self::prune_at(&self.root, n)) }
    }

    fn prune_at(node: &MerkleNode, n: usize) -> MerkleNode {
        let mut children: [Option<Arc<MerkleNode>>; 3] = Default::default();
        for (digit, child) in node.children.iter().enumerate() {
            if digit >= n {
                break;
            }
            if let Some(child) = child {
                children[digit] = Some(Arc::new(Self::prune_at(child, n)));
            }
        }
        MerkleNode { hash: node.hash, children }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_index_has_zero_root_hash() {
        assert_eq!(MerkleIndex::new().root_hash(), 0);
    }

    #[test]
    fn time_to_path_zero_is_all_zero_digits() {
        assert_eq!(time_to_path(0).unwrap(), [0u8; PATH_DEPTH]);
    }

    #[test]
    fn time_to_path_roundtrips_through_path_to_time() {
        for minutes in [0u64, 1, 2, 3, 42, 9999, 3u64.pow(16) - 1] {
            let path = time_to_path(minutes).unwrap();
            assert_eq!(path_to_time(&path).unwrap(), minutes);
        }
    }

    #[test]
    fn time_to_path_rejects_minute_at_the_boundary() {
        let err = time_to_path(3u64.pow(PATH_DEPTH as u32)).unwrap_err();
        assert!(matches!(err, SyncError::MaxTimeError(m) if m == 3u64.pow(PATH_DEPTH as u32)));
    }

    #[test]
    fn path_to_time_rejects_short_path() {
        let err = path_to_time(&[0, 1, 2]).unwrap_err();
        assert!(matches!(err, SyncError::MerklePathTooShort { .. }));
    }

    #[test]
    fn path_to_time_rejects_invalid_digit() {
        let mut path = [0u8; PATH_DEPTH];
        path[0] = 3;
        let err = path_to_time(&path).unwrap_err();
        assert!(matches!(err, SyncError::InvalidDigit(3)));
    }

    #[test]
    fn insert_is_persistent() {
        let v0 = MerkleIndex::new();
        let v1 = v0.insert(5, 0xdead_beef).unwrap();
        assert_eq!(v0.root_hash(), 0);
        assert_ne!(v1.root_hash(), 0);
    }

    #[test]
    fn insert_rejects_minute_past_the_representable_range() {
        let err = MerkleIndex::new().insert(3u64.pow(PATH_DEPTH as u32), 1).unwrap_err();
        assert!(matches!(err, SyncError::MaxTimeError(_)));
    }

    #[test]
    fn insert_same_minute_twice_xors_hashes() {
        let idx = MerkleIndex::new().insert(5, 0b1010).unwrap().insert(5, 0b0110).unwrap();
        assert_eq!(idx.root_hash(), 0b1100);
    }

    #[test]
    fn diff_of_identical_indexes_is_none() {
        let a = MerkleIndex::new().insert(10, 123).unwrap().insert(20, 456).unwrap();
        let b = MerkleIndex::new().insert(20, 456).unwrap().insert(10, 123).unwrap();
        assert_eq!(MerkleIndex::diff(&a, &b), None);
    }

    #[test]
    fn diff_finds_a_divergent_minute() {
        let base = MerkleIndex::new().insert(10, 123).unwrap();
        let a = base.insert(20, 456).unwrap();
        let b = base.insert(30, 789).unwrap();
        let reported = MerkleIndex::diff(&a, &b).unwrap();
        assert!(reported == 20 * 60_000 || reported == 30 * 60_000);
    }

    #[test]
    fn diff_reports_smaller_minute_when_only_one_differs() {
        let base = MerkleIndex::new().insert(10, 123).unwrap();
        let a = base.insert(999, 1).unwrap();
        let b = base.clone();
        assert_eq!(MerkleIndex::diff(&a, &b), Some(999 * 60_000));
    }

    #[test]
    fn diff_reports_start_of_minute_in_milliseconds() {
        // Inserting a Timestamp at physical_ms = 2_000_000 lands in minute 33
        // (floor(2_000_000 / 60_000) == 33); diff against an empty tree
        // reports the start of that minute, 33 * 60_000 = 1_980_000.
        let a = MerkleIndex::new().insert(2_000_000 / 60_000, 0xabc).unwrap();
        let empty = MerkleIndex::new();
        assert_eq!(MerkleIndex::diff(&a, &empty), Some(33 * 60_000));
    }

    #[test]
    fn prune_to_zero_children_collapses_to_root_hash_only() {
        let idx = MerkleIndex::new().insert(10, 123).unwrap().insert(20, 456).unwrap();
        let pruned = idx.prune(0);
        assert_eq!(pruned.root_hash(), idx.root_hash());
        assert!(pruned.root.children.iter().all(Option::is_none));
    }

    #[test]
    fn prune_drops_children_past_n_at_every_level() {
        // digit 2 (minute 2, path starts with digit 0 since 2 < 3^15) can
        // collide across test values, so pick minutes whose top-level digit
        // spans all three branches.
        let one_minute = 3u64.pow(PATH_DEPTH as u32 - 1); // top digit 1
        let two_minute = 2 * one_minute; // top digit 2
        let idx = MerkleIndex::new().insert(0, 1).unwrap().insert(one_minute, 2).unwrap().insert(two_minute, 4).unwrap();

        let pruned = idx.prune(2);
        assert!(pruned.root.children[0].is_some());
        assert!(pruned.root.children[1].is_some());
        assert!(pruned.root.children[2].is_none());
    }

    #[test]
    fn prune_preserves_root_hash() {
        let idx = MerkleIndex::new().insert(10, 123).unwrap().insert(20, 456).unwrap().insert(30, 789).unwrap();
        for n in 0..=3 {
            assert_eq!(idx.prune(n).root_hash(), idx.root_hash());
        }
    }

    #[test]
    fn structural_sharing_does_not_mutate_previous_version() {
        let v1 = MerkleIndex::new().insert(1, 1).unwrap();
        let h1 = v1.root_hash();
        let _v2 = v1.insert(2, 2).unwrap();
        assert_eq!(v1.root_hash(), h1);
    }

    #[test]
    fn wire_roundtrip_preserves_root_hash_and_diff() {
        let idx = MerkleIndex::new().insert(10, 123).unwrap().insert(20, 456).unwrap().insert(3u64.pow(15), 789).unwrap();
        let wire = idx.to_wire();
        let json = serde_json::to_string(&wire).unwrap();
        let back_wire: MerkleWire = serde_json::from_str(&json).unwrap();
        let back = MerkleIndex::from_wire(&back_wire);

        assert_eq!(back.root_hash(), idx.root_hash());
        assert_eq!(MerkleIndex::diff(&idx, &back), None);
    }

    #[test]
    fn wire_format_uses_digit_keys() {
        let idx = MerkleIndex::new().insert(0, 42).unwrap();
        let json = serde_json::to_value(idx.to_wire()).unwrap();
        assert!(json.get("0").is_some());
        assert!(json.get("hash").is_some());
    }

    #[test]
    fn empty_index_wire_has_no_children() {
        let wire = MerkleIndex::new().to_wire();
        assert!(wire.child0.is_none() && wire.child1.is_none() && wire.child2.is_none());
        assert_eq!(wire.hash, 0);
    }
}
