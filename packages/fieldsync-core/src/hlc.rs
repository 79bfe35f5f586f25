//! Hybrid Logical Clock (HLC) for distributed causality tracking.
//!
//! Provides monotonically increasing timestamps that combine physical wall-clock
//! time with a logical counter, ensuring total ordering of events across nodes.
//! The HLC is the foundation for LWW (Last-Write-Wins) conflict resolution and
//! for keying entries into the Merkle index.
//!
//! # Wire format
//!
//! Timestamps serialize to a canonical ISO-8601 string with millisecond
//! precision and a literal `Z` suffix, followed by a dash and the 16-character
//! hex counter/node suffix: `"2024-01-15T10:30:00.000Z-0001-abc123def4567890"`.
//! This matches the divergent-clock-safe encoding used by the non-Rust
//! implementations this system interoperates with.

use std::cmp::Ordering;
use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

use chrono::{SecondsFormat, TimeZone, Utc};
use serde::{Deserialize, Serialize};

use crate::error::SyncError;

/// Default bound on acceptable clock drift between local and remote peers.
pub const MAX_DRIFT_MS: u64 = 60_000;

/// A hybrid logical timestamp combining physical time, logical counter, and node identity.
///
/// Ordering is defined as: `physical_ms` first, then `counter`, then `node_id`
/// (byte order). This total order is what makes last-write-wins well-defined
/// even when two nodes stamp an update in the same physical millisecond.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Timestamp {
    /// Physical wall-clock milliseconds since Unix epoch. Fits in 48 bits.
    pub physical_ms: u64,
    /// Logical counter for events within the same millisecond. Fits in 16 bits.
    pub counter: u16,
    /// Unique identifier of the node that generated this timestamp: 16 hex chars.
    pub node_id: String,
}

/// Serializes/deserializes as the canonical string form (§6), not as a
/// struct of its fields — the wire format is `"timestamp": "<string>"`, and
/// every non-Rust implementation this system interoperates with only knows
/// the string encoding.
impl Serialize for Timestamp {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_canonical_string())
    }
}

impl<'de> Deserialize<'de> for Timestamp {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Timestamp::parse(&s).map_err(serde::de::Error::custom)
    }
}

impl Ord for Timestamp {
    fn cmp(&self, other: &Self) -> Ordering {
        self.physical_ms
            .cmp(&other.physical_ms)
            .then_with(|| self.counter.cmp(&other.counter))
            .then_with(|| self.node_id.cmp(&other.node_id))
    }
}

impl PartialOrd for Timestamp {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_canonical_string())
    }
}

impl Timestamp {
    /// Renders the canonical wire string: ISO-8601 millis with a literal `Z`,
    /// followed by a dash, the 4-hex-digit counter, and the 16-hex node id.
    pub fn to_canonical_string(&self) -> String {
        let millis = i64::try_from(self.physical_ms).unwrap_or(i64::MAX);
        let dt = Utc
            .timestamp_millis_opt(millis)
            .single()
            .unwrap_or_else(|| Utc.timestamp_millis_opt(0).single().unwrap());
        format!(
            "{}-{:04X}-{}",
            dt.to_rfc3339_opts(SecondsFormat::Millis, true),
            self.counter,
            self.node_id
        )
    }

    /// Renders just the ISO-8601 millisecond prefix (no counter/node suffix),
    /// the piece of [`Timestamp::to_canonical_string`] that the file-store
    /// transport's filename convention (§6) sorts and prefix-filters on.
    pub fn iso8601_millis(&self) -> String {
        let millis = i64::try_from(self.physical_ms).unwrap_or(i64::MAX);
        let dt = Utc
            .timestamp_millis_opt(millis)
            .single()
            .unwrap_or_else(|| Utc.timestamp_millis_opt(0).single().unwrap());
        dt.to_rfc3339_opts(SecondsFormat::Millis, true)
    }

    /// Parses a timestamp from its canonical wire string.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::Format`] if the string is not of the
    /// form `<rfc3339-millis>Z-<4 hex digits>-<16 hex node id>`.
    pub fn parse(s: &str) -> Result<Timestamp, SyncError> {
        let bad = || SyncError::Format(s.to_string());

        // rsplitn from the right: node_id, then counter, leaving the RFC3339 prefix.
        let mut rsplit = s.rsplitn(3, '-');
        let node_id = rsplit.next().ok_or_else(bad)?;
        let counter_hex = rsplit.next().ok_or_else(bad)?;
        let rfc3339 = rsplit.next().ok_or_else(bad)?;

        if node_id.len() != 16 || !node_id.bytes().all(|b| b.is_ascii_hexdigit()) {
            return Err(bad());
        }
        if counter_hex.len() != 4 || !counter_hex.bytes().all(|b| b.is_ascii_hexdigit()) {
            return Err(bad());
        }
        let counter = u16::from_str_radix(counter_hex, 16).map_err(|_| bad())?;

        let dt = chrono::DateTime::parse_from_rfc3339(rfc3339).map_err(|_| bad())?;
        let physical_ms = u64::try_from(dt.timestamp_millis()).map_err(|_| bad())?;

        Ok(Timestamp {
            physical_ms,
            counter,
            node_id: node_id.to_string(),
        })
    }

    /// Generates a fresh 16-character hex node id from a random v4 UUID.
    pub fn generate_node_id() -> String {
        let raw = uuid::Uuid::new_v4().simple().to_string();
        raw[..16].to_string()
    }
}

/// Abstraction over the system clock for dependency injection.
///
/// Allows deterministic testing by replacing the real clock with a virtual one.
/// The default implementation ([`SystemClock`]) delegates to `std::time::SystemTime`.
pub trait ClockSource: Send + Sync {
    /// Returns the current time as milliseconds since Unix epoch.
    fn now_ms(&self) -> u64;
}

/// Default clock source that reads the real system time.
#[derive(Debug, Clone, Default)]
pub struct SystemClock;

impl ClockSource for SystemClock {
    fn now_ms(&self) -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("system clock is before Unix epoch")
            .as_millis() as u64
    }
}

/// Hybrid Logical Clock implementation.
///
/// Generates monotonically increasing [`Timestamp`]s by combining wall-clock time
/// with a logical counter. When the system clock advances, the counter resets to 0.
/// When the system clock is unchanged or behind, the counter increments.
///
/// # Drift detection
///
/// [`Clock::recv`] rejects a remote timestamp whose physical component exceeds
/// the local system time by more than `max_drift_ms`, returning
/// [`SyncError::ClockDrift`]. `send` can fail the same way if the clock's
/// own stored state has drifted ahead of the wall clock.
pub struct Clock {
    last_physical_ms: u64,
    last_counter: u16,
    node_id: String,
    max_drift_ms: u64,
    clock_source: Box<dyn ClockSource>,
}

impl Clock {
    /// Creates a new clock with the given node id and clock source, using the
    /// default 60-second max drift.
    pub fn new(node_id: String, clock_source: Box<dyn ClockSource>) -> Self {
        Self::with_max_drift(node_id, clock_source, MAX_DRIFT_MS)
    }

    /// Creates a new clock with an explicit max drift bound.
    pub fn with_max_drift(node_id: String, clock_source: Box<dyn ClockSource>, max_drift_ms: u64) -> Self {
        Self {
            last_physical_ms: 0,
            last_counter: 0,
            node_id,
            max_drift_ms,
            clock_source,
        }
    }

    /// Returns the node id of this clock.
    pub fn node_id(&self) -> &str {
        &self.node_id
    }

    /// Returns the maximum allowed clock drift in milliseconds.
    pub fn max_drift_ms(&self) -> u64 {
        self.max_drift_ms
    }

    /// Generates a new unique, monotonic timestamp for a local event.
    ///
    /// Always greater than any previously generated or received timestamp.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::ClockDrift`] if the clock's stored physical time
    /// is ahead of the wall clock by more than `max_drift_ms` (can happen
    /// after a large `recv` fast-forward followed by a wall-clock stall),
    /// and [`SyncError::Overflow`] if the logical counter would exceed 16
    /// bits.
    pub fn send(&mut self) -> Result<Timestamp, SyncError> {
        let now = self.clock_source.now_ms();
        let p = self.last_physical_ms.max(now);

        if p.saturating_sub(now) > self.max_drift_ms {
            let drift_ms = p - now;
            tracing::warn!(node_id = %self.node_id, drift_ms, max_drift_ms = self.max_drift_ms, "send: clock drifted ahead of wall clock");
            return Err(SyncError::ClockDrift { drift_ms, max_drift_ms: self.max_drift_ms });
        }

        let counter = if p == self.last_physical_ms {
            self.last_counter.checked_add(1).ok_or(SyncError::Overflow)?
        } else {
            0
        };

        self.last_physical_ms = p;
        self.last_counter = counter;

        Ok(Timestamp {
            physical_ms: self.last_physical_ms,
            counter: self.last_counter,
            node_id: self.node_id.clone(),
        })
    }

    /// Merges a received remote timestamp into the local clock state.
    ///
    /// Must be called whenever an [`Entry`](crate::entry::Entry) is received
    /// from another node, before or instead of trusting its timestamp for
    /// local LWW comparisons. Advances the local clock so that any subsequent
    /// `send()` is causally after the remote event.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::DuplicateNode`] if `remote.node_id` equals this
    /// clock's own node id, [`SyncError::ClockDrift`] if `remote.physical_ms`
    /// exceeds the local wall clock by more than `max_drift_ms`, and
    /// [`SyncError::Overflow`] if the merged logical counter would exceed 16
    /// bits.
    pub fn recv(&mut self, remote: &Timestamp) -> Result<Timestamp, SyncError> {
        if remote.node_id == self.node_id {
            return Err(SyncError::DuplicateNode(remote.node_id.clone()));
        }

        let now = self.clock_source.now_ms();

        if remote.physical_ms > now {
            let drift = remote.physical_ms - now;
            if drift > self.max_drift_ms {
                tracing::warn!(
                    node_id = %self.node_id,
                    remote_node_id = %remote.node_id,
                    drift_ms = drift,
                    max_drift_ms = self.max_drift_ms,
                    "recv: remote timestamp exceeds max clock drift"
                );
                return Err(SyncError::ClockDrift { drift_ms: drift, max_drift_ms: self.max_drift_ms });
            }
        }

        let p = self.last_physical_ms.max(now).max(remote.physical_ms);

        let counter = if p == self.last_physical_ms && p == remote.physical_ms {
            self.last_counter.max(remote.counter).checked_add(1).ok_or(SyncError::Overflow)?
        } else if p == self.last_physical_ms {
            self.last_counter.checked_add(1).ok_or(SyncError::Overflow)?
        } else if p == remote.physical_ms {
            remote.counter.checked_add(1).ok_or(SyncError::Overflow)?
        } else {
            0
        };

        self.last_physical_ms = p;
        self.last_counter = counter;

        Ok(Timestamp {
            physical_ms: self.last_physical_ms,
            counter: self.last_counter,
            node_id: self.node_id.clone(),
        })
    }
}

/// MurmurHash3 (32-bit, seed 0) of a timestamp's canonical string encoding.
///
/// This is the leaf hash fed into the Merkle index; it must be byte-exact
/// with non-Rust implementations of this same scheme, which is why the input
/// is the canonical *string* form rather than a packed binary encoding.
pub fn hash_timestamp(ts: &Timestamp) -> u32 {
    murmurhash32::murmurhash3(ts.to_canonical_string().as_bytes())
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
    use std::sync::Arc;

    use super::*;

    /// A deterministic clock source for testing. Time is controlled explicitly.
    struct FixedClock {
        time: Arc<AtomicU64>,
    }

    impl FixedClock {
        fn new(initial: u64) -> (Self, Arc<AtomicU64>) {
            let time = Arc::new(AtomicU64::new(initial));
            (Self { time: time.clone() }, time)
        }
    }

    impl ClockSource for FixedClock {
        fn now_ms(&self) -> u64 {
            self.time.load(AtomicOrdering::Relaxed)
        }
    }

    fn ts(physical_ms: u64, counter: u16, node_id: &str) -> Timestamp {
        Timestamp { physical_ms, counter, node_id: node_id.to_string() }
    }

    #[test]
    fn ordering_millis_first() {
        assert!(ts(100, 5, "zzzzzzzzzzzzzzzz") < ts(200, 0, "aaaaaaaaaaaaaaaa"));
    }

    #[test]
    fn ordering_counter_second() {
        assert!(ts(100, 1, "zzzzzzzzzzzzzzzz") < ts(100, 2, "aaaaaaaaaaaaaaaa"));
    }

    #[test]
    fn ordering_node_id_third() {
        assert!(ts(100, 1, "aaaaaaaaaaaaaaaa") < ts(100, 1, "bbbbbbbbbbbbbbbb"));
    }

    #[test]
    fn canonical_string_roundtrip() {
        let original = ts(1_700_000_000_123, 0x002a, "0123456789abcdef");
        let encoded = original.to_canonical_string();
        let decoded = Timestamp::parse(&encoded).expect("parse");
        assert_eq!(original, decoded);
    }

    #[test]
    fn canonical_string_has_millis_and_z_suffix() {
        let t = ts(1_700_000_000_000, 0, "0123456789abcdef");
        let s = t.to_canonical_string();
        assert!(s.starts_with("2023-11-14T22:13:20.000Z-"));
    }

    #[test]
    fn parse_rejects_garbage() {
        assert!(Timestamp::parse("not-a-timestamp").is_err());
        assert!(Timestamp::parse("").is_err());
    }

    #[test]
    fn parse_rejects_short_node_id() {
        let good = ts(100, 0, "0123456789abcdef").to_canonical_string();
        let truncated = &good[..good.len() - 1];
        assert!(Timestamp::parse(truncated).is_err());
    }

    #[test]
    fn generated_node_id_is_16_hex_chars() {
        let id = Timestamp::generate_node_id();
        assert_eq!(id.len(), 16);
        assert!(id.bytes().all(|b| b.is_ascii_hexdigit()));
    }

    #[test]
    fn hash_is_deterministic() {
        let t = ts(1_700_000_000_000, 1, "0123456789abcdef");
        assert_eq!(hash_timestamp(&t), hash_timestamp(&t));
    }

    #[test]
    fn hash_differs_for_different_timestamps() {
        let a = ts(1_700_000_000_000, 1, "0123456789abcdef");
        let b = ts(1_700_000_000_001, 1, "0123456789abcdef");
        assert_ne!(hash_timestamp(&a), hash_timestamp(&b));
    }

    // ---- Clock::send() monotonicity ----

    #[test]
    fn send_returns_monotonically_increasing_timestamps() {
        let (clock, _) = FixedClock::new(1_000_000);
        let mut hlc = Clock::new("0123456789abcdef".to_string(), Box::new(clock));

        let ts1 = hlc.send().unwrap();
        let ts2 = hlc.send().unwrap();
        let ts3 = hlc.send().unwrap();

        assert!(ts1 < ts2);
        assert!(ts2 < ts3);
    }

    #[test]
    fn send_increments_counter_when_clock_unchanged() {
        let (clock, _) = FixedClock::new(1_000_000);
        let mut hlc = Clock::new("0123456789abcdef".to_string(), Box::new(clock));

        let ts1 = hlc.send().unwrap();
        let ts2 = hlc.send().unwrap();

        assert_eq!(ts1.physical_ms, 1_000_000);
        assert_eq!(ts2.physical_ms, 1_000_000);
        assert_eq!(ts1.counter, 0);
        assert_eq!(ts2.counter, 1);
    }

    #[test]
    fn send_resets_counter_when_clock_advances() {
        let (clock, time) = FixedClock::new(1_000_000);
        let mut hlc = Clock::new("0123456789abcdef".to_string(), Box::new(clock));

        hlc.send().unwrap();
        time.store(1_000_001, AtomicOrdering::Relaxed);
        let ts2 = hlc.send().unwrap();

        assert_eq!(ts2.physical_ms, 1_000_001);
        assert_eq!(ts2.counter, 0);
    }

    // ---- Clock::recv() ----

    #[test]
    fn recv_remote_ahead_fast_forwards() {
        let (clock, _) = FixedClock::new(1_000_000);
        let mut hlc = Clock::new("0123456789abcdef".to_string(), Box::new(clock));

        let remote = ts(1_000_100, 5, "ffffffffffffffff");
        let merged = hlc.recv(&remote).unwrap();

        assert_eq!(merged.physical_ms, 1_000_100);
        assert_eq!(merged.counter, 6);
    }

    #[test]
    fn recv_same_millis_takes_max_counter() {
        let (clock, _) = FixedClock::new(1_000_000);
        let mut hlc = Clock::new("0123456789abcdef".to_string(), Box::new(clock));

        hlc.send().unwrap(); // counter 0
        let remote = ts(1_000_000, 5, "ffffffffffffffff");
        let merged = hlc.recv(&remote).unwrap();

        assert_eq!(merged.physical_ms, 1_000_000);
        assert_eq!(merged.counter, 6);
    }

    #[test]
    fn recv_local_ahead_keeps_local_physical() {
        let (clock, _) = FixedClock::new(1_000_100);
        let mut hlc = Clock::new("0123456789abcdef".to_string(), Box::new(clock));

        hlc.send().unwrap();
        let remote = ts(1_000_000, 10, "ffffffffffffffff");
        let merged = hlc.recv(&remote).unwrap();

        assert_eq!(merged.physical_ms, 1_000_100);
    }

    #[test]
    fn recv_rejects_drift_beyond_threshold() {
        let (clock, _) = FixedClock::new(1_000_000);
        let mut hlc = Clock::with_max_drift("0123456789abcdef".to_string(), Box::new(clock), 5_000);

        let remote = ts(1_010_000, 0, "ffffffffffffffff"); // 10s ahead
        let err = hlc.recv(&remote).unwrap_err();
        match err {
            SyncError::ClockDrift { drift_ms, max_drift_ms } => {
                assert_eq!(drift_ms, 10_000);
                assert_eq!(max_drift_ms, 5_000);
            }
            other => panic!("expected ClockDrift, got {other:?}"),
        }
    }

    #[test]
    fn recv_accepts_drift_within_threshold() {
        let (clock, _) = FixedClock::new(1_000_000);
        let mut hlc = Clock::with_max_drift("0123456789abcdef".to_string(), Box::new(clock), 10_000);

        let remote = ts(1_005_000, 0, "ffffffffffffffff");
        assert!(hlc.recv(&remote).is_ok());
    }

    #[test]
    fn recv_negative_drift_not_rejected() {
        let (clock, _) = FixedClock::new(1_000_000);
        let mut hlc = Clock::with_max_drift("0123456789abcdef".to_string(), Box::new(clock), 5_000);

        let remote = ts(900_000, 0, "ffffffffffffffff"); // behind, not ahead
        assert!(hlc.recv(&remote).is_ok());
    }

    #[test]
    fn default_max_drift_is_60s() {
        let (clock, _) = FixedClock::new(1_000_000);
        let hlc = Clock::new("0123456789abcdef".to_string(), Box::new(clock));
        assert_eq!(hlc.max_drift_ms(), MAX_DRIFT_MS);
    }

    #[test]
    fn total_ordering_across_concurrent_nodes() {
        let (c1, _) = FixedClock::new(1_000_000);
        let (c2, _) = FixedClock::new(1_000_000);

        let mut hlc1 = Clock::new("aaaaaaaaaaaaaaaa".to_string(), Box::new(c1));
        let mut hlc2 = Clock::new("bbbbbbbbbbbbbbbb".to_string(), Box::new(c2));

        let ts1 = hlc1.send().unwrap();
        let ts2 = hlc2.send().unwrap();

        assert_eq!(ts1.physical_ms, ts2.physical_ms);
        assert_eq!(ts1.counter, ts2.counter);

        let mut sorted = vec![ts1.clone(), ts2.clone()];
        sorted.sort();
        assert_eq!(sorted[0].node_id, "aaaaaaaaaaaaaaaa");
        assert_eq!(sorted[1].node_id, "bbbbbbbbbbbbbbbb");
    }

    #[test]
    fn clock_sync_between_nodes_keeps_recv_after_sent() {
        let (c1, _) = FixedClock::new(1_000_000);
        let (c2, _) = FixedClock::new(1_000_000);

        let mut hlc1 = Clock::new("aaaaaaaaaaaaaaaa".to_string(), Box::new(c1));
        let mut hlc2 = Clock::new("bbbbbbbbbbbbbbbb".to_string(), Box::new(c2));

        hlc1.send().unwrap();
        hlc1.send().unwrap();
        let sent = hlc1.send().unwrap();

        let received = hlc2.recv(&sent).unwrap();
        assert!(sent < received);
    }
}
