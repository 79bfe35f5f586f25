//! Reference HTTP rendezvous server: one [`fieldsync_core::Engine`] per sync
//! group, reachable over a `/sync` endpoint implementing §6's request/response
//! contract byte-for-byte. A sync server is just another node running the
//! same apply/merkle-diff logic the client side uses, so this module builds
//! directly on `fieldsync-core` rather than re-deriving the protocol.

use std::sync::Arc;
use std::time::Instant;

use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use fieldsync_core::{
    Applied, Clock, Engine, Entry, InMemoryOpLogStore, InMemoryRowStore, MerkleIndex, MerkleWire, OpLogStore,
    SystemClock,
};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

type GroupEngine = Engine<InMemoryRowStore, InMemoryOpLogStore>;

/// Shared server state: one engine per sync group, created lazily on first
/// contact. Concurrent requests against the same group serialize on that
/// group's mutex (§5's multi-writer requirement); requests against different
/// groups never contend.
#[derive(Clone)]
pub struct AppState {
    groups: Arc<dashmap::DashMap<String, Arc<Mutex<GroupEngine>>>>,
    server_node_id: Arc<String>,
    started_at: Instant,
}

impl AppState {
    pub fn new(server_node_id: impl Into<String>) -> Self {
        Self {
            groups: Arc::new(dashmap::DashMap::new()),
            server_node_id: Arc::new(server_node_id.into()),
            started_at: Instant::now(),
        }
    }

    fn group(&self, group_id: &str) -> Arc<Mutex<GroupEngine>> {
        self.groups
            .entry(group_id.to_string())
            .or_insert_with(|| {
                let clock = Clock::new(self.server_node_id.to_string(), Box::new(SystemClock));
                Arc::new(Mutex::new(Engine::new(clock, InMemoryRowStore::new(), InMemoryOpLogStore::new())))
            })
            .clone()
    }
}

#[derive(Debug, Deserialize)]
struct SyncEndpointRequest {
    group_id: String,
    client_id: String,
    messages: Vec<Entry>,
    merkle: MerkleWire,
}

#[derive(Debug, Serialize)]
struct SyncEndpointData {
    messages: Vec<Entry>,
    merkle: MerkleWire,
}

#[derive(Debug, Serialize)]
struct SyncEndpointResponse {
    status: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    reason: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    data: Option<SyncEndpointData>,
}

impl SyncEndpointResponse {
    fn ok(data: SyncEndpointData) -> Self {
        Self { status: "ok", reason: None, data: Some(data) }
    }

    fn error(reason: String) -> Self {
        Self { status: "error", reason: Some(reason), data: None }
    }
}

/// `POST /sync`: accepts a peer's outgoing entries and Merkle index, applies
/// every entry to this group's engine, and replies with whatever this
/// engine's op-log holds that the peer's index doesn't yet account for.
async fn sync_handler(state: State<AppState>, Json(request): Json<SyncEndpointRequest>) -> Json<SyncEndpointResponse> {
    let engine = state.group(&request.group_id);
    let mut engine = engine.lock();

    match handle_sync(&mut engine, &request.client_id, request.messages, &request.merkle) {
        Ok(data) => Json(SyncEndpointResponse::ok(data)),
        Err(err) => Json(SyncEndpointResponse::error(err.to_string())),
    }
}

fn handle_sync(
    engine: &mut GroupEngine,
    client_id: &str,
    messages: Vec<Entry>,
    remote_merkle: &MerkleWire,
) -> Result<SyncEndpointData, fieldsync_core::SyncError> {
    let local_node_id = engine.clock.node_id().to_string();
    for entry in &messages {
        if entry.timestamp.node_id != local_node_id {
            match engine.clock.recv(&entry.timestamp) {
                Ok(_) | Err(fieldsync_core::SyncError::DuplicateNode(_)) => {}
                Err(e) => return Err(e),
            }
        }
    }
    for entry in messages {
        let outcome = engine.apply(entry)?;
        if outcome == Applied::Applied {
            tracing::debug!(%client_id, "applied a newer write from peer");
        }
    }

    let remote_index = MerkleIndex::from_wire(remote_merkle);
    let messages = match MerkleIndex::diff(&remote_index, engine.merkle_index()) {
        None => Vec::new(),
        Some(divergent_ms) => {
            let watermark = fieldsync_core::Timestamp {
                physical_ms: divergent_ms,
                counter: 0,
                node_id: "0000000000000000".to_string(),
            };
            engine.oplog.since(&watermark)?
        }
    };

    Ok(SyncEndpointData { messages, merkle: engine.merkle_index().to_wire() })
}

async fn health_handler(State(state): State<AppState>) -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "ok",
        "groups": state.groups.len(),
        "uptime_secs": state.started_at.elapsed().as_secs(),
    }))
}

async fn liveness_handler() -> StatusCode {
    StatusCode::OK
}

/// Builds the axum router: `/sync` for peer exchange, `/health` and
/// `/live` for operational monitoring.
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/sync", post(sync_handler))
        .route("/health", get(health_handler))
        .route("/live", get(liveness_handler))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any))
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use fieldsync_core::Timestamp;

    fn ts(physical_ms: u64, node: &str) -> Timestamp {
        Timestamp { physical_ms, counter: 0, node_id: node.to_string() }
    }

    #[test]
    fn handle_sync_applies_entries_and_reports_none_when_converged() {
        let clock = Clock::new("0000000000000000".to_string(), Box::new(SystemClock));
        let mut engine = Engine::new(clock, InMemoryRowStore::new(), InMemoryOpLogStore::new());

        let entry = Entry::new("ds", "r1", "name", serde_json::json!("alice"), ts(1_700_000_000_000, "aaaaaaaaaaaaaaaa"));
        let data = handle_sync(&mut engine, "aaaaaaaaaaaaaaaa", vec![entry], &MerkleIndex::new().to_wire()).unwrap();

        assert_eq!(engine.rows.get("ds", "r1", "name").unwrap(), Some(serde_json::json!("alice")));
        assert_eq!(MerkleIndex::diff(&MerkleIndex::from_wire(&data.merkle), engine.merkle_index()), None);
    }

    #[test]
    fn handle_sync_reports_entries_missing_from_the_requesters_index() {
        let clock = Clock::new("0000000000000000".to_string(), Box::new(SystemClock));
        let mut engine = Engine::new(clock, InMemoryRowStore::new(), InMemoryOpLogStore::new());
        engine
            .apply(Entry::new("ds", "r1", "name", serde_json::json!("bob"), ts(1_700_000_000_000, "bbbbbbbbbbbbbbbb")))
            .unwrap();

        let data = handle_sync(&mut engine, "aaaaaaaaaaaaaaaa", Vec::new(), &MerkleIndex::new().to_wire()).unwrap();
        assert_eq!(data.messages.len(), 1);
    }

    #[tokio::test]
    async fn app_state_creates_one_engine_per_group() {
        let state = AppState::new("0000000000000000");
        let a = state.group("g1");
        let b = state.group("g1");
        let c = state.group("g2");
        assert!(Arc::ptr_eq(&a, &b));
        assert!(!Arc::ptr_eq(&a, &c));
    }
}
