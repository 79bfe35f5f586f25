//! Reference [`Transport`] implementations (§6): an HTTP client that talks
//! to [`crate::server`]'s `/sync` endpoint, and a file-store transport that
//! exchanges entries through a shared directory with no network at all.

use std::path::PathBuf;

use async_trait::async_trait;
use fieldsync_core::{Entry, MerkleIndex, MerkleWire, SyncError, SyncRequest, SyncResponse, Transport};
use serde::{Deserialize, Serialize};

/// Wire shape of an HTTP `/sync` request body, per §6: a request identifies
/// its group and client in addition to the core [`SyncRequest`] payload.
#[derive(Debug, Serialize)]
struct SyncEndpointRequest<'a> {
    group_id: &'a str,
    client_id: &'a str,
    messages: &'a [Entry],
    merkle: &'a MerkleWire,
}

#[derive(Debug, Deserialize)]
struct SyncEndpointResponse {
    status: String,
    reason: Option<String>,
    data: Option<SyncEndpointData>,
}

#[derive(Debug, Deserialize)]
struct SyncEndpointData {
    messages: Vec<Entry>,
    merkle: MerkleWire,
}

/// Talks to a peer's `/sync` endpoint over HTTP/JSON.
pub struct HttpTransport {
    client: reqwest::Client,
    peer_url: String,
    group_id: String,
    client_id: String,
}

impl HttpTransport {
    pub fn new(peer_url: impl Into<String>, group_id: impl Into<String>, client_id: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            peer_url: peer_url.into(),
            group_id: group_id.into(),
            client_id: client_id.into(),
        }
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn exchange(&mut self, request: SyncRequest) -> Result<SyncResponse, SyncError> {
        let wire_request = SyncEndpointRequest {
            group_id: &self.group_id,
            client_id: &self.client_id,
            messages: &request.messages,
            merkle: &request.merkle,
        };

        let url = format!("{}/sync", self.peer_url.trim_end_matches('/'));
        let response = self
            .client
            .post(&url)
            .json(&wire_request)
            .send()
            .await
            .map_err(|e| SyncError::Network(e.to_string()))?;

        if !response.status().is_success() {
            return Err(SyncError::Network(format!("unexpected HTTP status {}", response.status())));
        }

        let body: SyncEndpointResponse = response.json().await.map_err(|e| SyncError::Network(e.to_string()))?;

        if body.status != "ok" {
            return Err(SyncError::ServerError(body.reason.unwrap_or_else(|| "peer returned no reason".to_string())));
        }
        let data = body.data.ok_or_else(|| SyncError::ServerError("peer reported ok with no data".to_string()))?;

        Ok(SyncResponse { messages: data.messages, merkle: data.merkle })
    }
}

/// Exchanges entries with exactly one peer through a shared directory,
/// following §6's file-store convention:
///
/// - one file per entry, named
///   `<iso8601-millis> <counter-hex4> clientId:<node_id>.oplogmsg.json`
/// - one Merkle snapshot per client, named `<node_id>.oplogmerkle.json`
///
/// The single space between the three filename components is load-bearing:
/// it's what lets a directory listing be prefix- or suffix-filtered by
/// client id or by ISO timestamp without parsing every file.
pub struct FileStoreTransport {
    dir: PathBuf,
    local_node_id: String,
    peer_node_id: String,
}

impl FileStoreTransport {
    pub fn new(dir: PathBuf, local_node_id: impl Into<String>, peer_node_id: impl Into<String>) -> Self {
        Self { dir, local_node_id: local_node_id.into(), peer_node_id: peer_node_id.into() }
    }

    fn message_filename(entry: &Entry) -> String {
        let ts = &entry.timestamp;
        format!("{} {:04X} clientId:{}.oplogmsg.json", ts.iso8601_millis(), ts.counter, ts.node_id)
    }

    fn merkle_filename(node_id: &str) -> String {
        format!("{node_id}.oplogmerkle.json")
    }

    fn io_err(e: impl std::fmt::Display) -> SyncError {
        SyncError::Network(e.to_string())
    }
}

#[async_trait]
impl Transport for FileStoreTransport {
    async fn exchange(&mut self, request: SyncRequest) -> Result<SyncResponse, SyncError> {
        tokio::fs::create_dir_all(&self.dir).await.map_err(Self::io_err)?;

        for entry in &request.messages {
            let path = self.dir.join(Self::message_filename(entry));
            let body = serde_json::to_vec(entry).map_err(Self::io_err)?;
            tokio::fs::write(path, body).await.map_err(Self::io_err)?;
        }

        let local_merkle_path = self.dir.join(Self::merkle_filename(&self.local_node_id));
        let merkle_body = serde_json::to_vec(&request.merkle).map_err(Self::io_err)?;
        tokio::fs::write(local_merkle_path, merkle_body).await.map_err(Self::io_err)?;

        let peer_merkle_path = self.dir.join(Self::merkle_filename(&self.peer_node_id));
        let peer_merkle: MerkleWire = match tokio::fs::read(&peer_merkle_path).await {
            Ok(bytes) => serde_json::from_slice(&bytes).map_err(Self::io_err)?,
            Err(_) => MerkleIndex::new().to_wire(),
        };

        let local_index = MerkleIndex::from_wire(&request.merkle);
        let peer_index = MerkleIndex::from_wire(&peer_merkle);
        let since_ms = MerkleIndex::diff(&local_index, &peer_index);

        let suffix = format!("clientId:{}.oplogmsg.json", self.peer_node_id);
        let mut messages = Vec::new();
        let mut read_dir = tokio::fs::read_dir(&self.dir).await.map_err(Self::io_err)?;
        while let Some(dir_entry) = read_dir.next_entry().await.map_err(Self::io_err)? {
            let name = dir_entry.file_name();
            let name = name.to_string_lossy();
            if !name.ends_with(&suffix) {
                continue;
            }
            let bytes = tokio::fs::read(dir_entry.path()).await.map_err(Self::io_err)?;
            let entry: Entry = serde_json::from_slice(&bytes).map_err(Self::io_err)?;
            let keep = match since_ms {
                Some(since) => entry.timestamp.physical_ms >= since,
                None => true,
            };
            if keep {
                messages.push(entry);
            }
        }

        Ok(SyncResponse { messages, merkle: peer_merkle })
    }
}
