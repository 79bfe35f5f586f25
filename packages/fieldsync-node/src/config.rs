//! CLI/env configuration, in the style of a `clap::Parser` struct with
//! `env` fallbacks (grounded on `palm-daemon`'s `Cli`): every flag is also
//! settable from the environment so the same binary runs unmodified under a
//! process supervisor or a shell script.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// Top-level CLI: shared logging flags plus a subcommand selecting server or
/// client mode.
#[derive(Parser, Debug, Clone)]
#[command(name = "fieldsync-node", version, about = "Reference fieldsync peer: rendezvous server and sync client")]
pub struct Config {
    /// `tracing` filter directive, e.g. `info`, `fieldsync_node=debug`.
    #[arg(long, env = "FIELDSYNC_LOG_LEVEL", default_value = "info", global = true)]
    pub log_level: String,

    /// Emit logs as JSON lines instead of human-readable text.
    #[arg(long, env = "FIELDSYNC_LOG_JSON", global = true)]
    pub log_json: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Run the HTTP rendezvous server: one group-keyed `Engine` per sync
    /// group, reachable over `/sync` (§6).
    Serve {
        /// Address the HTTP server binds to.
        #[arg(long, env = "FIELDSYNC_BIND_ADDR", default_value = "127.0.0.1:4848")]
        bind_addr: String,

        /// This server's own node id. Generated once and logged on first
        /// startup if not given.
        #[arg(long, env = "FIELDSYNC_NODE_ID")]
        node_id: Option<String>,
    },
    /// Sync this node's local engine against a peer, once or on a repeating
    /// interval.
    Sync {
        /// This node's id. Generated once and should be persisted by the
        /// caller (re-generating it on every run defeats duplicate-node
        /// detection and op-log continuity).
        #[arg(long, env = "FIELDSYNC_NODE_ID")]
        node_id: Option<String>,

        /// Sync group this node belongs to.
        #[arg(long, env = "FIELDSYNC_GROUP_ID", default_value = "default")]
        group_id: String,

        /// Base URL of an HTTP peer to sync against, e.g. `http://host:4848`.
        /// Mutually exclusive with `--store-dir`; exactly one transport must
        /// be given.
        #[arg(long, env = "FIELDSYNC_PEER_URL")]
        peer_url: Option<String>,

        /// Shared directory to sync against using the file-store transport.
        /// Mutually exclusive with `--peer-url`.
        #[arg(long, env = "FIELDSYNC_STORE_DIR")]
        store_dir: Option<PathBuf>,

        /// Node id of the peer on the other end of the file-store directory.
        /// Required when `--store-dir` is given.
        #[arg(long, env = "FIELDSYNC_PEER_NODE_ID")]
        peer_node_id: Option<String>,

        /// Re-run sync every N seconds instead of exiting after one round.
        #[arg(long, env = "FIELDSYNC_SYNC_INTERVAL_SECS")]
        interval_secs: Option<u64>,
    },
}
