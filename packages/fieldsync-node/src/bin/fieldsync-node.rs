//! `fieldsync-node`: a runnable reference peer wiring `fieldsync-core`'s
//! engine to a concrete transport, storage backend, and CLI.

use std::time::Duration;

use clap::Parser;
use fieldsync_core::{Clock, Engine, InMemoryOpLogStore, InMemoryRowStore, OpLogStore, SystemClock, Timestamp};
use fieldsync_node::{build_router, AppState, Command, Config, FileStoreTransport, HttpTransport};
use tracing_subscriber::{fmt, EnvFilter};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::parse();
    init_tracing(&config.log_level, config.log_json);

    match config.command {
        Command::Serve { bind_addr, node_id } => run_server(&bind_addr, node_id).await,
        Command::Sync { node_id, group_id, peer_url, store_dir, peer_node_id, interval_secs } => {
            run_sync(node_id, group_id, peer_url, store_dir, peer_node_id, interval_secs).await
        }
    }
}

fn init_tracing(log_level: &str, log_json: bool) {
    let filter = EnvFilter::try_new(log_level).unwrap_or_else(|_| EnvFilter::new("info"));
    let subscriber = fmt().with_env_filter(filter);
    if log_json {
        subscriber.json().init();
    } else {
        subscriber.init();
    }
}

async fn run_server(bind_addr: &str, node_id: Option<String>) -> anyhow::Result<()> {
    let node_id = node_id.unwrap_or_else(Timestamp::generate_node_id);
    tracing::info!(%node_id, %bind_addr, "starting fieldsync rendezvous server");

    let state = AppState::new(node_id);
    let router = build_router(state);
    let listener = tokio::net::TcpListener::bind(bind_addr).await?;

    tracing::info!(addr = %listener.local_addr()?, "listening");
    axum::serve(listener, router).with_graceful_shutdown(shutdown_signal()).await?;
    Ok(())
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
    tracing::info!("shutdown signal received");
}

#[allow(clippy::too_many_arguments)]
async fn run_sync(
    node_id: Option<String>,
    group_id: String,
    peer_url: Option<String>,
    store_dir: Option<std::path::PathBuf>,
    peer_node_id: Option<String>,
    interval_secs: Option<u64>,
) -> anyhow::Result<()> {
    let node_id = node_id.unwrap_or_else(Timestamp::generate_node_id);
    tracing::info!(%node_id, %group_id, "starting fieldsync sync client");

    let clock = Clock::new(node_id.clone(), Box::new(SystemClock));
    let mut engine = Engine::new(clock, InMemoryRowStore::new(), InMemoryOpLogStore::new());

    loop {
        let outgoing = engine.oplog.all()?;

        let rounds = match (&peer_url, &store_dir) {
            (Some(peer_url), None) => {
                let mut transport = HttpTransport::new(peer_url.clone(), group_id.clone(), node_id.clone());
                fieldsync_core::sync(&mut engine, &mut transport, outgoing, None).await?
            }
            (None, Some(store_dir)) => {
                let peer_node_id = peer_node_id
                    .clone()
                    .ok_or_else(|| anyhow::anyhow!("--peer-node-id is required with --store-dir"))?;
                let mut transport = FileStoreTransport::new(store_dir.clone(), node_id.clone(), peer_node_id);
                fieldsync_core::sync(&mut engine, &mut transport, outgoing, None).await?
            }
            (Some(_), Some(_)) => anyhow::bail!("--peer-url and --store-dir are mutually exclusive"),
            (None, None) => anyhow::bail!("one of --peer-url or --store-dir is required"),
        };
        tracing::info!(rounds, "sync round complete");

        match interval_secs {
            Some(secs) => tokio::time::sleep(Duration::from_secs(secs)).await,
            None => break,
        }
    }

    Ok(())
}
