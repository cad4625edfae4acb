//! A thin binary wiring `vulkan-core` and `vulkan-storage` into the
//! single-writer chain worker described in spec §5. There is no P2P,
//! RPC, wallet, or miner loop here — those remain external collaborators
//! per spec §1 — so once started this process only bootstraps the store,
//! opens the chain against the compiled-in genesis, and idles until it
//! receives a shutdown signal.

use std::path::PathBuf;
use tracing_subscriber::EnvFilter;
use vulkan_core::{genesis, Chain, Mempool};
use vulkan_node::{ChainHandle, ChainWorker};
use vulkan_storage::RocksStore;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let data_dir = std::env::var("VULKAN_DATA_DIR")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("./vulkan-data"));

    tracing::info!(path = %data_dir.display(), "opening chain store");
    let store = RocksStore::open(&data_dir).expect("failed to open the chain store");
    let chain = Chain::open(store, genesis()).expect("failed to bootstrap chain state");
    let worker = ChainWorker::new(chain, Mempool::default());

    let (tx, rx) = tokio::sync::mpsc::channel(256);
    let handle = ChainHandle::new(tx);
    let worker_task = tokio::spawn(worker.run(rx));

    tracing::info!(
        tip = %handle.tip().await.expect("worker just started"),
        height = handle.height().await.expect("worker just started"),
        "chain worker ready"
    );

    tokio::signal::ctrl_c().await.expect("failed to listen for ctrl-c");
    tracing::info!("shutdown signal received");
    handle.shutdown().await;
    let _ = worker_task.await;
}
