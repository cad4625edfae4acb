//! The actor loop itself: a bounded `tokio::sync::mpsc` channel feeds
//! [`ChainCommand`]s to a single task holding the only `&mut` to the chain
//! and mempool. Per spec §5, ordering from a single sender is preserved
//! (the channel is FIFO), validation/hashing never yields, and the only
//! suspension points are the channel receive and the store's durable
//! write.

use tokio::sync::{mpsc, oneshot};
use tracing::{info, warn};
use vulkan_core::store::Store;
use vulkan_core::transaction::TxOutput;
use vulkan_core::utxo::{OutPoint, UtxoView};
use vulkan_core::{Block, Chain, ConnectOutcome, Mempool, Transaction};
use shared::error::ErrorKind;
use shared::Hash256;

pub type SubmitResult = Result<ConnectOutcome, ErrorKind>;

/// Messages the worker accepts. Every mutating command carries a `reply`
/// channel so a caller can await its outcome without blocking the worker
/// on anything but the reply send itself.
pub enum ChainCommand {
    SubmitBlock {
        block: Block,
        now: u32,
        reply: oneshot::Sender<SubmitResult>,
    },
    SubmitTransaction {
        tx: Transaction,
        reply: oneshot::Sender<Result<(), ErrorKind>>,
    },
    QueryTip {
        reply: oneshot::Sender<Hash256>,
    },
    QueryHeight {
        reply: oneshot::Sender<u64>,
    },
    QueryUtxo {
        outpoint: OutPoint,
        reply: oneshot::Sender<Option<TxOutput>>,
    },
    Shutdown,
}

/// A cloneable front-end to a running [`ChainWorker`]. Every method sends a
/// command and awaits the worker's reply; none of them touch chain state
/// directly, so many handles may be held by many callers (network ingress,
/// RPC, the miner) without any of them needing their own locking.
#[derive(Clone)]
pub struct ChainHandle {
    tx: mpsc::Sender<ChainCommand>,
}

impl ChainHandle {
    #[must_use]
    pub fn new(tx: mpsc::Sender<ChainCommand>) -> Self {
        Self { tx }
    }

    pub async fn submit_block(&self, block: Block, now: u32) -> SubmitResult {
        let (reply, rx) = oneshot::channel();
        if self.tx.send(ChainCommand::SubmitBlock { block, now, reply }).await.is_err() {
            return Err(ErrorKind::Storage("chain worker is no longer running".into()));
        }
        rx.await.unwrap_or_else(|_| Err(ErrorKind::Storage("chain worker dropped the reply".into())))
    }

    pub async fn submit_transaction(&self, tx: Transaction) -> Result<(), ErrorKind> {
        let (reply, rx) = oneshot::channel();
        if self.tx.send(ChainCommand::SubmitTransaction { tx, reply }).await.is_err() {
            return Err(ErrorKind::Storage("chain worker is no longer running".into()));
        }
        rx.await.unwrap_or_else(|_| Err(ErrorKind::Storage("chain worker dropped the reply".into())))
    }

    pub async fn tip(&self) -> Option<Hash256> {
        let (reply, rx) = oneshot::channel();
        self.tx.send(ChainCommand::QueryTip { reply }).await.ok()?;
        rx.await.ok()
    }

    pub async fn height(&self) -> Option<u64> {
        let (reply, rx) = oneshot::channel();
        self.tx.send(ChainCommand::QueryHeight { reply }).await.ok()?;
        rx.await.ok()
    }

    pub async fn query_utxo(&self, outpoint: OutPoint) -> Option<TxOutput> {
        let (reply, rx) = oneshot::channel();
        self.tx.send(ChainCommand::QueryUtxo { outpoint, reply }).await.ok()?;
        rx.await.ok().flatten()
    }

    /// Requests an orderly shutdown. The worker drains whatever is already
    /// queued ahead of this message, then exits.
    pub async fn shutdown(&self) {
        let _ = self.tx.send(ChainCommand::Shutdown).await;
    }
}

/// Owns the only mutable references to the chain and mempool. Runs until
/// the channel closes or a [`ChainCommand::Shutdown`] is received.
pub struct ChainWorker<S: Store> {
    chain: Chain<S>,
    mempool: Mempool,
}

impl<S: Store> ChainWorker<S> {
    #[must_use]
    pub fn new(chain: Chain<S>, mempool: Mempool) -> Self {
        Self { chain, mempool }
    }

    #[must_use]
    pub fn chain(&self) -> &Chain<S> {
        &self.chain
    }

    #[must_use]
    pub fn mempool(&self) -> &Mempool {
        &self.mempool
    }

    pub async fn run(mut self, mut rx: mpsc::Receiver<ChainCommand>) {
        while let Some(command) = rx.recv().await {
            match command {
                ChainCommand::SubmitBlock { block, now, reply } => {
                    let outcome = self.handle_submit_block(block, now);
                    let _ = reply.send(outcome);
                }
                ChainCommand::SubmitTransaction { tx, reply } => {
                    let outcome = self
                        .mempool
                        .admit(tx, self.chain.utxo(), self.chain.height());
                    let _ = reply.send(outcome);
                }
                ChainCommand::QueryTip { reply } => {
                    let _ = reply.send(self.chain.tip());
                }
                ChainCommand::QueryHeight { reply } => {
                    let _ = reply.send(self.chain.height());
                }
                ChainCommand::QueryUtxo { outpoint, reply } => {
                    let output = self.chain.utxo().get(&outpoint).map(|entry| entry.output.clone());
                    let _ = reply.send(output);
                }
                ChainCommand::Shutdown => {
                    info!("chain worker received shutdown, draining remaining commands");
                    rx.close();
                    while let Ok(command) = rx.try_recv() {
                        self.reject_during_shutdown(command);
                    }
                    break;
                }
            }
        }
        info!("chain worker exiting");
    }

    fn reject_during_shutdown(&self, command: ChainCommand) {
        let err = || ErrorKind::Storage("chain worker is shutting down".into());
        match command {
            ChainCommand::SubmitBlock { reply, .. } => {
                let _ = reply.send(Err(err()));
            }
            ChainCommand::SubmitTransaction { reply, .. } => {
                let _ = reply.send(Err(err()));
            }
            ChainCommand::QueryTip { reply } => {
                let _ = reply.send(self.chain.tip());
            }
            ChainCommand::QueryHeight { reply } => {
                let _ = reply.send(self.chain.height());
            }
            ChainCommand::QueryUtxo { reply, .. } => {
                let _ = reply.send(None);
            }
            ChainCommand::Shutdown => {}
        }
    }

    /// Submits `block`, then reconciles the mempool against whatever the
    /// chain manager decided: confirmed transactions and newly-conflicting
    /// ones drop out on an extend, a reorg's disconnected blocks' spends
    /// re-enter on a best-effort basis per §4.8.
    fn handle_submit_block(&mut self, block: Block, now: u32) -> SubmitResult {
        let outcome = self.chain.submit_block(block, now)?;
        match &outcome {
            ConnectOutcome::Extended { .. } => {
                let hash = self.chain.tip();
                if let Some(block) = self.chain.get_block(&hash) {
                    let (txids, spent) = block_mempool_keys(block);
                    self.mempool.on_block_connected(&txids, &spent);
                }
            }
            ConnectOutcome::Reorganized { disconnected, connected, .. } => {
                for hash in connected {
                    if let Some(block) = self.chain.get_block(hash) {
                        let (txids, spent) = block_mempool_keys(block);
                        self.mempool.on_block_connected(&txids, &spent);
                    }
                }
                for hash in disconnected {
                    let Some(block) = self.chain.get_block(hash).cloned() else {
                        warn!(%hash, "disconnected block missing from index, cannot re-admit its transactions");
                        continue;
                    };
                    self.mempool
                        .on_block_disconnected(block.transactions, self.chain.utxo(), self.chain.height());
                }
            }
            ConnectOutcome::AltFork { .. } => {}
        }
        Ok(outcome)
    }
}

fn block_mempool_keys(block: &Block) -> (Vec<Hash256>, Vec<OutPoint>) {
    let txids = block.transactions.iter().map(|tx| tx.id).collect();
    let spent = block.transactions[1..]
        .iter()
        .flat_map(|tx| tx.inputs.iter().map(|input| OutPoint::new(input.prev_tx_hash, input.prev_txout_index)))
        .collect();
    (txids, spent)
}
