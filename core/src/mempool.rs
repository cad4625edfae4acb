//! The mempool: transactions observed but not yet confirmed, admitted
//! against the confirmed UTXO set and evicted by fee rate under capacity
//! pressure. Reacts to blocks connecting and disconnecting rather than
//! owning any chain state itself.

use crate::transaction::Transaction;
use crate::utxo::{OutPoint, UtxoView};
use shared::error::ErrorKind;
use shared::Hash256;
use std::collections::HashMap;

/// Default cap on the pool's total serialized size, in bytes, before the
/// lowest fee-rate entries start getting evicted to make room for new
/// admissions.
pub const MEMPOOL_MAX_BYTES: usize = 64 * 1024 * 1024;

struct PooledTx {
    tx: Transaction,
    fee: u64,
    size: usize,
}

impl PooledTx {
    fn fee_rate(&self) -> f64 {
        self.fee as f64 / self.size.max(1) as f64
    }
}

/// The set of transactions waiting to be mined, plus the index from
/// claimed outpoints back to the claiming transaction so a second spend of
/// the same output is rejected instead of silently admitted.
pub struct Mempool {
    by_id: HashMap<Hash256, PooledTx>,
    claimed_outpoints: HashMap<OutPoint, Hash256>,
    max_bytes: usize,
    total_bytes: usize,
}

impl Mempool {
    #[must_use]
    pub fn new(max_bytes: usize) -> Self {
        Self {
            by_id: HashMap::new(),
            claimed_outpoints: HashMap::new(),
            max_bytes,
            total_bytes: 0,
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.by_id.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.by_id.is_empty()
    }

    /// Total serialized size, in bytes, of every transaction currently pooled.
    #[must_use]
    pub fn total_bytes(&self) -> usize {
        self.total_bytes
    }

    #[must_use]
    pub fn contains(&self, txid: &Hash256) -> bool {
        self.by_id.contains_key(txid)
    }

    #[must_use]
    pub fn get(&self, txid: &Hash256) -> Option<&Transaction> {
        self.by_id.get(txid).map(|pooled| &pooled.tx)
    }

    /// Validates `tx` against `utxo` (the confirmed chain tip's UTXO set)
    /// and the mempool's own claimed-outpoint index, then admits it. Evicts
    /// the lowest fee-rate entries if this admission would push the pool's
    /// total serialized size past `max_bytes`, but never evicts to make room
    /// for a transaction whose own fee rate would be the new lowest.
    pub fn admit(
        &mut self,
        tx: Transaction,
        utxo: &impl UtxoView,
        current_height: u64,
    ) -> Result<(), ErrorKind> {
        if self.by_id.contains_key(&tx.id) {
            return Err(ErrorKind::DuplicateTransaction);
        }
        tx.validate_basic()?;
        if tx.is_coinbase() {
            return Err(ErrorKind::invalid_transaction("coinbase cannot enter the mempool"));
        }
        tx.validate_signatures()?;

        let mut input_total = 0u64;
        for input in &tx.inputs {
            let outpoint = OutPoint::new(input.prev_tx_hash, input.prev_txout_index);
            if self.claimed_outpoints.contains_key(&outpoint) {
                return Err(ErrorKind::context("outpoint already claimed by the mempool"));
            }
            let entry = utxo
                .get(&outpoint)
                .ok_or_else(|| ErrorKind::context("input references an unknown or spent output"))?;
            if !entry.is_mature(current_height) {
                return Err(ErrorKind::context("input is an immature coinbase output"));
            }
            if shared::Address::from_public_key(&input.public_key, entry.output.address.version())
                != entry.output.address
            {
                return Err(ErrorKind::invalid_transaction(
                    "input's public key does not match the referenced output's address",
                ));
            }
            input_total = input_total
                .checked_add(entry.output.amount)
                .ok_or_else(|| ErrorKind::context("input total overflows u64"))?;
        }

        let output_total = tx
            .total_output_value()
            .ok_or_else(|| ErrorKind::context("output total overflows u64"))?;
        if input_total < output_total {
            return Err(ErrorKind::context("outputs exceed inputs"));
        }
        let fee = input_total - output_total;
        let size = tx.encoded_size();

        if self.total_bytes.saturating_add(size) > self.max_bytes {
            self.evict_lowest_fee_rate(fee, size);
        }
        if self.total_bytes.saturating_add(size) > self.max_bytes {
            return Err(ErrorKind::context(
                "mempool is full and this transaction's fee rate does not beat the lowest pooled entry",
            ));
        }

        for input in &tx.inputs {
            self.claimed_outpoints
                .insert(OutPoint::new(input.prev_tx_hash, input.prev_txout_index), tx.id);
        }
        self.total_bytes += size;
        self.by_id.insert(tx.id, PooledTx { tx, fee, size });
        Ok(())
    }

    /// Evicts the lowest fee-rate entries, cheapest first, until there is
    /// room for `incoming_size` bytes at `incoming_fee`, stopping as soon as
    /// the cheapest remaining entry's fee rate is no worse than the
    /// incoming transaction's (admission is then rejected instead, rather
    /// than evicting a transaction to make room for a worse one).
    fn evict_lowest_fee_rate(&mut self, incoming_fee: u64, incoming_size: usize) {
        let incoming_rate = incoming_fee as f64 / incoming_size.max(1) as f64;
        while self.total_bytes.saturating_add(incoming_size) > self.max_bytes {
            let Some((&lowest_id, _)) = self
                .by_id
                .iter()
                .min_by(|(_, a), (_, b)| a.fee_rate().partial_cmp(&b.fee_rate()).unwrap())
            else {
                return;
            };
            if self.by_id[&lowest_id].fee_rate() >= incoming_rate {
                return;
            }
            self.remove(&lowest_id);
        }
    }

    fn remove(&mut self, txid: &Hash256) -> Option<Transaction> {
        let pooled = self.by_id.remove(txid)?;
        for input in &pooled.tx.inputs {
            self.claimed_outpoints
                .remove(&OutPoint::new(input.prev_tx_hash, input.prev_txout_index));
        }
        self.total_bytes -= pooled.size;
        Some(pooled.tx)
    }

    /// Removes every transaction `block` just confirmed, and separately
    /// drops any remaining pooled transaction that now conflicts with the
    /// block's spends (it lost a race to be mined).
    pub fn on_block_connected(&mut self, block_txids: &[Hash256], spent_outpoints: &[OutPoint]) {
        for txid in block_txids {
            self.remove(txid);
        }
        let conflicting: Vec<Hash256> = spent_outpoints
            .iter()
            .filter_map(|outpoint| self.claimed_outpoints.get(outpoint).copied())
            .collect();
        for txid in conflicting {
            self.remove(&txid);
        }
    }

    /// Re-admits a disconnected block's non-coinbase transactions, best
    /// effort: a transaction that no longer validates against `utxo` (for
    /// example because one of its inputs was since spent by a sibling
    /// branch) is simply dropped rather than erroring the whole batch.
    pub fn on_block_disconnected(
        &mut self,
        transactions: Vec<Transaction>,
        utxo: &impl UtxoView,
        current_height: u64,
    ) {
        for tx in transactions {
            if tx.is_coinbase() {
                continue;
            }
            let _ = self.admit(tx, utxo, current_height);
        }
    }
}

impl Default for Mempool {
    fn default() -> Self {
        Self::new(MEMPOOL_MAX_BYTES)
    }
}
