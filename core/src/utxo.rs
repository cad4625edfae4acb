//! The UTXO set: one entry per unspent output, keyed by the outpoint that
//! created it. The outpoint is the map key itself, so there is nothing to
//! reconstruct or get wrong when looking an entry back up.

use crate::config::COINBASE_MATURITY;
use crate::transaction::TxOutput;
use shared::Hash256;
use std::collections::HashMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct OutPoint {
    pub txid: Hash256,
    pub vout: u32,
}

impl OutPoint {
    #[must_use]
    pub const fn new(txid: Hash256, vout: u32) -> Self {
        Self { txid, vout }
    }
}

/// An unspent output plus the bookkeeping needed to decide whether it is
/// spendable yet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UtxoEntry {
    pub output: TxOutput,
    pub height: u64,
    pub is_coinbase: bool,
}

impl UtxoEntry {
    /// A coinbase output needs [`COINBASE_MATURITY`] confirmations before it
    /// is spendable; every other output is spendable the block after it is
    /// created.
    #[must_use]
    pub fn is_mature(&self, current_height: u64) -> bool {
        if self.is_coinbase {
            current_height >= self.height + COINBASE_MATURITY
        } else {
            true
        }
    }
}

/// A read-only view over unspent outputs, shared by the mempool (which
/// checks proposed spends against the confirmed chain tip) and the chain
/// manager (which checks block contents against the tip it is extending).
pub trait UtxoView {
    fn get(&self, outpoint: &OutPoint) -> Option<&UtxoEntry>;

    fn contains(&self, outpoint: &OutPoint) -> bool {
        self.get(outpoint).is_some()
    }
}

/// The confirmed UTXO set, mutated only by connecting or disconnecting
/// blocks.
#[derive(Debug, Clone, Default)]
pub struct UtxoSet {
    entries: HashMap<OutPoint, UtxoEntry>,
}

impl UtxoSet {
    #[must_use]
    pub fn new() -> Self {
        Self {
            entries: HashMap::new(),
        }
    }

    pub fn insert(&mut self, outpoint: OutPoint, entry: UtxoEntry) {
        self.entries.insert(outpoint, entry);
    }

    /// Removes and returns the entry at `outpoint`, for spending it (or for
    /// producing the undo record that restores it on disconnect).
    pub fn remove(&mut self, outpoint: &OutPoint) -> Option<UtxoEntry> {
        self.entries.remove(outpoint)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&OutPoint, &UtxoEntry)> {
        self.entries.iter()
    }
}

impl UtxoView for UtxoSet {
    fn get(&self, outpoint: &OutPoint) -> Option<&UtxoEntry> {
        self.entries.get(outpoint)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared::{Address, KeyPair};

    fn sample_output(amount: u64) -> TxOutput {
        let keypair = KeyPair::generate();
        let address = Address::from_public_key(&keypair.public_key(), 0);
        TxOutput { amount, address }
    }

    #[test]
    fn insert_and_get_roundtrip() {
        let mut set = UtxoSet::new();
        let outpoint = OutPoint::new(Hash256::sha256d(b"tx"), 0);
        let entry = UtxoEntry {
            output: sample_output(500),
            height: 10,
            is_coinbase: false,
        };
        set.insert(outpoint, entry.clone());
        assert_eq!(set.get(&outpoint), Some(&entry));
        assert_eq!(set.len(), 1);
    }

    #[test]
    fn remove_deletes_the_entry() {
        let mut set = UtxoSet::new();
        let outpoint = OutPoint::new(Hash256::sha256d(b"tx"), 0);
        set.insert(
            outpoint,
            UtxoEntry {
                output: sample_output(500),
                height: 10,
                is_coinbase: false,
            },
        );
        let removed = set.remove(&outpoint);
        assert!(removed.is_some());
        assert!(!set.contains(&outpoint));
    }

    #[test]
    fn non_coinbase_outputs_are_always_mature() {
        let entry = UtxoEntry {
            output: sample_output(500),
            height: 100,
            is_coinbase: false,
        };
        assert!(entry.is_mature(100));
        assert!(entry.is_mature(100_000));
    }

    #[test]
    fn coinbase_outputs_mature_after_the_configured_depth() {
        let entry = UtxoEntry {
            output: sample_output(500),
            height: 100,
            is_coinbase: true,
        };
        assert!(!entry.is_mature(150));
        assert!(!entry.is_mature(100 + COINBASE_MATURITY - 1));
        assert!(entry.is_mature(100 + COINBASE_MATURITY));
    }

    #[test]
    fn two_outputs_of_the_same_transaction_are_distinct_entries() {
        let mut set = UtxoSet::new();
        let txid = Hash256::sha256d(b"shared tx");
        set.insert(
            OutPoint::new(txid, 0),
            UtxoEntry {
                output: sample_output(100),
                height: 1,
                is_coinbase: false,
            },
        );
        set.insert(
            OutPoint::new(txid, 1),
            UtxoEntry {
                output: sample_output(200),
                height: 1,
                is_coinbase: false,
            },
        );
        assert_eq!(set.len(), 2);
        assert_eq!(set.get(&OutPoint::new(txid, 0)).unwrap().output.amount, 100);
        assert_eq!(set.get(&OutPoint::new(txid, 1)).unwrap().output.amount, 200);
    }
}
