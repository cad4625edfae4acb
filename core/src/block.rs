//! Blocks: a fixed-shape header (version, previous hash, timestamp, nonce,
//! `bits`, cumulative emission, Merkle root) plus the transaction list it
//! commits to.
//!
//! Difficulty is carried as `bits`, a compact target (see [`crate::pow`]),
//! rather than a leading-zero-bit count, and the timestamp is a raw `u32`
//! Unix time so the header has one canonical byte encoding. Height is not
//! decoded out of the coinbase — the chain manager tracks it directly.

use crate::codec::{Codec, Reader, Writer};
use crate::config::{BLOCK_VERSION, MAX_BLOCK_SIZE, MAX_FUTURE_BLOCK_TIME};
use crate::merkle::merkle_root;
use crate::pow::meets_target;
use crate::transaction::Transaction;
use shared::error::ErrorKind;
use shared::Hash256;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockHeader {
    pub version: u32,
    pub timestamp: u32,
    pub nonce: u32,
    pub bits: u32,
    pub cumulative_emission: u64,
    pub previous_hash: Hash256,
    pub merkle_root: Hash256,
}

impl Codec for BlockHeader {
    fn encode(&self, w: &mut Writer) {
        w.write_u32(self.version);
        w.write_u32(self.timestamp);
        w.write_u32(self.nonce);
        w.write_u32(self.bits);
        w.write_u64(self.cumulative_emission);
        w.write_hash(&self.previous_hash);
        w.write_hash(&self.merkle_root);
    }

    fn decode(r: &mut Reader) -> Result<Self, ErrorKind> {
        Ok(Self {
            version: r.read_u32()?,
            timestamp: r.read_u32()?,
            nonce: r.read_u32()?,
            bits: r.read_u32()?,
            cumulative_emission: r.read_u64()?,
            previous_hash: r.read_hash()?,
            merkle_root: r.read_hash()?,
        })
    }
}

impl BlockHeader {
    #[must_use]
    pub fn hash(&self) -> Hash256 {
        Hash256::sha256d(&self.to_bytes())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Block {
    pub header: BlockHeader,
    pub transactions: Vec<Transaction>,
}

impl Block {
    #[must_use]
    pub fn new(header: BlockHeader, transactions: Vec<Transaction>) -> Self {
        Self { header, transactions }
    }

    #[must_use]
    pub fn hash(&self) -> Hash256 {
        self.header.hash()
    }

    #[must_use]
    pub fn coinbase(&self) -> Option<&Transaction> {
        self.transactions.first()
    }

    #[must_use]
    pub fn size(&self) -> usize {
        self.to_bytes().len()
    }

    #[must_use]
    pub fn exceeds_max_size(&self) -> bool {
        self.size() > MAX_BLOCK_SIZE
    }

    /// Structural, context-free validation: version, timestamp bound, a
    /// well-formed transaction list (coinbase first and only once, all
    /// transactions individually valid, no duplicate ids), a Merkle root
    /// consistent with the transaction list, size within bounds, and the
    /// header hash meeting its own declared target. Does not check the
    /// target against the expected retarget, the coinbase amount against
    /// the emission schedule, or any UTXO-set-dependent condition — those
    /// are context-sensitive and live in the chain manager.
    pub fn validate_structure(&self, now: u32) -> Result<(), ErrorKind> {
        if self.header.version != BLOCK_VERSION {
            return Err(ErrorKind::invalid_block(format!(
                "unsupported block version {}",
                self.header.version
            )));
        }
        if self.header.timestamp > now.saturating_add(MAX_FUTURE_BLOCK_TIME as u32) {
            return Err(ErrorKind::invalid_block("timestamp too far in the future"));
        }
        if self.transactions.is_empty() {
            return Err(ErrorKind::invalid_block("block has no transactions"));
        }
        if !self.transactions[0].is_coinbase() {
            return Err(ErrorKind::invalid_block("first transaction is not coinbase"));
        }
        if self.transactions[1..].iter().any(Transaction::is_coinbase) {
            return Err(ErrorKind::invalid_block("multiple coinbase transactions"));
        }

        let mut seen_ids = std::collections::HashSet::with_capacity(self.transactions.len());
        for tx in &self.transactions {
            tx.validate_basic()?;
            tx.validate_signatures()?;
            if !seen_ids.insert(tx.id) {
                return Err(ErrorKind::invalid_block("duplicate transaction id in block"));
            }
        }

        let ids: Vec<Hash256> = self.transactions.iter().map(|tx| tx.id).collect();
        if merkle_root(&ids) != self.header.merkle_root {
            return Err(ErrorKind::invalid_block("merkle root mismatch"));
        }

        if self.exceeds_max_size() {
            return Err(ErrorKind::invalid_block("block exceeds maximum size"));
        }

        if !meets_target(&self.hash(), self.header.bits) {
            return Err(ErrorKind::invalid_block("hash does not meet declared target"));
        }

        Ok(())
    }
}

impl Codec for Block {
    fn encode(&self, w: &mut Writer) {
        self.header.encode(w);
        w.write_vec(&self.transactions, |w, tx| tx.encode(w));
    }

    fn decode(r: &mut Reader) -> Result<Self, ErrorKind> {
        let header = BlockHeader::decode(r)?;
        let transactions = r.read_vec(Transaction::decode)?;
        Ok(Self { header, transactions })
    }
}
