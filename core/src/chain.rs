//! The chain manager: the single authority over which blocks are connected,
//! which sit on alt-forks, which are orphans, and when a heavier alt-fork
//! triggers a reorganization.
//!
//! A state machine with Extend/AltFork/Reorganize/Orphan/Reject outcomes
//! over a [`Store`]-backed index, rather than a structure that only ever
//! appends to a linear chain: the index tracks every known block, not just
//! the active one, so alt-forks and reorganizations have somewhere to live.

use crate::block::Block;
use crate::codec::Codec;
use crate::config::{block_subsidy, DIFFICULTY_PERIOD, MAX_ORPHANS, TARGET_BLOCK_TIME};
use crate::pow::{bits_to_target, retarget};
use crate::store::{prefix, Store, WriteBatch, METADATA_KEY_TIP};
use shared::Address;
use crate::transaction::Transaction;
use crate::utxo::{OutPoint, UtxoEntry, UtxoSet, UtxoView};
use shared::error::ErrorKind;
use shared::Hash256;
use std::collections::{HashMap, VecDeque};
use tracing::{debug, info, warn};

#[derive(Debug, Clone)]
struct BlockIndexEntry {
    header: crate::block::BlockHeader,
    height: u64,
    cumulative_work: f64,
}

/// What disconnecting then reconnecting blocks during a reorganization
/// needs in order to roll the UTXO set back and forward: exactly what a
/// block's connection removed and added.
#[derive(Debug, Clone)]
struct UndoRecord {
    removed: Vec<(OutPoint, UtxoEntry)>,
    added: Vec<OutPoint>,
}

/// The outcome of submitting a block, mirroring the five consensus
/// dispositions a block can land in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectOutcome {
    Extended { height: u64 },
    AltFork { height: u64 },
    Reorganized { new_height: u64, disconnected: Vec<Hash256>, connected: Vec<Hash256> },
    Orphan,
}

/// `2^256 / (target + 1)` as an `f64`. Chains in this implementation are
/// short enough (test and demonstration scale) that double precision never
/// loses the comparisons fork choice depends on; a production chain would
/// accumulate this in a 256-bit integer instead.
fn block_work(bits: u32) -> f64 {
    let target = bits_to_target(bits);
    let mut target_value = 0f64;
    for &byte in &target {
        target_value = target_value * 256.0 + byte as f64;
    }
    (2f64.powi(256)) / (target_value + 1.0)
}

pub struct Chain<S: Store> {
    store: S,
    block_index: HashMap<Hash256, BlockIndexEntry>,
    blocks: HashMap<Hash256, Block>,
    undo: HashMap<Hash256, UndoRecord>,
    height_index: Vec<Hash256>,
    utxo: UtxoSet,
    cumulative_emission: HashMap<Hash256, u64>,
    orphans: HashMap<Hash256, Block>,
    orphan_order: VecDeque<Hash256>,
    tip: Hash256,
}

impl<S: Store> Chain<S> {
    /// Opens a chain backed by `store`, bootstrapping it with `genesis` if
    /// the store is empty.
    pub fn open(store: S, genesis: Block) -> Result<Self, ErrorKind> {
        let mut chain = Self {
            store,
            block_index: HashMap::new(),
            blocks: HashMap::new(),
            undo: HashMap::new(),
            height_index: Vec::new(),
            utxo: UtxoSet::new(),
            cumulative_emission: HashMap::new(),
            orphans: HashMap::new(),
            orphan_order: VecDeque::new(),
            tip: Hash256::zero(),
        };

        if let Some(tip_bytes) = chain.store.get(METADATA_KEY_TIP)? {
            chain.load_from_store(&tip_bytes)?;
        } else {
            chain.bootstrap_genesis(genesis)?;
        }
        Ok(chain)
    }

    fn bootstrap_genesis(&mut self, genesis: Block) -> Result<(), ErrorKind> {
        let hash = genesis.hash();
        genesis.validate_structure(genesis.header.timestamp)?;
        let reward = genesis.transactions[0]
            .total_output_value()
            .ok_or_else(|| ErrorKind::invalid_block("genesis coinbase overflows u64"))?;
        if genesis.header.cumulative_emission != reward {
            return Err(ErrorKind::invalid_block(
                "genesis cumulative_emission must equal its coinbase reward",
            ));
        }

        let work = block_work(genesis.header.bits);
        self.block_index.insert(
            hash,
            BlockIndexEntry {
                header: genesis.header.clone(),
                height: 0,
                cumulative_work: work,
            },
        );
        self.cumulative_emission.insert(hash, genesis.header.cumulative_emission);

        let mut batch = WriteBatch::new();
        let undo = self.apply_utxo_changes(&genesis, 0, &mut batch)?;
        batch.put(undo_key(&hash), encode_undo_record(&undo));
        self.undo.insert(hash, undo);
        self.persist_block_header(&mut batch, hash, &genesis, 0, work);
        batch.put(height_key(0), hash.as_bytes().to_vec());
        self.blocks.insert(hash, genesis);
        self.height_index.push(hash);
        self.tip = hash;
        batch.put(METADATA_KEY_TIP.to_vec(), hash.as_bytes().to_vec());
        self.store.write_batch(batch)?;
        Ok(())
    }

    /// Rebuilds every in-memory index from a non-empty store: every known
    /// block (active chain and side branches alike), the active height
    /// index, the confirmed UTXO set, and the undo records for blocks still
    /// on the active chain. Orphans are not persisted and are simply lost on
    /// restart; a node that restarts mid-sync will just have them resent.
    fn load_from_store(&mut self, tip_bytes: &[u8]) -> Result<(), ErrorKind> {
        let tip = Hash256::try_from(tip_bytes)?;

        for (key, value) in self.store.iterate_prefix(&[prefix::BLOCK])? {
            let hash = Hash256::try_from(&key[1..])?;
            let block = Block::from_bytes(&value)?;
            self.cumulative_emission.insert(hash, block.header.cumulative_emission);
            self.blocks.insert(hash, block);
        }

        for (key, value) in self.store.iterate_prefix(&[prefix::HEADER_INDEX])? {
            let hash = Hash256::try_from(&key[1..])?;
            let (height, cumulative_work) = decode_block_index_entry(&value)?;
            let header = self
                .blocks
                .get(&hash)
                .ok_or_else(|| ErrorKind::Storage("header index entry references an unknown block".into()))?
                .header
                .clone();
            self.block_index.insert(hash, BlockIndexEntry { header, height, cumulative_work });
        }

        let mut height_pairs: Vec<(u64, Hash256)> = Vec::new();
        for (key, value) in self.store.iterate_prefix(&[prefix::HEIGHT_INDEX])? {
            let height_bytes: [u8; 8] = key[1..]
                .try_into()
                .map_err(|_| ErrorKind::Storage("malformed height index key".into()))?;
            let hash = Hash256::try_from(value.as_slice())?;
            height_pairs.push((u64::from_be_bytes(height_bytes), hash));
        }
        height_pairs.sort_by_key(|(height, _)| *height);
        self.height_index = height_pairs.into_iter().map(|(_, hash)| hash).collect();

        for (key, value) in self.store.iterate_prefix(&[prefix::UTXO])? {
            let outpoint = decode_outpoint_from_key(&key)?;
            let entry = decode_utxo_entry(&value)?;
            self.utxo.insert(outpoint, entry);
        }

        for (key, value) in self.store.iterate_prefix(&[prefix::UNDO])? {
            let hash = Hash256::try_from(&key[1..])?;
            self.undo.insert(hash, decode_undo_record(&value)?);
        }

        if self.height_index.last() != Some(&tip) {
            return Err(ErrorKind::Storage(
                "persisted tip does not match the active height index".into(),
            ));
        }
        self.tip = tip;
        Ok(())
    }

    #[must_use]
    pub fn tip(&self) -> Hash256 {
        self.tip
    }

    #[must_use]
    pub fn height(&self) -> u64 {
        self.height_index.len().saturating_sub(1) as u64
    }

    #[must_use]
    pub fn utxo(&self) -> &UtxoSet {
        &self.utxo
    }

    #[must_use]
    pub fn get_block(&self, hash: &Hash256) -> Option<&Block> {
        self.blocks.get(hash)
    }

    #[must_use]
    pub fn get_block_by_height(&self, height: u64) -> Option<&Block> {
        let hash = self.height_index.get(height as usize)?;
        self.blocks.get(hash)
    }

    /// Submits a new block for validation and connection.
    pub fn submit_block(&mut self, block: Block, now: u32) -> Result<ConnectOutcome, ErrorKind> {
        let hash = block.hash();
        if self.block_index.contains_key(&hash) {
            return Err(ErrorKind::DuplicateBlock);
        }

        block.validate_structure(now)?;

        let Some(parent) = self.block_index.get(&block.header.previous_hash).cloned() else {
            self.insert_orphan(hash, block);
            return Ok(ConnectOutcome::Orphan);
        };

        let expected_bits = self.bits_for_next_block(&parent, block.header.previous_hash)?;
        if block.header.bits != expected_bits {
            return Err(ErrorKind::context("bits does not match the expected retarget"));
        }

        let height = parent.height + 1;
        let subsidy = block_subsidy(height);
        let parent_emission = self
            .cumulative_emission
            .get(&block.header.previous_hash)
            .copied()
            .unwrap_or(0);
        let expected_emission = parent_emission
            .checked_add(subsidy)
            .ok_or_else(|| ErrorKind::invalid_block("cumulative emission overflows u64"))?;

        let outcome = if block.header.previous_hash == self.tip {
            let fees = self.validate_spends(&block, height, &self.utxo)?;
            self.check_coinbase_value(&block, subsidy, fees)?;
            if block.header.cumulative_emission != expected_emission {
                return Err(ErrorKind::invalid_block("cumulative_emission mismatch"));
            }

            self.connect_block(hash, block, height, expected_emission)?;
            info!(height, %hash, "extended active chain");
            ConnectOutcome::Extended { height }
        } else {
            if block.header.cumulative_emission != expected_emission {
                return Err(ErrorKind::invalid_block("cumulative_emission mismatch"));
            }
            let work = self.block_index[&block.header.previous_hash].cumulative_work + block_work(block.header.bits);
            let mut side_batch = WriteBatch::new();
            self.persist_block_header(&mut side_batch, hash, &block, height, work);
            self.store.write_batch(side_batch)?;

            self.block_index.insert(
                hash,
                BlockIndexEntry { header: block.header.clone(), height, cumulative_work: work },
            );
            self.cumulative_emission.insert(hash, expected_emission);
            self.blocks.insert(hash, block);

            let active_work = self.block_index[&self.tip].cumulative_work;
            if work > active_work {
                debug!(height, %hash, "alt-fork outweighs active chain, reorganizing");
                self.reorganize_to(hash, now)?
            } else {
                ConnectOutcome::AltFork { height }
            }
        };

        self.try_connect_orphans(now);
        Ok(outcome)
    }

    fn bits_for_next_block(
        &self,
        parent: &BlockIndexEntry,
        parent_hash: Hash256,
    ) -> Result<u32, ErrorKind> {
        let next_height = parent.height + 1;
        if next_height % DIFFICULTY_PERIOD != 0 {
            return Ok(parent.header.bits);
        }

        let mut cursor = parent_hash;
        for _ in 0..DIFFICULTY_PERIOD - 1 {
            let entry = self
                .block_index
                .get(&cursor)
                .ok_or_else(|| ErrorKind::context("retarget window walks past a known ancestor"))?;
            cursor = entry.header.previous_hash;
        }
        let period_start = self
            .block_index
            .get(&cursor)
            .ok_or_else(|| ErrorKind::context("retarget period start block is unknown"))?;

        let actual_span = parent
            .header
            .timestamp
            .saturating_sub(period_start.header.timestamp)
            .max(1) as u64;
        let expected_span = TARGET_BLOCK_TIME * (DIFFICULTY_PERIOD - 1);
        Ok(retarget(parent.header.bits, actual_span, expected_span))
    }

    fn check_coinbase_value(&self, block: &Block, subsidy: u64, fees: u64) -> Result<(), ErrorKind> {
        let coinbase_value = block.transactions[0]
            .total_output_value()
            .ok_or_else(|| ErrorKind::invalid_block("coinbase value overflows u64"))?;
        let expected = subsidy
            .checked_add(fees)
            .ok_or_else(|| ErrorKind::invalid_block("subsidy plus fees overflows u64"))?;
        if coinbase_value != expected {
            return Err(ErrorKind::invalid_block("coinbase value does not match subsidy + fees"));
        }
        Ok(())
    }

    /// Validates every non-coinbase transaction's inputs against `utxo`,
    /// rejecting unknown, immature, or (within the block) double-claimed
    /// outpoints, and returns the block's total fees.
    fn validate_spends(&self, block: &Block, height: u64, utxo: &impl UtxoView) -> Result<u64, ErrorKind> {
        let mut claimed = std::collections::HashSet::new();
        let mut total_fees = 0u64;

        for tx in &block.transactions[1..] {
            let mut input_total = 0u64;
            for input in &tx.inputs {
                let outpoint = OutPoint::new(input.prev_tx_hash, input.prev_txout_index);
                if !claimed.insert(outpoint) {
                    return Err(ErrorKind::invalid_block("block double-spends an outpoint"));
                }
                let entry = utxo
                    .get(&outpoint)
                    .ok_or_else(|| ErrorKind::context("input references an unknown or spent output"))?;
                if !entry.is_mature(height) {
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
                return Err(ErrorKind::context("transaction spends more than its inputs provide"));
            }
            total_fees = total_fees
                .checked_add(input_total - output_total)
                .ok_or_else(|| ErrorKind::context("fee total overflows u64"))?;
        }
        Ok(total_fees)
    }

    /// Applies `block`'s spends and new outputs to `self.utxo`, recording an
    /// undo record, and queues the corresponding store writes into `batch`.
    fn apply_utxo_changes(
        &mut self,
        block: &Block,
        height: u64,
        batch: &mut WriteBatch,
    ) -> Result<UndoRecord, ErrorKind> {
        let mut removed = Vec::new();
        let mut added = Vec::new();

        for tx in &block.transactions {
            if !tx.is_coinbase() {
                for input in &tx.inputs {
                    let outpoint = OutPoint::new(input.prev_tx_hash, input.prev_txout_index);
                    let entry = self
                        .utxo
                        .remove(&outpoint)
                        .ok_or_else(|| ErrorKind::context("spend of an unknown output during connect"))?;
                    batch.delete(utxo_key(&outpoint));
                    removed.push((outpoint, entry));
                }
            }
            for (vout, output) in tx.outputs.iter().enumerate() {
                let outpoint = OutPoint::new(tx.id, vout as u32);
                let entry = UtxoEntry {
                    output: output.clone(),
                    height,
                    is_coinbase: tx.is_coinbase(),
                };
                batch.put(utxo_key(&outpoint), encode_utxo_entry(&entry));
                self.utxo.insert(outpoint, entry);
                added.push(outpoint);
            }
        }

        Ok(UndoRecord { removed, added })
    }

    fn reverse_utxo_changes(&mut self, undo: UndoRecord, batch: &mut WriteBatch) {
        for outpoint in undo.added {
            self.utxo.remove(&outpoint);
            batch.delete(utxo_key(&outpoint));
        }
        for (outpoint, entry) in undo.removed {
            batch.put(utxo_key(&outpoint), encode_utxo_entry(&entry));
            self.utxo.insert(outpoint, entry);
        }
    }

    fn connect_block(
        &mut self,
        hash: Hash256,
        block: Block,
        height: u64,
        cumulative_emission: u64,
    ) -> Result<(), ErrorKind> {
        let mut batch = WriteBatch::new();
        let undo = self.apply_utxo_changes(&block, height, &mut batch)?;
        let work = self
            .block_index
            .get(&block.header.previous_hash)
            .map_or(0.0, |e| e.cumulative_work)
            + block_work(block.header.bits);

        batch.put(undo_key(&hash), encode_undo_record(&undo));
        self.undo.insert(hash, undo);
        self.block_index.insert(
            hash,
            BlockIndexEntry { header: block.header.clone(), height, cumulative_work: work },
        );
        self.cumulative_emission.insert(hash, cumulative_emission);
        self.persist_block_header(&mut batch, hash, &block, height, work);
        batch.put(height_key(height), hash.as_bytes().to_vec());
        self.blocks.insert(hash, block);
        self.height_index.push(hash);
        self.tip = hash;
        batch.put(METADATA_KEY_TIP.to_vec(), hash.as_bytes().to_vec());
        self.store.write_batch(batch)?;
        Ok(())
    }

    /// Persists a block's raw bytes and header-index entry. Called for
    /// every block that becomes known (connected, genesis, or a still-losing
    /// alt-fork side block), since a future reorganization may need to
    /// replay any of them.
    fn persist_block_header(&self, batch: &mut WriteBatch, hash: Hash256, block: &Block, height: u64, work: f64) {
        batch.put(block_key(&hash), block.to_bytes());
        batch.put(header_index_key(&hash), encode_block_index_entry(height, work));
    }

    fn insert_orphan(&mut self, hash: Hash256, block: Block) {
        if self.orphans.contains_key(&hash) {
            return;
        }
        if self.orphan_order.len() >= MAX_ORPHANS {
            if let Some(oldest) = self.orphan_order.pop_front() {
                self.orphans.remove(&oldest);
                warn!(%oldest, "evicted oldest orphan to make room");
            }
        }
        self.orphan_order.push_back(hash);
        self.orphans.insert(hash, block);
    }

    /// After any successful connection, some orphans may now have a known
    /// parent; repeatedly resubmits them until a pass makes no progress.
    fn try_connect_orphans(&mut self, now: u32) {
        loop {
            let ready: Vec<Hash256> = self
                .orphans
                .keys()
                .filter(|hash| {
                    self.orphans[*hash].header.previous_hash == self.tip
                        || self.block_index.contains_key(&self.orphans[*hash].header.previous_hash)
                })
                .copied()
                .collect();
            if ready.is_empty() {
                return;
            }
            let mut progressed = false;
            for hash in ready {
                let Some(block) = self.orphans.remove(&hash) else { continue };
                self.orphan_order.retain(|h| *h != hash);
                match self.submit_block(block.clone(), now) {
                    Ok(_) => progressed = true,
                    Err(_) => {
                        // No longer connects (e.g. a sibling claimed the slot
                        // first); drop it rather than re-orphaning forever.
                    }
                }
            }
            if !progressed {
                return;
            }
        }
    }

    /// Rewinds the active chain to the common ancestor with `new_tip`'s
    /// branch, then replays that branch's blocks forward, fully validating
    /// each one against the UTXO state as it is applied. If any block in
    /// the new branch fails to validate the active chain is left untouched
    /// and the block that triggered the reorg stays indexed as a side
    /// block rather than the new tip.
    fn reorganize_to(&mut self, new_tip: Hash256, now: u32) -> Result<ConnectOutcome, ErrorKind> {
        let mut connect_path = vec![new_tip];
        let mut cursor = new_tip;
        loop {
            let entry = &self.block_index[&cursor];
            if self.height_index.get(entry.height as usize) == Some(&cursor) {
                break;
            }
            cursor = entry.header.previous_hash;
            connect_path.push(cursor);
        }
        let ancestor = cursor;
        connect_path.pop(); // drop the ancestor itself, already active
        connect_path.reverse(); // oldest-first

        let ancestor_height = self.block_index[&ancestor].height;

        let saved_utxo = self.utxo.clone();
        let saved_height_index = self.height_index.clone();
        let saved_tip = self.tip;
        let saved_undo = self.undo.clone();
        let mut batch = WriteBatch::new();

        let mut disconnected = Vec::new();
        while self.height_index.len() as u64 > ancestor_height + 1 {
            let height = self.height_index.len() as u64 - 1;
            let hash = self.height_index.pop().expect("checked non-empty by loop condition");
            let Some(undo) = self.undo.remove(&hash) else {
                self.rollback(saved_utxo, saved_height_index, saved_tip, saved_undo);
                return Err(ErrorKind::Storage("missing undo record during reorganization".into()));
            };
            self.reverse_utxo_changes(undo, &mut batch);
            batch.delete(height_key(height));
            batch.delete(undo_key(&hash));
            self.tip = self.height_index.last().copied().unwrap_or(ancestor);
            disconnected.push(hash);
        }

        let mut connected = Vec::new();
        for (i, hash) in connect_path.iter().enumerate() {
            let block = self.blocks.get(hash).cloned().expect("indexed blocks are retained");
            let height = ancestor_height + 1 + i as u64;
            let subsidy = block_subsidy(height);

            let validation = self
                .validate_spends(&block, height, &self.utxo)
                .and_then(|fees| self.check_coinbase_value(&block, subsidy, fees).map(|()| fees));

            if validation.is_err() {
                self.rollback(saved_utxo, saved_height_index, saved_tip, saved_undo);
                return Err(ErrorKind::context("reorganization candidate failed replay validation"));
            }

            let undo = self
                .apply_utxo_changes(&block, height, &mut batch)
                .expect("validate_spends already checked this block connects cleanly");
            batch.put(height_key(height), hash.as_bytes().to_vec());
            batch.put(undo_key(hash), encode_undo_record(&undo));
            self.undo.insert(*hash, undo);
            self.height_index.push(*hash);
            self.tip = *hash;
            connected.push(*hash);
        }

        batch.put(METADATA_KEY_TIP.to_vec(), self.tip.as_bytes().to_vec());
        self.store.write_batch(batch)?;

        Ok(ConnectOutcome::Reorganized {
            new_height: self.height(),
            disconnected,
            connected,
        })
    }

    /// Restores every map [`reorganize_to`] mutates in place before it has
    /// committed a batch, so a replay failure midway through a reorg leaves
    /// the chain exactly as it was rather than with a disconnected block's
    /// undo record missing from a still-active chain.
    fn rollback(
        &mut self,
        utxo: UtxoSet,
        height_index: Vec<Hash256>,
        tip: Hash256,
        undo: HashMap<Hash256, UndoRecord>,
    ) {
        self.utxo = utxo;
        self.height_index = height_index;
        self.tip = tip;
        self.undo = undo;
    }
}

fn utxo_key(outpoint: &OutPoint) -> Vec<u8> {
    let mut key = vec![prefix::UTXO];
    key.extend_from_slice(outpoint.txid.as_bytes());
    key.extend_from_slice(&outpoint.vout.to_be_bytes());
    key
}

fn block_key(hash: &Hash256) -> Vec<u8> {
    let mut key = vec![prefix::BLOCK];
    key.extend_from_slice(hash.as_bytes());
    key
}

fn height_key(height: u64) -> Vec<u8> {
    let mut key = vec![prefix::HEIGHT_INDEX];
    key.extend_from_slice(&height.to_be_bytes());
    key
}

fn header_index_key(hash: &Hash256) -> Vec<u8> {
    let mut key = vec![prefix::HEADER_INDEX];
    key.extend_from_slice(hash.as_bytes());
    key
}

fn undo_key(hash: &Hash256) -> Vec<u8> {
    let mut key = vec![prefix::UNDO];
    key.extend_from_slice(hash.as_bytes());
    key
}

fn encode_utxo_entry(entry: &UtxoEntry) -> Vec<u8> {
    use crate::codec::Writer;
    let mut w = Writer::new();
    w.write_u64(entry.output.amount);
    w.write_fixed(&entry.output.address.to_bytes());
    w.write_u64(entry.height);
    w.write_u8(u8::from(entry.is_coinbase));
    w.into_bytes()
}

fn decode_utxo_entry(bytes: &[u8]) -> Result<UtxoEntry, ErrorKind> {
    use crate::codec::Reader;
    use crate::transaction::TxOutput;
    let mut r = Reader::new(bytes);
    let amount = r.read_u64()?;
    let address_bytes = r.read_fixed(shared::ADDRESS_SIZE)?;
    let address = Address::from_bytes(&address_bytes)?;
    let height = r.read_u64()?;
    let is_coinbase = r.read_u8()? != 0;
    r.finish()?;
    Ok(UtxoEntry {
        output: TxOutput { amount, address },
        height,
        is_coinbase,
    })
}

/// Recovers the `OutPoint` a UTXO store key was built from: the inverse of
/// [`utxo_key`].
fn decode_outpoint_from_key(key: &[u8]) -> Result<OutPoint, ErrorKind> {
    if key.len() != 1 + shared::HASH_SIZE + 4 {
        return Err(ErrorKind::Storage("malformed utxo key".into()));
    }
    let txid = Hash256::try_from(&key[1..1 + shared::HASH_SIZE])?;
    let vout_bytes: [u8; 4] = key[1 + shared::HASH_SIZE..]
        .try_into()
        .map_err(|_| ErrorKind::Storage("malformed utxo key".into()))?;
    Ok(OutPoint::new(txid, u32::from_be_bytes(vout_bytes)))
}

fn encode_block_index_entry(height: u64, cumulative_work: f64) -> Vec<u8> {
    use crate::codec::Writer;
    let mut w = Writer::new();
    w.write_u64(height);
    w.write_u64(cumulative_work.to_bits());
    w.into_bytes()
}

fn decode_block_index_entry(bytes: &[u8]) -> Result<(u64, f64), ErrorKind> {
    use crate::codec::Reader;
    let mut r = Reader::new(bytes);
    let height = r.read_u64()?;
    let cumulative_work = f64::from_bits(r.read_u64()?);
    r.finish()?;
    Ok((height, cumulative_work))
}

fn encode_undo_record(undo: &UndoRecord) -> Vec<u8> {
    use crate::codec::Writer;
    let mut w = Writer::new();
    w.write_vec(&undo.removed, |w, (outpoint, entry)| {
        w.write_hash(&outpoint.txid);
        w.write_u32(outpoint.vout);
        w.write_fixed(&encode_utxo_entry(entry));
    });
    w.write_vec(&undo.added, |w, outpoint| {
        w.write_hash(&outpoint.txid);
        w.write_u32(outpoint.vout);
    });
    w.into_bytes()
}

fn decode_undo_record(bytes: &[u8]) -> Result<UndoRecord, ErrorKind> {
    use crate::codec::Reader;
    let mut r = Reader::new(bytes);
    let removed = r.read_vec(|r| {
        let txid = r.read_hash()?;
        let vout = r.read_u32()?;
        let amount = r.read_u64()?;
        let address = Address::from_bytes(&r.read_fixed(shared::ADDRESS_SIZE)?)?;
        let height = r.read_u64()?;
        let is_coinbase = r.read_u8()? != 0;
        Ok((
            OutPoint::new(txid, vout),
            UtxoEntry {
                output: crate::transaction::TxOutput { amount, address },
                height,
                is_coinbase,
            },
        ))
    })?;
    let added = r.read_vec(|r| {
        let txid = r.read_hash()?;
        let vout = r.read_u32()?;
        Ok(OutPoint::new(txid, vout))
    })?;
    r.finish()?;
    Ok(UndoRecord { removed, added })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::genesis::genesis_block;
    use crate::transaction::{TxInput, TxOutput};
    use shared::{Address, KeyPair, Signature};
    use std::sync::{Arc, Mutex};

    /// An in-memory `Store` good enough for chain-manager tests; the real
    /// durable backend lives in the storage crate. `Clone` shares the same
    /// underlying map, so a test can reopen a `Chain` against the data a
    /// previous `Chain` left behind, simulating a process restart.
    #[derive(Default, Clone)]
    struct TestStore(Arc<Mutex<HashMap<Vec<u8>, Vec<u8>>>>);

    impl Store for TestStore {
        fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, ErrorKind> {
            Ok(self.0.lock().unwrap().get(key).cloned())
        }

        fn write_batch(&self, batch: WriteBatch) -> Result<(), ErrorKind> {
            let mut map = self.0.lock().unwrap();
            for entry in batch.iter() {
                match entry {
                    crate::store::BatchEntry::Put(k, v) => {
                        map.insert(k.to_vec(), v.to_vec());
                    }
                    crate::store::BatchEntry::Delete(k) => {
                        map.remove(k);
                    }
                }
            }
            Ok(())
        }

        fn iterate_prefix(&self, prefix: &[u8]) -> Result<Vec<(Vec<u8>, Vec<u8>)>, ErrorKind> {
            Ok(self
                .0
                .lock()
                .unwrap()
                .iter()
                .filter(|(k, _)| k.starts_with(prefix))
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect())
        }

        fn snapshot(&self) -> Result<Box<dyn Store>, ErrorKind> {
            Ok(Box::new(TestStore(Arc::new(Mutex::new(self.0.lock().unwrap().clone())))))
        }
    }

    fn address() -> Address {
        let keypair = KeyPair::generate();
        Address::from_public_key(&keypair.public_key(), 0)
    }

    fn mine_child(previous_hash: Hash256, bits: u32, cumulative_emission: u64, timestamp: u32, reward_address: Address) -> Block {
        let coinbase = Transaction::coinbase(block_subsidy(0), reward_address);
        mine_block(previous_hash, bits, cumulative_emission, timestamp, vec![coinbase])
    }

    fn mine_block(
        previous_hash: Hash256,
        bits: u32,
        cumulative_emission: u64,
        timestamp: u32,
        transactions: Vec<Transaction>,
    ) -> Block {
        let ids: Vec<Hash256> = transactions.iter().map(|tx| tx.id).collect();
        let merkle_root = crate::merkle::merkle_root(&ids);
        let mut header = crate::block::BlockHeader {
            version: crate::config::BLOCK_VERSION,
            previous_hash,
            timestamp,
            nonce: 0,
            bits,
            cumulative_emission,
            merkle_root,
        };
        while !crate::pow::meets_target(&header.hash(), header.bits) {
            header.nonce += 1;
        }
        Block::new(header, transactions)
    }

    fn open_test_chain() -> (Chain<TestStore>, Block) {
        let genesis = genesis_block(address());
        let chain = Chain::open(TestStore::default(), genesis.clone()).unwrap();
        (chain, genesis)
    }

    #[test]
    fn opening_bootstraps_genesis() {
        let (chain, genesis) = open_test_chain();
        assert_eq!(chain.height(), 0);
        assert_eq!(chain.tip(), genesis.hash());
        assert_eq!(chain.utxo().len(), 1);
    }

    #[test]
    fn extends_the_active_chain() {
        let (mut chain, genesis) = open_test_chain();
        let child = mine_child(
            genesis.hash(),
            genesis.header.bits,
            genesis.header.cumulative_emission + block_subsidy(1),
            genesis.header.timestamp + 60,
            address(),
        );
        let outcome = chain.submit_block(child.clone(), genesis.header.timestamp + 3600).unwrap();
        assert_eq!(outcome, ConnectOutcome::Extended { height: 1 });
        assert_eq!(chain.tip(), child.hash());
        assert_eq!(chain.height(), 1);
    }

    #[test]
    fn unknown_parent_becomes_an_orphan() {
        let (mut chain, genesis) = open_test_chain();
        let orphan = mine_child(
            Hash256::sha256d(b"no such parent"),
            genesis.header.bits,
            block_subsidy(1),
            genesis.header.timestamp + 60,
            address(),
        );
        let outcome = chain.submit_block(orphan, genesis.header.timestamp + 3600).unwrap();
        assert_eq!(outcome, ConnectOutcome::Orphan);
        assert_eq!(chain.height(), 0);
    }

    #[test]
    fn duplicate_block_is_rejected() {
        let (mut chain, genesis) = open_test_chain();
        let child = mine_child(
            genesis.hash(),
            genesis.header.bits,
            genesis.header.cumulative_emission + block_subsidy(1),
            genesis.header.timestamp + 60,
            address(),
        );
        chain.submit_block(child.clone(), genesis.header.timestamp + 3600).unwrap();
        assert!(matches!(
            chain.submit_block(child, genesis.header.timestamp + 3600),
            Err(ErrorKind::DuplicateBlock)
        ));
    }

    #[test]
    fn spend_then_reorg_restores_the_original_utxo_when_the_branch_never_wins() {
        let (mut chain, genesis) = open_test_chain();
        let child_a = mine_child(
            genesis.hash(),
            genesis.header.bits,
            genesis.header.cumulative_emission + block_subsidy(1),
            genesis.header.timestamp + 60,
            address(),
        );
        chain.submit_block(child_a.clone(), genesis.header.timestamp + 3600).unwrap();

        // A sibling block at the same height is a lower-or-equal-work alt
        // fork (same bits, same algorithm) and must not replace the tip.
        let child_b = mine_child(
            genesis.hash(),
            genesis.header.bits,
            genesis.header.cumulative_emission + block_subsidy(1),
            genesis.header.timestamp + 61,
            address(),
        );
        let outcome = chain.submit_block(child_b.clone(), genesis.header.timestamp + 3600).unwrap();
        assert!(matches!(outcome, ConnectOutcome::AltFork { .. } | ConnectOutcome::Reorganized { .. }));
        // Either way the tip remains a child of genesis at height 1.
        assert_eq!(chain.height(), 1);
    }

    #[test]
    fn reopening_the_same_store_resumes_the_tip_utxo_set_and_known_side_blocks() {
        let store = TestStore::default();
        let genesis = genesis_block(address());
        let mut chain = Chain::open(store.clone(), genesis.clone()).unwrap();

        let child_a = mine_child(
            genesis.hash(),
            genesis.header.bits,
            genesis.header.cumulative_emission + block_subsidy(1),
            genesis.header.timestamp + 60,
            address(),
        );
        chain.submit_block(child_a.clone(), genesis.header.timestamp + 3600).unwrap();

        // An alt-fork side block that never became the tip still has to
        // survive a restart, since a later block could still reorganize
        // onto it.
        let child_b = mine_child(
            genesis.hash(),
            genesis.header.bits,
            genesis.header.cumulative_emission + block_subsidy(1),
            genesis.header.timestamp + 61,
            address(),
        );
        chain.submit_block(child_b.clone(), genesis.header.timestamp + 3600).unwrap();

        drop(chain);

        let reopened = Chain::open(store, genesis.clone()).unwrap();
        assert_eq!(reopened.tip(), child_a.hash());
        assert_eq!(reopened.height(), 1);
        assert_eq!(reopened.utxo().len(), 2);
        assert_eq!(reopened.get_block(&child_a.hash()).map(Block::hash), Some(child_a.hash()));
        assert_eq!(reopened.get_block(&child_b.hash()).map(Block::hash), Some(child_b.hash()));
        assert_eq!(reopened.get_block_by_height(1).map(Block::hash), Some(child_a.hash()));
    }

    #[test]
    fn reopening_after_a_reorganization_resumes_with_the_winning_branch_active() {
        let store = TestStore::default();
        let genesis = genesis_block(address());
        let mut chain = Chain::open(store.clone(), genesis.clone()).unwrap();

        let child_a = mine_child(
            genesis.hash(),
            genesis.header.bits,
            genesis.header.cumulative_emission + block_subsidy(1),
            genesis.header.timestamp + 60,
            address(),
        );
        chain.submit_block(child_a.clone(), genesis.header.timestamp + 3600).unwrap();

        let child_b = mine_child(
            genesis.hash(),
            genesis.header.bits,
            genesis.header.cumulative_emission + block_subsidy(1),
            genesis.header.timestamp + 61,
            address(),
        );
        chain.submit_block(child_b.clone(), genesis.header.timestamp + 3600).unwrap();

        let child_b2 = mine_child(
            child_b.hash(),
            child_b.header.bits,
            child_b.header.cumulative_emission + block_subsidy(2),
            genesis.header.timestamp + 120,
            address(),
        );
        let outcome = chain.submit_block(child_b2.clone(), genesis.header.timestamp + 3600).unwrap();
        assert!(matches!(outcome, ConnectOutcome::Reorganized { .. }));
        assert_eq!(chain.tip(), child_b2.hash());

        drop(chain);

        let reopened = Chain::open(store, genesis.clone()).unwrap();
        assert_eq!(reopened.tip(), child_b2.hash());
        assert_eq!(reopened.height(), 2);
        // child_a's coinbase was disconnected by the reorg and must not
        // reappear in the resumed UTXO set.
        assert_eq!(reopened.get_block_by_height(1).map(Block::hash), Some(child_b.hash()));
    }

    #[test]
    fn failed_reorg_replay_restores_undo_records_for_blocks_still_active() {
        let (mut chain, genesis) = open_test_chain();

        // Active chain: genesis -> a1 -> a2, two blocks of work.
        let a1 = mine_child(
            genesis.hash(),
            genesis.header.bits,
            genesis.header.cumulative_emission + block_subsidy(1),
            genesis.header.timestamp + 60,
            address(),
        );
        chain.submit_block(a1.clone(), genesis.header.timestamp + 3600).unwrap();
        let a2 = mine_child(
            a1.hash(),
            a1.header.bits,
            a1.header.cumulative_emission + block_subsidy(2),
            genesis.header.timestamp + 120,
            address(),
        );
        chain.submit_block(a2.clone(), genesis.header.timestamp + 3600).unwrap();
        assert_eq!(chain.height(), 2);

        // Alt branch: genesis -> b1 -> b2 -> b3, three blocks of work, so it
        // outweighs the active chain once b3 connects. b2 spends b1's own
        // coinbase output immediately, which is still far short of
        // maturity, so replaying the branch during the reorg fails partway
        // through connecting it.
        let b1_keypair = KeyPair::generate();
        let b1_address = Address::from_public_key(&b1_keypair.public_key(), 0);
        let b1 = mine_child(
            genesis.hash(),
            genesis.header.bits,
            genesis.header.cumulative_emission + block_subsidy(1),
            genesis.header.timestamp + 61,
            b1_address,
        );
        chain.submit_block(b1.clone(), genesis.header.timestamp + 3600).unwrap();

        let spend_input = TxInput {
            prev_tx_hash: b1.transactions[0].id,
            prev_txout_index: 0,
            signature: Signature::from_bytes(&[0u8; 64]).unwrap(),
            public_key: b1_keypair.public_key(),
        };
        let spend_outputs = vec![TxOutput { amount: block_subsidy(1) - 1, address: address() }];
        let unsigned_spend = Transaction::new(vec![spend_input.clone()], spend_outputs.clone());
        let sig = b1_keypair.sign(&unsigned_spend.signing_header());
        let mut signed_spend_input = spend_input;
        signed_spend_input.signature = sig;
        let spend_tx = Transaction::new(vec![signed_spend_input], spend_outputs);

        let b2_coinbase = Transaction::coinbase(block_subsidy(2), address());
        let b2 = mine_block(
            b1.hash(),
            b1.header.bits,
            b1.header.cumulative_emission + block_subsidy(2),
            genesis.header.timestamp + 122,
            vec![b2_coinbase, spend_tx],
        );
        let outcome = chain.submit_block(b2.clone(), genesis.header.timestamp + 3600).unwrap();
        assert!(matches!(outcome, ConnectOutcome::AltFork { .. }));

        let b3 = mine_child(
            b2.hash(),
            b2.header.bits,
            b2.header.cumulative_emission + block_subsidy(3),
            genesis.header.timestamp + 183,
            address(),
        );
        assert!(chain.submit_block(b3.clone(), genesis.header.timestamp + 3600).is_err());

        // The failed replay must leave the active chain exactly as it was.
        assert_eq!(chain.tip(), a2.hash());
        assert_eq!(chain.height(), 2);

        // A later, fully legitimate reorg away from this same active chain
        // must still be able to disconnect a1 and a2: if the failed attempt
        // above had left their undo records missing, this would fail with
        // "missing undo record during reorganization" instead of
        // succeeding.
        let c1 = mine_child(
            genesis.hash(),
            genesis.header.bits,
            genesis.header.cumulative_emission + block_subsidy(1),
            genesis.header.timestamp + 62,
            address(),
        );
        chain.submit_block(c1.clone(), genesis.header.timestamp + 3600).unwrap();
        let c2 = mine_child(
            c1.hash(),
            c1.header.bits,
            c1.header.cumulative_emission + block_subsidy(2),
            genesis.header.timestamp + 124,
            address(),
        );
        chain.submit_block(c2.clone(), genesis.header.timestamp + 3600).unwrap();
        let c3 = mine_child(
            c2.hash(),
            c2.header.bits,
            c2.header.cumulative_emission + block_subsidy(3),
            genesis.header.timestamp + 186,
            address(),
        );
        let outcome = chain.submit_block(c3.clone(), genesis.header.timestamp + 3600).unwrap();
        assert!(matches!(outcome, ConnectOutcome::Reorganized { .. }));
        assert_eq!(chain.tip(), c3.hash());
        assert_eq!(chain.height(), 3);
    }
}
