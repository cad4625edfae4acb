//! The persistent-store contract the chain manager is generic over. A
//! concrete store (an in-memory map for tests, a `rocksdb` instance for a
//! running node) only needs to implement byte-level get/put/delete and
//! prefix iteration; the chain manager owns the meaning of the keys.

use shared::error::ErrorKind;

/// Key-space prefixes. Each logical record type gets its own first byte so
/// a full-table scan for, say, every UTXO never has to skip over blocks.
pub mod prefix {
    /// `U<outpoint bytes>` -> encoded UTXO entry.
    pub const UTXO: u8 = b'U';
    /// `B<block hash>` -> encoded block.
    pub const BLOCK: u8 = b'B';
    /// `H<block hash>` -> encoded height + cumulative work; the block's
    /// parent is read back from its own `BLOCK` entry rather than
    /// duplicated here.
    pub const HEADER_INDEX: u8 = b'H';
    /// `T<height as 8-byte BE>` -> block hash on the active chain at that height.
    pub const HEIGHT_INDEX: u8 = b'T';
    /// `X<block hash>` -> undo record for disconnecting that block.
    pub const UNDO: u8 = b'X';
    /// Fixed metadata keys: current tip hash, tip height.
    pub const METADATA: u8 = b'M';
}

pub const METADATA_KEY_TIP: &[u8] = b"Mtip";

/// A single mutation queued into a [`WriteBatch`].
enum Op {
    Put(Vec<u8>, Vec<u8>),
    Delete(Vec<u8>),
}

/// A set of mutations applied atomically: connecting or disconnecting a
/// block touches the UTXO set, the block index, the height index, and the
/// undo log together, and a crash between any two of those writes would
/// corrupt the store.
#[derive(Default)]
pub struct WriteBatch {
    ops: Vec<Op>,
}

impl WriteBatch {
    #[must_use]
    pub fn new() -> Self {
        Self { ops: Vec::new() }
    }

    pub fn put(&mut self, key: Vec<u8>, value: Vec<u8>) -> &mut Self {
        self.ops.push(Op::Put(key, value));
        self
    }

    pub fn delete(&mut self, key: Vec<u8>) -> &mut Self {
        self.ops.push(Op::Delete(key));
        self
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = BatchEntry<'_>> {
        self.ops.iter().map(|op| match op {
            Op::Put(k, v) => BatchEntry::Put(k, v),
            Op::Delete(k) => BatchEntry::Delete(k),
        })
    }
}

pub enum BatchEntry<'a> {
    Put(&'a [u8], &'a [u8]),
    Delete(&'a [u8]),
}

/// A key-value store with atomic batched writes and prefix iteration. The
/// chain manager and the mempool never talk to a concrete backend directly;
/// they are generic over this trait, so the same validation and state-
/// transition code runs against an in-memory store in tests and a durable
/// store in a running node.
pub trait Store: Send + Sync {
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, ErrorKind>;

    fn write_batch(&self, batch: WriteBatch) -> Result<(), ErrorKind>;

    /// Returns every `(key, value)` pair whose key starts with `prefix`.
    fn iterate_prefix(&self, prefix: &[u8]) -> Result<Vec<(Vec<u8>, Vec<u8>)>, ErrorKind>;

    /// A consistent point-in-time view for operations (like answering an RPC
    /// while a block connects concurrently) that must not observe a
    /// partially-applied batch. Backends without native snapshots may
    /// implement this as a full copy.
    fn snapshot(&self) -> Result<Box<dyn Store>, ErrorKind>;
}
