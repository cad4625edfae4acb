//! The durable [`Store`] backend: a `rocksdb` column-family-free key-value
//! database. Grounded on the `other_examples` RocksDB chain-state file's
//! `WriteBatch`/`db.write` pattern — the write path here is the one concrete
//! precedent in the retrieval pack for this exact batch-atomic contract.

use vulkan_core::store::{BatchEntry, Store, WriteBatch as CoreWriteBatch};
use rocksdb::{Direction, IteratorMode, Options, WriteBatch as RocksWriteBatch, WriteOptions, DB};
use shared::error::ErrorKind;
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::RwLock;

pub struct RocksStore {
    db: DB,
}

impl RocksStore {
    /// Opens (creating if absent) a RocksDB database at `path`.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, ErrorKind> {
        let mut options = Options::default();
        options.create_if_missing(true);
        let db = DB::open(&options, path.as_ref()).map_err(|e| ErrorKind::Storage(e.to_string()))?;
        tracing::info!(path = %path.as_ref().display(), "rocksdb store opened");
        Ok(Self { db })
    }
}

impl Store for RocksStore {
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, ErrorKind> {
        self.db
            .get(key)
            .map_err(|e| ErrorKind::Storage(e.to_string()))
    }

    /// Commits every put/delete in `batch` as a single RocksDB write-batch
    /// with `sync: true` — an `fsync` before the call returns, so a crash
    /// immediately afterward cannot lose the write (§4.6: a crash before
    /// commit leaves pre-block state, a crash after leaves post-block
    /// state, and no intermediate state is ever observable).
    fn write_batch(&self, batch: CoreWriteBatch) -> Result<(), ErrorKind> {
        let mut rocks_batch = RocksWriteBatch::default();
        for entry in batch.iter() {
            match entry {
                BatchEntry::Put(k, v) => rocks_batch.put(k, v),
                BatchEntry::Delete(k) => rocks_batch.delete(k),
            }
        }
        let mut opts = WriteOptions::default();
        opts.set_sync(true);
        self.db
            .write_opt(rocks_batch, &opts)
            .map_err(|e| ErrorKind::Storage(e.to_string()))
    }

    fn iterate_prefix(&self, prefix: &[u8]) -> Result<Vec<(Vec<u8>, Vec<u8>)>, ErrorKind> {
        let iter = self
            .db
            .iterator(IteratorMode::From(prefix, Direction::Forward));
        let mut out = Vec::new();
        for item in iter {
            let (key, value) = item.map_err(|e| ErrorKind::Storage(e.to_string()))?;
            if !key.starts_with(prefix) {
                break;
            }
            out.push((key.to_vec(), value.to_vec()));
        }
        Ok(out)
    }

    /// RocksDB's native `Snapshot` borrows the `DB` handle, which does not
    /// fit `Box<dyn Store>`'s implicit `'static` bound; instead this reads a
    /// consistent full copy of the keyspace into an in-memory store, per the
    /// trait's documented fallback for backends without a borrow-free
    /// snapshot primitive.
    fn snapshot(&self) -> Result<Box<dyn Store>, ErrorKind> {
        let iter = self.db.iterator(IteratorMode::Start);
        let mut copy = BTreeMap::new();
        for item in iter {
            let (key, value) = item.map_err(|e| ErrorKind::Storage(e.to_string()))?;
            copy.insert(key.to_vec(), value.to_vec());
        }
        Ok(Box::new(FrozenSnapshot {
            data: RwLock::new(copy),
        }))
    }
}

/// A read-only point-in-time copy returned by [`RocksStore::snapshot`].
/// Writes are rejected rather than silently applied.
struct FrozenSnapshot {
    data: RwLock<BTreeMap<Vec<u8>, Vec<u8>>>,
}

impl Store for FrozenSnapshot {
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, ErrorKind> {
        let data = self.data.read().map_err(|_| ErrorKind::Storage("snapshot lock poisoned".into()))?;
        Ok(data.get(key).cloned())
    }

    fn write_batch(&self, _batch: CoreWriteBatch) -> Result<(), ErrorKind> {
        Err(ErrorKind::Storage("snapshots are read-only".into()))
    }

    fn iterate_prefix(&self, prefix: &[u8]) -> Result<Vec<(Vec<u8>, Vec<u8>)>, ErrorKind> {
        let data = self.data.read().map_err(|_| ErrorKind::Storage("snapshot lock poisoned".into()))?;
        Ok(data
            .range(prefix.to_vec()..)
            .take_while(|(k, _)| k.starts_with(prefix))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect())
    }

    fn snapshot(&self) -> Result<Box<dyn Store>, ErrorKind> {
        let data = self.data.read().map_err(|_| ErrorKind::Storage("snapshot lock poisoned".into()))?;
        Ok(Box::new(FrozenSnapshot {
            data: RwLock::new(data.clone()),
        }))
    }
}
