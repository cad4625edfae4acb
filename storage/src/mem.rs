//! An in-memory [`Store`], good enough to run the whole chain manager and
//! mempool against in tests without standing up RocksDB. Backed by a
//! `BTreeMap` rather than a `HashMap` so `iterate_prefix` can use a sorted
//! range scan the same shape as the RocksDB backend's `prefix_iterator`.

use vulkan_core::store::{BatchEntry, Store, WriteBatch};
use shared::error::ErrorKind;
use std::collections::BTreeMap;
use std::sync::RwLock;

#[derive(Default)]
pub struct MemStore {
    data: RwLock<BTreeMap<Vec<u8>, Vec<u8>>>,
}

impl MemStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl Store for MemStore {
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, ErrorKind> {
        let data = self.data.read().map_err(|_| ErrorKind::Storage("mem store lock poisoned".into()))?;
        Ok(data.get(key).cloned())
    }

    fn write_batch(&self, batch: WriteBatch) -> Result<(), ErrorKind> {
        let mut data = self
            .data
            .write()
            .map_err(|_| ErrorKind::Storage("mem store lock poisoned".into()))?;
        for entry in batch.iter() {
            match entry {
                BatchEntry::Put(k, v) => {
                    data.insert(k.to_vec(), v.to_vec());
                }
                BatchEntry::Delete(k) => {
                    data.remove(k);
                }
            }
        }
        Ok(())
    }

    fn iterate_prefix(&self, prefix: &[u8]) -> Result<Vec<(Vec<u8>, Vec<u8>)>, ErrorKind> {
        let data = self.data.read().map_err(|_| ErrorKind::Storage("mem store lock poisoned".into()))?;
        Ok(data
            .range(prefix.to_vec()..)
            .take_while(|(k, _)| k.starts_with(prefix))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect())
    }

    fn snapshot(&self) -> Result<Box<dyn Store>, ErrorKind> {
        let data = self.data.read().map_err(|_| ErrorKind::Storage("mem store lock poisoned".into()))?;
        Ok(Box::new(MemStore {
            data: RwLock::new(data.clone()),
        }))
    }
}
