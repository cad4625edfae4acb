//! Concrete [`vulkan_core::store::Store`] backends: an in-memory map for
//! tests and an embedded RocksDB database for a running node. The chain
//! manager in `vulkan-core` never depends on this crate — it is generic
//! over the `Store` trait, and this crate supplies the two implementations
//! that trait needs in practice.

pub mod mem;
pub mod rocks;

pub use mem::MemStore;
pub use rocks::RocksStore;
