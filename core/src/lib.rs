pub mod block;
pub mod chain;
pub mod codec;
pub mod config;
pub mod genesis;
pub mod mempool;
pub mod merkle;
pub mod pow;
pub mod store;
pub mod transaction;
pub mod utxo;

pub use block::{Block, BlockHeader};
pub use chain::{Chain, ConnectOutcome};
pub use codec::Codec;
pub use genesis::{genesis, genesis_block};
pub use mempool::Mempool;
pub use merkle::merkle_root;
pub use store::{Store, WriteBatch};
pub use transaction::{Transaction, TxInput, TxOutput};
pub use utxo::{OutPoint, UtxoEntry, UtxoSet, UtxoView};

pub use shared::{Address, Hash256};
pub use shared::error::ErrorKind;
