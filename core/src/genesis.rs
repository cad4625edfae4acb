//! The hard-coded genesis block every node starts from.

use crate::block::{Block, BlockHeader};
use crate::codec::Codec;
use crate::config::BLOCK_VERSION;
use crate::merkle::merkle_root;
use crate::pow::meets_target;
use crate::transaction::Transaction;
use shared::{Address, Hash256, KeyPair};

/// The initial block reward, before any halving schedule applies.
pub const GENESIS_REWARD: u64 = 50_0000_0000;

/// A permissive target so the genesis block can be mined instantly; it is
/// never re-derived by [`crate::pow::retarget`], only replaced by it.
pub const GENESIS_BITS: u32 = 0x207f_ffff;

/// Seed for the fixed keypair the compiled-in genesis coinbase pays. There
/// is no wallet behind this key (key management is out of scope, §1); it
/// exists only so every node derives byte-identical genesis block from the
/// same inputs, the way a real chain's genesis is baked into the binary.
const GENESIS_KEY_SEED: [u8; 32] = *b"vulkan genesis reward key seed!!";

/// Returns the single compiled-in genesis block every node starts from.
/// `previous_hash` is the zero hash; this is the only block in the chain
/// that may have it.
#[must_use]
pub fn genesis() -> Block {
    let keypair = KeyPair::from_seed(GENESIS_KEY_SEED).expect("fixed genesis seed is valid");
    let address = Address::from_public_key(&keypair.public_key(), 0);
    genesis_block(address)
}

/// Builds the genesis block paying its single coinbase output to
/// `reward_address`, mining it (brute-force nonce search against
/// [`GENESIS_BITS`], which is loose enough to resolve in a handful of
/// attempts) so it is a structurally valid block in its own right.
#[must_use]
pub fn genesis_block(reward_address: Address) -> Block {
    let coinbase = Transaction::coinbase(GENESIS_REWARD, reward_address);
    let merkle_root = merkle_root(&[coinbase.id]);

    let mut header = BlockHeader {
        version: BLOCK_VERSION,
        previous_hash: Hash256::zero(),
        timestamp: 1_700_000_000,
        nonce: 0,
        bits: GENESIS_BITS,
        cumulative_emission: GENESIS_REWARD,
        merkle_root,
    };

    while !meets_target(&header.hash(), header.bits) {
        header.nonce += 1;
    }

    Block::new(header, vec![coinbase])
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared::KeyPair;

    #[test]
    fn genesis_block_is_internally_consistent() {
        let keypair = KeyPair::generate();
        let address = Address::from_public_key(&keypair.public_key(), 0);
        let genesis = genesis_block(address);

        assert!(genesis.transactions[0].is_coinbase());
        assert_eq!(genesis.header.previous_hash, Hash256::zero());
        assert!(meets_target(&genesis.hash(), genesis.header.bits));
    }

    #[test]
    fn genesis_block_passes_structural_validation() {
        let keypair = KeyPair::generate();
        let address = Address::from_public_key(&keypair.public_key(), 0);
        let genesis = genesis_block(address);
        assert!(genesis.validate_structure(1_700_000_100).is_ok());
    }

    #[test]
    fn genesis_block_roundtrips_through_bytes() {
        let keypair = KeyPair::generate();
        let address = Address::from_public_key(&keypair.public_key(), 0);
        let genesis = genesis_block(address);
        let decoded = Block::from_bytes(&genesis.to_bytes()).unwrap();
        assert_eq!(genesis.hash(), decoded.hash());
    }

    #[test]
    fn compiled_in_genesis_is_deterministic_across_calls() {
        let a = genesis();
        let b = genesis();
        assert_eq!(a.hash(), b.hash());
        assert_eq!(a.header.previous_hash, Hash256::zero());
    }

    #[test]
    fn compiled_in_genesis_passes_structural_validation() {
        let genesis = genesis();
        assert!(genesis.validate_structure(genesis.header.timestamp + 100).is_ok());
    }
}
