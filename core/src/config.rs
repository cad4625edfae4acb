//! Consensus parameters. These are constants, not runtime configuration:
//! every node on the same network must agree on them bit-for-bit.

/// Block format version produced and accepted by this implementation.
pub const BLOCK_VERSION: u32 = 1;

/// Maximum serialized block size, in bytes.
pub const MAX_BLOCK_SIZE: usize = 1_000_000;

/// Target seconds between blocks.
pub const TARGET_BLOCK_TIME: u64 = 60;

/// Number of blocks between difficulty retargets.
pub const DIFFICULTY_PERIOD: u64 = 2016;

/// A block's timestamp may not be more than this many seconds ahead of the
/// validating node's local clock.
pub const MAX_FUTURE_BLOCK_TIME: u64 = 7200;

/// Number of confirmations a coinbase output needs before it is spendable.
pub const COINBASE_MATURITY: u64 = 100;

/// Maximum number of blocks kept in the orphan pool awaiting their parent.
pub const MAX_ORPHANS: usize = 100;

/// Byte length of a `Hash256`.
pub const HASH_SIZE: usize = 32;

/// Byte length of a base58check-decoded `Address`.
pub const ADDRESS_SIZE: usize = 25;

/// Block height interval between coinbase subsidy halvings.
pub const HALVING_INTERVAL: u64 = 210_000;

/// The coinbase subsidy for `height`, halving every [`HALVING_INTERVAL`]
/// blocks until it reaches zero.
#[must_use]
pub fn block_subsidy(height: u64) -> u64 {
    let halvings = height / HALVING_INTERVAL;
    if halvings >= 64 {
        0
    } else {
        crate::genesis::GENESIS_REWARD >> halvings
    }
}

