//! The crate-spanning error taxonomy described in the core's error-handling
//! design: validation failures are local and non-fatal, storage failures
//! abort the in-flight batch, and duplicates are soft errors that callers
//! should not log as faults.

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ErrorKind {
    /// Malformed bytes: premature EOF, a length/count that doesn't fit the
    /// remaining buffer, or trailing bytes after a complete decode.
    #[error("codec error: {0}")]
    Codec(String),

    /// A transaction failed shape, signature, or id-consistency checks.
    #[error("invalid transaction: {reason}")]
    InvalidTransaction { reason: String },

    /// A block failed timestamp, coinbase, Merkle, size, or PoW checks.
    #[error("invalid block: {reason}")]
    InvalidBlock { reason: String },

    /// A context-sensitive check failed: unknown parent, bad retarget, wrong
    /// coinbase amount, or a double-spend against the UTXO set.
    #[error("context error: {reason}")]
    Context { reason: String },

    /// The persistent store reported a failure. Typically fatal to the
    /// operation that observed it.
    #[error("storage error: {0}")]
    Storage(String),

    /// The block is already known (connected, alt-fork, or rejected). Not a
    /// fault — callers should drop the message silently.
    #[error("duplicate block")]
    DuplicateBlock,

    /// The transaction is already present in the mempool.
    #[error("duplicate transaction")]
    DuplicateTransaction,
}

impl ErrorKind {
    #[must_use]
    pub fn invalid_transaction(reason: impl Into<String>) -> Self {
        Self::InvalidTransaction {
            reason: reason.into(),
        }
    }

    #[must_use]
    pub fn invalid_block(reason: impl Into<String>) -> Self {
        Self::InvalidBlock {
            reason: reason.into(),
        }
    }

    #[must_use]
    pub fn context(reason: impl Into<String>) -> Self {
        Self::Context {
            reason: reason.into(),
        }
    }
}
