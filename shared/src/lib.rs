pub mod address;
pub mod crypto;
pub mod error;
pub mod hash;

pub use address::Address;
pub use crypto::{sign_message, verify_signature, KeyPair, PublicKey, Signature};
pub use error::ErrorKind;
pub use hash::Hash256;

pub type Result<T> = std::result::Result<T, ErrorKind>;

/// Size in bytes of a [`Hash256`].
pub const HASH_SIZE: usize = 32;
/// Size in bytes of an [`Address`] (version + payload + checksum).
pub const ADDRESS_SIZE: usize = 25;
