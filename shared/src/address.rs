//! Addresses: a version byte, a 20-byte `RIPEMD160(SHA256(pubkey))` payload,
//! and a 4-byte checksum, the same versioned+checksum shape most base58check
//! address formats use.

use crate::crypto::PublicKey;
use crate::error::ErrorKind;
use crate::hash::Hash256;
use ripemd::Ripemd160;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

pub const ADDRESS_SIZE: usize = 25;
pub const PAYLOAD_SIZE: usize = 20;
const CHECKSUM_SIZE: usize = 4;

/// The mainnet address version byte.
pub const VERSION_MAINNET: u8 = 0x00;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Address {
    version: u8,
    payload: [u8; PAYLOAD_SIZE],
    checksum: [u8; CHECKSUM_SIZE],
}

impl Address {
    /// Derives the address for `public_key` under `version`.
    #[must_use]
    pub fn from_public_key(public_key: &PublicKey, version: u8) -> Self {
        let payload = hash160(public_key.as_bytes());
        Self::from_parts(version, payload)
    }

    fn from_parts(version: u8, payload: [u8; PAYLOAD_SIZE]) -> Self {
        let checksum = compute_checksum(version, &payload);
        Self {
            version,
            payload,
            checksum,
        }
    }

    /// Parses a 25-byte address and validates its checksum.
    pub fn from_bytes(bytes: &[u8]) -> crate::Result<Self> {
        if bytes.len() != ADDRESS_SIZE {
            return Err(ErrorKind::Codec(format!(
                "address must be {ADDRESS_SIZE} bytes, got {}",
                bytes.len()
            )));
        }
        let version = bytes[0];
        let mut payload = [0u8; PAYLOAD_SIZE];
        payload.copy_from_slice(&bytes[1..1 + PAYLOAD_SIZE]);
        let mut checksum = [0u8; CHECKSUM_SIZE];
        checksum.copy_from_slice(&bytes[1 + PAYLOAD_SIZE..]);

        let expected = compute_checksum(version, &payload);
        if checksum != expected {
            return Err(ErrorKind::invalid_transaction("address checksum mismatch"));
        }
        Ok(Self {
            version,
            payload,
            checksum,
        })
    }

    #[must_use]
    pub fn to_bytes(self) -> [u8; ADDRESS_SIZE] {
        let mut out = [0u8; ADDRESS_SIZE];
        out[0] = self.version;
        out[1..1 + PAYLOAD_SIZE].copy_from_slice(&self.payload);
        out[1 + PAYLOAD_SIZE..].copy_from_slice(&self.checksum);
        out
    }

    #[must_use]
    pub fn to_base58check(self) -> String {
        bs58::encode(self.to_bytes()).into_string()
    }

    pub fn from_base58check(s: &str) -> crate::Result<Self> {
        let bytes = bs58::decode(s)
            .into_vec()
            .map_err(|e| ErrorKind::Codec(format!("invalid base58: {e}")))?;
        Self::from_bytes(&bytes)
    }

    /// Re-validates the checksum against the stored version+payload.
    #[must_use]
    pub fn is_valid(&self) -> bool {
        compute_checksum(self.version, &self.payload) == self.checksum
    }

    #[must_use]
    pub const fn version(&self) -> u8 {
        self.version
    }

    #[must_use]
    pub const fn payload(&self) -> &[u8; PAYLOAD_SIZE] {
        &self.payload
    }
}

fn hash160(data: &[u8]) -> [u8; PAYLOAD_SIZE] {
    let sha = Sha256::digest(data);
    let ripemd = Ripemd160::digest(sha);
    let mut out = [0u8; PAYLOAD_SIZE];
    out.copy_from_slice(&ripemd);
    out
}

fn compute_checksum(version: u8, payload: &[u8; PAYLOAD_SIZE]) -> [u8; CHECKSUM_SIZE] {
    let mut buf = Vec::with_capacity(1 + PAYLOAD_SIZE);
    buf.push(version);
    buf.extend_from_slice(payload);
    let full = Hash256::sha256d(&buf);
    let mut out = [0u8; CHECKSUM_SIZE];
    out.copy_from_slice(&full.as_bytes()[..CHECKSUM_SIZE]);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn address_from_public_key_has_valid_checksum() {
        let keypair = crate::crypto::KeyPair::generate();
        let address = Address::from_public_key(&keypair.public_key(), VERSION_MAINNET);
        assert!(address.is_valid());
    }

    #[test]
    fn address_roundtrips_through_bytes() {
        let keypair = crate::crypto::KeyPair::generate();
        let address = Address::from_public_key(&keypair.public_key(), VERSION_MAINNET);
        let bytes = address.to_bytes();
        let restored = Address::from_bytes(&bytes).unwrap();
        assert_eq!(address, restored);
    }

    #[test]
    fn address_roundtrips_through_base58check() {
        let keypair = crate::crypto::KeyPair::generate();
        let address = Address::from_public_key(&keypair.public_key(), VERSION_MAINNET);
        let encoded = address.to_base58check();
        let restored = Address::from_base58check(&encoded).unwrap();
        assert_eq!(address, restored);
    }

    #[test]
    fn tampered_checksum_is_rejected() {
        let keypair = crate::crypto::KeyPair::generate();
        let address = Address::from_public_key(&keypair.public_key(), VERSION_MAINNET);
        let mut bytes = address.to_bytes();
        bytes[ADDRESS_SIZE - 1] ^= 0xFF;
        assert!(Address::from_bytes(&bytes).is_err());
    }
}
