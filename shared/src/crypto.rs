//! Ed25519 signing and verification.
//!
//! `KeyPair`/`PublicKey`/`Signature` wrap Ed25519 directly: every
//! non-coinbase input signs a transaction's signing header (§4.4) with a
//! 64-byte signature and a 32-byte public key, both carried on the wire
//! verbatim.

use crate::error::ErrorKind;
use ed25519_dalek::{Signature as DalekSignature, Signer, SigningKey, Verifier, VerifyingKey};
use rand_core::OsRng;
use serde::{Deserialize, Serialize};

pub const PUBLIC_KEY_SIZE: usize = 32;
pub const SIGNATURE_SIZE: usize = 64;

/// An Ed25519 public key, stored as raw bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublicKey([u8; PUBLIC_KEY_SIZE]);

impl PublicKey {
    pub fn from_bytes(bytes: &[u8]) -> crate::Result<Self> {
        let arr: [u8; PUBLIC_KEY_SIZE] = bytes
            .try_into()
            .map_err(|_| ErrorKind::Codec("public key must be 32 bytes".into()))?;
        // Reject keys that don't decompress to a valid curve point up front,
        // so callers get a clean error instead of a failed verify later.
        VerifyingKey::from_bytes(&arr)
            .map_err(|_| ErrorKind::invalid_transaction("malformed public key"))?;
        Ok(Self(arr))
    }

    #[must_use]
    pub const fn as_bytes(&self) -> &[u8; PUBLIC_KEY_SIZE] {
        &self.0
    }
}

/// A signing keypair. The underlying secret scalar is zeroized on drop by
/// `ed25519_dalek::SigningKey`.
pub struct KeyPair {
    public: PublicKey,
    inner: SigningKey,
}

impl KeyPair {
    /// Generates a fresh random keypair.
    #[must_use]
    pub fn generate() -> Self {
        let mut csprng = OsRng;
        let inner = SigningKey::generate(&mut csprng);
        let public = PublicKey(inner.verifying_key().to_bytes());
        Self { public, inner }
    }

    /// Derives a keypair deterministically from a 32-byte seed. Used to
    /// produce a reproducible compiled-in genesis reward key rather than a
    /// fresh random one on every run.
    pub fn from_seed(seed: [u8; 32]) -> crate::Result<Self> {
        let inner = SigningKey::from_bytes(&seed);
        let public = PublicKey(inner.verifying_key().to_bytes());
        Ok(Self { public, inner })
    }

    #[must_use]
    pub const fn public_key(&self) -> PublicKey {
        self.public
    }

    /// Signs `message`, returning a 64-byte Ed25519 signature.
    #[must_use]
    pub fn sign(&self, message: &[u8]) -> Signature {
        let sig = self.inner.sign(message);
        Signature(sig.to_bytes())
    }
}

/// An Ed25519 signature, stored as raw bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Signature([u8; SIGNATURE_SIZE]);

impl Signature {
    pub fn from_bytes(bytes: &[u8]) -> crate::Result<Self> {
        let arr: [u8; SIGNATURE_SIZE] = bytes
            .try_into()
            .map_err(|_| ErrorKind::Codec("signature must be 64 bytes".into()))?;
        Ok(Self(arr))
    }

    #[must_use]
    pub const fn as_bytes(&self) -> &[u8; SIGNATURE_SIZE] {
        &self.0
    }
}

/// Signs `message` with `keypair`.
#[must_use]
pub fn sign_message(keypair: &KeyPair, message: &[u8]) -> Signature {
    keypair.sign(message)
}

/// Verifies `signature` over `message` against `public_key`. Returns `false`
/// on any malformed input rather than propagating an error — signature
/// failure is just one more reason a transaction is invalid.
#[must_use]
pub fn verify_signature(public_key: &PublicKey, message: &[u8], signature: &Signature) -> bool {
    let Ok(dalek_key) = VerifyingKey::from_bytes(&public_key.0) else {
        return false;
    };
    let dalek_sig = DalekSignature::from_bytes(&signature.0);
    dalek_key.verify(message, &dalek_sig).is_ok()
}
