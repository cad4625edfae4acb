//! Transactions: coinbase and spending, with a canonical encoding and a
//! signing header that excludes the very signatures it is signed into.
//!
//! Inputs and outputs carry `Address`/`PublicKey`/`Signature` directly
//! instead of a script: there is no script interpreter here, so ownership
//! and spending authority are checked structurally rather than evaluated.
//! Transaction identity is the canonical encoding run through `SHA256d`,
//! never a JSON or other variable-width serialization.

use crate::codec::{Codec, Reader, Writer};
use shared::error::ErrorKind;
use shared::{Address, Hash256, PublicKey, Signature};

/// Marks the single input of a coinbase transaction: it spends no real
/// output, so `prev_tx_hash` is the zero hash and `prev_txout_index` is
/// `u32::MAX`, a pair no real outpoint can ever produce.
pub const COINBASE_PREV_TXOUT_INDEX: u32 = u32::MAX;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TxInput {
    pub prev_tx_hash: Hash256,
    pub prev_txout_index: u32,
    pub signature: Signature,
    pub public_key: PublicKey,
}

impl TxInput {
    #[must_use]
    pub const fn is_coinbase_input(&self) -> bool {
        self.prev_tx_hash.is_zero() && self.prev_txout_index == COINBASE_PREV_TXOUT_INDEX
    }

    fn encode_signing(&self, w: &mut Writer) {
        w.write_hash(&self.prev_tx_hash);
        w.write_u32(self.prev_txout_index);
    }
}

impl Codec for TxInput {
    fn encode(&self, w: &mut Writer) {
        self.encode_signing(w);
        w.write_fixed(self.signature.as_bytes());
        w.write_fixed(self.public_key.as_bytes());
    }

    fn decode(r: &mut Reader) -> Result<Self, ErrorKind> {
        let prev_tx_hash = r.read_hash()?;
        let prev_txout_index = r.read_u32()?;
        let signature = Signature::from_bytes(&r.read_fixed(64)?)?;
        let public_key = PublicKey::from_bytes(&r.read_fixed(32)?)?;
        Ok(Self {
            prev_tx_hash,
            prev_txout_index,
            signature,
            public_key,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TxOutput {
    pub amount: u64,
    pub address: Address,
}

impl Codec for TxOutput {
    fn encode(&self, w: &mut Writer) {
        w.write_u64(self.amount);
        w.write_fixed(&self.address.to_bytes());
    }

    fn decode(r: &mut Reader) -> Result<Self, ErrorKind> {
        let amount = r.read_u64()?;
        let address_bytes = r.read_fixed(shared::ADDRESS_SIZE)?;
        let address = Address::from_bytes(&address_bytes)?;
        Ok(Self { amount, address })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transaction {
    pub id: Hash256,
    pub inputs: Vec<TxInput>,
    pub outputs: Vec<TxOutput>,
}

impl Transaction {
    /// Builds a transaction from its inputs and outputs, computing `id`.
    #[must_use]
    pub fn new(inputs: Vec<TxInput>, outputs: Vec<TxOutput>) -> Self {
        let id = Self::compute_id(&inputs, &outputs);
        Self { id, inputs, outputs }
    }

    /// Builds the coinbase transaction for a block, paying `reward` to
    /// `address`. Height is not encoded anywhere in the transaction; it is
    /// tracked by the chain manager's index, not by coinbase data.
    #[must_use]
    pub fn coinbase(reward: u64, address: Address) -> Self {
        let input = TxInput {
            prev_tx_hash: Hash256::zero(),
            prev_txout_index: COINBASE_PREV_TXOUT_INDEX,
            signature: Signature::from_bytes(&[0u8; 64]).expect("64 zero bytes is a valid length"),
            public_key: zero_public_key(),
        };
        Self::new(vec![input], vec![TxOutput { amount: reward, address }])
    }

    #[must_use]
    pub fn is_coinbase(&self) -> bool {
        self.inputs.len() == 1 && self.inputs[0].is_coinbase_input()
    }

    /// The bytes that `id` is the `SHA256d` of, and the bytes each non-coinbase
    /// input's `signature` signs: inputs contribute only `prev_tx_hash` and
    /// `prev_txout_index` (never the signature or public key being produced),
    /// and outputs contribute `amount` and `address` in full.
    #[must_use]
    pub fn signing_header(&self) -> Vec<u8> {
        let mut w = Writer::new();
        w.write_vec(&self.inputs, |w, input| input.encode_signing(w));
        w.write_vec(&self.outputs, |w, output| output.encode(w));
        w.into_bytes()
    }

    fn compute_id(inputs: &[TxInput], outputs: &[TxOutput]) -> Hash256 {
        let mut w = Writer::new();
        w.write_vec(inputs, |w, input| input.encode_signing(w));
        w.write_vec(outputs, |w, output| output.encode(w));
        Hash256::sha256d(&w.into_bytes())
    }

    #[must_use]
    pub fn total_output_value(&self) -> Option<u64> {
        self.outputs.iter().try_fold(0u64, |acc, o| acc.checked_add(o.amount))
    }

    /// Context-free structural checks: nonempty inputs/outputs (coinbase
    /// excepted for inputs), a well-formed coinbase shape, no output
    /// claiming a zero amount, no internal overflow, and an id consistent
    /// with the content.
    pub fn validate_basic(&self) -> Result<(), ErrorKind> {
        if self.outputs.is_empty() {
            return Err(ErrorKind::invalid_transaction("transaction has no outputs"));
        }
        if self.outputs.iter().any(|o| o.amount == 0) {
            return Err(ErrorKind::invalid_transaction("output amount is zero"));
        }
        if self.total_output_value().is_none() {
            return Err(ErrorKind::invalid_transaction("output total overflows u64"));
        }

        let is_coinbase = self.is_coinbase();
        if is_coinbase {
            if self.outputs.len() != 1 {
                return Err(ErrorKind::invalid_transaction(
                    "coinbase must have exactly one output",
                ));
            }
        } else {
            if self.inputs.is_empty() {
                return Err(ErrorKind::invalid_transaction("transaction has no inputs"));
            }
            if self.inputs.iter().any(TxInput::is_coinbase_input) {
                return Err(ErrorKind::invalid_transaction(
                    "non-coinbase transaction has a coinbase-shaped input",
                ));
            }
            let mut seen = std::collections::HashSet::with_capacity(self.inputs.len());
            for input in &self.inputs {
                if !seen.insert((input.prev_tx_hash, input.prev_txout_index)) {
                    return Err(ErrorKind::invalid_transaction(
                        "transaction spends the same outpoint twice",
                    ));
                }
            }
        }

        if Self::compute_id(&self.inputs, &self.outputs) != self.id {
            return Err(ErrorKind::invalid_transaction("id does not match content"));
        }
        Ok(())
    }

    /// Verifies every non-coinbase input's signature over the signing
    /// header, against the public key carried on that same input.
    pub fn validate_signatures(&self) -> Result<(), ErrorKind> {
        if self.is_coinbase() {
            return Ok(());
        }
        let header = self.signing_header();
        for (i, input) in self.inputs.iter().enumerate() {
            if !shared::verify_signature(&input.public_key, &header, &input.signature) {
                return Err(ErrorKind::invalid_transaction(format!(
                    "input {i} has an invalid signature"
                )));
            }
        }
        Ok(())
    }

    #[must_use]
    pub fn encoded_size(&self) -> usize {
        self.to_bytes().len()
    }
}

impl Codec for Transaction {
    fn encode(&self, w: &mut Writer) {
        w.write_vec(&self.inputs, |w, input| input.encode(w));
        w.write_vec(&self.outputs, |w, output| output.encode(w));
    }

    fn decode(r: &mut Reader) -> Result<Self, ErrorKind> {
        let inputs: Vec<TxInput> = r.read_vec(TxInput::decode)?;
        let outputs: Vec<TxOutput> = r.read_vec(TxOutput::decode)?;
        Ok(Self::new(inputs, outputs))
    }
}

fn zero_public_key() -> PublicKey {
    // Ed25519 rejects the all-zero byte string as a curve point, so the
    // coinbase's unused public-key slot uses the well-known identity
    // encoding instead: the first byte set, rest zero, which dalek accepts
    // as a (torsion) point without needing a real keypair.
    let mut bytes = [0u8; 32];
    bytes[0] = 1;
    PublicKey::from_bytes(&bytes).expect("identity point is a valid compressed Edwards point")
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared::KeyPair;

    fn sample_address() -> Address {
        let keypair = KeyPair::generate();
        Address::from_public_key(&keypair.public_key(), 0)
    }

    #[test]
    fn coinbase_roundtrips_through_bytes() {
        let tx = Transaction::coinbase(5_000_000_000, sample_address());
        let bytes = tx.to_bytes();
        let decoded = Transaction::from_bytes(&bytes).unwrap();
        assert_eq!(tx.id, decoded.id);
        assert!(decoded.is_coinbase());
    }

    #[test]
    fn coinbase_passes_basic_validation() {
        let tx = Transaction::coinbase(5_000_000_000, sample_address());
        assert!(tx.validate_basic().is_ok());
    }

    #[test]
    fn spending_transaction_signature_roundtrips() {
        let keypair = KeyPair::generate();
        let prev_tx = Transaction::coinbase(1000, sample_address());
        let input_template = TxInput {
            prev_tx_hash: prev_tx.id,
            prev_txout_index: 0,
            signature: Signature::from_bytes(&[0u8; 64]).unwrap(),
            public_key: keypair.public_key(),
        };
        let outputs = vec![TxOutput {
            amount: 900,
            address: sample_address(),
        }];
        let unsigned = Transaction::new(vec![input_template.clone()], outputs.clone());
        let sig = keypair.sign(&unsigned.signing_header());
        let mut signed_input = input_template;
        signed_input.signature = sig;
        let signed = Transaction::new(vec![signed_input], outputs);

        assert!(signed.validate_basic().is_ok());
        assert!(signed.validate_signatures().is_ok());
    }

    #[test]
    fn tampered_amount_fails_signature_check() {
        let keypair = KeyPair::generate();
        let prev_tx = Transaction::coinbase(1000, sample_address());
        let input_template = TxInput {
            prev_tx_hash: prev_tx.id,
            prev_txout_index: 0,
            signature: Signature::from_bytes(&[0u8; 64]).unwrap(),
            public_key: keypair.public_key(),
        };
        let outputs = vec![TxOutput {
            amount: 900,
            address: sample_address(),
        }];
        let unsigned = Transaction::new(vec![input_template.clone()], outputs.clone());
        let sig = keypair.sign(&unsigned.signing_header());
        let mut signed_input = input_template;
        signed_input.signature = sig;

        let mut tampered_outputs = outputs;
        tampered_outputs[0].amount = 999_999;
        let tampered = Transaction::new(vec![signed_input], tampered_outputs);

        assert!(tampered.validate_signatures().is_err());
    }

    #[test]
    fn duplicate_outpoints_are_rejected() {
        let keypair = KeyPair::generate();
        let prev_tx_hash = Hash256::sha256d(b"fake prev tx");
        let input = TxInput {
            prev_tx_hash,
            prev_txout_index: 0,
            signature: Signature::from_bytes(&[0u8; 64]).unwrap(),
            public_key: keypair.public_key(),
        };
        let tx = Transaction::new(
            vec![input.clone(), input],
            vec![TxOutput {
                amount: 1,
                address: sample_address(),
            }],
        );
        assert!(tx.validate_basic().is_err());
    }

    #[test]
    fn zero_amount_output_is_rejected() {
        let tx = Transaction::coinbase(0, sample_address());
        assert!(tx.validate_basic().is_err());
    }
}
