//! Proof-of-work: compact target encoding and difficulty retargeting.
//!
//! `bits` packs a 256-bit target as `mantissa * 256^(exponent - 3)`: the top
//! byte is the exponent, the low three bytes are the mantissa. A block's
//! hash, read as a big-endian 256-bit integer, must be `<= target`.
//!
//! Generalizes the teacher's `DifficultyAdjuster` (which scaled a
//! leading-zero-bit count) to scale an actual 256-bit target instead, using
//! the same clamp-to-`[0.25, 4.0]` policy.

use shared::Hash256;

/// The highest target any block may satisfy (lowest difficulty floor).
pub const MAX_TARGET_BITS: u32 = 0x1f00_ffff;

/// Expands compact `bits` into a 32-byte big-endian target magnitude.
#[must_use]
pub fn bits_to_target(bits: u32) -> [u8; 32] {
    let exponent = (bits >> 24) as u8;
    let mantissa = bits & 0x00ff_ffff;
    let mut target = [0u8; 32];

    if exponent <= 3 {
        // Mantissa bytes land within the low 3 bytes, right-shifted.
        let shift = 3 - exponent as u32;
        let mantissa = mantissa >> (shift * 8);
        target[29..32].copy_from_slice(&mantissa.to_be_bytes()[1..]);
    } else {
        let exponent = exponent as usize;
        if exponent > 32 {
            // Overflows a 256-bit target; clamp to the maximum representable.
            return [0xff; 32];
        }
        let mantissa_bytes = mantissa.to_be_bytes(); // 4 bytes, top byte is always 0
        let start = 32 - exponent;
        target[start..start + 3].copy_from_slice(&mantissa_bytes[1..]);
    }
    target
}

/// Compacts a 32-byte big-endian target magnitude into `bits`, the inverse of
/// [`bits_to_target`]. Used when re-deriving a compact encoding after scaling
/// a target during retargeting.
#[must_use]
pub fn target_to_bits(target: &[u8; 32]) -> u32 {
    // Find the first nonzero byte (most significant).
    let first_nonzero = target.iter().position(|&b| b != 0);
    let Some(first_nonzero) = first_nonzero else {
        return 0;
    };
    let exponent = 32 - first_nonzero;
    let mut mantissa_bytes = [0u8; 3];
    for (i, byte) in mantissa_bytes.iter_mut().enumerate() {
        *byte = target.get(first_nonzero + i).copied().unwrap_or(0);
    }
    // If the mantissa's top bit is set it would be interpreted as negative in
    // some compact encodings; shift down and bump the exponent to stay safe.
    if mantissa_bytes[0] & 0x80 != 0 {
        let mantissa = u32::from_be_bytes([0, mantissa_bytes[0], mantissa_bytes[1], mantissa_bytes[2]]);
        let shifted = mantissa >> 8;
        return (((exponent + 1) as u32) << 24) | shifted;
    }
    let mantissa = u32::from_be_bytes([0, mantissa_bytes[0], mantissa_bytes[1], mantissa_bytes[2]]);
    ((exponent as u32) << 24) | mantissa
}

/// `true` if `hash`, read as a big-endian integer, is `<= target(bits)`.
#[must_use]
pub fn meets_target(hash: &Hash256, bits: u32) -> bool {
    let target = bits_to_target(bits);
    hash.as_bytes().as_slice() <= target.as_slice()
}

/// Scales `current_bits`'s target by `actual_span / expected_span`, clamped
/// to `[1/4, 4]` of the previous target and never exceeding `MAX_TARGET_BITS`.
#[must_use]
pub fn retarget(current_bits: u32, actual_span_secs: u64, expected_span_secs: u64) -> u32 {
    let current_target = bits_to_target(current_bits);
    let ratio = (actual_span_secs as f64 / expected_span_secs as f64).clamp(0.25, 4.0);

    let scaled = scale_target(&current_target, ratio);
    let max_target = bits_to_target(MAX_TARGET_BITS);
    let clamped = if scaled.as_slice() > max_target.as_slice() {
        max_target
    } else {
        scaled
    };
    target_to_bits(&clamped)
}

/// Multiplies a 256-bit big-endian magnitude by a positive `f64` factor,
/// by representing the factor as a fixed-point rational `num/den` and
/// computing `floor(target * num / den)` via schoolbook long
/// multiplication/division, avoiding a bignum dependency for this one
/// arithmetic operation.
fn scale_target(target: &[u8; 32], factor: f64) -> [u8; 32] {
    const SCALE: u64 = 1 << 20;
    #[allow(clippy::cast_possible_truncation)]
    let num = (factor * SCALE as f64).round() as u128;
    let den = SCALE as u128;
    long_div_mul(target, num, den)
}

/// Computes `floor(target_as_u256 * num / den)` via schoolbook long
/// multiplication/division on the big-endian byte representation.
fn long_div_mul(target: &[u8; 32], num: u128, den: u128) -> [u8; 32] {
    // Step 1: target * num, as a big-endian byte array with u128 carry.
    let mut product = [0u128; 32];
    let mut carry: u128 = 0;
    for i in (0..32).rev() {
        let v = target[i] as u128 * num + carry;
        product[i] = v & 0xff;
        carry = v >> 8;
    }
    // Any carry beyond the top byte saturates the result to all-ones.
    if carry != 0 {
        return [0xff; 32];
    }

    // Step 2: divide the 256-bit product by `den` via long division.
    let mut out = [0u8; 32];
    let mut rem: u128 = 0;
    for i in 0..32 {
        let cur = (rem << 8) | product[i];
        out[i] = (cur / den) as u8;
        rem = cur % den;
    }
    out
}
