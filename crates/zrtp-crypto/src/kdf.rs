//! The ZRTP key-derivation function.
//!
//! `KDF(key, label, ctx, L) = HMAC(key, counter ‖ label ‖ 0x00 ‖ ctx ‖ L)`
//! with `counter = 0x00000001` and `L` the requested output length in bits,
//! encoded big-endian. This is deliberately not `hkdf::Hkdf::expand` — RFC
//! 6189 folds the counter, label, and length into a single HMAC input
//! rather than HKDF's iterated-block construction, so it is built directly
//! on `hmac` here.

use crate::hash::hmac;
use crate::primitives::HashAlgorithm;

const COUNTER: u32 = 1;

/// `L` in the RFC is the requested length *in bits*; callers here pass
/// bytes and this computes the bit length internally.
pub fn kdf(alg: HashAlgorithm, key: &[u8], label: &str, context: &[u8], out_len_bytes: usize) -> Vec<u8> {
    let l_bits = (out_len_bytes as u32) * 8;
    let mut input = Vec::with_capacity(4 + label.len() + 1 + context.len() + 4);
    input.extend_from_slice(&COUNTER.to_be_bytes());
    input.extend_from_slice(label.as_bytes());
    input.push(0x00);
    input.extend_from_slice(context);
    input.extend_from_slice(&l_bits.to_be_bytes());

    let mut out = hmac(alg, key, &input);
    out.truncate(out_len_bytes);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kdf_output_has_requested_length() {
        let out = kdf(HashAlgorithm::S256, b"s0", "ZRTP Session Key", b"ctx", 32);
        assert_eq!(out.len(), 32);
    }

    #[test]
    fn kdf_is_deterministic() {
        let a = kdf(HashAlgorithm::S256, b"s0", "SAS", b"ctx", 32);
        let b = kdf(HashAlgorithm::S256, b"s0", "SAS", b"ctx", 32);
        assert_eq!(a, b);
    }

    #[test]
    fn different_labels_produce_different_output() {
        let a = kdf(HashAlgorithm::S256, b"s0", "Initiator HMAC key", b"ctx", 32);
        let b = kdf(HashAlgorithm::S256, b"s0", "Responder HMAC key", b"ctx", 32);
        assert_ne!(a, b);
    }
}
