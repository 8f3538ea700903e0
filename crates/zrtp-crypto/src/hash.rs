//! Hash and HMAC primitives, dispatched on the negotiated [`HashAlgorithm`].
//!
//! Kept as a small, pure adapter over `sha2`/`hmac` so the rest of the crate
//! never names a concrete digest type directly.

use hmac::{Hmac, Mac};
use sha2::{Digest, Sha256, Sha384};

use crate::primitives::HashAlgorithm;

/// `H(data)` for the negotiated algorithm.
pub fn hash(alg: HashAlgorithm, data: &[u8]) -> Vec<u8> {
    match alg {
        HashAlgorithm::S256 => Sha256::digest(data).to_vec(),
        HashAlgorithm::S384 => Sha384::digest(data).to_vec(),
    }
}

/// `H(a ‖ b)` without allocating the concatenation first.
pub fn hash_concat(alg: HashAlgorithm, parts: &[&[u8]]) -> Vec<u8> {
    match alg {
        HashAlgorithm::S256 => {
            let mut h = Sha256::new();
            for p in parts {
                h.update(p);
            }
            h.finalize().to_vec()
        }
        HashAlgorithm::S384 => {
            let mut h = Sha384::new();
            for p in parts {
                h.update(p);
            }
            h.finalize().to_vec()
        }
    }
}

/// `HMAC(key, data)` truncated to `alg`'s full output length.
pub fn hmac(alg: HashAlgorithm, key: &[u8], data: &[u8]) -> Vec<u8> {
    match alg {
        HashAlgorithm::S256 => {
            let mut mac =
                Hmac::<Sha256>::new_from_slice(key).expect("HMAC accepts keys of any length");
            mac.update(data);
            mac.finalize().into_bytes().to_vec()
        }
        HashAlgorithm::S384 => {
            let mut mac =
                Hmac::<Sha384>::new_from_slice(key).expect("HMAC accepts keys of any length");
            mac.update(data);
            mac.finalize().into_bytes().to_vec()
        }
    }
}

/// `HMAC(key, data)` truncated to the first `len` bytes (used for the
/// 8-byte cached-secret hash IDs and per-message MAC fields).
pub fn hmac_truncated(alg: HashAlgorithm, key: &[u8], data: &[u8], len: usize) -> Vec<u8> {
    let mut full = hmac(alg, key, data);
    full.truncate(len);
    full
}

/// SHA-256 over arbitrary bytes, independent of the negotiated hash
/// algorithm (used for `peer_hello_hash` binding and the fragment
/// `message_id`, both fixed to SHA-256 by RFC 6189 regardless of the
/// negotiated hash).
pub fn sha256(data: &[u8]) -> [u8; 32] {
    Sha256::digest(data).into()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash_lengths_match_algorithm() {
        assert_eq!(hash(HashAlgorithm::S256, b"x").len(), 32);
        assert_eq!(hash(HashAlgorithm::S384, b"x").len(), 48);
    }

    #[test]
    fn hash_concat_matches_manual_concatenation() {
        let manual = hash(HashAlgorithm::S256, b"ab");
        let split = hash_concat(HashAlgorithm::S256, &[b"a", b"b"]);
        assert_eq!(manual, split);
    }

    #[test]
    fn hmac_truncated_is_a_prefix_of_full_hmac() {
        let full = hmac(HashAlgorithm::S256, b"key", b"data");
        let truncated = hmac_truncated(HashAlgorithm::S256, b"key", b"data", 8);
        assert_eq!(&full[..8], truncated.as_slice());
    }
}
