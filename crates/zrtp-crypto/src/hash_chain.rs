//! The fixed four-level ZRTP hash chain: `H0` random, `H1 = H(H0)`,
//! `H2 = H(H1)`, `H3 = H(H2)`.
//!
//! Revealed progressively across the handshake (`H3` in Hello, `H2` in
//! Commit, `H1` in DHPart, `H0` in Confirm) so that each later message can
//! authenticate every earlier one by a pre-image check plus an HMAC keyed
//! by the newly revealed value.

use rand::rngs::OsRng;
use rand::RngCore;

use crate::error::CryptoError;
use crate::hash::hash;
use crate::primitives::HashAlgorithm;

/// One party's own hash chain, generated locally at channel creation.
#[derive(Debug, Clone)]
pub struct HashChain {
    pub h0: Vec<u8>,
    pub h1: Vec<u8>,
    pub h2: Vec<u8>,
    pub h3: Vec<u8>,
}

impl HashChain {
    /// Generates a fresh chain: `H0` is `alg`'s output length of random
    /// bytes, the rest are derived by repeated hashing.
    pub fn generate(alg: HashAlgorithm) -> Self {
        let mut h0 = vec![0u8; alg.output_len()];
        OsRng.fill_bytes(&mut h0);
        Self::from_h0(alg, h0)
    }

    pub fn from_h0(alg: HashAlgorithm, h0: Vec<u8>) -> Self {
        let h1 = hash(alg, &h0);
        let h2 = hash(alg, &h1);
        let h3 = hash(alg, &h2);
        Self { h0, h1, h2, h3 }
    }
}

/// The peer's hash chain, filled in incrementally as the peer reveals
/// each level. Every field starts `None` and is populated by
/// [`reveal`] as the corresponding message arrives.
#[derive(Debug, Clone, Default)]
pub struct PeerHashChain {
    pub h0: Option<Vec<u8>>,
    pub h1: Option<Vec<u8>>,
    pub h2: Option<Vec<u8>>,
    pub h3: Option<Vec<u8>>,
}

/// Verifies that `preimage`, hashed once, equals the previously stored
/// `image`, recording `preimage` as the newly revealed level.
///
/// Returns `UnmatchingHashChain` on mismatch, matching spec.md's naming
/// for the hash-chain authentication failure.
fn verify_one_step(
    alg: HashAlgorithm,
    preimage: &[u8],
    image: &[u8],
) -> Result<(), CryptoError> {
    if hash(alg, preimage) == image {
        Ok(())
    } else {
        Err(CryptoError::HashChainIntegrity(
            "revealed pre-image does not hash to the stored image".into(),
        ))
    }
}

impl PeerHashChain {
    /// Hello reveals H3 with nothing yet stored to check it against; it is
    /// simply recorded as the root of trust for this channel.
    pub fn reveal_h3(&mut self, h3: Vec<u8>) {
        self.h3 = Some(h3);
    }

    /// Commit reveals H2; must hash once to the stored H3.
    pub fn reveal_h2(&mut self, alg: HashAlgorithm, h2: Vec<u8>) -> Result<(), CryptoError> {
        let h3 = self
            .h3
            .as_ref()
            .ok_or_else(|| CryptoError::HashChainIntegrity("H3 not yet known".into()))?;
        verify_one_step(alg, &h2, h3)?;
        self.h2 = Some(h2);
        Ok(())
    }

    /// DHPart reveals H1; must hash once to the stored H2.
    pub fn reveal_h1(&mut self, alg: HashAlgorithm, h1: Vec<u8>) -> Result<(), CryptoError> {
        let h2 = self
            .h2
            .as_ref()
            .ok_or_else(|| CryptoError::HashChainIntegrity("H2 not yet known".into()))?;
        verify_one_step(alg, &h1, h2)?;
        self.h1 = Some(h1);
        Ok(())
    }

    /// Confirm reveals H0 (DH/KEM modes); must hash once to the stored H1.
    pub fn reveal_h0(&mut self, alg: HashAlgorithm, h0: Vec<u8>) -> Result<(), CryptoError> {
        let h1 = self
            .h1
            .as_ref()
            .ok_or_else(|| CryptoError::HashChainIntegrity("H1 not yet known".into()))?;
        verify_one_step(alg, &h0, h1)?;
        self.h0 = Some(h0);
        Ok(())
    }

    /// Multistream/preshared Confirm skips the DHPart that would normally
    /// reveal H1, so H1 is synthesised as `H(H0)` and checked against the
    /// stored H2 directly.
    pub fn reveal_h0_synthesising_h1(
        &mut self,
        alg: HashAlgorithm,
        h0: Vec<u8>,
    ) -> Result<(), CryptoError> {
        let synthesised_h1 = hash(alg, &h0);
        let h2 = self
            .h2
            .as_ref()
            .ok_or_else(|| CryptoError::HashChainIntegrity("H2 not yet known".into()))?;
        verify_one_step(alg, &synthesised_h1, h2)?;
        self.h1 = Some(synthesised_h1);
        self.h0 = Some(h0);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chain_levels_are_consistent() {
        let chain = HashChain::generate(HashAlgorithm::S256);
        assert_eq!(hash(HashAlgorithm::S256, &chain.h0), chain.h1);
        assert_eq!(hash(HashAlgorithm::S256, &chain.h1), chain.h2);
        assert_eq!(hash(HashAlgorithm::S256, &chain.h2), chain.h3);
    }

    #[test]
    fn peer_chain_accepts_correctly_ordered_reveals() {
        let chain = HashChain::generate(HashAlgorithm::S256);
        let mut peer = PeerHashChain::default();
        peer.reveal_h3(chain.h3.clone());
        peer.reveal_h2(HashAlgorithm::S256, chain.h2.clone()).unwrap();
        peer.reveal_h1(HashAlgorithm::S256, chain.h1.clone()).unwrap();
        peer.reveal_h0(HashAlgorithm::S256, chain.h0.clone()).unwrap();
    }

    #[test]
    fn tampered_preimage_is_rejected() {
        let chain = HashChain::generate(HashAlgorithm::S256);
        let mut peer = PeerHashChain::default();
        peer.reveal_h3(chain.h3.clone());
        let mut tampered = chain.h2.clone();
        tampered[0] ^= 0xff;
        let err = peer.reveal_h2(HashAlgorithm::S256, tampered).unwrap_err();
        assert!(matches!(err, CryptoError::HashChainIntegrity(_)));
    }

    #[test]
    fn multistream_confirm_synthesises_h1() {
        let chain = HashChain::generate(HashAlgorithm::S256);
        let mut peer = PeerHashChain::default();
        peer.reveal_h3(chain.h3.clone());
        peer.reveal_h2(HashAlgorithm::S256, chain.h2.clone()).unwrap();
        peer.reveal_h0_synthesising_h1(HashAlgorithm::S256, chain.h0.clone())
            .unwrap();
        assert_eq!(peer.h1.unwrap(), chain.h1);
    }
}
