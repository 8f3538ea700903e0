//! Key-agreement contexts: the opaque, algorithm-keyed state a channel
//! holds while a DHPart1/DHPart2 (or Commit-carried KEM) exchange is in
//! flight, destroyed immediately after `s0` derivation.
//!
//! Modelled as a sum type keyed by algorithm kind per spec.md §9's
//! redesign note, rather than a trait object, so the channel can hold
//! exactly one live context without dynamic dispatch.

use num_bigint::BigUint;
use p384::ecdh::diffie_hellman as p384_diffie_hellman;
use p384::{PublicKey as P384PublicKey, SecretKey as P384SecretKey};
use rand::rngs::OsRng;
use rand::RngCore;
use x25519_dalek::{PublicKey as X25519PublicKey, StaticSecret as X25519StaticSecret};
use zeroize::Zeroizing;

use crate::error::CryptoError;
use crate::primitives::KeyAgreementAlgorithm;

/// RFC 3526 group 15: a 3072-bit MODP group. `DH3k` in the ZRTP algorithm
/// list names its bit size, not a specific RFC group, but this is the
/// standard 3072-bit group used wherever ZRTP implementations ship DH3k.
const DH3K_PRIME_HEX: &str = concat!(
    "FFFFFFFFFFFFFFFFC90FDAA22168C234C4C6628B80DC1CD129024E08",
    "8A67CC74020BBEA63B139B22514A08798E3404DDEF9519B3CD3A431B",
    "302B0A6DF25F14374FE1356D6D51C245E485B576625E7EC6F44C42E9",
    "A637ED6B0BFF5CB6F406B7EDEE386BFB5A899FA5AE9F24117C4B1FE6",
    "49286651ECE45B3DC2007CB8A163BF0598DA48361C55D39A69163FA8",
    "FD24CF5F83655D23DCA3AD961C62F356208552BB9ED529077096966D",
    "670C354E4ABC9804F1746C08CA18217C32905E462E36CE3BE39E772C",
    "180E86039B2783A2EC07A28FB5C55DF06F4C52C9DE2BCBF6955817183995497CEA956AE515D2261898FA051015728E5A8AACAA68FFFFFFFFFFFFFFFF",
);
const DH3K_GENERATOR: u64 = 2;

fn dh3k_prime() -> BigUint {
    BigUint::parse_bytes(DH3K_PRIME_HEX.as_bytes(), 16)
        .expect("DH3K_PRIME_HEX is a valid hex literal")
}

/// A generated key pair plus whatever this channel needs to keep around
/// until the shared secret has been consumed into `s0`.
pub enum KeyAgreementContext {
    Dh3k {
        secret: Zeroizing<BigUint>,
        public: BigUint,
    },
    Ec25 {
        secret: X25519StaticSecret,
        public: X25519PublicKey,
    },
    Ec38 {
        secret: P384SecretKey,
        public: P384PublicKey,
    },
    /// Initiator side: the key pair shipped in Commit, awaiting the
    /// responder's encapsulation in DHPart1.
    Kem1Initiator {
        secret: Zeroizing<Vec<u8>>,
        public: Vec<u8>,
    },
}

impl KeyAgreementContext {
    pub fn generate(alg: KeyAgreementAlgorithm) -> Result<Self, CryptoError> {
        match alg {
            KeyAgreementAlgorithm::Dh3k => {
                let prime = dh3k_prime();
                let mut secret_bytes = vec![0u8; 384];
                OsRng.fill_bytes(&mut secret_bytes);
                let secret = BigUint::from_bytes_be(&secret_bytes) % (&prime - 2u32) + 2u32;
                let public = BigUint::from(DH3K_GENERATOR).modpow(&secret, &prime);
                Ok(Self::Dh3k {
                    secret: Zeroizing::new(secret),
                    public,
                })
            }
            KeyAgreementAlgorithm::Ec25 => {
                let secret = X25519StaticSecret::random_from_rng(OsRng);
                let public = X25519PublicKey::from(&secret);
                Ok(Self::Ec25 { secret, public })
            }
            KeyAgreementAlgorithm::Ec38 => {
                let secret = P384SecretKey::random(&mut OsRng);
                let public = secret.public_key();
                Ok(Self::Ec38 { secret, public })
            }
            KeyAgreementAlgorithm::Kem1 => kyber::generate_initiator_keypair(),
            other => Err(CryptoError::UnsupportedAlgorithm(format!(
                "{other} has no generated key pair (multistream/preshared reuse prior state)"
            ))),
        }
    }

    /// Serialises this side's public value for the DHPart/Commit `pv` field.
    pub fn public_value_bytes(&self) -> Vec<u8> {
        match self {
            Self::Dh3k { public, .. } => public.to_bytes_be(),
            Self::Ec25 { public, .. } => public.as_bytes().to_vec(),
            Self::Ec38 { public, .. } => public.to_sec1_bytes().to_vec(),
            Self::Kem1Initiator { public, .. } => public.clone(),
        }
    }

    /// Consumes this context and the peer's public value into a shared
    /// secret (DH/EC modes). For KEM modes use [`Self::decapsulate`].
    pub fn agree(self, peer_public: &[u8]) -> Result<Zeroizing<Vec<u8>>, CryptoError> {
        match self {
            Self::Dh3k { secret, .. } => {
                let prime = dh3k_prime();
                let peer = BigUint::from_bytes_be(peer_public);
                if peer <= BigUint::from(1u32) || peer >= &prime - 1u32 {
                    return Err(CryptoError::KeyAgreement(
                        "peer DH public value out of range".into(),
                    ));
                }
                let shared = peer.modpow(&secret, &prime);
                Ok(Zeroizing::new(shared.to_bytes_be()))
            }
            Self::Ec25 { secret, .. } => {
                let peer_bytes: [u8; 32] = peer_public.try_into().map_err(|_| {
                    CryptoError::KeyAgreement("EC25 public value must be 32 bytes".into())
                })?;
                let peer = X25519PublicKey::from(peer_bytes);
                let shared = secret.diffie_hellman(&peer);
                Ok(Zeroizing::new(shared.as_bytes().to_vec()))
            }
            Self::Ec38 { secret, .. } => {
                let peer = P384PublicKey::from_sec1_bytes(peer_public).map_err(|_| {
                    CryptoError::KeyAgreement("invalid EC38 peer public value".into())
                })?;
                let shared = p384_diffie_hellman(
                    secret.to_nonzero_scalar(),
                    peer.as_affine(),
                );
                Ok(Zeroizing::new(shared.raw_secret_bytes().to_vec()))
            }
            Self::Kem1Initiator { secret, .. } => kyber::decapsulate(&secret, peer_public),
        }
    }

    /// Responder side of KEM1: generates an encapsulation against the
    /// initiator's Commit-carried public key, returning the ciphertext to
    /// place in DHPart1 and the shared secret to consume into `s0`.
    pub fn responder_encapsulate(
        initiator_public: &[u8],
    ) -> Result<(Vec<u8>, Zeroizing<Vec<u8>>), CryptoError> {
        kyber::encapsulate(initiator_public)
    }
}

/// Thin adapter isolating the exact `kyber-kem` crate call shapes, so a
/// crate-version bump only touches this module.
mod kyber {
    use super::*;

    pub fn generate_initiator_keypair() -> Result<KeyAgreementContext, CryptoError> {
        let keypair = kyber_kem::Keypair::generate(&mut OsRng)
            .map_err(|e| CryptoError::KeyGeneration(format!("KEM1 keygen: {e}")))?;
        Ok(KeyAgreementContext::Kem1Initiator {
            secret: Zeroizing::new(keypair.secret.as_ref().to_vec()),
            public: keypair.public.as_ref().to_vec(),
        })
    }

    pub fn encapsulate(
        initiator_public: &[u8],
    ) -> Result<(Vec<u8>, Zeroizing<Vec<u8>>), CryptoError> {
        let (ciphertext, shared_secret) = kyber_kem::encapsulate(initiator_public, &mut OsRng)
            .map_err(|e| CryptoError::KeyAgreement(format!("KEM1 encapsulate: {e}")))?;
        Ok((
            ciphertext.as_ref().to_vec(),
            Zeroizing::new(shared_secret.as_ref().to_vec()),
        ))
    }

    pub fn decapsulate(
        secret: &[u8],
        ciphertext: &[u8],
    ) -> Result<Zeroizing<Vec<u8>>, CryptoError> {
        let shared_secret = kyber_kem::decapsulate(secret, ciphertext)
            .map_err(|e| CryptoError::KeyAgreement(format!("KEM1 decapsulate: {e}")))?;
        Ok(Zeroizing::new(shared_secret.as_ref().to_vec()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ec25_agreement_matches_both_sides() {
        let a = KeyAgreementContext::generate(KeyAgreementAlgorithm::Ec25).unwrap();
        let b = KeyAgreementContext::generate(KeyAgreementAlgorithm::Ec25).unwrap();
        let a_pub = a.public_value_bytes();
        let b_pub = b.public_value_bytes();
        let shared_a = a.agree(&b_pub).unwrap();
        let shared_b = b.agree(&a_pub).unwrap();
        assert_eq!(*shared_a, *shared_b);
    }

    #[test]
    fn ec38_agreement_matches_both_sides() {
        let a = KeyAgreementContext::generate(KeyAgreementAlgorithm::Ec38).unwrap();
        let b = KeyAgreementContext::generate(KeyAgreementAlgorithm::Ec38).unwrap();
        let a_pub = a.public_value_bytes();
        let b_pub = b.public_value_bytes();
        let shared_a = a.agree(&b_pub).unwrap();
        let shared_b = b.agree(&a_pub).unwrap();
        assert_eq!(*shared_a, *shared_b);
    }

    #[test]
    fn dh3k_agreement_matches_both_sides() {
        let a = KeyAgreementContext::generate(KeyAgreementAlgorithm::Dh3k).unwrap();
        let b = KeyAgreementContext::generate(KeyAgreementAlgorithm::Dh3k).unwrap();
        let a_pub = a.public_value_bytes();
        let b_pub = b.public_value_bytes();
        let shared_a = a.agree(&b_pub).unwrap();
        let shared_b = b.agree(&a_pub).unwrap();
        assert_eq!(*shared_a, *shared_b);
    }

    #[test]
    fn multistream_has_no_generated_context() {
        let err = KeyAgreementContext::generate(KeyAgreementAlgorithm::Mult).unwrap_err();
        assert!(matches!(err, CryptoError::UnsupportedAlgorithm(_)));
    }
}
