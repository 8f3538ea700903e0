//! Negotiable algorithm tokens.
//!
//! RFC 6189 identifies every negotiable primitive by a 4-character ASCII
//! token carried in Hello/Commit. This module is the single place those
//! tokens are parsed, rendered, and mapped onto the crate's internal
//! algorithm choices, the way a host picks one crypto backend per category
//! at channel init rather than scattering string comparisons everywhere.

use std::fmt;

use crate::error::CryptoError;

fn token_eq(token: &[u8; 4], s: &str) -> bool {
    token == s.as_bytes()
}

fn parse_err(kind: &str, token: &[u8; 4]) -> CryptoError {
    let shown = String::from_utf8_lossy(token).into_owned();
    CryptoError::UnsupportedAlgorithm(format!("{kind} token {shown:?}"))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HashAlgorithm {
    S256,
    S384,
}

impl HashAlgorithm {
    pub const MANDATORY: Self = Self::S256;

    pub fn token(self) -> [u8; 4] {
        match self {
            Self::S256 => *b"S256",
            Self::S384 => *b"S384",
        }
    }

    pub fn from_token(token: &[u8; 4]) -> Result<Self, CryptoError> {
        if token_eq(token, "S256") {
            Ok(Self::S256)
        } else if token_eq(token, "S384") {
            Ok(Self::S384)
        } else {
            Err(parse_err("hash", token))
        }
    }

    pub fn output_len(self) -> usize {
        match self {
            Self::S256 => 32,
            Self::S384 => 48,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CipherAlgorithm {
    Aes1,
    Aes3,
}

impl CipherAlgorithm {
    pub const MANDATORY: Self = Self::Aes1;

    pub fn token(self) -> [u8; 4] {
        match self {
            Self::Aes1 => *b"AES1",
            Self::Aes3 => *b"AES3",
        }
    }

    pub fn from_token(token: &[u8; 4]) -> Result<Self, CryptoError> {
        if token_eq(token, "AES1") {
            Ok(Self::Aes1)
        } else if token_eq(token, "AES3") {
            Ok(Self::Aes3)
        } else {
            Err(parse_err("cipher", token))
        }
    }

    pub fn key_len(self) -> usize {
        match self {
            Self::Aes1 => 16,
            Self::Aes3 => 32,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AuthTagAlgorithm {
    Hs32,
    Hs80,
    Sk32,
    Sk64,
}

impl AuthTagAlgorithm {
    pub const MANDATORY: Self = Self::Hs32;

    pub fn token(self) -> [u8; 4] {
        match self {
            Self::Hs32 => *b"HS32",
            Self::Hs80 => *b"HS80",
            Self::Sk32 => *b"SK32",
            Self::Sk64 => *b"SK64",
        }
    }

    pub fn from_token(token: &[u8; 4]) -> Result<Self, CryptoError> {
        if token_eq(token, "HS32") {
            Ok(Self::Hs32)
        } else if token_eq(token, "HS80") {
            Ok(Self::Hs80)
        } else if token_eq(token, "SK32") {
            Ok(Self::Sk32)
        } else if token_eq(token, "SK64") {
            Ok(Self::Sk64)
        } else {
            Err(parse_err("auth-tag", token))
        }
    }

    pub fn tag_len(self) -> usize {
        match self {
            Self::Hs32 | Self::Sk32 => 4,
            Self::Hs80 | Self::Sk64 => 8,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum KeyAgreementAlgorithm {
    Dh3k,
    Ec25,
    Ec38,
    Kem1,
    Mult,
    Prsh,
}

impl KeyAgreementAlgorithm {
    pub const MANDATORY: Self = Self::Dh3k;

    pub fn token(self) -> [u8; 4] {
        match self {
            Self::Dh3k => *b"DH3k",
            Self::Ec25 => *b"EC25",
            Self::Ec38 => *b"EC38",
            Self::Kem1 => *b"KEM1",
            Self::Mult => *b"Mult",
            Self::Prsh => *b"Prsh",
        }
    }

    pub fn from_token(token: &[u8; 4]) -> Result<Self, CryptoError> {
        if token_eq(token, "DH3k") {
            Ok(Self::Dh3k)
        } else if token_eq(token, "EC25") {
            Ok(Self::Ec25)
        } else if token_eq(token, "EC38") {
            Ok(Self::Ec38)
        } else if token_eq(token, "KEM1") {
            Ok(Self::Kem1)
        } else if token_eq(token, "Mult") {
            Ok(Self::Mult)
        } else if token_eq(token, "Prsh") {
            Ok(Self::Prsh)
        } else {
            Err(parse_err("key-agreement", token))
        }
    }

    /// True for the DH and EC families: a fresh key pair is generated per
    /// commit and a `DHPart1`/`DHPart2` exchange carries the public values.
    pub fn is_diffie_hellman(self) -> bool {
        matches!(self, Self::Dh3k | Self::Ec25 | Self::Ec38)
    }

    pub fn is_kem(self) -> bool {
        matches!(self, Self::Kem1)
    }

    pub fn is_multistream(self) -> bool {
        matches!(self, Self::Mult)
    }

    pub fn is_preshared(self) -> bool {
        matches!(self, Self::Prsh)
    }

    /// Whether this mode exchanges DHPart1/DHPart2 at all.
    pub fn has_dhpart(self) -> bool {
        self.is_diffie_hellman() || self.is_kem()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SasAlgorithm {
    B32,
    B256,
}

impl SasAlgorithm {
    pub const MANDATORY: Self = Self::B32;

    pub fn token(self) -> [u8; 4] {
        match self {
            Self::B32 => *b"B32 ",
            Self::B256 => *b"B256",
        }
    }

    pub fn from_token(token: &[u8; 4]) -> Result<Self, CryptoError> {
        if token_eq(token, "B32 ") {
            Ok(Self::B32)
        } else if token_eq(token, "B256") {
            Ok(Self::B256)
        } else {
            Err(parse_err("SAS", token))
        }
    }
}

impl fmt::Display for HashAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", String::from_utf8_lossy(&self.token()))
    }
}

impl fmt::Display for CipherAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", String::from_utf8_lossy(&self.token()))
    }
}

impl fmt::Display for KeyAgreementAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", String::from_utf8_lossy(&self.token()))
    }
}

/// Intersect a peer's ordered list with the local supported list, local
/// order wins ties, then reinject `mandatory` if nothing matched.
pub fn negotiate<T: PartialEq + Copy>(local: &[T], peer: &[T], mandatory: T) -> T {
    for candidate in local {
        if peer.contains(candidate) {
            return *candidate;
        }
    }
    mandatory
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash_token_roundtrip() {
        for alg in [HashAlgorithm::S256, HashAlgorithm::S384] {
            assert_eq!(HashAlgorithm::from_token(&alg.token()).unwrap(), alg);
        }
    }

    #[test]
    fn unknown_token_is_unsupported_algorithm() {
        let err = HashAlgorithm::from_token(b"XXXX").unwrap_err();
        assert!(matches!(err, CryptoError::UnsupportedAlgorithm(_)));
    }

    #[test]
    fn negotiate_prefers_local_order() {
        let local = [HashAlgorithm::S384, HashAlgorithm::S256];
        let peer = [HashAlgorithm::S256, HashAlgorithm::S384];
        assert_eq!(
            negotiate(&local, &peer, HashAlgorithm::MANDATORY),
            HashAlgorithm::S384
        );
    }

    #[test]
    fn negotiate_falls_back_to_mandatory() {
        let local = [HashAlgorithm::S384];
        let peer: [HashAlgorithm; 0] = [];
        assert_eq!(
            negotiate(&local, &peer, HashAlgorithm::MANDATORY),
            HashAlgorithm::MANDATORY
        );
    }

    #[test]
    fn key_agreement_mode_classification() {
        assert!(KeyAgreementAlgorithm::Dh3k.is_diffie_hellman());
        assert!(KeyAgreementAlgorithm::Ec25.has_dhpart());
        assert!(KeyAgreementAlgorithm::Kem1.has_dhpart());
        assert!(!KeyAgreementAlgorithm::Mult.has_dhpart());
        assert!(!KeyAgreementAlgorithm::Prsh.has_dhpart());
    }
}
