//! The 12-byte ZRTP endpoint identifier: locally random,
//! persistent, supplied by the host via the cache facade.
//!
//! Narrowed from the teacher's `identity.rs::PublicKeyBytes` fixed-size
//! byte-wrapper pattern.

use std::fmt;

use rand::rngs::OsRng;
use rand::RngCore;

use crate::error::CryptoError;

pub const ZID_LEN: usize = 12;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Zid([u8; ZID_LEN]);

impl Zid {
    /// Generates a fresh random ZID. The host is expected to persist the
    /// result and reuse it across sessions; this crate has no opinion on
    /// where that happens.
    pub fn generate() -> Self {
        let mut bytes = [0u8; ZID_LEN];
        OsRng.fill_bytes(&mut bytes);
        Self(bytes)
    }

    pub fn from_bytes(bytes: [u8; ZID_LEN]) -> Self {
        Self(bytes)
    }

    pub fn from_slice(slice: &[u8]) -> Result<Self, CryptoError> {
        let bytes: [u8; ZID_LEN] = slice
            .try_into()
            .map_err(|_| CryptoError::InvalidKey(format!("ZID must be {ZID_LEN} bytes")))?;
        Ok(Self(bytes))
    }

    pub fn as_bytes(&self) -> &[u8; ZID_LEN] {
        &self.0
    }

    pub fn to_hex(self) -> String {
        hex::encode(self.0)
    }
}

impl fmt::Display for Zid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_zids_are_distinct() {
        assert_ne!(Zid::generate(), Zid::generate());
    }

    #[test]
    fn from_slice_rejects_wrong_length() {
        assert!(Zid::from_slice(&[0u8; 11]).is_err());
        assert!(Zid::from_slice(&[0u8; 13]).is_err());
    }

    #[test]
    fn hex_roundtrips_bytes() {
        let zid = Zid::from_bytes([0xab; ZID_LEN]);
        assert_eq!(zid.to_hex(), "ab".repeat(ZID_LEN));
    }
}
