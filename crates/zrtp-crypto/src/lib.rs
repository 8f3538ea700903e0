//! Cryptographic primitives for the ZRTP key-agreement engine: negotiable
//! algorithm tokens, hashing and the hash-chain commitment scheme, the
//! RFC 6189 key-derivation function, key agreement (DH/EC/KEM), the full
//! key schedule, Confirm-message encryption, CRC-32, SAS rendering, and
//! the ZID identifier type.
//!
//! This crate has no notion of a packet, a message, or a session; it is
//! the adapter layer every higher crate builds on.

pub mod cipher;
pub mod crc32;
pub mod error;
pub mod hash;
pub mod hash_chain;
pub mod kdf;
pub mod keyagreement;
pub mod keyschedule;
pub mod primitives;
pub mod sas;
pub mod zid;

pub use error::CryptoError;
pub use zid::Zid;
