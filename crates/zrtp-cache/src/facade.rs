//! The ZID cache facade: fetches and updates retained secrets (`rs1`,
//! `rs2`, `aux`, `pbx`) and the verified-SAS flag by peer ZID. The facade's backing store is a host collaborator — this crate
//! only ships the trait plus one in-memory and one sqlite reference
//! implementation, matching spec.md §3's explicit non-goal ("the ZID
//! persistence backend ... assumed available").
//!
//! Grounded on `dl_store/src/db.rs`'s `Store` handle shape, narrowed to
//! the two operations the engine actually needs.

use zeroize::{Zeroize, ZeroizeOnDrop};
use zrtp_crypto::zid::Zid;

use crate::error::CacheError;

/// The four optional cached secrets plus the verified-SAS flag for one
/// peer, as spec.md §3's session-state field list describes them.
///
/// Zeroized on drop, matching `zrtp-crypto`'s handling of the same secret
/// values before they ever reach this cache.
#[derive(Debug, Clone, Default, Zeroize, ZeroizeOnDrop)]
pub struct PeerSecrets {
    pub rs1: Option<Vec<u8>>,
    pub rs2: Option<Vec<u8>>,
    pub aux: Option<Vec<u8>>,
    pub pbx: Option<Vec<u8>>,
    #[zeroize(skip)]
    pub previously_verified_sas: bool,
}

impl PeerSecrets {
    pub fn is_empty(&self) -> bool {
        self.rs1.is_none() && self.rs2.is_none() && self.aux.is_none() && self.pbx.is_none()
    }
}

/// Host-owned, possibly shared across sessions: the facade
/// must treat a read-modify-write as atomic, which the two reference
/// implementations below satisfy via a mutex ([`crate::memory::MemoryCache`])
/// or the database's own transaction ([`crate::sqlite::SqliteCache`]).
pub trait ZidCache {
    /// Looks up `peer_zid`'s cached secrets. Returns `PeerSecrets::default()`
    /// (all `None`, `previously_verified_sas = false`) rather than an error
    /// when the peer has never been seen before — an empty cache entry is
    /// the normal "first contact" case, not a failure.
    async fn get_peer_secrets(&self, peer_zid: &Zid) -> Result<PeerSecrets, CacheError>;

    /// Replaces the stored secrets for `peer_zid` wholesale. Callers pass
    /// the full post-roll state (e.g. new `rs1` with the old `rs1` moved
    /// into `rs2`), not a delta.
    async fn update_peer_secrets(
        &self,
        peer_zid: &Zid,
        secrets: &PeerSecrets,
    ) -> Result<(), CacheError>;
}
