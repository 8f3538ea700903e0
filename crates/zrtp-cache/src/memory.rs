//! In-memory reference implementation of [`ZidCache`], used by tests and
//! by hosts that don't want persistence across restarts.

use std::collections::HashMap;
use std::sync::Mutex;

use zrtp_crypto::zid::Zid;

use crate::error::CacheError;
use crate::facade::{PeerSecrets, ZidCache};

#[derive(Debug, Default)]
pub struct MemoryCache {
    entries: Mutex<HashMap<Zid, PeerSecrets>>,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ZidCache for MemoryCache {
    async fn get_peer_secrets(&self, peer_zid: &Zid) -> Result<PeerSecrets, CacheError> {
        let entries = self.entries.lock().expect("cache mutex poisoned");
        Ok(entries.get(peer_zid).cloned().unwrap_or_default())
    }

    async fn update_peer_secrets(
        &self,
        peer_zid: &Zid,
        secrets: &PeerSecrets,
    ) -> Result<(), CacheError> {
        let mut entries = self.entries.lock().expect("cache mutex poisoned");
        entries.insert(*peer_zid, secrets.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn unseen_peer_returns_empty_secrets() {
        let cache = MemoryCache::new();
        let zid = Zid::generate();
        let secrets = cache.get_peer_secrets(&zid).await.unwrap();
        assert!(secrets.is_empty());
        assert!(!secrets.previously_verified_sas);
    }

    #[tokio::test]
    async fn update_then_get_round_trips() {
        let cache = MemoryCache::new();
        let zid = Zid::generate();
        let secrets = PeerSecrets {
            rs1: Some(vec![1, 2, 3]),
            rs2: None,
            aux: None,
            pbx: None,
            previously_verified_sas: true,
        };
        cache.update_peer_secrets(&zid, &secrets).await.unwrap();
        let fetched = cache.get_peer_secrets(&zid).await.unwrap();
        assert_eq!(fetched.rs1, Some(vec![1, 2, 3]));
        assert!(fetched.previously_verified_sas);
    }

    #[tokio::test]
    async fn distinct_peers_do_not_share_state() {
        let cache = MemoryCache::new();
        let zid_a = Zid::generate();
        let zid_b = Zid::generate();
        cache
            .update_peer_secrets(
                &zid_a,
                &PeerSecrets {
                    rs1: Some(vec![9]),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        let fetched_b = cache.get_peer_secrets(&zid_b).await.unwrap();
        assert!(fetched_b.is_empty());
    }
}
