//! Algorithm negotiation: intersecting a peer's ordered
//! Hello algorithm lists against the local supported lists, local order
//! wins ties, mandatory baseline reinjected if the peer omitted it.
//!
//! Grounded on `dl_proto/src/group.rs`'s small enum-of-policy-tokens shape,
//! here driving negotiation over `zrtp_crypto::primitives`'s five
//! algorithm enums instead of group roles/visibility.

use zrtp_crypto::primitives::{
    negotiate, AuthTagAlgorithm, CipherAlgorithm, HashAlgorithm, KeyAgreementAlgorithm,
    SasAlgorithm,
};

/// Local supported-algorithm lists. Order is
/// preference order, most preferred first.
#[derive(Debug, Clone)]
pub struct SupportedAlgorithms {
    pub hash: Vec<HashAlgorithm>,
    pub cipher: Vec<CipherAlgorithm>,
    pub auth_tag: Vec<AuthTagAlgorithm>,
    pub key_agreement: Vec<KeyAgreementAlgorithm>,
    pub sas: Vec<SasAlgorithm>,
}

impl Default for SupportedAlgorithms {
    fn default() -> Self {
        Self {
            hash: vec![HashAlgorithm::S256, HashAlgorithm::S384],
            cipher: vec![CipherAlgorithm::Aes1, CipherAlgorithm::Aes3],
            auth_tag: vec![
                AuthTagAlgorithm::Hs32,
                AuthTagAlgorithm::Hs80,
                AuthTagAlgorithm::Sk32,
                AuthTagAlgorithm::Sk64,
            ],
            key_agreement: vec![
                KeyAgreementAlgorithm::Dh3k,
                KeyAgreementAlgorithm::Ec25,
                KeyAgreementAlgorithm::Ec38,
                KeyAgreementAlgorithm::Kem1,
                KeyAgreementAlgorithm::Mult,
            ],
            sas: vec![SasAlgorithm::B32, SasAlgorithm::B256],
        }
    }
}

const MAX_ALGORITHMS_PER_CATEGORY: usize = 7;

impl SupportedAlgorithms {
    /// Caps every list at 7 entries, the maximum a Hello's 4-bit nibble
    /// counts (capped at 7) can carry.
    pub fn truncated(mut self) -> Self {
        self.hash.truncate(MAX_ALGORITHMS_PER_CATEGORY);
        self.cipher.truncate(MAX_ALGORITHMS_PER_CATEGORY);
        self.auth_tag.truncate(MAX_ALGORITHMS_PER_CATEGORY);
        self.key_agreement.truncate(MAX_ALGORITHMS_PER_CATEGORY);
        self.sas.truncate(MAX_ALGORITHMS_PER_CATEGORY);
        self
    }
}

/// The single agreed tuple spec.md §2 calls the output of negotiation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NegotiatedAlgorithms {
    pub hash: HashAlgorithm,
    pub cipher: CipherAlgorithm,
    pub auth_tag: AuthTagAlgorithm,
    pub key_agreement: KeyAgreementAlgorithm,
    pub sas: SasAlgorithm,
}

/// Reinjects each category's mandatory value into `peer` if it isn't
/// already present, mirroring what a Hello *builder* does before sending
/// — this is also used defensively on receipt so a list
/// omitting the mandatory value is still treated as supporting it.
pub fn with_mandatory_injected(mut peer: SupportedAlgorithms) -> SupportedAlgorithms {
    if !peer.hash.contains(&HashAlgorithm::MANDATORY) {
        peer.hash.push(HashAlgorithm::MANDATORY);
    }
    if !peer.cipher.contains(&CipherAlgorithm::MANDATORY) {
        peer.cipher.push(CipherAlgorithm::MANDATORY);
    }
    if !peer.auth_tag.contains(&AuthTagAlgorithm::MANDATORY) {
        peer.auth_tag.push(AuthTagAlgorithm::MANDATORY);
    }
    if !peer.key_agreement.contains(&KeyAgreementAlgorithm::MANDATORY) {
        peer.key_agreement.push(KeyAgreementAlgorithm::MANDATORY);
    }
    if !peer.sas.contains(&SasAlgorithm::MANDATORY) {
        peer.sas.push(SasAlgorithm::MANDATORY);
    }
    peer
}

/// Intersects `local`'s preference-ordered lists against `peer`'s,
/// reinjecting the mandatory baseline into `peer` first so an omitted
/// mandatory value still counts as offered.
pub fn negotiate_all(
    local: &SupportedAlgorithms,
    peer: SupportedAlgorithms,
) -> NegotiatedAlgorithms {
    let peer = with_mandatory_injected(peer);
    NegotiatedAlgorithms {
        hash: negotiate(&local.hash, &peer.hash, HashAlgorithm::MANDATORY),
        cipher: negotiate(&local.cipher, &peer.cipher, CipherAlgorithm::MANDATORY),
        auth_tag: negotiate(&local.auth_tag, &peer.auth_tag, AuthTagAlgorithm::MANDATORY),
        key_agreement: negotiate(
            &local.key_agreement,
            &peer.key_agreement,
            KeyAgreementAlgorithm::MANDATORY,
        ),
        sas: negotiate(&local.sas, &peer.sas, SasAlgorithm::MANDATORY),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn negotiation_picks_local_preferred_match() {
        let local = SupportedAlgorithms::default();
        let peer = SupportedAlgorithms {
            hash: vec![HashAlgorithm::S384, HashAlgorithm::S256],
            ..SupportedAlgorithms::default()
        };
        let negotiated = negotiate_all(&local, peer);
        assert_eq!(negotiated.hash, HashAlgorithm::S256);
    }

    #[test]
    fn mandatory_is_reinjected_when_peer_omits_it() {
        let local_mandatory_only = SupportedAlgorithms {
            hash: vec![HashAlgorithm::S256],
            ..SupportedAlgorithms::default()
        };
        let peer_missing_mandatory = SupportedAlgorithms {
            hash: vec![HashAlgorithm::S384],
            ..SupportedAlgorithms::default()
        };
        let negotiated = negotiate_all(&local_mandatory_only, peer_missing_mandatory);
        assert_eq!(negotiated.hash, HashAlgorithm::S256);
    }

    #[test]
    fn reinjection_is_idempotent() {
        let peer = SupportedAlgorithms {
            hash: vec![HashAlgorithm::S384],
            ..SupportedAlgorithms::default()
        };
        let once = with_mandatory_injected(peer);
        let twice = with_mandatory_injected(once.clone());
        assert_eq!(once.hash, twice.hash);
    }

    #[test]
    fn truncated_caps_every_list_at_seven() {
        let mut many = SupportedAlgorithms::default();
        many.auth_tag = vec![
            AuthTagAlgorithm::Hs32,
            AuthTagAlgorithm::Hs80,
            AuthTagAlgorithm::Sk32,
            AuthTagAlgorithm::Sk64,
            AuthTagAlgorithm::Hs32,
            AuthTagAlgorithm::Hs80,
            AuthTagAlgorithm::Sk32,
            AuthTagAlgorithm::Sk64,
        ];
        let truncated = many.truncated();
        assert_eq!(truncated.auth_tag.len(), 7);
    }
}
