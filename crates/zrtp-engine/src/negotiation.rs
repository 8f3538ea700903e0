//! Thin wrapper around `zrtp_proto::algorithms` that also applies the
//! mandatory-algorithm injection rule before a Hello is ever sent, so every
//! channel advertises the same baseline.

use zrtp_proto::algorithms::{negotiate_all, with_mandatory_injected, NegotiatedAlgorithms, SupportedAlgorithms};

/// What this engine instance is configured to offer, with the mandatory
/// algorithm in each category guaranteed present.
pub fn advertised_algorithms(configured: &SupportedAlgorithms) -> SupportedAlgorithms {
    with_mandatory_injected(configured.clone()).truncated()
}

/// Picks one algorithm per category once both Hellos are in hand. The
/// caller decides which side's list is `local` vs `peer`; the result is
/// symmetric either way under the "first match in the initiator's
/// preference order" rule, since by the time this runs the roles are not
/// yet fixed: responder and responder-to-be both negotiate eagerly.
pub fn negotiate(local: &SupportedAlgorithms, peer: &SupportedAlgorithms) -> NegotiatedAlgorithms {
    negotiate_all(local, peer.clone())
}

#[cfg(test)]
mod tests {
    use super::*;
    use zrtp_crypto::primitives::{CipherAlgorithm, HashAlgorithm, KeyAgreementAlgorithm};

    #[test]
    fn advertised_list_always_has_mandatory_entries() {
        let configured = SupportedAlgorithms {
            hash: vec![],
            cipher: vec![],
            auth_tag: vec![],
            key_agreement: vec![],
            sas: vec![],
        };
        let advertised = advertised_algorithms(&configured);
        assert!(advertised.hash.contains(&HashAlgorithm::MANDATORY));
        assert!(advertised.cipher.contains(&CipherAlgorithm::MANDATORY));
        assert!(advertised.key_agreement.contains(&KeyAgreementAlgorithm::MANDATORY));
    }
}
