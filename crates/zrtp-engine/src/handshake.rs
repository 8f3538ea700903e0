//! Pure message-building and verification helpers: everything the state
//! machine needs that does not itself touch the cache or the callback
//! surface. Kept free of `Session`/`Channel` so it
//! can be unit tested without constructing a whole channel.

use zrtp_crypto::cipher;
use zrtp_crypto::hash::sha256;
use zrtp_crypto::keyschedule::KdfContext;
use zrtp_crypto::primitives::{CipherAlgorithm, HashAlgorithm, KeyAgreementAlgorithm};
use zrtp_crypto::zid::Zid;
use zrtp_proto::codec::{compare_big_endian, compute_hvi, encode_message, message_mac};
use zrtp_proto::message::{
    Commit, CommitVariable, Confirm, ConfirmFlags, ConfirmPlaintext, DhPart, GoClear, Hello,
    HelloFlags, MessageType, Ping, PingAck,
};

use crate::error::EngineError;

pub const ZRTP_VERSION: [u8; 4] = *b"1.10";
pub const CLIENT_ID: [u8; 16] = *b"zrtp-engine     ";

/// Appends a message's header to its MAC-less body, computes the trailing
/// 8-byte MAC over the result, and splices it into the last 8 bytes. Every
/// message type whose MAC is the literal last 8 bytes of its body (Hello,
/// Commit, DHPart, GoClear) shares this shape.
fn finalize_with_trailing_mac(
    message_type: MessageType,
    body_with_zero_mac: &[u8],
    hash_alg: HashAlgorithm,
    mac_key: &[u8],
) -> Vec<u8> {
    let mut packet = encode_message(message_type, body_with_zero_mac);
    let mac_start = packet.len() - 8;
    let mac = message_mac(hash_alg, mac_key, &packet[..mac_start]);
    packet[mac_start..].copy_from_slice(&mac);
    packet
}

/// Builds and MACs a Hello message, keyed by the sender's own `H2`.
pub fn build_hello(
    zid: Zid,
    h3: &[u8],
    flags: HelloFlags,
    algorithms: &zrtp_proto::algorithms::SupportedAlgorithms,
    hash_alg: HashAlgorithm,
    mac_key_h2: &[u8],
) -> Vec<u8> {
    let hello = Hello {
        version: ZRTP_VERSION,
        client_id: CLIENT_ID,
        h3: h3.to_vec(),
        zid,
        flags,
        hash_algorithms: algorithms.hash.clone(),
        cipher_algorithms: algorithms.cipher.clone(),
        auth_tag_algorithms: algorithms.auth_tag.clone(),
        key_agreement_algorithms: algorithms.key_agreement.clone(),
        sas_algorithms: algorithms.sas.clone(),
        mac: [0u8; 8],
    };
    finalize_with_trailing_mac(MessageType::Hello, &hello.encode(), hash_alg, mac_key_h2)
}

/// `SHA256(hello_message)`, for binding Hello to signalling.
pub fn hello_hash(hello_bytes: &[u8]) -> [u8; 32] {
    zrtp_proto::codec::hello_hash(hello_bytes)
}

#[allow(clippy::too_many_arguments)]
pub fn build_commit_dh(
    h2: &[u8],
    zid: Zid,
    negotiated: &zrtp_proto::algorithms::NegotiatedAlgorithms,
    hvi: [u8; 32],
    hash_alg: HashAlgorithm,
    mac_key_h1: &[u8],
) -> Vec<u8> {
    let commit = Commit {
        h2: h2.to_vec(),
        zid,
        hash: negotiated.hash,
        cipher: negotiated.cipher,
        auth_tag: negotiated.auth_tag,
        key_agreement: negotiated.key_agreement,
        sas: negotiated.sas,
        variable: CommitVariable::Dh { hvi },
        mac: [0u8; 8],
    };
    finalize_with_trailing_mac(MessageType::Commit, &commit.encode(), hash_alg, mac_key_h1)
}

#[allow(clippy::too_many_arguments)]
pub fn build_commit_kem(
    h2: &[u8],
    zid: Zid,
    negotiated: &zrtp_proto::algorithms::NegotiatedAlgorithms,
    hvi: [u8; 32],
    initiator_public: Vec<u8>,
    hash_alg: HashAlgorithm,
    mac_key_h1: &[u8],
) -> Vec<u8> {
    let commit = Commit {
        h2: h2.to_vec(),
        zid,
        hash: negotiated.hash,
        cipher: negotiated.cipher,
        auth_tag: negotiated.auth_tag,
        key_agreement: negotiated.key_agreement,
        sas: negotiated.sas,
        variable: CommitVariable::Kem {
            hvi,
            initiator_public,
        },
        mac: [0u8; 8],
    };
    finalize_with_trailing_mac(MessageType::Commit, &commit.encode(), hash_alg, mac_key_h1)
}

#[allow(clippy::too_many_arguments)]
pub fn build_commit_multistream(
    h2: &[u8],
    zid: Zid,
    negotiated: &zrtp_proto::algorithms::NegotiatedAlgorithms,
    nonce: [u8; 16],
    hash_alg: HashAlgorithm,
    mac_key_h1: &[u8],
) -> Vec<u8> {
    let commit = Commit {
        h2: h2.to_vec(),
        zid,
        hash: negotiated.hash,
        cipher: negotiated.cipher,
        auth_tag: negotiated.auth_tag,
        key_agreement: negotiated.key_agreement,
        sas: negotiated.sas,
        variable: CommitVariable::NonDh {
            nonce,
            key_id: None,
        },
        mac: [0u8; 8],
    };
    finalize_with_trailing_mac(MessageType::Commit, &commit.encode(), hash_alg, mac_key_h1)
}

#[allow(clippy::too_many_arguments)]
pub fn build_dhpart(
    message_type: MessageType,
    h1: &[u8],
    rs1_id: [u8; 8],
    rs2_id: [u8; 8],
    aux_id: [u8; 8],
    pbx_id: [u8; 8],
    pv: Vec<u8>,
    hash_alg: HashAlgorithm,
    mac_key_h0: &[u8],
) -> Vec<u8> {
    let dhpart = DhPart {
        h1: h1.to_vec(),
        rs1_id,
        rs2_id,
        aux_id,
        pbx_id,
        pv,
        mac: [0u8; 8],
    };
    finalize_with_trailing_mac(message_type, &dhpart.encode(), hash_alg, mac_key_h0)
}

/// `hvi = H(initiator_DHPart2 ‖ responder_Hello)[0..32]`.
pub fn compute_commit_hvi(hash_alg: HashAlgorithm, dhpart2_bytes: &[u8], responder_hello_bytes: &[u8]) -> [u8; 32] {
    compute_hvi(hash_alg, dhpart2_bytes, responder_hello_bytes)
}

/// Resolves commit contention between the hvi/nonce this channel just
/// built and the one carried in a simultaneously arrived peer Commit
///. Returns `true`
/// when the LOCAL side keeps the initiator role (i.e. should keep
/// sending its own Commit rather than turning into the responder).
pub fn local_keeps_initiator_role(
    local_variable: &CommitVariable,
    peer_variable: &CommitVariable,
) -> bool {
    let (local_bytes, peer_bytes): (&[u8], &[u8]) = match (local_variable, peer_variable) {
        (CommitVariable::Dh { hvi: l }, CommitVariable::Dh { hvi: p }) => (l, p),
        (CommitVariable::Kem { hvi: l, .. }, CommitVariable::Kem { hvi: p, .. }) => (l, p),
        (CommitVariable::Dh { hvi: l }, CommitVariable::Kem { hvi: p, .. }) => (l, p),
        (CommitVariable::Kem { hvi: l, .. }, CommitVariable::Dh { hvi: p }) => (l, p),
        (CommitVariable::NonDh { nonce: l, .. }, CommitVariable::NonDh { nonce: p, .. }) => {
            (l, p)
        }
        // Mode mismatch: Preshared/multistream (non-DH) loses to any DH/KEM
        // Commit.
        (CommitVariable::NonDh { .. }, _) => return false,
        (_, CommitVariable::NonDh { .. }) => return true,
    };
    // Lower value wins the RESPONDER role, so the local side keeps
    // initiator when its own value is the larger one.
    compare_big_endian(local_bytes, peer_bytes) == std::cmp::Ordering::Greater
}

pub fn total_hash_dh(
    hash_alg: HashAlgorithm,
    hello_resp: &[u8],
    commit: &[u8],
    dhpart1: &[u8],
    dhpart2: &[u8],
) -> Vec<u8> {
    zrtp_crypto::keyschedule::total_hash_dh(hash_alg, hello_resp, commit, dhpart1, dhpart2)
}

pub fn total_hash_multistream(hash_alg: HashAlgorithm, hello_resp: &[u8], commit: &[u8]) -> Vec<u8> {
    zrtp_crypto::keyschedule::total_hash_multistream(hash_alg, hello_resp, commit)
}

pub fn kdf_context(zid_initiator: &Zid, zid_responder: &Zid, total_hash: &[u8]) -> KdfContext {
    KdfContext::new(zid_initiator.as_bytes(), zid_responder.as_bytes(), total_hash)
}

/// Builds the plaintext Confirm body then encrypts/macs it:
/// `confirm_mac = HMAC(mackey, ciphertext)`, ciphertext under
/// `zrtpkey` in CFB mode keyed by a freshly random IV.
pub fn build_confirm(
    message_type: MessageType,
    h0: &[u8],
    flags: ConfirmFlags,
    cache_expiration: u32,
    cipher_alg: CipherAlgorithm,
    hash_alg: HashAlgorithm,
    zrtpkey: &[u8],
    mackey: &[u8],
) -> Vec<u8> {
    let plaintext = ConfirmPlaintext {
        h0: h0.to_vec(),
        flags,
        cache_expiration,
        signature: Vec::new(),
    };
    let mut encrypted = plaintext.encode();
    let mut iv = [0u8; cipher::IV_LEN];
    use rand::rngs::OsRng;
    use rand::RngCore;
    OsRng.fill_bytes(&mut iv);
    cipher::encrypt(cipher_alg, zrtpkey, &iv, &mut encrypted)
        .expect("key/iv lengths are fixed by the negotiated cipher algorithm");
    let confirm_mac = zrtp_proto::codec::message_mac(hash_alg, mackey, &encrypted);
    let confirm = Confirm {
        confirm_mac,
        iv,
        encrypted,
    };
    encode_message(message_type, &confirm.encode())
}

/// Verifies `confirm_mac` then decrypts the Confirm body in place,
/// returning the plaintext fields.
pub fn open_confirm(
    confirm: &Confirm,
    cipher_alg: CipherAlgorithm,
    hash_alg: HashAlgorithm,
    zrtpkey: &[u8],
    mackey: &[u8],
) -> Result<ConfirmPlaintext, EngineError> {
    let expected = zrtp_proto::codec::message_mac(hash_alg, mackey, &confirm.encrypted);
    if expected != confirm.confirm_mac {
        return Err(zrtp_proto::ProtoError::UnmatchingConfirmMac.into());
    }
    let mut plaintext_bytes = confirm.encrypted.clone();
    cipher::decrypt(cipher_alg, zrtpkey, &confirm.iv, &mut plaintext_bytes)
        .map_err(EngineError::Crypto)?;
    Ok(ConfirmPlaintext::decode(&plaintext_bytes, hash_alg.output_len())?)
}

/// GoClear carries no body beyond its own trailing MAC, keyed by the
/// sender's own-role `mackey` rather than a hash-chain pre-image, since by
/// the time GoClear is sent the handshake's chain reveals are long done
///.
pub fn build_goclear(hash_alg: HashAlgorithm, mac_key: &[u8]) -> Vec<u8> {
    finalize_with_trailing_mac(MessageType::GoClear, &[0u8; 8], hash_alg, mac_key)
}

/// Verifies an inbound GoClear's MAC against the sender's own-role mackey.
pub fn verify_goclear(goclear_bytes: &[u8], hash_alg: HashAlgorithm, mac_key: &[u8]) -> Result<(), EngineError> {
    let mac_start = goclear_bytes.len() - 8;
    let expected = message_mac(hash_alg, mac_key, &goclear_bytes[..mac_start]);
    if expected == goclear_bytes[mac_start..] {
        Ok(())
    } else {
        Err(zrtp_proto::ProtoError::UnmatchingMac.into())
    }
}

/// `endpoint_hash = SHA256(self_zid ‖ client_id)[0..16]`, a detail this
/// implementation supplies since neither RFC 6189 nor the distilled spec
/// pins a construction for Ping/PingACK's endpoint hash.
pub fn endpoint_hash(zid: Zid, client_id: &[u8; 16]) -> [u8; 16] {
    let full = sha256(&[zid.as_bytes().as_slice(), client_id].concat());
    let mut out = [0u8; 16];
    out.copy_from_slice(&full[..16]);
    out
}

pub fn build_ping(zid: Zid, ssrc: u32) -> Vec<u8> {
    let ping = Ping {
        version: ZRTP_VERSION,
        endpoint_hash: endpoint_hash(zid, &CLIENT_ID),
        ssrc,
    };
    encode_message(MessageType::Ping, &ping.encode())
}

pub fn build_ping_ack(local_zid: Zid, peer_endpoint_hash: [u8; 16], ssrc: u32) -> Vec<u8> {
    let ack = PingAck {
        sender_endpoint_hash: endpoint_hash(local_zid, &CLIENT_ID),
        receiver_endpoint_hash: peer_endpoint_hash,
        ssrc,
    };
    encode_message(MessageType::PingAck, &ack.encode())
}

/// Whether a negotiated key-agreement algorithm is the one case this
/// engine declines to derive keys for (DESIGN.md Open Question 1).
pub fn requires_preshared_stub(alg: KeyAgreementAlgorithm) -> bool {
    alg.is_preshared()
}

/// Placeholder length for a KEM1 DHPart1's encapsulation ciphertext, until
/// `kyber-kem`'s actual wire size is pinned down (DESIGN.md Open Question).
pub const KEM1_CIPHERTEXT_LEN: usize = 1088;
/// DHPart2 under KEM1 carries only a nonce, not a public value — the
/// initiator's key pair was already shipped in Commit.
pub const KEM1_NONCE_LEN: usize = 16;

/// The `pv` field's length for a DHPart message, which for every DH/EC
/// family is fixed but for KEM1 depends on which of the two DHPart
/// messages is being read: DHPart1 (responder, carries the encapsulation)
/// or DHPart2 (initiator, carries only a nonce).
pub fn dhpart_pv_len(alg: KeyAgreementAlgorithm, message_type: MessageType) -> usize {
    match alg {
        KeyAgreementAlgorithm::Dh3k => 384,
        KeyAgreementAlgorithm::Ec25 => 32,
        KeyAgreementAlgorithm::Ec38 => 97,
        KeyAgreementAlgorithm::Kem1 => {
            if message_type == MessageType::DhPart1 {
                KEM1_CIPHERTEXT_LEN
            } else {
                KEM1_NONCE_LEN
            }
        }
        KeyAgreementAlgorithm::Mult | KeyAgreementAlgorithm::Prsh => 0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use zrtp_proto::message::CommitVariable;

    #[test]
    fn lower_hvi_side_yields_to_responder_role() {
        let low = CommitVariable::Dh { hvi: [0u8; 32] };
        let mut high_bytes = [0u8; 32];
        high_bytes[31] = 1;
        let high = CommitVariable::Dh { hvi: high_bytes };
        assert!(!local_keeps_initiator_role(&low, &high));
        assert!(local_keeps_initiator_role(&high, &low));
    }

    #[test]
    fn non_dh_always_loses_to_dh() {
        let nondh = CommitVariable::NonDh {
            nonce: [0u8; 16],
            key_id: None,
        };
        let dh = CommitVariable::Dh { hvi: [0u8; 32] };
        assert!(!local_keeps_initiator_role(&nondh, &dh));
        assert!(local_keeps_initiator_role(&dh, &nondh));
    }

    #[test]
    fn endpoint_hash_is_deterministic() {
        let zid = Zid::generate();
        assert_eq!(
            endpoint_hash(zid, &CLIENT_ID),
            endpoint_hash(zid, &CLIENT_ID)
        );
    }
}
