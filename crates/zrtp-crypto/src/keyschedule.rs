//! The key schedule: `s0`, `ZRTPSess`, the per-direction MAC/cipher keys,
//! SRTP master keys and salts, the SAS integer, and the cached-secret hash
//! IDs.
//!
//! Grounded on the teacher's `ratchet.rs` `kdf_rk`/`kdf_ck` pattern: one
//! call per named derivation, generalised to the full RFC 6189 derivation
//! set.

use zeroize::Zeroize;
use zeroize::ZeroizeOnDrop;

use crate::hash::{hash_concat, hmac_truncated};
use crate::kdf::kdf;
use crate::primitives::{CipherAlgorithm, HashAlgorithm};

const SRTP_SALT_LEN: usize = 14;
const SECRET_ID_LEN: usize = 8;

/// `ZIDi ‖ ZIDr ‖ total_hash`, the context string every derived key binds
/// its label to.
#[derive(Debug, Clone)]
pub struct KdfContext(pub Vec<u8>);

impl KdfContext {
    pub fn new(zid_initiator: &[u8; 12], zid_responder: &[u8; 12], total_hash: &[u8]) -> Self {
        let mut ctx = Vec::with_capacity(24 + total_hash.len());
        ctx.extend_from_slice(zid_initiator);
        ctx.extend_from_slice(zid_responder);
        ctx.extend_from_slice(total_hash);
        Self(ctx)
    }
}

/// `total_hash = H( HelloResp ‖ Commit ‖ DHPart1 ‖ DHPart2 )` for DH/KEM
/// modes, computed over the exact transmitted/received byte transcripts.
pub fn total_hash_dh(
    alg: HashAlgorithm,
    hello_resp: &[u8],
    commit: &[u8],
    dhpart1: &[u8],
    dhpart2: &[u8],
) -> Vec<u8> {
    hash_concat(alg, &[hello_resp, commit, dhpart1, dhpart2])
}

/// `total_hash = H( HelloResp ‖ Commit )` for multistream mode.
pub fn total_hash_multistream(alg: HashAlgorithm, hello_resp: &[u8], commit: &[u8]) -> Vec<u8> {
    hash_concat(alg, &[hello_resp, commit])
}

fn length_prefixed(out: &mut Vec<u8>, secret: Option<&[u8]>) {
    match secret {
        Some(bytes) => {
            out.extend_from_slice(&(bytes.len() as u32).to_be_bytes());
            out.extend_from_slice(bytes);
        }
        None => out.extend_from_slice(&0u32.to_be_bytes()),
    }
}

/// `s0` for DH/KEM modes:
/// `H( 0x00000001 ‖ DHResult ‖ "ZRTP-HMAC-KDF" ‖ KDFContext ‖ len(s1)‖s1 ‖ len(s2)‖s2 ‖ len(s3)‖s3 )`
///
/// `s1` is the matching retained secret (`rs1` or `rs2`, whichever the peer
/// also holds) or absent; `s2` is the auxiliary secret; `s3` is the PBX
/// secret. Any absent secret contributes a zero length prefix and no bytes.
#[allow(clippy::too_many_arguments)]
pub fn derive_s0_dh(
    alg: HashAlgorithm,
    dh_result: &[u8],
    ctx: &KdfContext,
    s1: Option<&[u8]>,
    s2: Option<&[u8]>,
    s3: Option<&[u8]>,
) -> Vec<u8> {
    let mut input = Vec::new();
    input.extend_from_slice(&1u32.to_be_bytes());
    input.extend_from_slice(dh_result);
    input.extend_from_slice(b"ZRTP-HMAC-KDF");
    input.extend_from_slice(&ctx.0);
    length_prefixed(&mut input, s1);
    length_prefixed(&mut input, s2);
    length_prefixed(&mut input, s3);
    hash_concat(alg, &[&input])
}

/// `s0` for multistream mode: `KDF(ZRTPSess, "ZRTP MSK", KDFContext, hash_len)`.
pub fn derive_s0_multistream(alg: HashAlgorithm, zrtp_sess: &[u8], ctx: &KdfContext) -> Vec<u8> {
    kdf(alg, zrtp_sess, "ZRTP MSK", &ctx.0, alg.output_len())
}

/// The full set of keys derived from `s0` for one channel. Everything here
/// is secret material and is zeroised on drop.
#[derive(ZeroizeOnDrop)]
pub struct DerivedKeys {
    pub zrtp_sess: Option<Vec<u8>>,
    pub mackey_i: Vec<u8>,
    pub mackey_r: Vec<u8>,
    pub zrtpkey_i: Vec<u8>,
    pub zrtpkey_r: Vec<u8>,
    pub srtp_key_i: Vec<u8>,
    pub srtp_salt_i: Vec<u8>,
    pub srtp_key_r: Vec<u8>,
    pub srtp_salt_r: Vec<u8>,
    #[zeroize(skip)]
    pub sas_integer: u32,
}

/// Derives every key spec.md §4.5 lists from `s0`. `derive_zrtp_sess` is
/// false for every channel after the first — `ZRTPSess` is only set on the
/// session's first successful channel and reused thereafter.
pub fn derive_keys(
    hash_alg: HashAlgorithm,
    cipher_alg: CipherAlgorithm,
    s0: &[u8],
    ctx: &KdfContext,
    derive_zrtp_sess: bool,
) -> DerivedKeys {
    let hash_len = hash_alg.output_len();
    let cipher_key_len = cipher_alg.key_len();

    let zrtp_sess = derive_zrtp_sess
        .then(|| kdf(hash_alg, s0, "ZRTP Session Key", &ctx.0, hash_len));

    let mackey_i = kdf(hash_alg, s0, "Initiator HMAC key", &ctx.0, hash_len);
    let mackey_r = kdf(hash_alg, s0, "Responder HMAC key", &ctx.0, hash_len);
    let zrtpkey_i = kdf(hash_alg, s0, "Initiator ZRTP key", &ctx.0, cipher_key_len);
    let zrtpkey_r = kdf(hash_alg, s0, "Responder ZRTP key", &ctx.0, cipher_key_len);

    let srtp_key_i = kdf(
        hash_alg,
        s0,
        "Initiator SRTP master key",
        &ctx.0,
        cipher_key_len,
    );
    let srtp_salt_i = kdf(
        hash_alg,
        s0,
        "Initiator SRTP master salt",
        &ctx.0,
        SRTP_SALT_LEN,
    );
    let srtp_key_r = kdf(
        hash_alg,
        s0,
        "Responder SRTP master key",
        &ctx.0,
        cipher_key_len,
    );
    let srtp_salt_r = kdf(
        hash_alg,
        s0,
        "Responder SRTP master salt",
        &ctx.0,
        SRTP_SALT_LEN,
    );

    let sas_bytes = kdf(hash_alg, s0, "SAS", &ctx.0, 32);
    let sas_integer = u32::from_be_bytes(sas_bytes[0..4].try_into().expect("kdf returned 32 bytes"));

    DerivedKeys {
        zrtp_sess,
        mackey_i,
        mackey_r,
        zrtpkey_i,
        zrtpkey_r,
        srtp_key_i,
        srtp_salt_i,
        srtp_key_r,
        srtp_salt_r,
        sas_integer,
    }
}

/// Rolls the retained secret after a successful Confirm exchange:
/// `new_rs1 = KDF(s0, "retained secret", KDFContext, 256)`. The caller
/// moves the previous `rs1` into `rs2` itself; this only computes the
/// replacement value.
pub fn roll_retained_secret(hash_alg: HashAlgorithm, s0: &[u8], ctx: &KdfContext) -> Vec<u8> {
    kdf(hash_alg, s0, "retained secret", &ctx.0, 32)
}

/// `rs1ID`/`rs2ID`/`pbxID` for one role: `HMAC(secret, "Initiator"|"Responder")[0..8]`.
pub fn cached_secret_id(hash_alg: HashAlgorithm, secret: &[u8], role_label: &str) -> [u8; 8] {
    let id = hmac_truncated(hash_alg, secret, role_label.as_bytes(), SECRET_ID_LEN);
    id.try_into().expect("hmac_truncated returned 8 bytes")
}

/// `auxID_i = HMAC(aux, self_H3)[0..8]`, `auxID_r = HMAC(aux, peer_H3)[0..8]`.
/// Aux is per-channel (keyed by H3, not by role label) because two
/// channels under the same session have distinct hash chains.
pub fn aux_secret_id(hash_alg: HashAlgorithm, aux: &[u8], h3: &[u8]) -> [u8; 8] {
    let id = hmac_truncated(hash_alg, aux, h3, SECRET_ID_LEN);
    id.try_into().expect("hmac_truncated returned 8 bytes")
}

/// Random filler used in place of a real secret-hash ID when the
/// corresponding local secret is absent, so the wire field is always
/// present and indistinguishable from a real ID to an observer.
pub fn random_secret_id() -> [u8; 8] {
    use rand::rngs::OsRng;
    use rand::RngCore;
    let mut id = [0u8; 8];
    OsRng.fill_bytes(&mut id);
    id
}

/// Zeroes a retained-secret buffer in place; used when rolling rs1 → rs2
/// and discarding the old rs2.
pub fn wipe(secret: &mut [u8]) {
    secret.zeroize();
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx() -> KdfContext {
        KdfContext::new(&[1u8; 12], &[2u8; 12], &[3u8; 32])
    }

    #[test]
    fn s0_dh_changes_with_any_input() {
        let base = derive_s0_dh(HashAlgorithm::S256, b"dh", &ctx(), None, None, None);
        let with_s1 = derive_s0_dh(HashAlgorithm::S256, b"dh", &ctx(), Some(b"rs1"), None, None);
        assert_ne!(base, with_s1);
    }

    #[test]
    fn derived_keys_have_expected_lengths() {
        let s0 = derive_s0_dh(HashAlgorithm::S256, b"dh", &ctx(), None, None, None);
        let keys = derive_keys(HashAlgorithm::S256, CipherAlgorithm::Aes1, &s0, &ctx(), true);
        assert_eq!(keys.mackey_i.len(), 32);
        assert_eq!(keys.zrtpkey_i.len(), 16);
        assert_eq!(keys.srtp_salt_i.len(), SRTP_SALT_LEN);
        assert!(keys.zrtp_sess.is_some());
    }

    #[test]
    fn subsequent_channel_does_not_rederive_zrtp_sess() {
        let s0 = derive_s0_dh(HashAlgorithm::S256, b"dh", &ctx(), None, None, None);
        let keys = derive_keys(HashAlgorithm::S256, CipherAlgorithm::Aes1, &s0, &ctx(), false);
        assert!(keys.zrtp_sess.is_none());
    }

    #[test]
    fn mackey_differs_by_role() {
        let s0 = derive_s0_dh(HashAlgorithm::S256, b"dh", &ctx(), None, None, None);
        let keys = derive_keys(HashAlgorithm::S256, CipherAlgorithm::Aes1, &s0, &ctx(), true);
        assert_ne!(keys.mackey_i, keys.mackey_r);
    }
}
