//! The ten-plus ZRTP message bodies and the common
//! 12-byte message header (preamble, length-in-words, 8-char type).
//!
//! Grounded on `dl_proto/src/message.rs`'s tag-per-variant shape
//! (`MessageContent`'s `#[serde(tag = "type")]` enum), reimplemented as
//! one struct per ZRTP message type with hand-rolled big-endian encode/
//! decode instead of serde, since the wire format is RFC 6189's fixed
//! binary layout.

use byteorder::{BigEndian, ByteOrder};

use zrtp_crypto::primitives::{
    AuthTagAlgorithm, CipherAlgorithm, HashAlgorithm, KeyAgreementAlgorithm, SasAlgorithm,
};
use zrtp_crypto::zid::{Zid, ZID_LEN};

use crate::error::ProtoError;

pub const MESSAGE_HEADER_LEN: usize = 12;
const PREAMBLE: u16 = 0x505A;

macro_rules! type_token {
    ($name:literal) => {{
        let mut t = [0u8; 8];
        let bytes = $name.as_bytes();
        t[..bytes.len()].copy_from_slice(bytes);
        t
    }};
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageType {
    Hello,
    HelloAck,
    Commit,
    DhPart1,
    DhPart2,
    Confirm1,
    Confirm2,
    Conf2Ack,
    Error,
    ErrorAck,
    GoClear,
    ClearAck,
    SasRelay,
    RelayAck,
    Ping,
    PingAck,
}

impl MessageType {
    pub fn token(self) -> [u8; 8] {
        match self {
            Self::Hello => type_token!("Hello   "),
            Self::HelloAck => type_token!("HelloACK"),
            Self::Commit => type_token!("Commit  "),
            Self::DhPart1 => type_token!("DHPart1 "),
            Self::DhPart2 => type_token!("DHPart2 "),
            Self::Confirm1 => type_token!("Confirm1"),
            Self::Confirm2 => type_token!("Confirm2"),
            Self::Conf2Ack => type_token!("Conf2ACK"),
            Self::Error => type_token!("Error   "),
            Self::ErrorAck => type_token!("ErrorACK"),
            Self::GoClear => type_token!("GoClear "),
            Self::ClearAck => type_token!("ClearACK"),
            Self::SasRelay => type_token!("SASrelay"),
            Self::RelayAck => type_token!("RelayACK"),
            Self::Ping => type_token!("Ping    "),
            Self::PingAck => type_token!("PingACK "),
        }
    }

    pub fn from_token(token: &[u8; 8]) -> Result<Self, ProtoError> {
        const ALL: &[MessageType] = &[
            MessageType::Hello,
            MessageType::HelloAck,
            MessageType::Commit,
            MessageType::DhPart1,
            MessageType::DhPart2,
            MessageType::Confirm1,
            MessageType::Confirm2,
            MessageType::Conf2Ack,
            MessageType::Error,
            MessageType::ErrorAck,
            MessageType::GoClear,
            MessageType::ClearAck,
            MessageType::SasRelay,
            MessageType::RelayAck,
            MessageType::Ping,
            MessageType::PingAck,
        ];
        ALL.iter()
            .copied()
            .find(|t| &t.token() == token)
            .ok_or_else(|| {
                ProtoError::UnsupportedMessageType(String::from_utf8_lossy(token).into_owned())
            })
    }
}

/// The 12-byte message header preceding every message body.
#[derive(Debug, Clone, Copy)]
pub struct MessageHeader {
    pub message_type: MessageType,
    pub length_words: u16,
}

pub fn parse_header(bytes: &[u8]) -> Result<MessageHeader, ProtoError> {
    if bytes.len() < MESSAGE_HEADER_LEN {
        return Err(ProtoError::InvalidPacket("message header truncated".into()));
    }
    let preamble = BigEndian::read_u16(&bytes[0..2]);
    if preamble != PREAMBLE {
        return Err(ProtoError::InvalidPacket("bad message preamble".into()));
    }
    let length_words = BigEndian::read_u16(&bytes[2..4]);
    let type_token: [u8; 8] = bytes[4..12].try_into().expect("slice is 8 bytes");
    let message_type = MessageType::from_token(&type_token)?;
    Ok(MessageHeader {
        message_type,
        length_words,
    })
}

/// Writes the 12-byte header for a body of `body_len` bytes.
pub fn build_header(out: &mut Vec<u8>, message_type: MessageType, body_len: usize) {
    let total_words = ((MESSAGE_HEADER_LEN + body_len) / 4) as u16;
    out.extend_from_slice(&PREAMBLE.to_be_bytes());
    out.extend_from_slice(&total_words.to_be_bytes());
    out.extend_from_slice(&message_type.token());
}

fn take<'a>(bytes: &'a [u8], len: usize, what: &str) -> Result<&'a [u8], ProtoError> {
    bytes
        .get(..len)
        .ok_or_else(|| ProtoError::InvalidPacket(format!("truncated while reading {what}")))
}

/// Bit flags carried in Hello (`S`/`M`/`P`) and in the encrypted Confirm
/// body (`E`/`V`/`A`/`D`), each packed into one byte here for simplicity
/// since RFC 6189 packs them into spare header bits alongside the hc/cc/
/// ac/kc/sc nibble counts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HelloFlags {
    pub sig_cap: bool,
    pub mitm_pbx: bool,
    pub passive: bool,
}

#[derive(Debug, Clone)]
pub struct Hello {
    pub version: [u8; 4],
    pub client_id: [u8; 16],
    pub h3: Vec<u8>,
    pub zid: Zid,
    pub flags: HelloFlags,
    pub hash_algorithms: Vec<HashAlgorithm>,
    pub cipher_algorithms: Vec<CipherAlgorithm>,
    pub auth_tag_algorithms: Vec<AuthTagAlgorithm>,
    pub key_agreement_algorithms: Vec<KeyAgreementAlgorithm>,
    pub sas_algorithms: Vec<SasAlgorithm>,
    pub mac: [u8; 8],
}

impl Hello {
    pub fn encode(&self) -> Vec<u8> {
        let mut body = Vec::new();
        body.extend_from_slice(&self.version);
        body.extend_from_slice(&self.client_id);
        body.extend_from_slice(&self.h3);
        body.extend_from_slice(self.zid.as_bytes());
        let flags_byte = (self.flags.sig_cap as u8)
            | ((self.flags.mitm_pbx as u8) << 1)
            | ((self.flags.passive as u8) << 2);
        body.push(flags_byte);
        body.push(self.hash_algorithms.len() as u8);
        body.push(self.cipher_algorithms.len() as u8);
        body.push(self.auth_tag_algorithms.len() as u8);
        body.push(self.key_agreement_algorithms.len() as u8);
        body.push(self.sas_algorithms.len() as u8);
        for a in &self.hash_algorithms {
            body.extend_from_slice(&a.token());
        }
        for a in &self.cipher_algorithms {
            body.extend_from_slice(&a.token());
        }
        for a in &self.auth_tag_algorithms {
            body.extend_from_slice(&a.token());
        }
        for a in &self.key_agreement_algorithms {
            body.extend_from_slice(&a.token());
        }
        for a in &self.sas_algorithms {
            body.extend_from_slice(&a.token());
        }
        body.extend_from_slice(&self.mac);
        body
    }

    pub fn decode(body: &[u8], hash_len: usize) -> Result<Self, ProtoError> {
        let mut offset = 0;
        let version: [u8; 4] = take(body, 4, "version")?.try_into().unwrap();
        offset += 4;
        let client_id: [u8; 16] = take(&body[offset..], 16, "client_id")?.try_into().unwrap();
        offset += 16;
        let h3 = take(&body[offset..], hash_len, "H3")?.to_vec();
        offset += hash_len;
        let zid = Zid::from_slice(take(&body[offset..], ZID_LEN, "ZID")?)?;
        offset += ZID_LEN;
        let flags_byte = *take(&body[offset..], 1, "flags")?.first().unwrap();
        offset += 1;
        let flags = HelloFlags {
            sig_cap: flags_byte & 0b001 != 0,
            mitm_pbx: flags_byte & 0b010 != 0,
            passive: flags_byte & 0b100 != 0,
        };
        let counts: [u8; 5] = take(&body[offset..], 5, "algorithm counts")?
            .try_into()
            .unwrap();
        offset += 5;
        let [hc, cc, ac, kc, sc] = counts;

        let mut read_tokens = |count: u8| -> Result<Vec<[u8; 4]>, ProtoError> {
            let n = count as usize;
            let bytes = take(&body[offset..], n * 4, "algorithm list")?;
            offset += n * 4;
            Ok(bytes.chunks_exact(4).map(|c| c.try_into().unwrap()).collect())
        };

        let hash_algorithms = read_tokens(hc)?
            .iter()
            .map(HashAlgorithm::from_token)
            .collect::<Result<Vec<_>, _>>()?;
        let cipher_algorithms = read_tokens(cc)?
            .iter()
            .map(CipherAlgorithm::from_token)
            .collect::<Result<Vec<_>, _>>()?;
        let auth_tag_algorithms = read_tokens(ac)?
            .iter()
            .map(AuthTagAlgorithm::from_token)
            .collect::<Result<Vec<_>, _>>()?;
        let key_agreement_algorithms = read_tokens(kc)?
            .iter()
            .map(KeyAgreementAlgorithm::from_token)
            .collect::<Result<Vec<_>, _>>()?;
        let sas_algorithms = read_tokens(sc)?
            .iter()
            .map(SasAlgorithm::from_token)
            .collect::<Result<Vec<_>, _>>()?;

        let mac: [u8; 8] = take(&body[offset..], 8, "Hello MAC")?.try_into().unwrap();

        Ok(Self {
            version,
            client_id,
            h3,
            zid,
            flags,
            hash_algorithms,
            cipher_algorithms,
            auth_tag_algorithms,
            key_agreement_algorithms,
            sas_algorithms,
            mac,
        })
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct HelloAck;

#[derive(Debug, Clone)]
pub enum CommitVariable {
    Dh { hvi: [u8; 32] },
    Kem { hvi: [u8; 32], initiator_public: Vec<u8> },
    NonDh { nonce: [u8; 16], key_id: Option<[u8; 8]> },
}

#[derive(Debug, Clone)]
pub struct Commit {
    pub h2: Vec<u8>,
    pub zid: Zid,
    pub hash: HashAlgorithm,
    pub cipher: CipherAlgorithm,
    pub auth_tag: AuthTagAlgorithm,
    pub key_agreement: KeyAgreementAlgorithm,
    pub sas: SasAlgorithm,
    pub variable: CommitVariable,
    pub mac: [u8; 8],
}

impl Commit {
    pub fn encode(&self) -> Vec<u8> {
        let mut body = Vec::new();
        body.extend_from_slice(&self.h2);
        body.extend_from_slice(self.zid.as_bytes());
        body.extend_from_slice(&self.hash.token());
        body.extend_from_slice(&self.cipher.token());
        body.extend_from_slice(&self.auth_tag.token());
        body.extend_from_slice(&self.key_agreement.token());
        body.extend_from_slice(&self.sas.token());
        match &self.variable {
            CommitVariable::Dh { hvi } => body.extend_from_slice(hvi),
            CommitVariable::Kem { hvi, initiator_public } => {
                body.extend_from_slice(hvi);
                body.extend_from_slice(initiator_public);
            }
            CommitVariable::NonDh { nonce, key_id } => {
                body.extend_from_slice(nonce);
                if let Some(id) = key_id {
                    body.extend_from_slice(id);
                }
            }
        }
        body.extend_from_slice(&self.mac);
        body
    }

    pub fn decode(body: &[u8], hash_len: usize, has_key_id: bool) -> Result<Self, ProtoError> {
        let mut offset = 0;
        let h2 = take(body, hash_len, "H2")?.to_vec();
        offset += hash_len;
        let zid = Zid::from_slice(take(&body[offset..], ZID_LEN, "ZID")?)?;
        offset += ZID_LEN;
        let hash = HashAlgorithm::from_token(take(&body[offset..], 4, "hash token")?.try_into().unwrap())?;
        offset += 4;
        let cipher = CipherAlgorithm::from_token(
            take(&body[offset..], 4, "cipher token")?.try_into().unwrap(),
        )?;
        offset += 4;
        let auth_tag = AuthTagAlgorithm::from_token(
            take(&body[offset..], 4, "auth-tag token")?.try_into().unwrap(),
        )?;
        offset += 4;
        let key_agreement = KeyAgreementAlgorithm::from_token(
            take(&body[offset..], 4, "key-agreement token")?
                .try_into()
                .unwrap(),
        )?;
        offset += 4;
        let sas = SasAlgorithm::from_token(take(&body[offset..], 4, "SAS token")?.try_into().unwrap())?;
        offset += 4;

        let variable = if key_agreement.has_dhpart() {
            let hvi: [u8; 32] = take(&body[offset..], 32, "hvi")?.try_into().unwrap();
            offset += 32;
            if key_agreement.is_kem() {
                let initiator_public = body[offset..body.len() - 8].to_vec();
                offset = body.len() - 8;
                CommitVariable::Kem {
                    hvi,
                    initiator_public,
                }
            } else {
                CommitVariable::Dh { hvi }
            }
        } else {
            let nonce: [u8; 16] = take(&body[offset..], 16, "nonce")?.try_into().unwrap();
            offset += 16;
            let key_id = if has_key_id {
                let id: [u8; 8] = take(&body[offset..], 8, "keyID")?.try_into().unwrap();
                offset += 8;
                Some(id)
            } else {
                None
            };
            CommitVariable::NonDh { nonce, key_id }
        };

        let mac: [u8; 8] = take(&body[offset..], 8, "Commit MAC")?.try_into().unwrap();
        Ok(Self {
            h2,
            zid,
            hash,
            cipher,
            auth_tag,
            key_agreement,
            sas,
            variable,
            mac,
        })
    }
}

#[derive(Debug, Clone)]
pub struct DhPart {
    pub h1: Vec<u8>,
    pub rs1_id: [u8; 8],
    pub rs2_id: [u8; 8],
    pub aux_id: [u8; 8],
    pub pbx_id: [u8; 8],
    pub pv: Vec<u8>,
    pub mac: [u8; 8],
}

impl DhPart {
    pub fn encode(&self) -> Vec<u8> {
        let mut body = Vec::new();
        body.extend_from_slice(&self.h1);
        body.extend_from_slice(&self.rs1_id);
        body.extend_from_slice(&self.rs2_id);
        body.extend_from_slice(&self.aux_id);
        body.extend_from_slice(&self.pbx_id);
        body.extend_from_slice(&self.pv);
        body.extend_from_slice(&self.mac);
        body
    }

    pub fn decode(body: &[u8], hash_len: usize, pv_len: usize) -> Result<Self, ProtoError> {
        let mut offset = 0;
        let h1 = take(body, hash_len, "H1")?.to_vec();
        offset += hash_len;
        let rs1_id: [u8; 8] = take(&body[offset..], 8, "rs1ID")?.try_into().unwrap();
        offset += 8;
        let rs2_id: [u8; 8] = take(&body[offset..], 8, "rs2ID")?.try_into().unwrap();
        offset += 8;
        let aux_id: [u8; 8] = take(&body[offset..], 8, "auxID")?.try_into().unwrap();
        offset += 8;
        let pbx_id: [u8; 8] = take(&body[offset..], 8, "pbxID")?.try_into().unwrap();
        offset += 8;
        let pv = take(&body[offset..], pv_len, "pv")?.to_vec();
        offset += pv_len;
        let mac: [u8; 8] = take(&body[offset..], 8, "DHPart MAC")?.try_into().unwrap();
        Ok(Self {
            h1,
            rs1_id,
            rs2_id,
            aux_id,
            pbx_id,
            pv,
            mac,
        })
    }
}

/// The plaintext fields carried inside Confirm's encrypted region, once
/// decrypted.
#[derive(Debug, Clone)]
pub struct ConfirmPlaintext {
    pub h0: Vec<u8>,
    pub flags: ConfirmFlags,
    pub cache_expiration: u32,
    pub signature: Vec<u8>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ConfirmFlags {
    pub sas_verified: bool,
    pub v_flag: bool,
    pub allow_clear: bool,
    pub disclosure: bool,
}

impl ConfirmPlaintext {
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::new();
        out.extend_from_slice(&self.h0);
        out.extend_from_slice(&(0u16).to_be_bytes()); // pad length, no padding emitted
        out.extend_from_slice(&(self.signature.len() as u16).to_be_bytes());
        let flags_byte = (self.flags.sas_verified as u8)
            | ((self.flags.v_flag as u8) << 1)
            | ((self.flags.allow_clear as u8) << 2)
            | ((self.flags.disclosure as u8) << 3);
        out.push(flags_byte);
        out.push(0); // reserved
        out.push(0);
        out.push(0);
        out.extend_from_slice(&self.cache_expiration.to_be_bytes());
        out.extend_from_slice(&self.signature);
        out
    }

    pub fn decode(bytes: &[u8], hash_len: usize) -> Result<Self, ProtoError> {
        let mut offset = 0;
        let h0 = take(bytes, hash_len, "H0")?.to_vec();
        offset += hash_len;
        let _pad_len = BigEndian::read_u16(take(&bytes[offset..], 2, "pad length")?);
        offset += 2;
        let sig_len = BigEndian::read_u16(take(&bytes[offset..], 2, "signature length")?) as usize;
        offset += 2;
        let flags_byte = *take(&bytes[offset..], 1, "confirm flags")?.first().unwrap();
        offset += 4; // flags byte + 3 reserved bytes
        let flags = ConfirmFlags {
            sas_verified: flags_byte & 0b0001 != 0,
            v_flag: flags_byte & 0b0010 != 0,
            allow_clear: flags_byte & 0b0100 != 0,
            disclosure: flags_byte & 0b1000 != 0,
        };
        let cache_expiration = BigEndian::read_u32(take(&bytes[offset..], 4, "cache expiration")?);
        offset += 4;
        let signature = take(&bytes[offset..], sig_len, "signature")?.to_vec();
        Ok(Self {
            h0,
            flags,
            cache_expiration,
            signature,
        })
    }
}

#[derive(Debug, Clone)]
pub struct Confirm {
    pub confirm_mac: [u8; 8],
    pub iv: [u8; 16],
    /// Ciphertext of a [`ConfirmPlaintext`]; encrypted/decrypted by the
    /// caller (the key schedule's per-direction `zrtpkey`) since this
    /// module only frames bytes.
    pub encrypted: Vec<u8>,
}

impl Confirm {
    pub fn encode(&self) -> Vec<u8> {
        let mut body = Vec::new();
        body.extend_from_slice(&self.confirm_mac);
        body.extend_from_slice(&self.iv);
        body.extend_from_slice(&self.encrypted);
        body
    }

    pub fn decode(body: &[u8]) -> Result<Self, ProtoError> {
        let confirm_mac: [u8; 8] = take(body, 8, "confirm_mac")?.try_into().unwrap();
        let iv: [u8; 16] = take(&body[8..], 16, "Confirm IV")?.try_into().unwrap();
        let encrypted = body[24..].to_vec();
        Ok(Self {
            confirm_mac,
            iv,
            encrypted,
        })
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct Conf2Ack;

#[derive(Debug, Clone, Copy)]
pub struct GoClear {
    pub mac: [u8; 8],
}

impl GoClear {
    pub fn encode(&self) -> Vec<u8> {
        self.mac.to_vec()
    }

    pub fn decode(body: &[u8]) -> Result<Self, ProtoError> {
        let mac: [u8; 8] = take(body, 8, "GoClear MAC")?.try_into().unwrap();
        Ok(Self { mac })
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ClearAck;

#[derive(Debug, Clone, Copy)]
pub struct Error {
    pub code: u32,
}

impl Error {
    pub fn encode(&self) -> Vec<u8> {
        self.code.to_be_bytes().to_vec()
    }

    pub fn decode(body: &[u8]) -> Result<Self, ProtoError> {
        let code = BigEndian::read_u32(take(body, 4, "error code")?);
        Ok(Self { code })
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ErrorAck;

#[derive(Debug, Clone, Copy)]
pub struct Ping {
    pub version: [u8; 4],
    pub endpoint_hash: [u8; 16],
    pub ssrc: u32,
}

impl Ping {
    pub fn encode(&self) -> Vec<u8> {
        let mut body = Vec::new();
        body.extend_from_slice(&self.version);
        body.extend_from_slice(&self.endpoint_hash);
        body.extend_from_slice(&self.ssrc.to_be_bytes());
        body
    }

    pub fn decode(body: &[u8]) -> Result<Self, ProtoError> {
        let version: [u8; 4] = take(body, 4, "Ping version")?.try_into().unwrap();
        let endpoint_hash: [u8; 16] = take(&body[4..], 16, "Ping endpoint hash")?
            .try_into()
            .unwrap();
        let ssrc = BigEndian::read_u32(take(&body[20..], 4, "Ping SSRC")?);
        Ok(Self {
            version,
            endpoint_hash,
            ssrc,
        })
    }
}

#[derive(Debug, Clone, Copy)]
pub struct PingAck {
    pub sender_endpoint_hash: [u8; 16],
    pub receiver_endpoint_hash: [u8; 16],
    pub ssrc: u32,
}

impl PingAck {
    pub fn encode(&self) -> Vec<u8> {
        let mut body = Vec::new();
        body.extend_from_slice(&self.sender_endpoint_hash);
        body.extend_from_slice(&self.receiver_endpoint_hash);
        body.extend_from_slice(&self.ssrc.to_be_bytes());
        body
    }

    pub fn decode(body: &[u8]) -> Result<Self, ProtoError> {
        let sender_endpoint_hash: [u8; 16] =
            take(body, 16, "PingACK sender hash")?.try_into().unwrap();
        let receiver_endpoint_hash: [u8; 16] = take(&body[16..], 16, "PingACK receiver hash")?
            .try_into()
            .unwrap();
        let ssrc = BigEndian::read_u32(take(&body[32..], 4, "PingACK SSRC")?);
        Ok(Self {
            sender_endpoint_hash,
            receiver_endpoint_hash,
            ssrc,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_hello() -> Hello {
        Hello {
            version: *b"1.10",
            client_id: *b"zrtp-engine-test",
            h3: vec![7u8; 32],
            zid: Zid::generate(),
            flags: HelloFlags::default(),
            hash_algorithms: vec![HashAlgorithm::S256],
            cipher_algorithms: vec![CipherAlgorithm::Aes1],
            auth_tag_algorithms: vec![AuthTagAlgorithm::Hs32],
            key_agreement_algorithms: vec![KeyAgreementAlgorithm::Dh3k],
            sas_algorithms: vec![SasAlgorithm::B32],
            mac: [1u8; 8],
        }
    }

    #[test]
    fn hello_roundtrips() {
        let hello = sample_hello();
        let encoded = hello.encode();
        let decoded = Hello::decode(&encoded, 32).unwrap();
        assert_eq!(decoded.zid, hello.zid);
        assert_eq!(decoded.h3, hello.h3);
        assert_eq!(decoded.hash_algorithms, hello.hash_algorithms);
        assert_eq!(decoded.mac, hello.mac);
    }

    #[test]
    fn commit_dh_mode_roundtrips() {
        let commit = Commit {
            h2: vec![2u8; 32],
            zid: Zid::generate(),
            hash: HashAlgorithm::S256,
            cipher: CipherAlgorithm::Aes1,
            auth_tag: AuthTagAlgorithm::Hs32,
            key_agreement: KeyAgreementAlgorithm::Dh3k,
            sas: SasAlgorithm::B32,
            variable: CommitVariable::Dh { hvi: [9u8; 32] },
            mac: [3u8; 8],
        };
        let encoded = commit.encode();
        let decoded = Commit::decode(&encoded, 32, false).unwrap();
        assert!(matches!(decoded.variable, CommitVariable::Dh { hvi } if hvi == [9u8; 32]));
    }

    #[test]
    fn dhpart_roundtrips() {
        let dhpart = DhPart {
            h1: vec![4u8; 32],
            rs1_id: [1u8; 8],
            rs2_id: [2u8; 8],
            aux_id: [3u8; 8],
            pbx_id: [4u8; 8],
            pv: vec![5u8; 32],
            mac: [6u8; 8],
        };
        let encoded = dhpart.encode();
        let decoded = DhPart::decode(&encoded, 32, 32).unwrap();
        assert_eq!(decoded.h1, dhpart.h1);
        assert_eq!(decoded.pv, dhpart.pv);
    }

    #[test]
    fn confirm_plaintext_roundtrips() {
        let plaintext = ConfirmPlaintext {
            h0: vec![1u8; 32],
            flags: ConfirmFlags {
                sas_verified: true,
                ..Default::default()
            },
            cache_expiration: 3600,
            signature: Vec::new(),
        };
        let encoded = plaintext.encode();
        let decoded = ConfirmPlaintext::decode(&encoded, 32).unwrap();
        assert_eq!(decoded.h0, plaintext.h0);
        assert!(decoded.flags.sas_verified);
        assert_eq!(decoded.cache_expiration, 3600);
    }

    #[test]
    fn message_type_token_roundtrips_for_every_variant() {
        for t in [
            MessageType::Hello,
            MessageType::HelloAck,
            MessageType::Commit,
            MessageType::DhPart1,
            MessageType::DhPart2,
            MessageType::Confirm1,
            MessageType::Confirm2,
            MessageType::Conf2Ack,
            MessageType::Error,
            MessageType::ErrorAck,
            MessageType::GoClear,
            MessageType::ClearAck,
            MessageType::SasRelay,
            MessageType::RelayAck,
            MessageType::Ping,
            MessageType::PingAck,
        ] {
            assert_eq!(MessageType::from_token(&t.token()).unwrap(), t);
        }
    }
}
