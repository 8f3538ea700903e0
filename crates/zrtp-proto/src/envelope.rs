//! The packet envelope: 12-byte fixed header, optional 8-byte fragment
//! header, the message payload, and a trailing 4-byte CRC-32.
//!
//! Grounded on `dl_proto/src/envelope.rs`'s separation of the on-wire
//! envelope from the plaintext payload, reimplemented as bit-exact binary
//! instead of a JSON/serde wrapper struct — ZRTP's envelope is RFC 6189's
//! fixed binary layout, not a serialisable Rust type.

use byteorder::{BigEndian, ByteOrder};

use crate::error::ProtoError;

pub const MAGIC_COOKIE: u32 = 0x5A52_5450; // "ZRTP"
pub const FIXED_HEADER_LEN: usize = 12;
pub const FRAGMENT_HEADER_LEN: usize = 8;
pub const CRC_LEN: usize = 4;
pub const MIN_PACKET_LEN: usize = 28;
pub const MAX_PACKET_LEN: usize = 3072;

const BYTE0_REGULAR: u8 = 0x10;
const BYTE0_FRAGMENTED: u8 = 0x11;

/// Parsed envelope header, with `message` pointing at the bytes between
/// the header(s) and the trailing CRC. For a fragmented packet `message`
/// is the fragment's own carried bytes, not a reassembled message.
#[derive(Debug)]
pub struct Envelope<'a> {
    pub sequence_number: u16,
    pub ssrc: u32,
    pub fragment: Option<FragmentHeader>,
    pub message: &'a [u8],
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FragmentHeader {
    pub message_id: u16,
    pub message_total_length_words: u16,
    pub offset_words: u16,
    pub fragment_length_words: u16,
}

/// Envelope validation and header parse.
pub fn parse(packet: &[u8]) -> Result<Envelope<'_>, ProtoError> {
    if packet.len() < MIN_PACKET_LEN || packet.len() > MAX_PACKET_LEN {
        return Err(ProtoError::InvalidPacket(format!(
            "length {} out of range [{MIN_PACKET_LEN}, {MAX_PACKET_LEN}]",
            packet.len()
        )));
    }
    if !crc_ok(packet) {
        return Err(ProtoError::InvalidCrc);
    }

    let byte0 = packet[0];
    if byte0 != BYTE0_REGULAR && byte0 != BYTE0_FRAGMENTED {
        return Err(ProtoError::InvalidPacket(format!(
            "byte 0 = {byte0:#04x}, expected 0x10 or 0x11"
        )));
    }
    if packet[1] != 0 {
        return Err(ProtoError::InvalidPacket("byte 1 must be 0".into()));
    }

    let sequence_number = BigEndian::read_u16(&packet[2..4]);
    let magic = BigEndian::read_u32(&packet[4..8]);
    if magic != MAGIC_COOKIE {
        return Err(ProtoError::InvalidPacket("magic cookie mismatch".into()));
    }
    let ssrc = BigEndian::read_u32(&packet[8..12]);

    let body_start = FIXED_HEADER_LEN;
    let body_end = packet.len() - CRC_LEN;

    if byte0 == BYTE0_FRAGMENTED {
        if body_end < body_start + FRAGMENT_HEADER_LEN {
            return Err(ProtoError::InvalidPacket("fragment header truncated".into()));
        }
        let frag_bytes = &packet[body_start..body_start + FRAGMENT_HEADER_LEN];
        let fragment = FragmentHeader {
            message_id: BigEndian::read_u16(&frag_bytes[0..2]),
            message_total_length_words: BigEndian::read_u16(&frag_bytes[2..4]),
            offset_words: BigEndian::read_u16(&frag_bytes[4..6]),
            fragment_length_words: BigEndian::read_u16(&frag_bytes[6..8]),
        };
        Ok(Envelope {
            sequence_number,
            ssrc,
            fragment: Some(fragment),
            message: &packet[body_start + FRAGMENT_HEADER_LEN..body_end],
        })
    } else {
        Ok(Envelope {
            sequence_number,
            ssrc,
            fragment: None,
            message: &packet[body_start..body_end],
        })
    }
}

/// Builds the envelope around `message`, appending the CRC-32. The
/// sequence number is written as 0 here; [`set_sequence_number`] fills it
/// in immediately before each physical send, per spec.md §4.1.3.
pub fn build(ssrc: u32, message: &[u8], fragment: Option<FragmentHeader>) -> Vec<u8> {
    let mut packet = Vec::with_capacity(
        FIXED_HEADER_LEN
            + fragment.map_or(0, |_| FRAGMENT_HEADER_LEN)
            + message.len()
            + CRC_LEN,
    );
    packet.push(if fragment.is_some() {
        BYTE0_FRAGMENTED
    } else {
        BYTE0_REGULAR
    });
    packet.push(0);
    packet.extend_from_slice(&0u16.to_be_bytes());
    packet.extend_from_slice(&MAGIC_COOKIE.to_be_bytes());
    packet.extend_from_slice(&ssrc.to_be_bytes());
    if let Some(frag) = fragment {
        packet.extend_from_slice(&frag.message_id.to_be_bytes());
        packet.extend_from_slice(&frag.message_total_length_words.to_be_bytes());
        packet.extend_from_slice(&frag.offset_words.to_be_bytes());
        packet.extend_from_slice(&frag.fragment_length_words.to_be_bytes());
    }
    packet.extend_from_slice(message);
    let crc = crc32(&packet);
    packet.extend_from_slice(&crc.to_be_bytes());
    packet
}

/// Writes the 16-bit sequence number into an already-built packet and
/// recomputes its trailing CRC-32.
pub fn set_sequence_number(packet: &mut [u8], sequence_number: u16) {
    BigEndian::write_u16(&mut packet[2..4], sequence_number);
    let crc_offset = packet.len() - CRC_LEN;
    let crc = crc32(&packet[..crc_offset]);
    BigEndian::write_u32(&mut packet[crc_offset..], crc);
}

fn crc32(data: &[u8]) -> u32 {
    zrtp_crypto::crc32::compute(data)
}

fn crc_ok(packet: &[u8]) -> bool {
    zrtp_crypto::crc32::verify(packet)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn build_then_parse_regular_packet_roundtrips() {
        let message = b"fake message header + body bytes here....".to_vec();
        let mut packet = build(0xdead_beef, &message, None);
        set_sequence_number(&mut packet, 42);
        let envelope = parse(&packet).unwrap();
        assert_eq!(envelope.sequence_number, 42);
        assert_eq!(envelope.ssrc, 0xdead_beef);
        assert!(envelope.fragment.is_none());
        assert_eq!(envelope.message, message.as_slice());
    }

    #[test]
    fn build_then_parse_fragmented_packet_roundtrips() {
        let message = b"fragment payload bytes go here too........".to_vec();
        let frag = FragmentHeader {
            message_id: 7,
            message_total_length_words: 20,
            offset_words: 0,
            fragment_length_words: 10,
        };
        let packet = build(1, &message, Some(frag));
        let envelope = parse(&packet).unwrap();
        assert_eq!(envelope.fragment, Some(frag));
        assert_eq!(envelope.message, message.as_slice());
    }

    #[test]
    fn tampered_crc_is_rejected() {
        let message = b"some message bytes padded to min length....".to_vec();
        let mut packet = build(1, &message, None);
        let last = packet.len() - 1;
        packet[last] ^= 0xff;
        assert!(matches!(parse(&packet), Err(ProtoError::InvalidCrc)));
    }

    #[test]
    fn too_short_packet_is_rejected() {
        assert!(matches!(
            parse(&[0u8; 10]),
            Err(ProtoError::InvalidPacket(_))
        ));
    }
}
