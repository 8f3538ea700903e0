//! CRC-32 over a packet envelope, used both to stamp an outgoing packet and
//! to validate an incoming one.

use crc32fast::Hasher;

/// CRC-32 (IEEE) over `data`.
pub fn compute(data: &[u8]) -> u32 {
    let mut hasher = Hasher::new();
    hasher.update(data);
    hasher.finalize()
}

/// Checks that the last 4 bytes of `packet` (big-endian) equal the CRC-32
/// of everything preceding them.
pub fn verify(packet: &[u8]) -> bool {
    if packet.len() < 4 {
        return false;
    }
    let (body, trailer) = packet.split_at(packet.len() - 4);
    let expected = u32::from_be_bytes(trailer.try_into().expect("split_at(len-4) leaves 4 bytes"));
    compute(body) == expected
}

/// Appends the big-endian CRC-32 of `body` onto it.
pub fn append(mut body: Vec<u8>) -> Vec<u8> {
    let crc = compute(&body);
    body.extend_from_slice(&crc.to_be_bytes());
    body
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn append_then_verify_roundtrips() {
        let packet = append(b"zrtp envelope bytes".to_vec());
        assert!(verify(&packet));
    }

    #[test]
    fn tampered_packet_fails_verification() {
        let mut packet = append(b"zrtp envelope bytes".to_vec());
        packet[0] ^= 0xff;
        assert!(!verify(&packet));
    }

    #[test]
    fn short_packet_is_rejected() {
        assert!(!verify(&[0, 1, 2]));
    }
}
