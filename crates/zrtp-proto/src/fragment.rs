//! Fragment reassembly: one in-flight record per channel, accepting
//! fragments out of order within the current `message_id`.
//!
//! New module: the teacher never fragments messages, so this is built
//! directly from spec.md's reassembly algorithm.

use crate::envelope::FragmentHeader;
use crate::error::ProtoError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Span {
    offset_words: u16,
    length_words: u16,
}

/// Reassembly state for one channel. `None` until the first fragment for
/// a message arrives.
#[derive(Debug, Default)]
pub struct Reassembly {
    message_id: Option<u16>,
    total_length_words: u16,
    buffer: Vec<u8>,
    received: Vec<Span>,
}

/// What happened to an incoming fragment.
pub enum Outcome {
    /// The fragment was stale (an older `message_id`) and was discarded.
    DiscardedStale,
    /// The fragment was accepted but the message is not complete yet.
    Held,
    /// The fragment completed the message; here are the reassembled bytes
    /// (header-and-CRC-free, the raw message payload).
    Complete(Vec<u8>),
}

impl Reassembly {
    /// `header_len` is the size of the fixed message-header region that
    /// precedes the reassembled message body at byte 0 of the allocated
    /// buffer.
    pub fn accept(
        &mut self,
        header_len: usize,
        frag: FragmentHeader,
        fragment_bytes: &[u8],
    ) -> Result<Outcome, ProtoError> {
        match self.message_id {
            Some(current) if frag.message_id < current => {
                return Ok(Outcome::DiscardedStale);
            }
            Some(current) if frag.message_id > current => {
                self.start_new(header_len, frag);
            }
            None => {
                self.start_new(header_len, frag);
            }
            _ => {} // == current: keep accumulating into the existing buffer
        }

        let span = Span {
            offset_words: frag.offset_words,
            length_words: frag.fragment_length_words,
        };
        if !self.received.contains(&span) {
            let byte_offset = header_len + 4 * span.offset_words as usize;
            let byte_len = 4 * span.length_words as usize;
            if byte_offset + byte_len > self.buffer.len() {
                return Err(ProtoError::InvalidPacket(
                    "fragment offset/length exceeds allocated buffer".into(),
                ));
            }
            if fragment_bytes.len() < byte_len {
                return Err(ProtoError::InvalidPacket("fragment shorter than declared length".into()));
            }
            self.buffer[byte_offset..byte_offset + byte_len]
                .copy_from_slice(&fragment_bytes[..byte_len]);
            self.received.push(span);
        }

        let received_words: u32 = self
            .received
            .iter()
            .map(|s| s.length_words as u32)
            .sum();
        if received_words == self.total_length_words as u32 {
            Ok(Outcome::Complete(std::mem::take(&mut self.buffer)))
        } else {
            Ok(Outcome::Held)
        }
    }

    fn start_new(&mut self, header_len: usize, frag: FragmentHeader) {
        self.message_id = Some(frag.message_id);
        self.total_length_words = frag.message_total_length_words;
        self.buffer = vec![0u8; header_len + 4 * frag.message_total_length_words as usize];
        self.received.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frag(message_id: u16, offset_words: u16, length_words: u16) -> FragmentHeader {
        FragmentHeader {
            message_id,
            message_total_length_words: 4,
            offset_words,
            fragment_length_words: length_words,
        }
    }

    #[test]
    fn completes_after_all_fragments_in_order() {
        let mut r = Reassembly::default();
        let a = r.accept(0, frag(1, 0, 2), &[1, 2, 3, 4, 5, 6, 7, 8]).unwrap();
        assert!(matches!(a, Outcome::Held));
        let b = r.accept(0, frag(1, 2, 2), &[9, 10, 11, 12, 13, 14, 15, 16]).unwrap();
        assert!(matches!(b, Outcome::Complete(_)));
    }

    #[test]
    fn completes_with_out_of_order_fragments() {
        let mut r = Reassembly::default();
        let a = r.accept(0, frag(1, 2, 2), &[9, 10, 11, 12, 13, 14, 15, 16]).unwrap();
        assert!(matches!(a, Outcome::Held));
        let b = r.accept(0, frag(1, 0, 2), &[1, 2, 3, 4, 5, 6, 7, 8]).unwrap();
        assert!(matches!(b, Outcome::Complete(_)));
    }

    #[test]
    fn duplicate_fragment_is_idempotent() {
        let mut r = Reassembly::default();
        r.accept(0, frag(1, 0, 2), &[1, 2, 3, 4, 5, 6, 7, 8]).unwrap();
        let a = r.accept(0, frag(1, 0, 2), &[1, 2, 3, 4, 5, 6, 7, 8]).unwrap();
        assert!(matches!(a, Outcome::Held));
    }

    #[test]
    fn stale_message_id_is_discarded() {
        let mut r = Reassembly::default();
        r.accept(0, frag(2, 0, 2), &[0; 8]).unwrap();
        let stale = r.accept(0, frag(1, 0, 2), &[0; 8]).unwrap();
        assert!(matches!(stale, Outcome::DiscardedStale));
    }

    #[test]
    fn newer_message_id_abandons_current_reassembly() {
        let mut r = Reassembly::default();
        r.accept(0, frag(1, 0, 2), &[1; 8]).unwrap();
        let restarted = r.accept(0, frag(2, 0, 2), &[2; 8]).unwrap();
        assert!(matches!(restarted, Outcome::Held));
    }
}
