use std::collections::HashMap;

use shared::error::{Error, Result};

use crate::handshake::{HandshakeHeader, HANDSHAKE_HEADER_LENGTH};

const MAX_BUFFERED_BYTES: usize = 1 << 20;

struct PartialMessage {
    header: HandshakeHeader,
    body: Vec<u8>,
    received: Vec<bool>,
}

/// Reassembles fragmented handshake messages keyed by message sequence
/// (RFC 6347 section 4.2.3). Complete messages are handed out in
/// message-sequence order.
#[derive(Default)]
pub(crate) struct FragmentBuffer {
    partials: HashMap<u16, PartialMessage>,
    buffered_bytes: usize,
}

impl FragmentBuffer {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Absorbs one handshake fragment (header included). Out-of-range
    /// offsets are rejected; duplicates are idempotent.
    pub(crate) fn push(&mut self, fragment: &[u8]) -> Result<()> {
        let mut reader = fragment;
        let header = HandshakeHeader::unmarshal(&mut reader)?;

        if header.fragment_length as usize != fragment.len() - HANDSHAKE_HEADER_LENGTH {
            return Err(Error::ErrLengthMismatch);
        }
        if header.fragment_offset + header.fragment_length > header.length {
            return Err(Error::ErrLengthMismatch);
        }
        if self.buffered_bytes + header.fragment_length as usize > MAX_BUFFERED_BYTES {
            return Err(Error::ErrPacketTooBig);
        }

        let partial = self
            .partials
            .entry(header.message_sequence)
            .or_insert_with(|| PartialMessage {
                header,
                body: vec![0; header.length as usize],
                received: vec![false; header.length as usize],
            });
        if partial.header.length != header.length
            || partial.header.handshake_type != header.handshake_type
        {
            return Err(Error::ErrLengthMismatch);
        }

        let start = header.fragment_offset as usize;
        let end = start + header.fragment_length as usize;
        partial.body[start..end].copy_from_slice(&fragment[HANDSHAKE_HEADER_LENGTH..]);
        for received in &mut partial.received[start..end] {
            *received = true;
        }
        self.buffered_bytes += header.fragment_length as usize;

        Ok(())
    }

    /// Pops the message with the given sequence if fully reassembled,
    /// returning its defragmented wire form (header + body).
    pub(crate) fn pop(&mut self, message_sequence: u16) -> Option<(HandshakeHeader, Vec<u8>)> {
        let complete = self
            .partials
            .get(&message_sequence)
            .map(|p| p.received.iter().all(|r| *r))?;
        if !complete {
            return None;
        }

        let partial = self.partials.remove(&message_sequence)?;
        self.buffered_bytes = self.buffered_bytes.saturating_sub(partial.body.len());

        let mut header = partial.header;
        header.fragment_offset = 0;
        header.fragment_length = header.length;

        let mut wire = header.marshal();
        wire.extend_from_slice(&partial.body);
        Some((header, wire))
    }

    pub(crate) fn clear(&mut self) {
        self.partials.clear();
        self.buffered_bytes = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handshake::HandshakeType;

    fn fragment(seq: u16, total: u32, offset: u32, body: &[u8]) -> Vec<u8> {
        let header = HandshakeHeader {
            handshake_type: HandshakeType::Certificate,
            length: total,
            message_sequence: seq,
            fragment_offset: offset,
            fragment_length: body.len() as u32,
        };
        let mut out = header.marshal();
        out.extend_from_slice(body);
        out
    }

    #[test]
    fn test_single_fragment_message() -> Result<()> {
        let mut fb = FragmentBuffer::new();
        fb.push(&fragment(0, 4, 0, &[1, 2, 3, 4]))?;
        let (header, wire) = fb.pop(0).unwrap();
        assert_eq!(header.length, 4);
        assert_eq!(&wire[HANDSHAKE_HEADER_LENGTH..], &[1, 2, 3, 4]);
        Ok(())
    }

    #[test]
    fn test_out_of_order_fragments_reassemble() -> Result<()> {
        let mut fb = FragmentBuffer::new();
        fb.push(&fragment(1, 6, 3, &[4, 5, 6]))?;
        assert!(fb.pop(1).is_none());
        fb.push(&fragment(1, 6, 0, &[1, 2, 3]))?;
        let (_, wire) = fb.pop(1).unwrap();
        assert_eq!(&wire[HANDSHAKE_HEADER_LENGTH..], &[1, 2, 3, 4, 5, 6]);
        Ok(())
    }

    #[test]
    fn test_overflowing_fragment_rejected() {
        let mut fb = FragmentBuffer::new();
        assert!(fb.push(&fragment(0, 2, 1, &[1, 2, 3])).is_err());
    }

    #[test]
    fn test_duplicate_fragment_idempotent() -> Result<()> {
        let mut fb = FragmentBuffer::new();
        let f = fragment(2, 2, 0, &[9, 9]);
        fb.push(&f)?;
        fb.push(&f)?;
        assert!(fb.pop(2).is_some());
        assert!(fb.pop(2).is_none());
        Ok(())
    }
}
