use std::time::Instant;

use bytes::{Buf, BufMut, Bytes};

use shared::error::{Error, Result};

pub(crate) const PAYLOAD_DATA_ENDING_FRAGMENT_BITMASK: u8 = 1;
pub(crate) const PAYLOAD_DATA_BEGINNING_FRAGMENT_BITMASK: u8 = 2;
pub(crate) const PAYLOAD_DATA_UNORDERED_BITMASK: u8 = 4;
pub(crate) const PAYLOAD_DATA_IMMEDIATE_SACK: u8 = 8;

pub const PAYLOAD_DATA_HEADER_SIZE: usize = 12;

/// PPID values WebRTC assigns to user messages (RFC 8831 section 8).
#[derive(Debug, Copy, Clone, PartialEq, Eq, Default)]
#[repr(u32)]
pub enum PayloadProtocolIdentifier {
    #[default]
    Unknown = 0,
    Dcep = 50,
    String = 51,
    Binary = 53,
    StringEmpty = 56,
    BinaryEmpty = 57,
}

impl From<u32> for PayloadProtocolIdentifier {
    fn from(v: u32) -> Self {
        match v {
            50 => PayloadProtocolIdentifier::Dcep,
            51 => PayloadProtocolIdentifier::String,
            53 => PayloadProtocolIdentifier::Binary,
            56 => PayloadProtocolIdentifier::StringEmpty,
            57 => PayloadProtocolIdentifier::BinaryEmpty,
            _ => PayloadProtocolIdentifier::Unknown,
        }
    }
}

/// DATA chunk (RFC 4960 section 3.3.1) plus the sender-side bookkeeping
/// the retransmission machinery needs.
#[derive(Debug, Clone)]
pub struct ChunkPayloadData {
    pub unordered: bool,
    pub beginning_fragment: bool,
    pub ending_fragment: bool,
    pub immediate_sack: bool,

    pub tsn: u32,
    pub stream_identifier: u16,
    pub stream_sequence_number: u16,
    pub payload_type: PayloadProtocolIdentifier,
    pub user_data: Bytes,

    /// Transmission bookkeeping, untouched by the codec.
    pub nsent: u32,
    pub since: Option<Instant>,
    pub acked: bool,
    pub abandoned: bool,
    pub retransmit: bool,
    pub missing_indicator: u32,
    /// Partial-reliability bound: None = reliable.
    pub max_retransmits: Option<u32>,
    pub expires_at: Option<Instant>,
}

impl Default for ChunkPayloadData {
    fn default() -> Self {
        ChunkPayloadData {
            unordered: false,
            beginning_fragment: false,
            ending_fragment: false,
            immediate_sack: false,
            tsn: 0,
            stream_identifier: 0,
            stream_sequence_number: 0,
            payload_type: PayloadProtocolIdentifier::Unknown,
            user_data: Bytes::new(),
            nsent: 0,
            since: None,
            acked: false,
            abandoned: false,
            retransmit: false,
            missing_indicator: 0,
            max_retransmits: None,
            expires_at: None,
        }
    }
}

impl PartialEq for ChunkPayloadData {
    fn eq(&self, other: &Self) -> bool {
        self.unordered == other.unordered
            && self.beginning_fragment == other.beginning_fragment
            && self.ending_fragment == other.ending_fragment
            && self.tsn == other.tsn
            && self.stream_identifier == other.stream_identifier
            && self.stream_sequence_number == other.stream_sequence_number
            && self.payload_type == other.payload_type
            && self.user_data == other.user_data
    }
}

impl ChunkPayloadData {
    pub(crate) fn flags(&self) -> u8 {
        let mut flags = 0;
        if self.ending_fragment {
            flags |= PAYLOAD_DATA_ENDING_FRAGMENT_BITMASK;
        }
        if self.beginning_fragment {
            flags |= PAYLOAD_DATA_BEGINNING_FRAGMENT_BITMASK;
        }
        if self.unordered {
            flags |= PAYLOAD_DATA_UNORDERED_BITMASK;
        }
        if self.immediate_sack {
            flags |= PAYLOAD_DATA_IMMEDIATE_SACK;
        }
        flags
    }

    pub(crate) fn marshal_value(&self) -> Result<Vec<u8>> {
        let mut out = Vec::with_capacity(PAYLOAD_DATA_HEADER_SIZE + self.user_data.len());
        out.put_u32(self.tsn);
        out.put_u16(self.stream_identifier);
        out.put_u16(self.stream_sequence_number);
        out.put_u32(self.payload_type as u32);
        out.extend_from_slice(&self.user_data);
        Ok(out)
    }

    pub(crate) fn unmarshal_value(flags: u8, buf: &mut Bytes) -> Result<Self> {
        if buf.remaining() < PAYLOAD_DATA_HEADER_SIZE {
            return Err(Error::ErrChunkTooShort);
        }

        let tsn = buf.get_u32();
        let stream_identifier = buf.get_u16();
        let stream_sequence_number = buf.get_u16();
        let payload_type = PayloadProtocolIdentifier::from(buf.get_u32());
        let user_data = buf.copy_to_bytes(buf.remaining());

        Ok(ChunkPayloadData {
            unordered: flags & PAYLOAD_DATA_UNORDERED_BITMASK != 0,
            beginning_fragment: flags & PAYLOAD_DATA_BEGINNING_FRAGMENT_BITMASK != 0,
            ending_fragment: flags & PAYLOAD_DATA_ENDING_FRAGMENT_BITMASK != 0,
            immediate_sack: flags & PAYLOAD_DATA_IMMEDIATE_SACK != 0,
            tsn,
            stream_identifier,
            stream_sequence_number,
            payload_type,
            user_data,
            ..Default::default()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunk::Chunk;

    #[test]
    fn test_payload_data_round_trip() -> Result<()> {
        let data = ChunkPayloadData {
            beginning_fragment: true,
            ending_fragment: true,
            tsn: 0x01020304,
            stream_identifier: 1,
            stream_sequence_number: 7,
            payload_type: PayloadProtocolIdentifier::Dcep,
            user_data: Bytes::from_static(&[1, 2, 3]),
            ..Default::default()
        };

        let mut raw = vec![];
        Chunk::PayloadData(data.clone()).marshal(&mut raw)?;
        assert_eq!(raw.len() % 4, 0);

        let (decoded, consumed) = Chunk::unmarshal(&Bytes::from(raw.clone()))?;
        assert_eq!(consumed, raw.len());
        assert_eq!(decoded, Chunk::PayloadData(data));
        Ok(())
    }
}
