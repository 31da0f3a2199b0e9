use bytes::{Buf, BufMut};

use shared::error::{Error, Result};
use shared::marshal::{Marshal, MarshalSize, Unmarshal};

use crate::header::{Header, PacketType, FORMAT_TLN, HEADER_LENGTH};

/// NackPair is a missing packet id plus a bitmask of the following 16
/// sequence numbers (RFC 4585 section 6.2.1).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct NackPair {
    pub packet_id: u16,
    pub lost_packets: u16,
}

impl NackPair {
    /// Expands the pair into the full list of lost sequence numbers.
    pub fn packet_list(&self) -> Vec<u16> {
        let mut out = vec![self.packet_id];
        for i in 0..16u16 {
            if self.lost_packets & (1 << i) != 0 {
                out.push(self.packet_id.wrapping_add(i + 1));
            }
        }
        out
    }
}

/// Compresses a sorted sequence number list into NACK pairs.
pub fn nack_pairs_from_sequence_numbers(seqs: &[u16]) -> Vec<NackPair> {
    let mut pairs: Vec<NackPair> = vec![];
    for &seq in seqs {
        if let Some(last) = pairs.last_mut() {
            let delta = seq.wrapping_sub(last.packet_id);
            if delta > 0 && delta <= 16 {
                last.lost_packets |= 1 << (delta - 1);
                continue;
            }
        }
        pairs.push(NackPair {
            packet_id: seq,
            lost_packets: 0,
        });
    }
    pairs
}

/// TransportLayerNack (Generic NACK, RFC 4585 section 6.2.1).
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct TransportLayerNack {
    pub sender_ssrc: u32,
    pub media_ssrc: u32,
    pub nacks: Vec<NackPair>,
}

impl TransportLayerNack {
    pub fn header(&self) -> Header {
        Header {
            padding: false,
            count: FORMAT_TLN,
            packet_type: PacketType::TransportSpecificFeedback,
            length: ((self.marshal_size() / 4) - 1) as u16,
        }
    }
}

impl MarshalSize for TransportLayerNack {
    fn marshal_size(&self) -> usize {
        HEADER_LENGTH + 8 + self.nacks.len() * 4
    }
}

impl Marshal for TransportLayerNack {
    fn marshal_to(&self, buf: &mut [u8]) -> Result<usize> {
        if buf.len() < self.marshal_size() {
            return Err(Error::ErrBufferTooSmall);
        }
        let n = self.header().marshal_to(buf)?;
        let mut b = &mut buf[n..];
        b.put_u32(self.sender_ssrc);
        b.put_u32(self.media_ssrc);
        for nack in &self.nacks {
            b.put_u16(nack.packet_id);
            b.put_u16(nack.lost_packets);
        }
        Ok(self.marshal_size())
    }
}

impl Unmarshal for TransportLayerNack {
    fn unmarshal<B>(buf: &mut B) -> Result<Self>
    where
        B: Buf,
    {
        let header = Header::unmarshal(buf)?;
        if header.packet_type != PacketType::TransportSpecificFeedback
            || header.count != FORMAT_TLN
        {
            return Err(Error::WrongType);
        }
        if buf.remaining() < 8 {
            return Err(Error::PacketTooShort);
        }

        let sender_ssrc = buf.get_u32();
        let media_ssrc = buf.get_u32();
        let mut nacks = vec![];
        while buf.remaining() >= 4 {
            nacks.push(NackPair {
                packet_id: buf.get_u16(),
                lost_packets: buf.get_u16(),
            });
        }

        Ok(TransportLayerNack {
            sender_ssrc,
            media_ssrc,
            nacks,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_nack_pair_packet_list() {
        let pair = NackPair {
            packet_id: 42,
            lost_packets: 0b0000_0000_0000_0101,
        };
        assert_eq!(pair.packet_list(), vec![42, 43, 45]);
    }

    #[test]
    fn test_nack_pairs_from_sequence_numbers() {
        let pairs = nack_pairs_from_sequence_numbers(&[100, 101, 105, 130]);
        assert_eq!(pairs.len(), 2);
        assert_eq!(pairs[0].packet_id, 100);
        assert_eq!(pairs[0].lost_packets, 0b0001_0001); // 101 and 105
        assert_eq!(pairs[1].packet_id, 130);
    }

    #[test]
    fn test_nack_round_trip() -> Result<()> {
        let nack = TransportLayerNack {
            sender_ssrc: 0x902f9e2e,
            media_ssrc: 0x902f9e2e,
            nacks: vec![NackPair {
                packet_id: 0xaaa,
                lost_packets: 0x5555,
            }],
        };
        let raw = nack.marshal()?;
        let mut buf = &raw[..];
        assert_eq!(TransportLayerNack::unmarshal(&mut buf)?, nack);
        Ok(())
    }

    #[test]
    fn test_nack_pair_wrap() {
        let pair = NackPair {
            packet_id: 0xFFFF,
            lost_packets: 1,
        };
        assert_eq!(pair.packet_list(), vec![0xFFFF, 0]);
    }
}
