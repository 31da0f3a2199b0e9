use bytes::{Buf, BufMut, Bytes};
use crc::{Crc, CRC_32_ISCSI};

use shared::error::{Error, Result};

use crate::chunk::Chunk;

pub const PACKET_HEADER_SIZE: usize = 12;

const CRC32C: Crc<u32> = Crc::<u32>::new(&CRC_32_ISCSI);

/// An SCTP packet: the 12-byte common header plus bundled chunks
/// (RFC 4960 section 3).
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Packet {
    pub source_port: u16,
    pub destination_port: u16,
    pub verification_tag: u32,
    pub chunks: Vec<Chunk>,
}

impl Packet {
    pub fn marshal(&self) -> Result<Vec<u8>> {
        let mut raw = Vec::with_capacity(PACKET_HEADER_SIZE);
        raw.put_u16(self.source_port);
        raw.put_u16(self.destination_port);
        raw.put_u32(self.verification_tag);
        raw.put_u32(0); // checksum, filled below

        for chunk in &self.chunks {
            chunk.marshal(&mut raw)?;
        }

        let checksum = CRC32C.checksum(&raw);
        raw[8..12].copy_from_slice(&checksum.to_le_bytes());
        Ok(raw)
    }

    pub fn unmarshal(raw: &Bytes) -> Result<Self> {
        if raw.len() < PACKET_HEADER_SIZE {
            return Err(Error::ErrPacketRawTooSmall);
        }

        let mut reader = &raw[..];
        let source_port = reader.get_u16();
        let destination_port = reader.get_u16();
        let verification_tag = reader.get_u32();
        let their_checksum = reader.get_u32_le();

        // verify over the packet with a zeroed checksum field
        let mut zeroed = raw.to_vec();
        zeroed[8..12].copy_from_slice(&[0, 0, 0, 0]);
        if CRC32C.checksum(&zeroed) != their_checksum {
            return Err(Error::ErrChecksumMismatch);
        }

        let mut chunks = vec![];
        let mut offset = PACKET_HEADER_SIZE;
        while offset + 4 <= raw.len() {
            let (chunk, consumed) = Chunk::unmarshal(&raw.slice(offset..))?;
            chunks.push(chunk);
            offset += consumed;
        }

        Ok(Packet {
            source_port,
            destination_port,
            verification_tag,
            chunks,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunk::payload_data::{ChunkPayloadData, PayloadProtocolIdentifier};
    use crate::chunk::sack::ChunkSelectiveAck;

    #[test]
    fn test_packet_round_trip() -> Result<()> {
        let packet = Packet {
            source_port: 5000,
            destination_port: 5000,
            verification_tag: 0x11223344,
            chunks: vec![
                Chunk::Sack(ChunkSelectiveAck {
                    cumulative_tsn_ack: 10,
                    advertised_receiver_window_credit: 1024,
                    gap_ack_blocks: vec![],
                    duplicate_tsn: vec![],
                }),
                Chunk::PayloadData(ChunkPayloadData {
                    beginning_fragment: true,
                    ending_fragment: true,
                    tsn: 11,
                    stream_identifier: 0,
                    stream_sequence_number: 0,
                    payload_type: PayloadProtocolIdentifier::Binary,
                    user_data: Bytes::from_static(&[1, 2, 3, 4, 5]),
                    ..Default::default()
                }),
            ],
        };

        let raw = packet.marshal()?;
        let decoded = Packet::unmarshal(&Bytes::from(raw))?;
        assert_eq!(decoded, packet);
        Ok(())
    }

    #[test]
    fn test_packet_bad_checksum_rejected() -> Result<()> {
        let packet = Packet {
            source_port: 1,
            destination_port: 2,
            verification_tag: 3,
            chunks: vec![],
        };
        let mut raw = packet.marshal()?;
        raw[8] ^= 0xff;
        assert_eq!(
            Packet::unmarshal(&Bytes::from(raw)),
            Err(Error::ErrChecksumMismatch)
        );
        Ok(())
    }

    #[test]
    fn test_packet_too_small_rejected() {
        assert_eq!(
            Packet::unmarshal(&Bytes::from_static(&[0u8; 8])),
            Err(Error::ErrPacketRawTooSmall)
        );
    }
}
