use bytes::{Buf, BufMut};

use shared::error::{Error, Result};
use shared::marshal::{Marshal, MarshalSize, Unmarshal};

use crate::header::{Header, PacketType, FORMAT_TCC, HEADER_LENGTH};

/// Reception status of one packet inside a TWCC feedback message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(u8)]
pub enum SymbolType {
    #[default]
    NotReceived = 0,
    ReceivedSmallDelta = 1,
    ReceivedLargeDelta = 2,
}

impl TryFrom<u8> for SymbolType {
    type Error = Error;

    fn try_from(v: u8) -> Result<Self> {
        match v {
            0 => Ok(SymbolType::NotReceived),
            1 => Ok(SymbolType::ReceivedSmallDelta),
            2 => Ok(SymbolType::ReceivedLargeDelta),
            _ => Err(Error::WrongChunkType),
        }
    }
}

/// A packet status chunk: either a run of one symbol or a symbol vector.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PacketStatusChunk {
    /// T=0: 13-bit run of a single symbol.
    RunLength {
        symbol: SymbolType,
        run_length: u16,
    },
    /// T=1: 14 one-bit or 7 two-bit symbols.
    StatusVector {
        two_bit: bool,
        symbols: Vec<SymbolType>,
    },
}

impl PacketStatusChunk {
    pub fn symbols(&self) -> Vec<SymbolType> {
        match self {
            PacketStatusChunk::RunLength { symbol, run_length } => {
                vec![*symbol; *run_length as usize]
            }
            PacketStatusChunk::StatusVector { symbols, .. } => symbols.clone(),
        }
    }

    fn marshal(&self) -> Result<u16> {
        match self {
            PacketStatusChunk::RunLength { symbol, run_length } => {
                if *run_length > 0x1FFF {
                    return Err(Error::PacketStatusChunkLength);
                }
                Ok(((*symbol as u16) << 13) | run_length)
            }
            PacketStatusChunk::StatusVector { two_bit, symbols } => {
                let mut out = 1u16 << 15;
                if *two_bit {
                    if symbols.len() != 7 {
                        return Err(Error::PacketStatusChunkLength);
                    }
                    out |= 1 << 14;
                    for (i, s) in symbols.iter().enumerate() {
                        out |= (*s as u16) << (12 - 2 * i);
                    }
                } else {
                    if symbols.len() != 14 {
                        return Err(Error::PacketStatusChunkLength);
                    }
                    for (i, s) in symbols.iter().enumerate() {
                        if *s as u8 > 1 {
                            return Err(Error::WrongChunkType);
                        }
                        out |= (*s as u16) << (13 - i);
                    }
                }
                Ok(out)
            }
        }
    }

    fn unmarshal(raw: u16) -> Result<Self> {
        if raw & 0x8000 == 0 {
            Ok(PacketStatusChunk::RunLength {
                symbol: SymbolType::try_from(((raw >> 13) & 0x3) as u8)?,
                run_length: raw & 0x1FFF,
            })
        } else if raw & 0x4000 == 0 {
            let mut symbols = Vec::with_capacity(14);
            for i in 0..14 {
                symbols.push(SymbolType::try_from(((raw >> (13 - i)) & 0x1) as u8)?);
            }
            Ok(PacketStatusChunk::StatusVector {
                two_bit: false,
                symbols,
            })
        } else {
            let mut symbols = Vec::with_capacity(7);
            for i in 0..7 {
                symbols.push(SymbolType::try_from(((raw >> (12 - 2 * i)) & 0x3) as u8)?);
            }
            Ok(PacketStatusChunk::StatusVector {
                two_bit: true,
                symbols,
            })
        }
    }
}

/// Receive-time delta in 250 microsecond ticks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RecvDelta {
    pub type_tcc_packet: SymbolType,
    /// Delta in microseconds.
    pub delta: i64,
}

const TYPE_TCC_DELTA_SCALE_FACTOR: i64 = 250;

/// TransportLayerCc: transport-wide congestion control feedback
/// (draft-holmer-rmcat-transport-wide-cc-extensions-01).
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct TransportLayerCc {
    pub sender_ssrc: u32,
    pub media_ssrc: u32,
    pub base_sequence_number: u16,
    pub packet_status_count: u16,
    /// Multiples of 64 ms, 24 bits.
    pub reference_time: u32,
    pub fb_pkt_count: u8,
    pub packet_chunks: Vec<PacketStatusChunk>,
    pub recv_deltas: Vec<RecvDelta>,
}

impl TransportLayerCc {
    pub fn header(&self) -> Header {
        Header {
            padding: false,
            count: FORMAT_TCC,
            packet_type: PacketType::TransportSpecificFeedback,
            length: ((self.marshal_size() / 4) - 1) as u16,
        }
    }

    fn deltas_size(&self) -> usize {
        self.recv_deltas
            .iter()
            .map(|d| match d.type_tcc_packet {
                SymbolType::ReceivedSmallDelta => 1,
                SymbolType::ReceivedLargeDelta => 2,
                SymbolType::NotReceived => 0,
            })
            .sum()
    }
}

impl MarshalSize for TransportLayerCc {
    fn marshal_size(&self) -> usize {
        let size = HEADER_LENGTH + 8 + 8 + self.packet_chunks.len() * 2 + self.deltas_size();
        (size + 3) & !3
    }
}

impl Marshal for TransportLayerCc {
    fn marshal_to(&self, buf: &mut [u8]) -> Result<usize> {
        let size = self.marshal_size();
        if buf.len() < size {
            return Err(Error::ErrBufferTooSmall);
        }

        let n = self.header().marshal_to(buf)?;
        let mut b = &mut buf[n..];
        b.put_u32(self.sender_ssrc);
        b.put_u32(self.media_ssrc);
        b.put_u16(self.base_sequence_number);
        b.put_u16(self.packet_status_count);
        b.put_u8((self.reference_time >> 16) as u8);
        b.put_u8((self.reference_time >> 8) as u8);
        b.put_u8(self.reference_time as u8);
        b.put_u8(self.fb_pkt_count);

        let mut written = HEADER_LENGTH + 16;
        for chunk in &self.packet_chunks {
            b.put_u16(chunk.marshal()?);
            written += 2;
        }
        for delta in &self.recv_deltas {
            let ticks = delta.delta / TYPE_TCC_DELTA_SCALE_FACTOR;
            match delta.type_tcc_packet {
                SymbolType::ReceivedSmallDelta => {
                    if !(0..=255).contains(&ticks) {
                        return Err(Error::DeltaExceedLimit);
                    }
                    b.put_u8(ticks as u8);
                    written += 1;
                }
                SymbolType::ReceivedLargeDelta => {
                    if !(i16::MIN as i64..=i16::MAX as i64).contains(&ticks) {
                        return Err(Error::DeltaExceedLimit);
                    }
                    b.put_i16(ticks as i16);
                    written += 2;
                }
                SymbolType::NotReceived => {}
            }
        }
        while written < size {
            b.put_u8(0);
            written += 1;
        }

        Ok(size)
    }
}

impl Unmarshal for TransportLayerCc {
    fn unmarshal<B>(buf: &mut B) -> Result<Self>
    where
        B: Buf,
    {
        let header = Header::unmarshal(buf)?;
        if header.packet_type != PacketType::TransportSpecificFeedback
            || header.count != FORMAT_TCC
        {
            return Err(Error::WrongType);
        }
        let total_len = (header.length as usize + 1) * 4;
        if buf.remaining() < total_len - HEADER_LENGTH || total_len < HEADER_LENGTH + 16 {
            return Err(Error::PacketTooShort);
        }

        let sender_ssrc = buf.get_u32();
        let media_ssrc = buf.get_u32();
        let base_sequence_number = buf.get_u16();
        let packet_status_count = buf.get_u16();
        let reference_time =
            (buf.get_u8() as u32) << 16 | (buf.get_u8() as u32) << 8 | buf.get_u8() as u32;
        let fb_pkt_count = buf.get_u8();

        let mut consumed = HEADER_LENGTH + 16;
        let mut packet_chunks = vec![];
        let mut symbols_seen = 0usize;
        while symbols_seen < packet_status_count as usize {
            if consumed + 2 > total_len || buf.remaining() < 2 {
                return Err(Error::PacketTooShort);
            }
            let chunk = PacketStatusChunk::unmarshal(buf.get_u16())?;
            consumed += 2;
            symbols_seen += chunk.symbols().len();
            packet_chunks.push(chunk);
        }

        let mut recv_deltas = vec![];
        let mut remaining_symbols = packet_status_count as usize;
        'outer: for chunk in &packet_chunks {
            for symbol in chunk.symbols() {
                if remaining_symbols == 0 {
                    break 'outer;
                }
                remaining_symbols -= 1;
                match symbol {
                    SymbolType::ReceivedSmallDelta => {
                        if buf.remaining() < 1 {
                            return Err(Error::PacketTooShort);
                        }
                        recv_deltas.push(RecvDelta {
                            type_tcc_packet: SymbolType::ReceivedSmallDelta,
                            delta: buf.get_u8() as i64 * TYPE_TCC_DELTA_SCALE_FACTOR,
                        });
                        consumed += 1;
                    }
                    SymbolType::ReceivedLargeDelta => {
                        if buf.remaining() < 2 {
                            return Err(Error::PacketTooShort);
                        }
                        recv_deltas.push(RecvDelta {
                            type_tcc_packet: SymbolType::ReceivedLargeDelta,
                            delta: buf.get_i16() as i64 * TYPE_TCC_DELTA_SCALE_FACTOR,
                        });
                        consumed += 2;
                    }
                    SymbolType::NotReceived => {}
                }
            }
        }

        // skip padding
        while consumed < total_len {
            if buf.remaining() < 1 {
                return Err(Error::PacketTooShort);
            }
            buf.get_u8();
            consumed += 1;
        }

        Ok(TransportLayerCc {
            sender_ssrc,
            media_ssrc,
            base_sequence_number,
            packet_status_count,
            reference_time,
            fb_pkt_count,
            packet_chunks,
            recv_deltas,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_twcc_run_length_round_trip() -> Result<()> {
        let cc = TransportLayerCc {
            sender_ssrc: 0x903a9b2d,
            media_ssrc: 0x4c2b44cf,
            base_sequence_number: 120,
            packet_status_count: 3,
            reference_time: 23,
            fb_pkt_count: 1,
            packet_chunks: vec![PacketStatusChunk::RunLength {
                symbol: SymbolType::ReceivedSmallDelta,
                run_length: 3,
            }],
            recv_deltas: vec![
                RecvDelta {
                    type_tcc_packet: SymbolType::ReceivedSmallDelta,
                    delta: 250,
                },
                RecvDelta {
                    type_tcc_packet: SymbolType::ReceivedSmallDelta,
                    delta: 500,
                },
                RecvDelta {
                    type_tcc_packet: SymbolType::ReceivedSmallDelta,
                    delta: 750,
                },
            ],
        };
        let raw = cc.marshal()?;
        assert_eq!(raw.len() % 4, 0);
        let mut buf = &raw[..];
        assert_eq!(TransportLayerCc::unmarshal(&mut buf)?, cc);
        Ok(())
    }

    #[test]
    fn test_twcc_status_vector_round_trip() -> Result<()> {
        let cc = TransportLayerCc {
            sender_ssrc: 1,
            media_ssrc: 2,
            base_sequence_number: 0,
            packet_status_count: 7,
            reference_time: 0,
            fb_pkt_count: 0,
            packet_chunks: vec![PacketStatusChunk::StatusVector {
                two_bit: true,
                symbols: vec![
                    SymbolType::ReceivedSmallDelta,
                    SymbolType::NotReceived,
                    SymbolType::ReceivedLargeDelta,
                    SymbolType::NotReceived,
                    SymbolType::NotReceived,
                    SymbolType::NotReceived,
                    SymbolType::NotReceived,
                ],
            }],
            recv_deltas: vec![
                RecvDelta {
                    type_tcc_packet: SymbolType::ReceivedSmallDelta,
                    delta: 250,
                },
                RecvDelta {
                    type_tcc_packet: SymbolType::ReceivedLargeDelta,
                    delta: -1000,
                },
            ],
        };
        let raw = cc.marshal()?;
        let mut buf = &raw[..];
        assert_eq!(TransportLayerCc::unmarshal(&mut buf)?, cc);
        Ok(())
    }

    #[test]
    fn test_twcc_small_delta_overflow() {
        let cc = TransportLayerCc {
            packet_status_count: 1,
            packet_chunks: vec![PacketStatusChunk::RunLength {
                symbol: SymbolType::ReceivedSmallDelta,
                run_length: 1,
            }],
            recv_deltas: vec![RecvDelta {
                type_tcc_packet: SymbolType::ReceivedSmallDelta,
                delta: 64000, // 256 ticks, too large for one byte
            }],
            ..Default::default()
        };
        assert_eq!(cc.marshal(), Err(Error::DeltaExceedLimit));
    }
}
