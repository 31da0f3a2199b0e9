pub mod control;
pub mod forward_tsn;
pub mod payload_data;
pub mod reconfig;
pub mod sack;

use bytes::{Buf, BufMut, Bytes};

use shared::error::{Error, Result};

use control::{
    ChunkAbort, ChunkCookieAck, ChunkCookieEcho, ChunkError, ChunkHeartbeat, ChunkHeartbeatAck,
    ChunkInit, ChunkShutdown, ChunkShutdownAck, ChunkShutdownComplete,
};
use forward_tsn::ChunkForwardTsn;
use payload_data::ChunkPayloadData;
use reconfig::ChunkReconfig;
use sack::ChunkSelectiveAck;

pub const CHUNK_HEADER_SIZE: usize = 4;

/// Chunk type byte (RFC 4960 section 3.2).
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[repr(u8)]
pub enum ChunkType {
    PayloadData = 0,
    Init = 1,
    InitAck = 2,
    Sack = 3,
    Heartbeat = 4,
    HeartbeatAck = 5,
    Abort = 6,
    Shutdown = 7,
    ShutdownAck = 8,
    Error = 9,
    CookieEcho = 10,
    CookieAck = 11,
    ShutdownComplete = 14,
    Reconfig = 130,
    ForwardTsn = 192,
}

impl TryFrom<u8> for ChunkType {
    type Error = Error;

    fn try_from(v: u8) -> Result<Self> {
        match v {
            0 => Ok(ChunkType::PayloadData),
            1 => Ok(ChunkType::Init),
            2 => Ok(ChunkType::InitAck),
            3 => Ok(ChunkType::Sack),
            4 => Ok(ChunkType::Heartbeat),
            5 => Ok(ChunkType::HeartbeatAck),
            6 => Ok(ChunkType::Abort),
            7 => Ok(ChunkType::Shutdown),
            8 => Ok(ChunkType::ShutdownAck),
            9 => Ok(ChunkType::Error),
            10 => Ok(ChunkType::CookieEcho),
            11 => Ok(ChunkType::CookieAck),
            14 => Ok(ChunkType::ShutdownComplete),
            130 => Ok(ChunkType::Reconfig),
            192 => Ok(ChunkType::ForwardTsn),
            _ => Err(Error::ErrUnmarshalUnknownChunkType),
        }
    }
}

/// The common type/flags/length chunk header.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct ChunkHeader {
    pub typ: ChunkType,
    pub flags: u8,
    /// Length including this header, excluding padding.
    pub value_length: u16,
}

impl ChunkHeader {
    pub fn marshal(&self, out: &mut Vec<u8>) {
        out.put_u8(self.typ as u8);
        out.put_u8(self.flags);
        out.put_u16(self.value_length + CHUNK_HEADER_SIZE as u16);
    }

    pub fn unmarshal<B: Buf>(buf: &mut B) -> Result<Self> {
        if buf.remaining() < CHUNK_HEADER_SIZE {
            return Err(Error::ErrChunkHeaderTooSmall);
        }
        let typ = ChunkType::try_from(buf.get_u8())?;
        let flags = buf.get_u8();
        let length = buf.get_u16();
        if (length as usize) < CHUNK_HEADER_SIZE {
            return Err(Error::ErrChunkHeaderInvalidLength);
        }
        Ok(ChunkHeader {
            typ,
            flags,
            value_length: length - CHUNK_HEADER_SIZE as u16,
        })
    }
}

/// One parsed chunk.
#[derive(Debug, Clone, PartialEq)]
pub enum Chunk {
    PayloadData(ChunkPayloadData),
    Init(ChunkInit),
    InitAck(ChunkInit),
    Sack(ChunkSelectiveAck),
    Heartbeat(ChunkHeartbeat),
    HeartbeatAck(ChunkHeartbeatAck),
    Abort(ChunkAbort),
    Shutdown(ChunkShutdown),
    ShutdownAck(ChunkShutdownAck),
    Error(ChunkError),
    CookieEcho(ChunkCookieEcho),
    CookieAck(ChunkCookieAck),
    ShutdownComplete(ChunkShutdownComplete),
    Reconfig(ChunkReconfig),
    ForwardTsn(ChunkForwardTsn),
}

impl Chunk {
    pub fn chunk_type(&self) -> ChunkType {
        match self {
            Chunk::PayloadData(_) => ChunkType::PayloadData,
            Chunk::Init(_) => ChunkType::Init,
            Chunk::InitAck(_) => ChunkType::InitAck,
            Chunk::Sack(_) => ChunkType::Sack,
            Chunk::Heartbeat(_) => ChunkType::Heartbeat,
            Chunk::HeartbeatAck(_) => ChunkType::HeartbeatAck,
            Chunk::Abort(_) => ChunkType::Abort,
            Chunk::Shutdown(_) => ChunkType::Shutdown,
            Chunk::ShutdownAck(_) => ChunkType::ShutdownAck,
            Chunk::Error(_) => ChunkType::Error,
            Chunk::CookieEcho(_) => ChunkType::CookieEcho,
            Chunk::CookieAck(_) => ChunkType::CookieAck,
            Chunk::ShutdownComplete(_) => ChunkType::ShutdownComplete,
            Chunk::Reconfig(_) => ChunkType::Reconfig,
            Chunk::ForwardTsn(_) => ChunkType::ForwardTsn,
        }
    }

    /// Serializes the chunk with header, padding the value to 4 bytes.
    pub fn marshal(&self, out: &mut Vec<u8>) -> Result<()> {
        let (flags, value) = match self {
            Chunk::PayloadData(c) => (c.flags(), c.marshal_value()?),
            Chunk::Init(c) | Chunk::InitAck(c) => (0, c.marshal_value()?),
            Chunk::Sack(c) => (0, c.marshal_value()?),
            Chunk::Heartbeat(c) => (0, c.marshal_value()?),
            Chunk::HeartbeatAck(c) => (0, c.marshal_value()?),
            Chunk::Abort(c) => (0, c.marshal_value()?),
            Chunk::Shutdown(c) => (0, c.marshal_value()?),
            Chunk::ShutdownAck(_) => (0, vec![]),
            Chunk::Error(c) => (0, c.marshal_value()?),
            Chunk::CookieEcho(c) => (0, c.cookie.clone()),
            Chunk::CookieAck(_) => (0, vec![]),
            Chunk::ShutdownComplete(_) => (0, vec![]),
            Chunk::Reconfig(c) => (0, c.marshal_value()?),
            Chunk::ForwardTsn(c) => (0, c.marshal_value()?),
        };

        ChunkHeader {
            typ: self.chunk_type(),
            flags,
            value_length: value.len() as u16,
        }
        .marshal(out);
        out.extend_from_slice(&value);
        while out.len() % 4 != 0 {
            out.push(0);
        }
        Ok(())
    }

    /// Parses one chunk; `buf` must start at the chunk header. Returns the
    /// chunk and the number of bytes consumed including padding.
    pub fn unmarshal(buf: &Bytes) -> Result<(Self, usize)> {
        let mut reader = &buf[..];
        let header = ChunkHeader::unmarshal(&mut reader)?;
        let value_len = header.value_length as usize;
        if buf.len() < CHUNK_HEADER_SIZE + value_len {
            return Err(Error::ErrChunkHeaderNotEnoughSpace);
        }
        let mut value = buf.slice(CHUNK_HEADER_SIZE..CHUNK_HEADER_SIZE + value_len);

        let chunk = match header.typ {
            ChunkType::PayloadData => {
                Chunk::PayloadData(ChunkPayloadData::unmarshal_value(header.flags, &mut value)?)
            }
            ChunkType::Init => Chunk::Init(ChunkInit::unmarshal_value(&mut value)?),
            ChunkType::InitAck => Chunk::InitAck(ChunkInit::unmarshal_value(&mut value)?),
            ChunkType::Sack => Chunk::Sack(ChunkSelectiveAck::unmarshal_value(&mut value)?),
            ChunkType::Heartbeat => {
                Chunk::Heartbeat(ChunkHeartbeat::unmarshal_value(&mut value)?)
            }
            ChunkType::HeartbeatAck => {
                Chunk::HeartbeatAck(ChunkHeartbeatAck::unmarshal_value(&mut value)?)
            }
            ChunkType::Abort => Chunk::Abort(ChunkAbort::unmarshal_value(&mut value)?),
            ChunkType::Shutdown => Chunk::Shutdown(ChunkShutdown::unmarshal_value(&mut value)?),
            ChunkType::ShutdownAck => Chunk::ShutdownAck(ChunkShutdownAck),
            ChunkType::Error => Chunk::Error(ChunkError::unmarshal_value(&mut value)?),
            ChunkType::CookieEcho => Chunk::CookieEcho(ChunkCookieEcho {
                cookie: value.to_vec(),
            }),
            ChunkType::CookieAck => Chunk::CookieAck(ChunkCookieAck),
            ChunkType::ShutdownComplete => Chunk::ShutdownComplete(ChunkShutdownComplete),
            ChunkType::Reconfig => Chunk::Reconfig(ChunkReconfig::unmarshal_value(&mut value)?),
            ChunkType::ForwardTsn => {
                Chunk::ForwardTsn(ChunkForwardTsn::unmarshal_value(&mut value)?)
            }
        };

        let padded = (CHUNK_HEADER_SIZE + value_len + 3) & !3;
        Ok((chunk, padded.min(buf.len())))
    }
}
