#[cfg(test)]
mod packet_test;

use std::fmt;

use bytes::{Buf, BufMut, Bytes};

use shared::error::{Error, Result};
use shared::marshal::{Marshal, MarshalSize, Unmarshal};

use crate::header::Header;

/// Packet represents an RTP packet: header plus payload and trailing
/// padding length.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Packet {
    pub header: Header,
    pub payload: Bytes,
    pub padding_size: u8,
}

impl fmt::Display for Packet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut out = "RTP PACKET:\n".to_string();
        out += format!("\tVersion: {}\n", self.header.version).as_str();
        out += format!("\tMarker: {}\n", self.header.marker).as_str();
        out += format!("\tPayload Type: {}\n", self.header.payload_type).as_str();
        out += format!("\tSequence Number: {}\n", self.header.sequence_number).as_str();
        out += format!("\tTimestamp: {}\n", self.header.timestamp).as_str();
        out += format!("\tSSRC: {} ({:x})\n", self.header.ssrc, self.header.ssrc).as_str();
        out += format!("\tPayload Length: {}\n", self.payload.len()).as_str();
        write!(f, "{out}")
    }
}

impl MarshalSize for Packet {
    fn marshal_size(&self) -> usize {
        self.header.marshal_size() + self.payload.len() + self.padding_size as usize
    }
}

impl Unmarshal for Packet {
    fn unmarshal<B>(buf: &mut B) -> Result<Self>
    where
        B: Buf,
    {
        let header = Header::unmarshal(buf)?;
        let payload_len = buf.remaining();

        let (payload, padding_size) = if header.padding {
            if payload_len == 0 {
                return Err(Error::ErrShortPacket);
            }
            let payload = buf.copy_to_bytes(payload_len);
            let padding_size = payload[payload_len - 1];
            if padding_size as usize > payload_len {
                return Err(Error::ErrShortPacket);
            }
            (payload.slice(..payload_len - padding_size as usize), padding_size)
        } else {
            (buf.copy_to_bytes(payload_len), 0)
        };

        Ok(Packet {
            header,
            payload,
            padding_size,
        })
    }
}

impl Marshal for Packet {
    fn marshal_to(&self, buf: &mut [u8]) -> Result<usize> {
        if buf.len() < self.marshal_size() {
            return Err(Error::ErrBufferTooSmall);
        }

        let n = self.header.marshal_to(buf)?;
        let mut b = &mut buf[n..];
        b.put_slice(&self.payload);
        if self.padding_size > 0 {
            // trailing padding: zeroes then the padding count itself
            for _ in 0..self.padding_size - 1 {
                b.put_u8(0);
            }
            b.put_u8(self.padding_size);
        }

        Ok(self.marshal_size())
    }
}
