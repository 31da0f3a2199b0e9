use bytes::{Buf, Bytes};

use shared::error::{Error, Result};
use shared::marshal::{Marshal, MarshalSize, Unmarshal};

use crate::header::{Header, HEADER_LENGTH};

/// RawPacket carries an unparsed RTCP packet verbatim (APP packets and
/// unrecognized types survive a parse/serialize round trip this way).
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RawPacket(pub Bytes);

impl RawPacket {
    pub fn header(&self) -> Result<Header> {
        let mut buf = &self.0[..];
        Header::unmarshal(&mut buf)
    }
}

impl MarshalSize for RawPacket {
    fn marshal_size(&self) -> usize {
        self.0.len()
    }
}

impl Marshal for RawPacket {
    fn marshal_to(&self, buf: &mut [u8]) -> Result<usize> {
        if buf.len() < self.0.len() {
            return Err(Error::ErrBufferTooSmall);
        }
        buf[..self.0.len()].copy_from_slice(&self.0);
        Ok(self.0.len())
    }
}

impl Unmarshal for RawPacket {
    fn unmarshal<B>(buf: &mut B) -> Result<Self>
    where
        B: Buf,
    {
        if buf.remaining() < HEADER_LENGTH {
            return Err(Error::PacketTooShort);
        }
        Ok(RawPacket(buf.copy_to_bytes(buf.remaining())))
    }
}
