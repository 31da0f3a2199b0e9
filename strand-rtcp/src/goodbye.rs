use bytes::{Buf, BufMut};

use shared::error::{Error, Result};
use shared::marshal::{Marshal, MarshalSize, Unmarshal};

use crate::header::{Header, PacketType, COUNT_MAX, HEADER_LENGTH, SSRC_LENGTH};

/// Goodbye (BYE, RFC 3550 section 6.6): indicates sources are no longer
/// active, with an optional reason.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Goodbye {
    pub sources: Vec<u32>,
    pub reason: String,
}

impl Goodbye {
    pub fn header(&self) -> Header {
        Header {
            padding: false,
            count: self.sources.len() as u8,
            packet_type: PacketType::Goodbye,
            length: ((self.marshal_size() / 4) - 1) as u16,
        }
    }
}

impl MarshalSize for Goodbye {
    fn marshal_size(&self) -> usize {
        let mut size = HEADER_LENGTH + self.sources.len() * SSRC_LENGTH;
        if !self.reason.is_empty() {
            size += 1 + self.reason.len();
            size = (size + 3) & !3;
        }
        size
    }
}

impl Marshal for Goodbye {
    fn marshal_to(&self, buf: &mut [u8]) -> Result<usize> {
        if self.sources.len() > COUNT_MAX {
            return Err(Error::TooManySources);
        }
        if self.reason.len() > 255 {
            return Err(Error::ReasonTooLong);
        }
        let size = self.marshal_size();
        if buf.len() < size {
            return Err(Error::ErrBufferTooSmall);
        }

        let n = self.header().marshal_to(buf)?;
        let mut b = &mut buf[n..];
        for source in &self.sources {
            b.put_u32(*source);
        }
        if !self.reason.is_empty() {
            b.put_u8(self.reason.len() as u8);
            b.put_slice(self.reason.as_bytes());
            let mut written = 1 + self.reason.len();
            while written % 4 != 0 {
                b.put_u8(0);
                written += 1;
            }
        }

        Ok(size)
    }
}

impl Unmarshal for Goodbye {
    fn unmarshal<B>(buf: &mut B) -> Result<Self>
    where
        B: Buf,
    {
        let header = Header::unmarshal(buf)?;
        if header.packet_type != PacketType::Goodbye {
            return Err(Error::WrongType);
        }
        if buf.remaining() < header.count as usize * SSRC_LENGTH {
            return Err(Error::PacketTooShort);
        }

        let mut sources = Vec::with_capacity(header.count as usize);
        for _ in 0..header.count {
            sources.push(buf.get_u32());
        }

        let mut reason = String::new();
        if buf.remaining() > 0 {
            let len = buf.get_u8() as usize;
            if buf.remaining() < len {
                return Err(Error::PacketTooShort);
            }
            reason = String::from_utf8(buf.copy_to_bytes(len).to_vec())?;
        }

        Ok(Goodbye { sources, reason })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_goodbye_round_trip() -> Result<()> {
        let bye = Goodbye {
            sources: vec![0x902f9e2e, 0xaaaaaaaa],
            reason: "shutting down".to_owned(),
        };
        let raw = bye.marshal()?;
        assert_eq!(raw.len() % 4, 0);
        let mut buf = &raw[..];
        assert_eq!(Goodbye::unmarshal(&mut buf)?, bye);
        Ok(())
    }

    #[test]
    fn test_goodbye_no_reason() -> Result<()> {
        let bye = Goodbye {
            sources: vec![1],
            reason: String::new(),
        };
        let raw = bye.marshal()?;
        let mut buf = &raw[..];
        assert_eq!(Goodbye::unmarshal(&mut buf)?, bye);
        Ok(())
    }
}
