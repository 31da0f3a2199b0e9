use bytes::{Buf, BufMut};

use shared::error::{Error, Result};
use shared::marshal::{Marshal, MarshalSize, Unmarshal};

use crate::header::{Header, PacketType, FORMAT_FIR, HEADER_LENGTH};

/// One FIR request entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FirEntry {
    pub ssrc: u32,
    pub sequence_number: u8,
}

/// FullIntraRequest (RFC 5104 section 4.3.1): a decoder refresh request.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct FullIntraRequest {
    pub sender_ssrc: u32,
    pub media_ssrc: u32,
    pub fir: Vec<FirEntry>,
}

impl FullIntraRequest {
    pub fn header(&self) -> Header {
        Header {
            padding: false,
            count: FORMAT_FIR,
            packet_type: PacketType::PayloadSpecificFeedback,
            length: ((self.marshal_size() / 4) - 1) as u16,
        }
    }
}

impl MarshalSize for FullIntraRequest {
    fn marshal_size(&self) -> usize {
        HEADER_LENGTH + 8 + self.fir.len() * 8
    }
}

impl Marshal for FullIntraRequest {
    fn marshal_to(&self, buf: &mut [u8]) -> Result<usize> {
        if buf.len() < self.marshal_size() {
            return Err(Error::ErrBufferTooSmall);
        }
        let n = self.header().marshal_to(buf)?;
        let mut b = &mut buf[n..];
        b.put_u32(self.sender_ssrc);
        b.put_u32(self.media_ssrc);
        for fir in &self.fir {
            b.put_u32(fir.ssrc);
            b.put_u8(fir.sequence_number);
            b.put_u8(0);
            b.put_u16(0);
        }
        Ok(self.marshal_size())
    }
}

impl Unmarshal for FullIntraRequest {
    fn unmarshal<B>(buf: &mut B) -> Result<Self>
    where
        B: Buf,
    {
        let header = Header::unmarshal(buf)?;
        if header.packet_type != PacketType::PayloadSpecificFeedback || header.count != FORMAT_FIR {
            return Err(Error::WrongType);
        }
        if buf.remaining() < 8 {
            return Err(Error::PacketTooShort);
        }

        let sender_ssrc = buf.get_u32();
        let media_ssrc = buf.get_u32();

        let mut fir = vec![];
        while buf.remaining() >= 8 {
            let ssrc = buf.get_u32();
            let sequence_number = buf.get_u8();
            buf.get_u8();
            buf.get_u16();
            fir.push(FirEntry {
                ssrc,
                sequence_number,
            });
        }

        Ok(FullIntraRequest {
            sender_ssrc,
            media_ssrc,
            fir,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fir_round_trip() -> Result<()> {
        let fir = FullIntraRequest {
            sender_ssrc: 1,
            media_ssrc: 2,
            fir: vec![FirEntry {
                ssrc: 3,
                sequence_number: 42,
            }],
        };
        let raw = fir.marshal()?;
        let mut buf = &raw[..];
        assert_eq!(FullIntraRequest::unmarshal(&mut buf)?, fir);
        Ok(())
    }
}
