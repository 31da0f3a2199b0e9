use bytes::{Buf, BufMut};

use shared::error::{Error, Result};
use shared::marshal::{Marshal, MarshalSize, Unmarshal};

use crate::header::{Header, PacketType, FORMAT_PLI, HEADER_LENGTH};

const PLI_LENGTH: usize = 2; // in words, after the header

/// PictureLossIndication (RFC 4585 section 6.3.1): asks the sender for a
/// keyframe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PictureLossIndication {
    /// SSRC of the sender of this message.
    pub sender_ssrc: u32,
    /// SSRC of the media source the keyframe is requested from.
    pub media_ssrc: u32,
}

impl PictureLossIndication {
    pub fn header(&self) -> Header {
        Header {
            padding: false,
            count: FORMAT_PLI,
            packet_type: PacketType::PayloadSpecificFeedback,
            length: PLI_LENGTH as u16,
        }
    }
}

impl MarshalSize for PictureLossIndication {
    fn marshal_size(&self) -> usize {
        HEADER_LENGTH + 8
    }
}

impl Marshal for PictureLossIndication {
    fn marshal_to(&self, buf: &mut [u8]) -> Result<usize> {
        if buf.len() < self.marshal_size() {
            return Err(Error::ErrBufferTooSmall);
        }
        let n = self.header().marshal_to(buf)?;
        let mut b = &mut buf[n..];
        b.put_u32(self.sender_ssrc);
        b.put_u32(self.media_ssrc);
        Ok(self.marshal_size())
    }
}

impl Unmarshal for PictureLossIndication {
    fn unmarshal<B>(buf: &mut B) -> Result<Self>
    where
        B: Buf,
    {
        let header = Header::unmarshal(buf)?;
        if header.packet_type != PacketType::PayloadSpecificFeedback || header.count != FORMAT_PLI {
            return Err(Error::WrongType);
        }
        if buf.remaining() < 8 {
            return Err(Error::PacketTooShort);
        }
        Ok(PictureLossIndication {
            sender_ssrc: buf.get_u32(),
            media_ssrc: buf.get_u32(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pli_round_trip() -> Result<()> {
        let pli = PictureLossIndication {
            sender_ssrc: 0x902f9e2e,
            media_ssrc: 0x902f9e2e,
        };
        let raw = pli.marshal()?;
        assert_eq!(&raw[..4], &[0x81, 0xce, 0x00, 0x02]);
        let mut buf = &raw[..];
        assert_eq!(PictureLossIndication::unmarshal(&mut buf)?, pli);
        Ok(())
    }
}
