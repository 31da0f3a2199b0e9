use bytes::{Buf, BufMut};

use shared::error::{Error, Result};
use shared::marshal::{Marshal, MarshalSize, Unmarshal};

use crate::header::{Header, PacketType, FORMAT_REMB, HEADER_LENGTH};

const UNIQUE_IDENTIFIER: [u8; 4] = [b'R', b'E', b'M', b'B'];

/// ReceiverEstimatedMaximumBitrate (draft-alvestrand-rmcat-remb): the
/// receiver's total estimated available bitrate, exponent/mantissa coded.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ReceiverEstimatedMaximumBitrate {
    pub sender_ssrc: u32,
    /// Estimate in bits per second.
    pub bitrate: f32,
    /// SSRCs the estimate applies to.
    pub ssrcs: Vec<u32>,
}

impl ReceiverEstimatedMaximumBitrate {
    pub fn header(&self) -> Header {
        Header {
            padding: false,
            count: FORMAT_REMB,
            packet_type: PacketType::PayloadSpecificFeedback,
            length: ((self.marshal_size() / 4) - 1) as u16,
        }
    }
}

impl MarshalSize for ReceiverEstimatedMaximumBitrate {
    fn marshal_size(&self) -> usize {
        HEADER_LENGTH + 16 + self.ssrcs.len() * 4
    }
}

impl Marshal for ReceiverEstimatedMaximumBitrate {
    fn marshal_to(&self, buf: &mut [u8]) -> Result<usize> {
        if buf.len() < self.marshal_size() {
            return Err(Error::ErrBufferTooSmall);
        }

        // 6-bit exponent, 18-bit mantissa
        let mut bitrate = self.bitrate;
        if bitrate >= (1u64 << 63) as f32 {
            return Err(Error::InvalidBitrate);
        }
        let mut exp = 0u8;
        while bitrate >= (1 << 18) as f32 {
            bitrate /= 2.0;
            exp += 1;
        }
        if exp >= 64 {
            return Err(Error::InvalidBitrate);
        }
        let mantissa = bitrate.floor() as u32;

        let n = self.header().marshal_to(buf)?;
        let mut b = &mut buf[n..];
        b.put_u32(self.sender_ssrc);
        b.put_u32(0); // media ssrc must be 0
        b.put_slice(&UNIQUE_IDENTIFIER);
        b.put_u8(self.ssrcs.len() as u8);
        b.put_u8((exp << 2) | (mantissa >> 16) as u8);
        b.put_u16(mantissa as u16);
        for ssrc in &self.ssrcs {
            b.put_u32(*ssrc);
        }
        Ok(self.marshal_size())
    }
}

impl Unmarshal for ReceiverEstimatedMaximumBitrate {
    fn unmarshal<B>(buf: &mut B) -> Result<Self>
    where
        B: Buf,
    {
        let header = Header::unmarshal(buf)?;
        if header.packet_type != PacketType::PayloadSpecificFeedback || header.count != FORMAT_REMB
        {
            return Err(Error::WrongType);
        }
        if buf.remaining() < 16 {
            return Err(Error::PacketTooShort);
        }

        let sender_ssrc = buf.get_u32();
        let media_ssrc = buf.get_u32();
        if media_ssrc != 0 {
            return Err(Error::SsrcMustBeZero);
        }

        let mut id = [0u8; 4];
        buf.copy_to_slice(&mut id);
        if id != UNIQUE_IDENTIFIER {
            return Err(Error::MissingRembIdentifier);
        }

        let ssrcs_len = buf.get_u8() as usize;
        let b13 = buf.get_u8();
        let exp = b13 >> 2;
        let mantissa = ((b13 as u32 & 0x3) << 16) | buf.get_u16() as u32;
        let bitrate = if exp > 46 {
            // maximum representable
            f32::MAX
        } else {
            (mantissa as f32) * 2f32.powi(exp as i32)
        };

        if buf.remaining() < ssrcs_len * 4 {
            return Err(Error::SsrcNumAndLengthMismatch);
        }
        let mut ssrcs = Vec::with_capacity(ssrcs_len);
        for _ in 0..ssrcs_len {
            ssrcs.push(buf.get_u32());
        }

        Ok(ReceiverEstimatedMaximumBitrate {
            sender_ssrc,
            bitrate,
            ssrcs,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_remb_round_trip() -> Result<()> {
        let remb = ReceiverEstimatedMaximumBitrate {
            sender_ssrc: 1,
            bitrate: 8927168.0,
            ssrcs: vec![0x1215f16f],
        };
        let raw = remb.marshal()?;
        let mut buf = &raw[..];
        let decoded = ReceiverEstimatedMaximumBitrate::unmarshal(&mut buf)?;
        assert_eq!(decoded.sender_ssrc, 1);
        assert_eq!(decoded.ssrcs, vec![0x1215f16f]);
        assert!((decoded.bitrate - 8927168.0).abs() < 1024.0);
        Ok(())
    }

    #[test]
    fn test_remb_rejects_missing_identifier() {
        let mut raw = ReceiverEstimatedMaximumBitrate {
            sender_ssrc: 1,
            bitrate: 1000.0,
            ssrcs: vec![],
        }
        .marshal()
        .unwrap()
        .to_vec();
        raw[12] = b'X';
        let mut buf = &raw[..];
        assert_eq!(
            ReceiverEstimatedMaximumBitrate::unmarshal(&mut buf),
            Err(Error::MissingRembIdentifier)
        );
    }
}
