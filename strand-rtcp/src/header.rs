use bytes::{Buf, BufMut};

use shared::error::{Error, Result};
use shared::marshal::{Marshal, MarshalSize, Unmarshal};

pub const RTP_VERSION: u8 = 2;
pub const VERSION_SHIFT: u8 = 6;
pub const VERSION_MASK: u8 = 0x3;
pub const PADDING_SHIFT: u8 = 5;
pub const PADDING_MASK: u8 = 0x1;
pub const COUNT_MASK: u8 = 0x1f;

pub const HEADER_LENGTH: usize = 4;
pub const COUNT_MAX: usize = (1 << 5) - 1;
pub const SSRC_LENGTH: usize = 4;
pub const SDES_MAX_OCTET_COUNT: usize = (1 << 8) - 1;

/// Feedback message type for transport-layer feedback (PT=205).
pub const FORMAT_SLI: u8 = 2;
pub const FORMAT_TLN: u8 = 1;
pub const FORMAT_RRR: u8 = 5;
pub const FORMAT_TCC: u8 = 15;

/// Feedback message type for payload-specific feedback (PT=206).
pub const FORMAT_PLI: u8 = 1;
pub const FORMAT_FIR: u8 = 4;
pub const FORMAT_REMB: u8 = 15;

/// PacketType specifies the type of an RTCP packet.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Default)]
#[repr(u8)]
pub enum PacketType {
    #[default]
    Unsupported = 0,
    SenderReport = 200,
    ReceiverReport = 201,
    SourceDescription = 202,
    Goodbye = 203,
    ApplicationDefined = 204,
    TransportSpecificFeedback = 205,
    PayloadSpecificFeedback = 206,
    ExtendedReport = 207,
}

impl From<u8> for PacketType {
    fn from(b: u8) -> Self {
        match b {
            200 => PacketType::SenderReport,
            201 => PacketType::ReceiverReport,
            202 => PacketType::SourceDescription,
            203 => PacketType::Goodbye,
            204 => PacketType::ApplicationDefined,
            205 => PacketType::TransportSpecificFeedback,
            206 => PacketType::PayloadSpecificFeedback,
            207 => PacketType::ExtendedReport,
            _ => PacketType::Unsupported,
        }
    }
}

/// Header is the common four bytes at the start of every RTCP packet
/// (RFC 3550 section 6.4.1).
#[derive(Debug, Copy, Clone, PartialEq, Eq, Default)]
pub struct Header {
    /// Trailing padding present?
    pub padding: bool,
    /// Reception report count or feedback message type, five bits.
    pub count: u8,
    /// Packet type.
    pub packet_type: PacketType,
    /// Packet length in 32-bit words, minus one.
    pub length: u16,
}

impl MarshalSize for Header {
    fn marshal_size(&self) -> usize {
        HEADER_LENGTH
    }
}

impl Marshal for Header {
    fn marshal_to(&self, mut buf: &mut [u8]) -> Result<usize> {
        if buf.len() < HEADER_LENGTH {
            return Err(Error::ErrBufferTooSmall);
        }
        if self.count > 31 {
            return Err(Error::InvalidHeader);
        }

        let mut b0 = RTP_VERSION << VERSION_SHIFT;
        if self.padding {
            b0 |= 1 << PADDING_SHIFT;
        }
        b0 |= self.count;

        buf.put_u8(b0);
        buf.put_u8(self.packet_type as u8);
        buf.put_u16(self.length);
        Ok(HEADER_LENGTH)
    }
}

impl Unmarshal for Header {
    fn unmarshal<B>(buf: &mut B) -> Result<Self>
    where
        B: Buf,
    {
        if buf.remaining() < HEADER_LENGTH {
            return Err(Error::PacketTooShort);
        }

        let b0 = buf.get_u8();
        let version = b0 >> VERSION_SHIFT & VERSION_MASK;
        if version != RTP_VERSION {
            return Err(Error::BadVersion);
        }

        let padding = (b0 >> PADDING_SHIFT & PADDING_MASK) > 0;
        let count = b0 & COUNT_MASK;
        let packet_type = PacketType::from(buf.get_u8());
        let length = buf.get_u16();

        Ok(Header {
            padding,
            count,
            packet_type,
            length,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_round_trip() -> Result<()> {
        let h = Header {
            padding: true,
            count: 31,
            packet_type: PacketType::SenderReport,
            length: 4,
        };
        let raw = h.marshal()?;
        assert_eq!(&raw[..], &[0xbf, 0xc8, 0x00, 0x04]);
        let mut buf = &raw[..];
        assert_eq!(Header::unmarshal(&mut buf)?, h);
        Ok(())
    }

    #[test]
    fn test_header_bad_version() {
        let mut buf = &[0x00u8, 0xc8, 0x00, 0x04][..];
        assert_eq!(Header::unmarshal(&mut buf), Err(Error::BadVersion));
    }
}
