use bytes::{Buf, BufMut};

use shared::error::{Error, Result};

pub const RECORD_LAYER_HEADER_SIZE: usize = 13;
pub const MAX_SEQUENCE_NUMBER: u64 = 0x0000_FFFF_FFFF_FFFF;

pub const PROTOCOL_VERSION1_0: ProtocolVersion = ProtocolVersion {
    major: 0xfe,
    minor: 0xff,
};
pub const PROTOCOL_VERSION1_2: ProtocolVersion = ProtocolVersion {
    major: 0xfe,
    minor: 0xfd,
};

/// DTLS on-wire version; 1.2 is (254, 253).
#[derive(Copy, Clone, PartialEq, Eq, Debug, Default)]
pub struct ProtocolVersion {
    pub major: u8,
    pub minor: u8,
}

/// Record layer content type (RFC 5246 section 6.2.1).
#[derive(Copy, Clone, PartialEq, Eq, Debug, Default)]
#[repr(u8)]
pub enum ContentType {
    ChangeCipherSpec = 20,
    Alert = 21,
    #[default]
    Handshake = 22,
    ApplicationData = 23,
}

impl TryFrom<u8> for ContentType {
    type Error = Error;

    fn try_from(v: u8) -> Result<Self> {
        match v {
            20 => Ok(ContentType::ChangeCipherSpec),
            21 => Ok(ContentType::Alert),
            22 => Ok(ContentType::Handshake),
            23 => Ok(ContentType::ApplicationData),
            _ => Err(Error::ErrInvalidContentType),
        }
    }
}

/// The 13-byte DTLS record header (RFC 6347 section 4.1).
#[derive(Copy, Clone, PartialEq, Eq, Debug, Default)]
pub struct RecordLayerHeader {
    pub content_type: ContentType,
    pub protocol_version: ProtocolVersion,
    pub epoch: u16,
    pub sequence_number: u64, // uint48
    pub content_len: u16,
}

impl RecordLayerHeader {
    pub fn marshal(&self) -> Result<Vec<u8>> {
        if self.sequence_number > MAX_SEQUENCE_NUMBER {
            return Err(Error::ErrSequenceNumberOverflow);
        }

        let mut out = Vec::with_capacity(RECORD_LAYER_HEADER_SIZE);
        out.put_u8(self.content_type as u8);
        out.put_u8(self.protocol_version.major);
        out.put_u8(self.protocol_version.minor);
        out.put_u16(self.epoch);
        out.put_slice(&self.sequence_number.to_be_bytes()[2..]);
        out.put_u16(self.content_len);
        Ok(out)
    }

    pub fn unmarshal<B: Buf>(buf: &mut B) -> Result<Self> {
        if buf.remaining() < RECORD_LAYER_HEADER_SIZE {
            return Err(Error::ErrDtlsPacketInvalidLength);
        }

        let content_type = ContentType::try_from(buf.get_u8())?;
        let protocol_version = ProtocolVersion {
            major: buf.get_u8(),
            minor: buf.get_u8(),
        };
        let epoch = buf.get_u16();

        let mut seq = [0u8; 8];
        buf.copy_to_slice(&mut seq[2..]);
        let sequence_number = u64::from_be_bytes(seq);
        let content_len = buf.get_u16();

        if protocol_version != PROTOCOL_VERSION1_0 && protocol_version != PROTOCOL_VERSION1_2 {
            return Err(Error::ErrUnsupportedProtocolVersion);
        }

        Ok(RecordLayerHeader {
            content_type,
            protocol_version,
            epoch,
            sequence_number,
            content_len,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_header_round_trip() -> Result<()> {
        let h = RecordLayerHeader {
            content_type: ContentType::Handshake,
            protocol_version: PROTOCOL_VERSION1_2,
            epoch: 1,
            sequence_number: 0x0102030405,
            content_len: 64,
        };
        let raw = h.marshal()?;
        assert_eq!(raw.len(), RECORD_LAYER_HEADER_SIZE);
        assert_eq!(raw[0], 22);
        assert_eq!(&raw[1..3], &[0xfe, 0xfd]);

        let mut buf = &raw[..];
        assert_eq!(RecordLayerHeader::unmarshal(&mut buf)?, h);
        Ok(())
    }

    #[test]
    fn test_record_header_rejects_bad_version() {
        let raw = [22u8, 0x03, 0x03, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0];
        let mut buf = &raw[..];
        assert_eq!(
            RecordLayerHeader::unmarshal(&mut buf),
            Err(Error::ErrUnsupportedProtocolVersion)
        );
    }

    #[test]
    fn test_record_header_sequence_overflow() {
        let h = RecordLayerHeader {
            sequence_number: MAX_SEQUENCE_NUMBER + 1,
            ..Default::default()
        };
        assert_eq!(h.marshal(), Err(Error::ErrSequenceNumberOverflow));
    }
}
