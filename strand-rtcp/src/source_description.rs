use bytes::{Buf, BufMut};

use shared::error::{Error, Result};
use shared::marshal::{Marshal, MarshalSize, Unmarshal};

use crate::header::{Header, PacketType, COUNT_MAX, HEADER_LENGTH};

pub const SDES_TYPE_END: u8 = 0;
pub const SDES_TYPE_CNAME: u8 = 1;
pub const SDES_TYPE_NAME: u8 = 2;
pub const SDES_TYPE_EMAIL: u8 = 3;
pub const SDES_TYPE_PHONE: u8 = 4;
pub const SDES_TYPE_LOC: u8 = 5;
pub const SDES_TYPE_TOOL: u8 = 6;
pub const SDES_TYPE_NOTE: u8 = 7;
pub const SDES_TYPE_PRIV: u8 = 8;

/// A single SDES item: type plus UTF-8 text.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SourceDescriptionItem {
    pub sdes_type: u8,
    pub text: String,
}

/// A per-SSRC chunk of SDES items.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SourceDescriptionChunk {
    pub source: u32,
    pub items: Vec<SourceDescriptionItem>,
}

impl SourceDescriptionChunk {
    fn raw_size(&self) -> usize {
        let mut len = 4; // ssrc
        for item in &self.items {
            len += 2 + item.text.len();
        }
        len += 1; // END
        len
    }

    fn marshal_size(&self) -> usize {
        let len = self.raw_size();
        // pad to a word boundary
        (len + 3) & !3
    }
}

/// SourceDescription (SDES, RFC 3550 section 6.5).
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SourceDescription {
    pub chunks: Vec<SourceDescriptionChunk>,
}

impl SourceDescription {
    /// Convenience constructor for the usual single-CNAME packet.
    pub fn new_cname(ssrc: u32, cname: String) -> Self {
        SourceDescription {
            chunks: vec![SourceDescriptionChunk {
                source: ssrc,
                items: vec![SourceDescriptionItem {
                    sdes_type: SDES_TYPE_CNAME,
                    text: cname,
                }],
            }],
        }
    }

    pub fn header(&self) -> Header {
        Header {
            padding: false,
            count: self.chunks.len() as u8,
            packet_type: PacketType::SourceDescription,
            length: ((self.marshal_size() / 4) - 1) as u16,
        }
    }
}

impl MarshalSize for SourceDescription {
    fn marshal_size(&self) -> usize {
        let mut size = HEADER_LENGTH;
        for chunk in &self.chunks {
            size += chunk.marshal_size();
        }
        size
    }
}

impl Marshal for SourceDescription {
    fn marshal_to(&self, buf: &mut [u8]) -> Result<usize> {
        if self.chunks.len() > COUNT_MAX {
            return Err(Error::TooManyChunks);
        }
        for chunk in &self.chunks {
            for item in &chunk.items {
                if item.text.len() > 255 {
                    return Err(Error::SdesTextTooLong);
                }
                if item.sdes_type == SDES_TYPE_END {
                    return Err(Error::SdesMissingType);
                }
            }
        }
        let size = self.marshal_size();
        if buf.len() < size {
            return Err(Error::ErrBufferTooSmall);
        }

        let n = self.header().marshal_to(buf)?;
        let mut b = &mut buf[n..];
        for chunk in &self.chunks {
            b.put_u32(chunk.source);
            let mut written = 4;
            for item in &chunk.items {
                b.put_u8(item.sdes_type);
                b.put_u8(item.text.len() as u8);
                b.put_slice(item.text.as_bytes());
                written += 2 + item.text.len();
            }
            b.put_u8(SDES_TYPE_END);
            written += 1;
            while written % 4 != 0 {
                b.put_u8(0);
                written += 1;
            }
        }

        Ok(size)
    }
}

impl Unmarshal for SourceDescription {
    fn unmarshal<B>(buf: &mut B) -> Result<Self>
    where
        B: Buf,
    {
        let header = Header::unmarshal(buf)?;
        if header.packet_type != PacketType::SourceDescription {
            return Err(Error::WrongType);
        }

        let mut chunks = Vec::with_capacity(header.count as usize);
        for _ in 0..header.count {
            if buf.remaining() < 4 {
                return Err(Error::PacketTooShort);
            }
            let source = buf.get_u32();
            let mut items = vec![];
            let mut consumed = 4usize;
            loop {
                if buf.remaining() < 1 {
                    return Err(Error::PacketTooShort);
                }
                let sdes_type = buf.get_u8();
                consumed += 1;
                if sdes_type == SDES_TYPE_END {
                    break;
                }
                if buf.remaining() < 1 {
                    return Err(Error::PacketTooShort);
                }
                let len = buf.get_u8() as usize;
                consumed += 1;
                if buf.remaining() < len {
                    return Err(Error::PacketTooShort);
                }
                let text = String::from_utf8(buf.copy_to_bytes(len).to_vec())?;
                consumed += len;
                items.push(SourceDescriptionItem { sdes_type, text });
            }
            // skip chunk padding
            while consumed % 4 != 0 {
                if buf.remaining() < 1 {
                    return Err(Error::PacketTooShort);
                }
                buf.get_u8();
                consumed += 1;
            }
            chunks.push(SourceDescriptionChunk { source, items });
        }

        Ok(SourceDescription { chunks })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sdes_cname_round_trip() -> Result<()> {
        let sdes = SourceDescription::new_cname(0x902f9e2e, "{9c00eb92-1afb-9d49}".to_owned());
        let raw = sdes.marshal()?;
        assert_eq!(raw.len() % 4, 0);
        let mut buf = &raw[..];
        assert_eq!(SourceDescription::unmarshal(&mut buf)?, sdes);
        Ok(())
    }

    #[test]
    fn test_sdes_rejects_end_type_item() {
        let sdes = SourceDescription {
            chunks: vec![SourceDescriptionChunk {
                source: 1,
                items: vec![SourceDescriptionItem {
                    sdes_type: SDES_TYPE_END,
                    text: "x".to_owned(),
                }],
            }],
        };
        assert_eq!(sdes.marshal(), Err(Error::SdesMissingType));
    }
}
