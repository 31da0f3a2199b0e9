use bytes::{Buf, BufMut, Bytes};

use shared::error::{Error, Result};
use shared::marshal::{Marshal, MarshalSize, Unmarshal};

pub const HEADER_LENGTH: usize = 4;
pub const VERSION_SHIFT: u8 = 6;
pub const PADDING_SHIFT: u8 = 5;
pub const EXTENSION_SHIFT: u8 = 4;
pub const MARKER_SHIFT: u8 = 7;
pub const CSRC_LENGTH: usize = 4;

pub const EXTENSION_PROFILE_ONE_BYTE: u16 = 0xBEDE;
pub const EXTENSION_PROFILE_TWO_BYTE: u16 = 0x1000;

/// A single RTP header extension element.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Extension {
    pub id: u8,
    pub payload: Bytes,
}

/// RTP packet header (RFC 3550 section 5.1) with RFC 8285 extension
/// support.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Header {
    pub version: u8,
    pub padding: bool,
    pub extension: bool,
    pub marker: bool,
    pub payload_type: u8,
    pub sequence_number: u16,
    pub timestamp: u32,
    pub ssrc: u32,
    pub csrc: Vec<u32>,
    pub extension_profile: u16,
    pub extensions: Vec<Extension>,
}

impl MarshalSize for Header {
    fn marshal_size(&self) -> usize {
        let mut size = 12 + self.csrc.len() * CSRC_LENGTH;

        if self.extension {
            // 4-byte extension header + payload padded to a word boundary
            size += 4 + self.extension_payload_len();
        }

        size
    }
}

impl Header {
    fn extension_payload_len(&self) -> usize {
        let mut len = 0;
        match self.extension_profile {
            EXTENSION_PROFILE_ONE_BYTE => {
                for e in &self.extensions {
                    len += 1 + e.payload.len();
                }
            }
            EXTENSION_PROFILE_TWO_BYTE => {
                for e in &self.extensions {
                    len += 2 + e.payload.len();
                }
            }
            _ => {
                for e in &self.extensions {
                    len += e.payload.len();
                }
            }
        }
        // pad to a multiple of 4
        (len + 3) & !3
    }

    /// set_extension sets an RFC 8285 extension, choosing the one-byte
    /// profile if none is active yet.
    pub fn set_extension(&mut self, id: u8, payload: Bytes) -> Result<()> {
        if self.extension {
            match self.extension_profile {
                EXTENSION_PROFILE_ONE_BYTE => {
                    if !(1..=14).contains(&id) {
                        return Err(Error::ErrRfc8285OneByteHeaderIdRange);
                    }
                    if payload.len() > 16 {
                        return Err(Error::ErrRfc8285OneByteHeaderSize);
                    }
                }
                EXTENSION_PROFILE_TWO_BYTE => {
                    if id < 1 {
                        return Err(Error::ErrRfc8285TwoByteHeaderIdRange);
                    }
                    if payload.len() > 255 {
                        return Err(Error::ErrRfc8285TwoByteHeaderSize);
                    }
                }
                _ => {
                    if id != 0 {
                        return Err(Error::ErrRfc3550HeaderIdRange);
                    }
                }
            }

            for e in &mut self.extensions {
                if e.id == id {
                    e.payload = payload;
                    return Ok(());
                }
            }
            self.extensions.push(Extension { id, payload });
            return Ok(());
        }

        self.extension = true;
        self.extension_profile = EXTENSION_PROFILE_ONE_BYTE;
        if !(1..=14).contains(&id) {
            return Err(Error::ErrRfc8285OneByteHeaderIdRange);
        }
        if payload.len() > 16 {
            return Err(Error::ErrRfc8285OneByteHeaderSize);
        }
        self.extensions.push(Extension { id, payload });
        Ok(())
    }

    /// get_extension returns the payload of the extension with the id.
    pub fn get_extension(&self, id: u8) -> Option<Bytes> {
        if !self.extension {
            return None;
        }
        self.extensions
            .iter()
            .find(|e| e.id == id)
            .map(|e| e.payload.clone())
    }

    pub fn del_extension(&mut self, id: u8) -> Result<()> {
        if !self.extension {
            return Err(Error::ErrHeaderExtensionsNotEnabled);
        }
        let before = self.extensions.len();
        self.extensions.retain(|e| e.id != id);
        if self.extensions.len() == before {
            return Err(Error::ErrHeaderExtensionNotFound);
        }
        Ok(())
    }
}

impl Unmarshal for Header {
    fn unmarshal<B>(buf: &mut B) -> Result<Self>
    where
        B: Buf,
    {
        if buf.remaining() < 12 {
            return Err(Error::ErrHeaderSizeInsufficient);
        }

        let b0 = buf.get_u8();
        let version = b0 >> VERSION_SHIFT & 0x3;
        let padding = (b0 >> PADDING_SHIFT & 0x1) > 0;
        let extension = (b0 >> EXTENSION_SHIFT & 0x1) > 0;
        let cc = (b0 & 0xF) as usize;

        let b1 = buf.get_u8();
        let marker = (b1 >> MARKER_SHIFT & 0x1) > 0;
        let payload_type = b1 & 0x7F;

        let sequence_number = buf.get_u16();
        let timestamp = buf.get_u32();
        let ssrc = buf.get_u32();

        if buf.remaining() < cc * CSRC_LENGTH {
            return Err(Error::ErrHeaderSizeInsufficient);
        }
        let mut csrc = Vec::with_capacity(cc);
        for _ in 0..cc {
            csrc.push(buf.get_u32());
        }

        let mut extension_profile = 0u16;
        let mut extensions = vec![];
        if extension {
            if buf.remaining() < 4 {
                return Err(Error::ErrHeaderSizeInsufficientForExtension);
            }
            extension_profile = buf.get_u16();
            let extension_length = buf.get_u16() as usize * 4;
            if buf.remaining() < extension_length {
                return Err(Error::ErrHeaderSizeInsufficientForExtension);
            }

            match extension_profile {
                EXTENSION_PROFILE_ONE_BYTE => {
                    let mut remaining = extension_length;
                    while remaining > 0 {
                        let b = buf.get_u8();
                        remaining -= 1;
                        if b == 0x00 {
                            // padding
                            continue;
                        }
                        let id = b >> 4;
                        let len = (b as usize & 0xF) + 1;
                        if id == 0xF {
                            // reserved: stop processing
                            buf.advance(remaining);
                            remaining = 0;
                            continue;
                        }
                        if remaining < len {
                            return Err(Error::ErrHeaderSizeInsufficientForExtension);
                        }
                        extensions.push(Extension {
                            id,
                            payload: buf.copy_to_bytes(len),
                        });
                        remaining -= len;
                    }
                }
                EXTENSION_PROFILE_TWO_BYTE => {
                    let mut remaining = extension_length;
                    while remaining > 0 {
                        let id = buf.get_u8();
                        remaining -= 1;
                        if id == 0x00 {
                            continue;
                        }
                        if remaining < 1 {
                            return Err(Error::ErrHeaderSizeInsufficientForExtension);
                        }
                        let len = buf.get_u8() as usize;
                        remaining -= 1;
                        if remaining < len {
                            return Err(Error::ErrHeaderSizeInsufficientForExtension);
                        }
                        extensions.push(Extension {
                            id,
                            payload: buf.copy_to_bytes(len),
                        });
                        remaining -= len;
                    }
                }
                _ => {
                    extensions.push(Extension {
                        id: 0,
                        payload: buf.copy_to_bytes(extension_length),
                    });
                }
            }
        }

        Ok(Header {
            version,
            padding,
            extension,
            marker,
            payload_type,
            sequence_number,
            timestamp,
            ssrc,
            csrc,
            extension_profile,
            extensions,
        })
    }
}

impl Marshal for Header {
    fn marshal_to(&self, buf: &mut [u8]) -> Result<usize> {
        let size = self.marshal_size();
        if buf.len() < size {
            return Err(Error::ErrBufferTooSmall);
        }

        let mut b = buf;
        let mut b0 = (self.version << VERSION_SHIFT) | self.csrc.len() as u8;
        if self.padding {
            b0 |= 1 << PADDING_SHIFT;
        }
        if self.extension {
            b0 |= 1 << EXTENSION_SHIFT;
        }
        b.put_u8(b0);

        let mut b1 = self.payload_type;
        if self.marker {
            b1 |= 1 << MARKER_SHIFT;
        }
        b.put_u8(b1);

        b.put_u16(self.sequence_number);
        b.put_u32(self.timestamp);
        b.put_u32(self.ssrc);
        for csrc in &self.csrc {
            b.put_u32(*csrc);
        }

        if self.extension {
            let payload_len = self.extension_payload_len();
            b.put_u16(self.extension_profile);
            b.put_u16((payload_len / 4) as u16);

            let mut written = 0usize;
            match self.extension_profile {
                EXTENSION_PROFILE_ONE_BYTE => {
                    for e in &self.extensions {
                        b.put_u8(e.id << 4 | (e.payload.len() as u8 - 1));
                        b.put_slice(&e.payload);
                        written += 1 + e.payload.len();
                    }
                }
                EXTENSION_PROFILE_TWO_BYTE => {
                    for e in &self.extensions {
                        b.put_u8(e.id);
                        b.put_u8(e.payload.len() as u8);
                        b.put_slice(&e.payload);
                        written += 2 + e.payload.len();
                    }
                }
                _ => {
                    for e in &self.extensions {
                        b.put_slice(&e.payload);
                        written += e.payload.len();
                    }
                    if written % 4 != 0 {
                        return Err(Error::ErrHeaderSizeInsufficientForExtension);
                    }
                }
            }
            while written < payload_len {
                b.put_u8(0);
                written += 1;
            }
        }

        Ok(size)
    }
}
