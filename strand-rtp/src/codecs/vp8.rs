use bytes::{Buf, BufMut, Bytes, BytesMut};

use shared::error::{Error, Result};

use crate::packetizer::{Depacketizer, Payloader};

pub const VP8_HEADER_SIZE: usize = 1;

const X_BIT: u8 = 0x80;
const N_BIT: u8 = 0x20;
const S_BIT: u8 = 0x10;
const I_BIT: u8 = 0x80;
const L_BIT: u8 = 0x40;
const T_BIT: u8 = 0x20;
const K_BIT: u8 = 0x10;
const M_BIT: u8 = 0x80;

/// Payloads VP8 frames per RFC 7741, emitting a minimal payload descriptor
/// with the S bit set on the first fragment of each frame.
#[derive(Default, Debug, Clone)]
pub struct Vp8Payloader {
    pub enable_picture_id: bool,
    picture_id: u16,
}

impl Payloader for Vp8Payloader {
    fn payload(&mut self, mtu: usize, payload: &Bytes) -> Result<Vec<Bytes>> {
        if payload.is_empty() {
            return Ok(vec![]);
        }

        // descriptor: first byte, plus X/I + up to 15-bit picture id
        let header_size = if !self.enable_picture_id {
            VP8_HEADER_SIZE
        } else if self.picture_id < 128 {
            VP8_HEADER_SIZE + 2
        } else {
            VP8_HEADER_SIZE + 3
        };

        if mtu <= header_size {
            return Err(Error::ErrShortBuffer);
        }

        let max_fragment = mtu - header_size;
        let mut payloads = vec![];
        let mut offset = 0;

        while offset < payload.len() {
            let fragment = std::cmp::min(max_fragment, payload.len() - offset);
            let mut out = BytesMut::with_capacity(header_size + fragment);

            let mut first = 0u8;
            if offset == 0 {
                first |= S_BIT;
            }
            if self.enable_picture_id {
                first |= X_BIT;
            }
            out.put_u8(first);

            if self.enable_picture_id {
                out.put_u8(I_BIT);
                if self.picture_id < 128 {
                    out.put_u8(self.picture_id as u8);
                } else {
                    out.put_u8(M_BIT | (self.picture_id >> 8) as u8);
                    out.put_u8(self.picture_id as u8);
                }
            }

            out.put_slice(&payload[offset..offset + fragment]);
            payloads.push(out.freeze());
            offset += fragment;
        }

        self.picture_id = (self.picture_id + 1) & 0x7FFF;

        Ok(payloads)
    }
}

/// Parsed VP8 payload descriptor plus the raw VP8 bitstream fragment.
#[derive(Default, Debug, Clone)]
pub struct Vp8Packet {
    pub x: u8,
    pub n: u8,
    pub s: u8,
    pub pid: u8,
    pub i: u8,
    pub l: u8,
    pub t: u8,
    pub k: u8,
    pub m: u8,
    pub picture_id: u16,
    pub tl0_pic_idx: u8,
    pub tid: u8,
    pub y: u8,
    pub key_idx: u8,
}

impl Depacketizer for Vp8Packet {
    fn depacketize(&mut self, packet: &Bytes) -> Result<Bytes> {
        let payload_len = packet.len();
        if payload_len < 4 {
            return Err(Error::ErrShortPacket);
        }

        let mut reader = &packet[..];
        let b0 = reader.get_u8();
        self.x = (b0 & X_BIT) >> 7;
        self.n = (b0 & N_BIT) >> 5;
        self.s = (b0 & S_BIT) >> 4;
        self.pid = b0 & 0x07;

        if self.x == 1 {
            let bx = reader.get_u8();
            self.i = (bx & I_BIT) >> 7;
            self.l = (bx & L_BIT) >> 6;
            self.t = (bx & T_BIT) >> 5;
            self.k = (bx & K_BIT) >> 4;

            if self.i == 1 {
                let b = reader.get_u8();
                if b & M_BIT != 0 {
                    self.m = 1;
                    if reader.remaining() < 1 {
                        return Err(Error::ErrShortPacket);
                    }
                    self.picture_id = ((b as u16 & 0x7F) << 8) | reader.get_u8() as u16;
                } else {
                    self.m = 0;
                    self.picture_id = b as u16;
                }
            }
            if reader.remaining() == 0 {
                return Err(Error::ErrShortPacket);
            }
            if self.l == 1 {
                self.tl0_pic_idx = reader.get_u8();
            }
            if reader.remaining() == 0 {
                return Err(Error::ErrShortPacket);
            }
            if self.t == 1 || self.k == 1 {
                let b = reader.get_u8();
                if self.t == 1 {
                    self.tid = b >> 6;
                    self.y = (b >> 5) & 0x1;
                }
                if self.k == 1 {
                    self.key_idx = b & 0x0F;
                }
            }
        }

        if reader.remaining() == 0 {
            return Err(Error::ErrShortPacket);
        }
        Ok(packet.slice(payload_len - reader.remaining()..))
    }

    /// The S bit marks the first packet of a partition; together with PID=0
    /// it marks the first packet of a frame.
    fn is_partition_head(&self, payload: &Bytes) -> bool {
        if payload.is_empty() {
            return false;
        }
        (payload[0] & S_BIT) != 0 && (payload[0] & 0x07) == 0
    }

    fn is_partition_tail(&self, marker: bool, _payload: &Bytes) -> bool {
        marker
    }
}

impl Vp8Packet {
    /// A VP8 keyframe has the P bit of the bitstream's first byte clear.
    pub fn is_keyframe(bitstream: &[u8]) -> bool {
        !bitstream.is_empty() && bitstream[0] & 0x01 == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_vp8_depacketize_minimal_descriptor() -> Result<()> {
        let mut p = Vp8Packet::default();
        let raw = Bytes::from_static(&[0x10, 0xAA, 0xBB, 0xCC]);
        let out = p.depacketize(&raw)?;
        assert_eq!(p.s, 1);
        assert_eq!(p.x, 0);
        assert_eq!(out, Bytes::from_static(&[0xAA, 0xBB, 0xCC]));
        Ok(())
    }

    #[test]
    fn test_vp8_depacketize_with_picture_id() -> Result<()> {
        let mut p = Vp8Packet::default();
        // X=1, S=1; ext: I=1; picture id 15-bit (M set) 0x1234
        let raw = Bytes::from_static(&[0x90, 0x80, 0x92, 0x34, 0x01, 0x02]);
        let out = p.depacketize(&raw)?;
        assert_eq!(p.i, 1);
        assert_eq!(p.m, 1);
        assert_eq!(p.picture_id, 0x1234);
        assert_eq!(out, Bytes::from_static(&[0x01, 0x02]));
        Ok(())
    }

    #[test]
    fn test_vp8_payloader_fragments() -> Result<()> {
        let mut p = Vp8Payloader::default();
        let frame = Bytes::from(vec![0u8; 100]);
        let payloads = p.payload(41, &frame)?;
        // 40 bytes of fragment per packet
        assert_eq!(payloads.len(), 3);
        assert_eq!(payloads[0][0] & S_BIT, S_BIT);
        assert_eq!(payloads[1][0] & S_BIT, 0);
        assert_eq!(payloads[2][0] & S_BIT, 0);
        let total: usize = payloads.iter().map(|pp| pp.len() - 1).sum();
        assert_eq!(total, 100);
        Ok(())
    }

    #[test]
    fn test_vp8_payload_then_depacketize() -> Result<()> {
        let mut p = Vp8Payloader {
            enable_picture_id: true,
            ..Default::default()
        };
        let frame = Bytes::from_static(&[0x00, 0x11, 0x22, 0x33]);
        let payloads = p.payload(1200, &frame)?;
        assert_eq!(payloads.len(), 1);

        let mut d = Vp8Packet::default();
        let out = d.depacketize(&payloads[0])?;
        assert_eq!(out, frame);
        assert!(d.is_partition_head(&payloads[0]));
        Ok(())
    }
}
