use bytes::{Buf, BufMut, Bytes, BytesMut};

use shared::error::{Error, Result};

use crate::packetizer::{Depacketizer, Payloader};

const I_BIT: u8 = 0x80; // picture id present
const P_BIT: u8 = 0x40; // inter-picture predicted
const L_BIT: u8 = 0x20; // layer indices present
const F_BIT: u8 = 0x10; // flexible mode
const B_BIT: u8 = 0x08; // start of frame
const E_BIT: u8 = 0x04; // end of frame
const V_BIT: u8 = 0x02; // scalability structure present
const M_BIT: u8 = 0x80; // extended picture id

/// Payloads VP9 frames in flexible mode with a 15-bit picture id
/// (draft-ietf-payload-vp9).
#[derive(Debug, Clone)]
pub struct Vp9Payloader {
    picture_id: u16,
    initialized: bool,
}

impl Default for Vp9Payloader {
    fn default() -> Self {
        Vp9Payloader {
            picture_id: 0,
            initialized: false,
        }
    }
}

const VP9_HEADER_SIZE: usize = 3; // descriptor + 15-bit picture id

impl Payloader for Vp9Payloader {
    fn payload(&mut self, mtu: usize, payload: &Bytes) -> Result<Vec<Bytes>> {
        if payload.is_empty() {
            return Ok(vec![]);
        }
        if !self.initialized {
            self.picture_id = rand::random::<u16>() & 0x7FFF;
            self.initialized = true;
        }
        if mtu <= VP9_HEADER_SIZE {
            return Err(Error::ErrShortBuffer);
        }

        let max_fragment = mtu - VP9_HEADER_SIZE;
        let mut payloads = vec![];
        let mut offset = 0;

        while offset < payload.len() {
            let fragment = std::cmp::min(max_fragment, payload.len() - offset);
            let mut out = BytesMut::with_capacity(VP9_HEADER_SIZE + fragment);

            let mut b0 = I_BIT | F_BIT;
            if offset == 0 {
                b0 |= B_BIT;
            }
            if offset + fragment == payload.len() {
                b0 |= E_BIT;
            }
            out.put_u8(b0);
            out.put_u8(M_BIT | (self.picture_id >> 8) as u8);
            out.put_u8(self.picture_id as u8);
            out.put_slice(&payload[offset..offset + fragment]);
            payloads.push(out.freeze());
            offset += fragment;
        }

        self.picture_id = (self.picture_id + 1) & 0x7FFF;

        Ok(payloads)
    }
}

/// Parsed VP9 payload descriptor plus the raw bitstream fragment.
#[derive(Default, Debug, Clone)]
pub struct Vp9Packet {
    pub i: bool,
    pub p: bool,
    pub l: bool,
    pub f: bool,
    pub b: bool,
    pub e: bool,
    pub v: bool,
    pub picture_id: u16,
    pub tid: u8,
    pub sid: u8,
    pub d: bool,
    pub tl0_pic_idx: u8,
    pub p_diff: Vec<u8>,
}

impl Depacketizer for Vp9Packet {
    fn depacketize(&mut self, packet: &Bytes) -> Result<Bytes> {
        if packet.is_empty() {
            return Err(Error::ErrShortPacket);
        }

        let mut reader = &packet[..];
        let b0 = reader.get_u8();
        self.i = b0 & I_BIT != 0;
        self.p = b0 & P_BIT != 0;
        self.l = b0 & L_BIT != 0;
        self.f = b0 & F_BIT != 0;
        self.b = b0 & B_BIT != 0;
        self.e = b0 & E_BIT != 0;
        self.v = b0 & V_BIT != 0;

        if self.i {
            if reader.remaining() < 1 {
                return Err(Error::ErrShortPacket);
            }
            let b = reader.get_u8();
            if b & M_BIT != 0 {
                if reader.remaining() < 1 {
                    return Err(Error::ErrShortPacket);
                }
                self.picture_id = ((b as u16 & 0x7F) << 8) | reader.get_u8() as u16;
            } else {
                self.picture_id = b as u16;
            }
        }

        if self.l {
            if reader.remaining() < 1 {
                return Err(Error::ErrShortPacket);
            }
            let b = reader.get_u8();
            self.tid = b >> 5;
            self.sid = (b >> 1) & 0x7;
            self.d = b & 0x1 != 0;
            if !self.f {
                if reader.remaining() < 1 {
                    return Err(Error::ErrShortPacket);
                }
                self.tl0_pic_idx = reader.get_u8();
            }
        }

        if self.f && self.p {
            self.p_diff.clear();
            loop {
                if reader.remaining() < 1 {
                    return Err(Error::ErrShortPacket);
                }
                let b = reader.get_u8();
                self.p_diff.push(b >> 1);
                if b & 0x1 == 0 {
                    break;
                }
            }
        }

        if self.v {
            // scalability structure: parse enough to skip it
            if reader.remaining() < 1 {
                return Err(Error::ErrShortPacket);
            }
            let b = reader.get_u8();
            let n_s = (b >> 5) as usize + 1;
            let y = b & 0x10 != 0;
            let g = b & 0x08 != 0;
            if y {
                let need = n_s * 4;
                if reader.remaining() < need {
                    return Err(Error::ErrShortPacket);
                }
                reader.advance(need);
            }
            if g {
                if reader.remaining() < 1 {
                    return Err(Error::ErrShortPacket);
                }
                let n_g = reader.get_u8() as usize;
                for _ in 0..n_g {
                    if reader.remaining() < 1 {
                        return Err(Error::ErrShortPacket);
                    }
                    let bg = reader.get_u8();
                    let r = ((bg >> 2) & 0x3) as usize;
                    if reader.remaining() < r {
                        return Err(Error::ErrShortPacket);
                    }
                    reader.advance(r);
                }
            }
        }

        if reader.remaining() == 0 {
            return Err(Error::ErrShortPacket);
        }
        Ok(packet.slice(packet.len() - reader.remaining()..))
    }

    fn is_partition_head(&self, payload: &Bytes) -> bool {
        !payload.is_empty() && (payload[0] & B_BIT) != 0
    }

    fn is_partition_tail(&self, marker: bool, payload: &Bytes) -> bool {
        marker || (!payload.is_empty() && (payload[0] & E_BIT) != 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_vp9_payload_then_depacketize() -> Result<()> {
        let mut p = Vp9Payloader::default();
        let frame = Bytes::from(vec![0x42u8; 50]);
        let payloads = p.payload(23, &frame)?;
        assert!(payloads.len() > 1);
        assert!(payloads[0][0] & B_BIT != 0);
        assert!(payloads[payloads.len() - 1][0] & E_BIT != 0);

        let mut d = Vp9Packet::default();
        let mut out = vec![];
        for pp in &payloads {
            out.extend_from_slice(&d.depacketize(pp)?);
        }
        assert_eq!(out, frame.to_vec());
        Ok(())
    }

    #[test]
    fn test_vp9_descriptor_fields() -> Result<()> {
        let mut d = Vp9Packet::default();
        // I=1 B=1 E=1, 7-bit picture id 0x55, payload 0xAA
        let raw = Bytes::from_static(&[I_BIT | B_BIT | E_BIT, 0x55, 0xAA]);
        let out = d.depacketize(&raw)?;
        assert!(d.i && d.b && d.e);
        assert_eq!(d.picture_id, 0x55);
        assert_eq!(out, Bytes::from_static(&[0xAA]));
        Ok(())
    }
}
