use bytes::{BufMut, Bytes, BytesMut};

use shared::error::{Error, Result};

use crate::packetizer::{Depacketizer, Payloader};

const Z_MASK: u8 = 0x80; // first element continues a previous OBU
const Y_MASK: u8 = 0x40; // last element continues into the next packet
const W_MASK: u8 = 0x30; // number of OBU elements, 0 = length-prefixed
const N_MASK: u8 = 0x08; // first packet of a coded video sequence

const AV1_AGGREGATION_HEADER_SIZE: usize = 1;

/// Reads a LEB128-encoded value, returning (value, bytes consumed).
pub fn read_leb128(buf: &[u8]) -> Result<(u64, usize)> {
    let mut value = 0u64;
    for (i, &b) in buf.iter().enumerate() {
        if i >= 8 {
            return Err(Error::ErrPayloadTooSmallForObuPayloadSize);
        }
        value |= ((b & 0x7F) as u64) << (i * 7);
        if b & 0x80 == 0 {
            return Ok((value, i + 1));
        }
    }
    Err(Error::ErrPayloadTooSmallForObuPayloadSize)
}

/// Writes a value as LEB128.
pub fn write_leb128(mut value: u64, out: &mut BytesMut) {
    loop {
        let mut b = (value & 0x7F) as u8;
        value >>= 7;
        if value != 0 {
            b |= 0x80;
        }
        out.put_u8(b);
        if value == 0 {
            return;
        }
    }
}

/// Payloads an AV1 temporal unit per the AV1 RTP payload spec, using
/// length-prefixed elements (W=0) and Z/Y continuation bits across packets.
#[derive(Default, Debug, Clone)]
pub struct Av1Payloader;

impl Payloader for Av1Payloader {
    fn payload(&mut self, mtu: usize, payload: &Bytes) -> Result<Vec<Bytes>> {
        if payload.is_empty() {
            return Ok(vec![]);
        }
        if mtu <= AV1_AGGREGATION_HEADER_SIZE + 2 {
            return Err(Error::ErrShortBuffer);
        }

        // leave room for the aggregation header and a 2-byte length prefix
        let max_fragment = mtu - AV1_AGGREGATION_HEADER_SIZE - 2;
        let mut payloads = vec![];
        let mut offset = 0;

        while offset < payload.len() {
            let fragment = std::cmp::min(max_fragment, payload.len() - offset);
            let mut out = BytesMut::with_capacity(mtu);

            let mut header = 0u8;
            if offset != 0 {
                header |= Z_MASK;
            }
            if offset + fragment != payload.len() {
                header |= Y_MASK;
            }
            out.put_u8(header);
            write_leb128(fragment as u64, &mut out);
            out.put_slice(&payload[offset..offset + fragment]);
            payloads.push(out.freeze());
            offset += fragment;
        }

        Ok(payloads)
    }
}

/// Strips the aggregation header and length prefixes from an AV1 RTP
/// payload, returning the concatenated OBU element bytes.
#[derive(Default, Debug, Clone)]
pub struct Av1Packet {
    pub z: bool,
    pub y: bool,
    pub n: bool,
}

impl Depacketizer for Av1Packet {
    fn depacketize(&mut self, packet: &Bytes) -> Result<Bytes> {
        if packet.len() <= AV1_AGGREGATION_HEADER_SIZE {
            return Err(Error::ErrShortPacket);
        }

        let header = packet[0];
        self.z = header & Z_MASK != 0;
        self.y = header & Y_MASK != 0;
        self.n = header & N_MASK != 0;
        let w = (header & W_MASK) >> 4;

        let mut out = BytesMut::new();
        let mut offset = AV1_AGGREGATION_HEADER_SIZE;
        let mut element = 0u8;

        while offset < packet.len() {
            element += 1;
            let length = if w != 0 && element == w {
                // last element of a W-counted packet runs to the end
                packet.len() - offset
            } else {
                let (value, consumed) = read_leb128(&packet[offset..])?;
                offset += consumed;
                value as usize
            };
            if packet.len() < offset + length {
                return Err(Error::ErrPayloadTooSmallForObuPayloadSize);
            }
            out.put_slice(&packet[offset..offset + length]);
            offset += length;
        }

        Ok(out.freeze())
    }

    /// A packet whose first element does not continue a previous OBU heads
    /// a partition.
    fn is_partition_head(&self, payload: &Bytes) -> bool {
        !payload.is_empty() && payload[0] & Z_MASK == 0
    }

    fn is_partition_tail(&self, marker: bool, payload: &Bytes) -> bool {
        marker || (!payload.is_empty() && payload[0] & Y_MASK == 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_leb128_round_trip() -> Result<()> {
        for value in [0u64, 1, 127, 128, 300, 16383, 16384] {
            let mut out = BytesMut::new();
            write_leb128(value, &mut out);
            let (decoded, consumed) = read_leb128(&out)?;
            assert_eq!(decoded, value);
            assert_eq!(consumed, out.len());
        }
        Ok(())
    }

    #[test]
    fn test_av1_payload_then_depacketize() -> Result<()> {
        let mut p = Av1Payloader;
        let tu = Bytes::from(vec![0x0A; 100]);
        let payloads = p.payload(30, &tu)?;
        assert!(payloads.len() > 1);
        // first packet starts fresh, later ones continue
        assert_eq!(payloads[0][0] & Z_MASK, 0);
        assert_ne!(payloads[1][0] & Z_MASK, 0);

        let mut d = Av1Packet::default();
        let mut out = vec![];
        for pp in &payloads {
            out.extend_from_slice(&d.depacketize(pp)?);
        }
        assert_eq!(out, tu.to_vec());
        Ok(())
    }
}
