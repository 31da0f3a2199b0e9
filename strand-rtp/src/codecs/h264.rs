use bytes::{BufMut, Bytes, BytesMut};

use shared::error::{Error, Result};

use crate::packetizer::{Depacketizer, Payloader};

pub const STAPA_NALU_TYPE: u8 = 24;
pub const FUA_NALU_TYPE: u8 = 28;
pub const FUB_NALU_TYPE: u8 = 29;
pub const SPS_NALU_TYPE: u8 = 7;
pub const PPS_NALU_TYPE: u8 = 8;
pub const AUD_NALU_TYPE: u8 = 9;
pub const FILLER_NALU_TYPE: u8 = 12;
pub const IDR_NALU_TYPE: u8 = 5;

pub const FUA_HEADER_SIZE: usize = 2;
pub const STAPA_HEADER_SIZE: usize = 1;
pub const STAPA_NALU_LENGTH_SIZE: usize = 2;

pub const NALU_TYPE_BITMASK: u8 = 0x1F;
pub const NALU_REF_IDC_BITMASK: u8 = 0x60;
pub const FU_START_BITMASK: u8 = 0x80;
pub const FU_END_BITMASK: u8 = 0x40;

pub const OUTPUT_STAP_AHEADER: u8 = 0x78;

pub static ANNEXB_NALUSTART_CODE: Bytes = Bytes::from_static(&[0x00, 0x00, 0x00, 0x01]);

/// Payloads H.264 Annex-B streams per RFC 6184: SPS and PPS are aggregated
/// into a STAP-A, small NALUs go out as single units, large ones are
/// fragmented into FU-As.
#[derive(Default, Debug, Clone)]
pub struct H264Payloader {
    sps_nalu: Option<Bytes>,
    pps_nalu: Option<Bytes>,
}

impl H264Payloader {
    fn next_ind(nalu: &Bytes, start: usize) -> (isize, isize) {
        let mut zero_count = 0;

        for (i, &b) in nalu[start..].iter().enumerate() {
            if b == 0 {
                zero_count += 1;
                continue;
            } else if b == 1 && zero_count >= 2 {
                return ((start + i - zero_count) as isize, zero_count as isize + 1);
            }
            zero_count = 0;
        }
        (-1, -1)
    }

    fn emit(&mut self, nalu: &Bytes, mtu: usize, payloads: &mut Vec<Bytes>) {
        if nalu.is_empty() {
            return;
        }

        let nalu_type = nalu[0] & NALU_TYPE_BITMASK;
        let nalu_ref_idc = nalu[0] & NALU_REF_IDC_BITMASK;

        if nalu_type == AUD_NALU_TYPE || nalu_type == FILLER_NALU_TYPE {
            return;
        } else if nalu_type == SPS_NALU_TYPE {
            self.sps_nalu = Some(nalu.clone());
            return;
        } else if nalu_type == PPS_NALU_TYPE {
            self.pps_nalu = Some(nalu.clone());
            return;
        } else if let (Some(sps_nalu), Some(pps_nalu)) = (&self.sps_nalu, &self.pps_nalu) {
            // pack current NALU with SPS and PPS as STAP-A
            let stap_a_nalu_len = 1 + 2 + sps_nalu.len() + 2 + pps_nalu.len();
            if stap_a_nalu_len <= mtu {
                let mut stap_a_nalu = BytesMut::with_capacity(stap_a_nalu_len);
                stap_a_nalu.put_u8(OUTPUT_STAP_AHEADER);
                stap_a_nalu.put_u16(sps_nalu.len() as u16);
                stap_a_nalu.put_slice(sps_nalu);
                stap_a_nalu.put_u16(pps_nalu.len() as u16);
                stap_a_nalu.put_slice(pps_nalu);
                payloads.push(stap_a_nalu.freeze());
            }
            self.sps_nalu = None;
            self.pps_nalu = None;
        }

        // single NALU
        if nalu.len() <= mtu {
            payloads.push(nalu.clone());
            return;
        }

        // FU-A fragmentation
        let max_fragment_size = mtu as isize - FUA_HEADER_SIZE as isize;
        if max_fragment_size <= 0 {
            return;
        }

        let nalu_data = nalu;
        let mut nalu_data_index = 1;
        let nalu_data_length = nalu.len() as isize - nalu_data_index;
        let mut nalu_data_remaining = nalu_data_length;

        while nalu_data_remaining > 0 {
            let current_fragment_size = std::cmp::min(max_fragment_size, nalu_data_remaining);
            let mut out = BytesMut::with_capacity(FUA_HEADER_SIZE + current_fragment_size as usize);

            // FU indicator
            out.put_u8(FUA_NALU_TYPE | nalu_ref_idc);
            // FU header
            let mut b1 = nalu_type;
            if nalu_data_remaining == nalu_data_length {
                b1 |= FU_START_BITMASK;
            }
            if nalu_data_remaining - current_fragment_size == 0 {
                b1 |= FU_END_BITMASK;
            }
            out.put_u8(b1);

            out.put_slice(
                &nalu_data
                    [nalu_data_index as usize..(nalu_data_index + current_fragment_size) as usize],
            );
            payloads.push(out.freeze());

            nalu_data_remaining -= current_fragment_size;
            nalu_data_index += current_fragment_size;
        }
    }
}

impl Payloader for H264Payloader {
    fn payload(&mut self, mtu: usize, payload: &Bytes) -> Result<Vec<Bytes>> {
        let mut payloads = vec![];
        if payload.is_empty() {
            return Ok(payloads);
        }

        let (mut next_ind_start, mut next_ind_len) = Self::next_ind(payload, 0);
        if next_ind_start == -1 {
            self.emit(payload, mtu, &mut payloads);
        } else {
            while next_ind_start != -1 {
                let prev_start = (next_ind_start + next_ind_len) as usize;
                let (next_ind_start2, next_ind_len2) = Self::next_ind(payload, prev_start);
                next_ind_start = next_ind_start2;
                next_ind_len = next_ind_len2;
                if next_ind_start != -1 {
                    self.emit(
                        &payload.slice(prev_start..next_ind_start as usize),
                        mtu,
                        &mut payloads,
                    );
                } else {
                    // Emit until end of stream, no end indicator found
                    self.emit(&payload.slice(prev_start..), mtu, &mut payloads);
                }
            }
        }

        Ok(payloads)
    }
}

/// Depacketizes H.264 RTP payloads back into Annex-B NAL units.
#[derive(Default, Debug, Clone)]
pub struct H264Packet {
    pub is_avc: bool,
    fua_buffer: Option<BytesMut>,
}

impl Depacketizer for H264Packet {
    fn depacketize(&mut self, packet: &Bytes) -> Result<Bytes> {
        if packet.len() <= 2 {
            return Err(Error::ErrShortPacket);
        }

        let mut payload = BytesMut::new();
        let nalu_type = packet[0] & NALU_TYPE_BITMASK;

        match nalu_type {
            1..=23 => {
                if self.is_avc {
                    payload.put_u32(packet.len() as u32);
                } else {
                    payload.put_slice(&ANNEXB_NALUSTART_CODE);
                }
                payload.put_slice(packet);
                Ok(payload.freeze())
            }
            STAPA_NALU_TYPE => {
                let mut curr_offset = STAPA_HEADER_SIZE;
                while curr_offset < packet.len() {
                    if packet.len() < curr_offset + STAPA_NALU_LENGTH_SIZE {
                        return Err(Error::ErrShortPacket);
                    }
                    let nalu_size =
                        ((packet[curr_offset] as usize) << 8) | packet[curr_offset + 1] as usize;
                    curr_offset += STAPA_NALU_LENGTH_SIZE;

                    if packet.len() < curr_offset + nalu_size {
                        return Err(Error::StapASizeLargerThanBuffer(
                            nalu_size,
                            packet.len() - curr_offset,
                        ));
                    }
                    if self.is_avc {
                        payload.put_u32(nalu_size as u32);
                    } else {
                        payload.put_slice(&ANNEXB_NALUSTART_CODE);
                    }
                    payload.put_slice(&packet[curr_offset..curr_offset + nalu_size]);
                    curr_offset += nalu_size;
                }
                Ok(payload.freeze())
            }
            FUA_NALU_TYPE => {
                if packet.len() < FUA_HEADER_SIZE {
                    return Err(Error::ErrShortPacket);
                }
                if self.fua_buffer.is_none() {
                    self.fua_buffer = Some(BytesMut::new());
                }
                if let Some(fua_buffer) = &mut self.fua_buffer {
                    fua_buffer.put_slice(&packet[FUA_HEADER_SIZE..]);
                }

                let b1 = packet[1];
                if b1 & FU_END_BITMASK != 0 {
                    let nalu_ref_idc = packet[0] & NALU_REF_IDC_BITMASK;
                    let fragmented_nalu_type = b1 & NALU_TYPE_BITMASK;

                    if let Some(fua_buffer) = self.fua_buffer.take() {
                        if self.is_avc {
                            payload.put_u32((fua_buffer.len() + 1) as u32);
                        } else {
                            payload.put_slice(&ANNEXB_NALUSTART_CODE);
                        }
                        payload.put_u8(nalu_ref_idc | fragmented_nalu_type);
                        payload.put_slice(&fua_buffer);
                    }
                    Ok(payload.freeze())
                } else {
                    Ok(Bytes::new())
                }
            }
            _ => Err(Error::NaluTypeIsNotHandled(nalu_type)),
        }
    }

    /// Checks whether the packet starts a new partition: for FU-A/FU-B the
    /// start bit, everything else is a head on its own.
    fn is_partition_head(&self, payload: &Bytes) -> bool {
        if payload.len() < 2 {
            return false;
        }
        if payload[0] & NALU_TYPE_BITMASK == FUA_NALU_TYPE
            || payload[0] & NALU_TYPE_BITMASK == FUB_NALU_TYPE
        {
            payload[1] & FU_START_BITMASK != 0
        } else {
            true
        }
    }

    fn is_partition_tail(&self, marker: bool, _payload: &Bytes) -> bool {
        marker
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_h264_payload_single_nalu() -> Result<()> {
        let mut p = H264Payloader::default();
        let nalu = Bytes::from_static(&[0x00, 0x00, 0x01, 0x65, 0x01, 0x02, 0x03]);
        let payloads = p.payload(1200, &nalu)?;
        assert_eq!(payloads, vec![Bytes::from_static(&[0x65, 0x01, 0x02, 0x03])]);
        Ok(())
    }

    #[test]
    fn test_h264_payload_sps_pps_aggregated() -> Result<()> {
        let mut p = H264Payloader::default();
        let stream = Bytes::from_static(&[
            0x00, 0x00, 0x01, 0x67, 0xAA, // SPS
            0x00, 0x00, 0x01, 0x68, 0xBB, // PPS
            0x00, 0x00, 0x01, 0x65, 0xCC, // IDR
        ]);
        let payloads = p.payload(1200, &stream)?;
        assert_eq!(payloads.len(), 2);
        assert_eq!(payloads[0][0], OUTPUT_STAP_AHEADER);
        // STAP-A: len(2) 0x67 0xAA len(2) 0x68 0xBB
        assert_eq!(
            &payloads[0][..],
            &[0x78, 0x00, 0x02, 0x67, 0xAA, 0x00, 0x02, 0x68, 0xBB]
        );
        assert_eq!(&payloads[1][..], &[0x65, 0xCC]);
        Ok(())
    }

    #[test]
    fn test_h264_fua_round_trip() -> Result<()> {
        let mut p = H264Payloader::default();
        let mut nalu = vec![0x00, 0x00, 0x01, 0x65];
        nalu.extend(std::iter::repeat(0xAB).take(100));
        let payloads = p.payload(30, &Bytes::from(nalu.clone()))?;
        assert!(payloads.len() > 1);
        assert_eq!(payloads[0][1] & FU_START_BITMASK, FU_START_BITMASK);
        assert_eq!(
            payloads[payloads.len() - 1][1] & FU_END_BITMASK,
            FU_END_BITMASK
        );

        let mut d = H264Packet::default();
        let mut out = BytesMut::new();
        for pp in &payloads {
            out.put_slice(&d.depacketize(pp)?);
        }
        // reassembled: start code + original NALU bytes
        let mut expected = ANNEXB_NALUSTART_CODE.to_vec();
        expected.extend_from_slice(&nalu[3..]);
        assert_eq!(&out[..], &expected[..]);
        Ok(())
    }

    #[test]
    fn test_h264_depacketize_stapa() -> Result<()> {
        let mut d = H264Packet::default();
        let stapa = Bytes::from_static(&[0x78, 0x00, 0x02, 0x67, 0xAA, 0x00, 0x02, 0x68, 0xBB]);
        let out = d.depacketize(&stapa)?;
        assert_eq!(
            &out[..],
            &[0, 0, 0, 1, 0x67, 0xAA, 0, 0, 0, 1, 0x68, 0xBB]
        );
        Ok(())
    }

    #[test]
    fn test_h264_depacketize_unhandled_type() {
        let mut d = H264Packet::default();
        let packet = Bytes::from_static(&[0x1E, 0x00, 0x00]);
        assert!(d.depacketize(&packet).is_err());
    }
}
