use bytes::{Buf, BufMut};

use shared::error::{Error, Result};
use shared::marshal::{Marshal, MarshalSize, Unmarshal};

use crate::header::{Header, PacketType, COUNT_MAX, HEADER_LENGTH};
use crate::reception_report::ReceptionReport;

pub const SR_HEADER_LENGTH: usize = 24;

/// SenderReport (RFC 3550 section 6.4.1): sender clocks and counters plus
/// reception report blocks.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SenderReport {
    pub ssrc: u32,
    /// Wallclock time as a 64-bit NTP timestamp.
    pub ntp_time: u64,
    /// RTP timestamp corresponding to the NTP timestamp.
    pub rtp_time: u32,
    pub packet_count: u32,
    pub octet_count: u32,
    pub reports: Vec<ReceptionReport>,
}

impl SenderReport {
    pub fn header(&self) -> Header {
        Header {
            padding: false,
            count: self.reports.len() as u8,
            packet_type: PacketType::SenderReport,
            length: ((self.marshal_size() / 4) - 1) as u16,
        }
    }
}

impl MarshalSize for SenderReport {
    fn marshal_size(&self) -> usize {
        HEADER_LENGTH + SR_HEADER_LENGTH + self.reports.len() * 24
    }
}

impl Marshal for SenderReport {
    fn marshal_to(&self, buf: &mut [u8]) -> Result<usize> {
        if self.reports.len() > COUNT_MAX {
            return Err(Error::TooManyReports);
        }
        let size = self.marshal_size();
        if buf.len() < size {
            return Err(Error::ErrBufferTooSmall);
        }

        let mut n = self.header().marshal_to(buf)?;
        {
            let mut b = &mut buf[n..];
            b.put_u32(self.ssrc);
            b.put_u64(self.ntp_time);
            b.put_u32(self.rtp_time);
            b.put_u32(self.packet_count);
            b.put_u32(self.octet_count);
        }
        n += SR_HEADER_LENGTH;
        for report in &self.reports {
            n += report.marshal_to(&mut buf[n..])?;
        }
        Ok(n)
    }
}

impl Unmarshal for SenderReport {
    fn unmarshal<B>(buf: &mut B) -> Result<Self>
    where
        B: Buf,
    {
        let header = Header::unmarshal(buf)?;
        if header.packet_type != PacketType::SenderReport {
            return Err(Error::WrongType);
        }
        if buf.remaining() < SR_HEADER_LENGTH {
            return Err(Error::PacketTooShort);
        }

        let ssrc = buf.get_u32();
        let ntp_time = buf.get_u64();
        let rtp_time = buf.get_u32();
        let packet_count = buf.get_u32();
        let octet_count = buf.get_u32();

        let mut reports = Vec::with_capacity(header.count as usize);
        for _ in 0..header.count {
            reports.push(ReceptionReport::unmarshal(buf)?);
        }

        Ok(SenderReport {
            ssrc,
            ntp_time,
            rtp_time,
            packet_count,
            octet_count,
            reports,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sender_report_round_trip() -> Result<()> {
        let sr = SenderReport {
            ssrc: 0x902f9e2e,
            ntp_time: 0xda8bd1fcdddda05a,
            rtp_time: 0xaaf4edd5,
            packet_count: 1,
            octet_count: 2,
            reports: vec![ReceptionReport {
                ssrc: 0xbc5e9a40,
                fraction_lost: 0,
                total_lost: 0,
                last_sequence_number: 0x46e1,
                jitter: 273,
                last_sender_report: 0x9f36432,
                delay: 150137,
            }],
        };
        let raw = sr.marshal()?;
        let mut buf = &raw[..];
        assert_eq!(SenderReport::unmarshal(&mut buf)?, sr);
        Ok(())
    }
}
