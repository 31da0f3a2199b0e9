use bytes::{Buf, BufMut};

use shared::error::{Error, Result};
use shared::marshal::{Marshal, MarshalSize, Unmarshal};

use crate::header::{Header, PacketType, COUNT_MAX, HEADER_LENGTH, SSRC_LENGTH};
use crate::reception_report::ReceptionReport;

/// ReceiverReport (RFC 3550 section 6.4.2).
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ReceiverReport {
    /// The SSRC of the packet sender.
    pub ssrc: u32,
    pub reports: Vec<ReceptionReport>,
}

impl ReceiverReport {
    pub fn header(&self) -> Header {
        Header {
            padding: false,
            count: self.reports.len() as u8,
            packet_type: PacketType::ReceiverReport,
            length: ((self.marshal_size() / 4) - 1) as u16,
        }
    }
}

impl MarshalSize for ReceiverReport {
    fn marshal_size(&self) -> usize {
        HEADER_LENGTH + SSRC_LENGTH + self.reports.len() * 24
    }
}

impl Marshal for ReceiverReport {
    fn marshal_to(&self, buf: &mut [u8]) -> Result<usize> {
        if self.reports.len() > COUNT_MAX {
            return Err(Error::TooManyReports);
        }
        if buf.len() < self.marshal_size() {
            return Err(Error::ErrBufferTooSmall);
        }

        let mut n = self.header().marshal_to(buf)?;
        {
            let mut b = &mut buf[n..];
            b.put_u32(self.ssrc);
        }
        n += SSRC_LENGTH;
        for report in &self.reports {
            n += report.marshal_to(&mut buf[n..])?;
        }
        Ok(n)
    }
}

impl Unmarshal for ReceiverReport {
    fn unmarshal<B>(buf: &mut B) -> Result<Self>
    where
        B: Buf,
    {
        let header = Header::unmarshal(buf)?;
        if header.packet_type != PacketType::ReceiverReport {
            return Err(Error::WrongType);
        }
        if buf.remaining() < SSRC_LENGTH {
            return Err(Error::PacketTooShort);
        }

        let ssrc = buf.get_u32();
        let mut reports = Vec::with_capacity(header.count as usize);
        for _ in 0..header.count {
            reports.push(ReceptionReport::unmarshal(buf)?);
        }

        Ok(ReceiverReport { ssrc, reports })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_receiver_report_round_trip() -> Result<()> {
        let rr = ReceiverReport {
            ssrc: 0x902f9e2e,
            reports: vec![
                ReceptionReport {
                    ssrc: 0xaaaaaaaa,
                    fraction_lost: 5,
                    total_lost: 10,
                    last_sequence_number: 0x100,
                    jitter: 3,
                    last_sender_report: 1,
                    delay: 2,
                },
                ReceptionReport::default(),
            ],
        };
        let raw = rr.marshal()?;
        let mut buf = &raw[..];
        assert_eq!(ReceiverReport::unmarshal(&mut buf)?, rr);
        Ok(())
    }

    #[test]
    fn test_receiver_report_wrong_type() {
        let sr_bytes = [0x80u8, 200, 0x00, 0x01, 0, 0, 0, 1];
        let mut buf = &sr_bytes[..];
        assert_eq!(ReceiverReport::unmarshal(&mut buf), Err(Error::WrongType));
    }
}
