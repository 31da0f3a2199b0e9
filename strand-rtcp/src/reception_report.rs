use bytes::{Buf, BufMut};

use shared::error::{Error, Result};
use shared::marshal::{Marshal, MarshalSize, Unmarshal};

pub const RECEPTION_REPORT_LENGTH: usize = 24;
pub const FRACTION_LOST_SHIFT: u8 = 24;

/// ReceptionReport is one block in a sender or receiver report describing
/// reception quality for one SSRC (RFC 3550 section 6.4.1).
#[derive(Debug, Copy, Clone, PartialEq, Eq, Default)]
pub struct ReceptionReport {
    /// The SSRC this report is for.
    pub ssrc: u32,
    /// Fraction of packets lost since the previous report, fixed point /256.
    pub fraction_lost: u8,
    /// Cumulative packets lost, 24 bit signed.
    pub total_lost: u32,
    /// Extended highest sequence number received: ROC in the top 16 bits.
    pub last_sequence_number: u32,
    /// Interarrival jitter estimate in timestamp units.
    pub jitter: u32,
    /// Middle 32 bits of the last SR NTP timestamp.
    pub last_sender_report: u32,
    /// Delay since the last SR in 1/65536 seconds.
    pub delay: u32,
}

impl MarshalSize for ReceptionReport {
    fn marshal_size(&self) -> usize {
        RECEPTION_REPORT_LENGTH
    }
}

impl Marshal for ReceptionReport {
    fn marshal_to(&self, mut buf: &mut [u8]) -> Result<usize> {
        if buf.len() < RECEPTION_REPORT_LENGTH {
            return Err(Error::ErrBufferTooSmall);
        }
        if self.total_lost >= (1 << 25) {
            return Err(Error::InvalidTotalLost);
        }

        buf.put_u32(self.ssrc);
        buf.put_u32((self.fraction_lost as u32) << FRACTION_LOST_SHIFT | self.total_lost);
        buf.put_u32(self.last_sequence_number);
        buf.put_u32(self.jitter);
        buf.put_u32(self.last_sender_report);
        buf.put_u32(self.delay);
        Ok(RECEPTION_REPORT_LENGTH)
    }
}

impl Unmarshal for ReceptionReport {
    fn unmarshal<B>(buf: &mut B) -> Result<Self>
    where
        B: Buf,
    {
        if buf.remaining() < RECEPTION_REPORT_LENGTH {
            return Err(Error::PacketTooShort);
        }

        let ssrc = buf.get_u32();
        let lost = buf.get_u32();
        let fraction_lost = (lost >> FRACTION_LOST_SHIFT) as u8;
        let total_lost = lost & 0x00FF_FFFF;
        let last_sequence_number = buf.get_u32();
        let jitter = buf.get_u32();
        let last_sender_report = buf.get_u32();
        let delay = buf.get_u32();

        Ok(ReceptionReport {
            ssrc,
            fraction_lost,
            total_lost,
            last_sequence_number,
            jitter,
            last_sender_report,
            delay,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reception_report_round_trip() -> Result<()> {
        let r = ReceptionReport {
            ssrc: 0x902f9e2e,
            fraction_lost: 81,
            total_lost: 1,
            last_sequence_number: 0x46e1,
            jitter: 273,
            last_sender_report: 0x9f36432,
            delay: 150137,
        };
        let raw = r.marshal()?;
        let mut buf = &raw[..];
        assert_eq!(ReceptionReport::unmarshal(&mut buf)?, r);
        Ok(())
    }

    #[test]
    fn test_reception_report_total_lost_overflow() {
        let r = ReceptionReport {
            total_lost: 1 << 25,
            ..Default::default()
        };
        assert!(r.marshal().is_err());
    }
}
