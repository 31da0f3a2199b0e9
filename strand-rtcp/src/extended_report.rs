use bytes::{Buf, BufMut, Bytes};

use shared::error::{Error, Result};
use shared::marshal::{Marshal, MarshalSize, Unmarshal};

use crate::header::{Header, PacketType, HEADER_LENGTH};

pub const BLOCK_TYPE_RRTR: u8 = 4;
pub const BLOCK_TYPE_DLRR: u8 = 5;

/// ReceiverReferenceTimeBlock (RFC 3611 section 4.4): the receiver's own
/// NTP clock, so the sender can compute RTT for receive-only streams.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ReceiverReferenceTimeBlock {
    pub ntp_timestamp: u64,
}

/// One DLRR sub-report (RFC 3611 section 4.5).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DlrrReport {
    pub ssrc: u32,
    /// Middle 32 bits of the RRTR NTP timestamp received last.
    pub last_rr: u32,
    /// Delay since that RRTR in 1/65536 seconds.
    pub dlrr: u32,
}

/// DLRRBlock: delay since last receiver reference time report.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct DlrrBlock {
    pub reports: Vec<DlrrReport>,
}

/// One block inside an extended report.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReportBlock {
    ReceiverReferenceTime(ReceiverReferenceTimeBlock),
    Dlrr(DlrrBlock),
    Unknown { block_type: u8, contents: Bytes },
}

impl ReportBlock {
    fn body_size(&self) -> usize {
        match self {
            ReportBlock::ReceiverReferenceTime(_) => 8,
            ReportBlock::Dlrr(b) => b.reports.len() * 12,
            ReportBlock::Unknown { contents, .. } => contents.len(),
        }
    }
}

/// ExtendedReport (XR, RFC 3611).
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ExtendedReport {
    pub sender_ssrc: u32,
    pub reports: Vec<ReportBlock>,
}

impl ExtendedReport {
    pub fn header(&self) -> Header {
        Header {
            padding: false,
            count: 0,
            packet_type: PacketType::ExtendedReport,
            length: ((self.marshal_size() / 4) - 1) as u16,
        }
    }
}

impl MarshalSize for ExtendedReport {
    fn marshal_size(&self) -> usize {
        let mut size = HEADER_LENGTH + 4;
        for report in &self.reports {
            size += 4 + report.body_size();
        }
        size
    }
}

impl Marshal for ExtendedReport {
    fn marshal_to(&self, buf: &mut [u8]) -> Result<usize> {
        let size = self.marshal_size();
        if buf.len() < size {
            return Err(Error::ErrBufferTooSmall);
        }

        let n = self.header().marshal_to(buf)?;
        let mut b = &mut buf[n..];
        b.put_u32(self.sender_ssrc);
        for report in &self.reports {
            match report {
                ReportBlock::ReceiverReferenceTime(rrtr) => {
                    b.put_u8(BLOCK_TYPE_RRTR);
                    b.put_u8(0);
                    b.put_u16(2);
                    b.put_u64(rrtr.ntp_timestamp);
                }
                ReportBlock::Dlrr(dlrr) => {
                    b.put_u8(BLOCK_TYPE_DLRR);
                    b.put_u8(0);
                    b.put_u16((dlrr.reports.len() * 3) as u16);
                    for r in &dlrr.reports {
                        b.put_u32(r.ssrc);
                        b.put_u32(r.last_rr);
                        b.put_u32(r.dlrr);
                    }
                }
                ReportBlock::Unknown {
                    block_type,
                    contents,
                } => {
                    if contents.len() % 4 != 0 {
                        return Err(Error::InvalidBlockSize);
                    }
                    b.put_u8(*block_type);
                    b.put_u8(0);
                    b.put_u16((contents.len() / 4) as u16);
                    b.put_slice(contents);
                }
            }
        }

        Ok(size)
    }
}

impl Unmarshal for ExtendedReport {
    fn unmarshal<B>(buf: &mut B) -> Result<Self>
    where
        B: Buf,
    {
        let header = Header::unmarshal(buf)?;
        if header.packet_type != PacketType::ExtendedReport {
            return Err(Error::WrongType);
        }
        let total_len = (header.length as usize + 1) * 4;
        if total_len < HEADER_LENGTH + 4 || buf.remaining() < total_len - HEADER_LENGTH {
            return Err(Error::PacketTooShort);
        }

        let sender_ssrc = buf.get_u32();
        let mut remaining = total_len - HEADER_LENGTH - 4;
        let mut reports = vec![];

        while remaining >= 4 {
            let block_type = buf.get_u8();
            buf.get_u8(); // reserved / type specific
            let block_len_words = buf.get_u16() as usize;
            let body_len = block_len_words * 4;
            remaining -= 4;
            if remaining < body_len {
                return Err(Error::PacketTooShort);
            }

            match block_type {
                BLOCK_TYPE_RRTR if body_len == 8 => {
                    reports.push(ReportBlock::ReceiverReferenceTime(
                        ReceiverReferenceTimeBlock {
                            ntp_timestamp: buf.get_u64(),
                        },
                    ));
                }
                BLOCK_TYPE_DLRR if body_len % 12 == 0 => {
                    let mut sub = vec![];
                    for _ in 0..body_len / 12 {
                        sub.push(DlrrReport {
                            ssrc: buf.get_u32(),
                            last_rr: buf.get_u32(),
                            dlrr: buf.get_u32(),
                        });
                    }
                    reports.push(ReportBlock::Dlrr(DlrrBlock { reports: sub }));
                }
                _ => {
                    reports.push(ReportBlock::Unknown {
                        block_type,
                        contents: buf.copy_to_bytes(body_len),
                    });
                }
            }
            remaining -= body_len;
        }

        Ok(ExtendedReport {
            sender_ssrc,
            reports,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_xr_rrtr_dlrr_round_trip() -> Result<()> {
        let xr = ExtendedReport {
            sender_ssrc: 0x902f9e2e,
            reports: vec![
                ReportBlock::ReceiverReferenceTime(ReceiverReferenceTimeBlock {
                    ntp_timestamp: 0x0102030405060708,
                }),
                ReportBlock::Dlrr(DlrrBlock {
                    reports: vec![DlrrReport {
                        ssrc: 0x11223344,
                        last_rr: 0x05060000,
                        dlrr: 0x00001000,
                    }],
                }),
            ],
        };
        let raw = xr.marshal()?;
        let mut buf = &raw[..];
        assert_eq!(ExtendedReport::unmarshal(&mut buf)?, xr);
        Ok(())
    }
}
