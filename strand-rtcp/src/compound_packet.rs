use shared::error::{Error, Result};

use crate::packet::RtcpPacket;
use crate::source_description::SDES_TYPE_CNAME;

/// CompoundPacket wraps the RFC 3550 section 6.1 validity rules: every
/// compound datagram begins with an SR or RR, and a CNAME SDES item must
/// appear before any other packet kinds that follow the reports.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct CompoundPacket(pub Vec<RtcpPacket>);

impl CompoundPacket {
    pub fn validate(&self) -> Result<()> {
        if self.0.is_empty() {
            return Err(Error::EmptyCompound);
        }

        match &self.0[0] {
            RtcpPacket::SenderReport(_) | RtcpPacket::ReceiverReport(_) => {}
            _ => return Err(Error::BadFirstPacket),
        }

        for packet in &self.0[1..] {
            match packet {
                // reports may be stacked
                RtcpPacket::SenderReport(_) | RtcpPacket::ReceiverReport(_) => {}
                RtcpPacket::SourceDescription(sdes) => {
                    let has_cname = sdes.chunks.iter().any(|c| {
                        c.items
                            .iter()
                            .any(|item| item.sdes_type == SDES_TYPE_CNAME)
                    });
                    if !has_cname {
                        return Err(Error::MissingCname);
                    }
                    return Ok(());
                }
                _ => return Err(Error::PacketBeforeCname),
            }
        }

        Err(Error::MissingCname)
    }

    /// CNAME of the first SDES chunk that carries one.
    pub fn cname(&self) -> Result<String> {
        self.validate()?;
        for packet in &self.0 {
            if let RtcpPacket::SourceDescription(sdes) = packet {
                for chunk in &sdes.chunks {
                    for item in &chunk.items {
                        if item.sdes_type == SDES_TYPE_CNAME {
                            return Ok(item.text.clone());
                        }
                    }
                }
            }
        }
        Err(Error::MissingCname)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::picture_loss_indication::PictureLossIndication;
    use crate::receiver_report::ReceiverReport;
    use crate::source_description::SourceDescription;

    #[test]
    fn test_compound_valid() -> Result<()> {
        let compound = CompoundPacket(vec![
            RtcpPacket::ReceiverReport(ReceiverReport::default()),
            RtcpPacket::SourceDescription(SourceDescription::new_cname(1, "cname".to_owned())),
        ]);
        compound.validate()?;
        assert_eq!(compound.cname()?, "cname");
        Ok(())
    }

    #[test]
    fn test_compound_bad_first_packet() {
        let compound = CompoundPacket(vec![RtcpPacket::PictureLossIndication(
            PictureLossIndication::default(),
        )]);
        assert_eq!(compound.validate(), Err(Error::BadFirstPacket));
    }

    #[test]
    fn test_compound_missing_cname() {
        let compound = CompoundPacket(vec![RtcpPacket::ReceiverReport(ReceiverReport::default())]);
        assert_eq!(compound.validate(), Err(Error::MissingCname));
    }
}
