use bytes::Bytes;

use shared::error::Result;

use crate::header::Header;
use crate::packet::Packet;
use crate::sequence::Sequencer;

/// Payloader splits a codec frame into RTP payloads that fit the MTU.
pub trait Payloader {
    fn payload(&mut self, mtu: usize, b: &Bytes) -> Result<Vec<Bytes>>;
}

/// Depacketizer extracts a codec frame fragment from an RTP payload and
/// classifies partition boundaries for frame assembly.
pub trait Depacketizer {
    fn depacketize(&mut self, b: &Bytes) -> Result<Bytes>;

    /// Checks whether the packet is at the beginning of a partition.
    fn is_partition_head(&self, payload: &Bytes) -> bool;

    /// Checks whether the packet is at the end of a partition.
    fn is_partition_tail(&self, marker: bool, payload: &Bytes) -> bool;
}

/// Packetizer assigns sequence numbers and timestamps while payloading
/// codec frames into RTP packets.
pub struct Packetizer {
    pub ssrc: u32,
    pub payload_type: u8,
    pub clock_rate: u32,
    pub(crate) sequencer: Sequencer,
    pub(crate) timestamp: u32,
    payloader: Box<dyn Payloader + Send>,
}

impl Packetizer {
    pub fn new(
        ssrc: u32,
        payload_type: u8,
        clock_rate: u32,
        payloader: Box<dyn Payloader + Send>,
    ) -> Self {
        Packetizer {
            ssrc,
            payload_type,
            clock_rate,
            sequencer: Sequencer::new_random(),
            timestamp: rand::random::<u32>(),
            payloader,
        }
    }

    /// Packetizes one frame worth of payload; `samples` advances the RTP
    /// timestamp by the frame duration in clock-rate units.
    pub fn packetize(&mut self, mtu: usize, payload: &Bytes, samples: u32) -> Result<Vec<Packet>> {
        let payloads = self.payloader.payload(mtu - 12, payload)?;
        let payloads_len = payloads.len();
        let mut packets = Vec::with_capacity(payloads_len);
        for (i, pp) in payloads.into_iter().enumerate() {
            packets.push(Packet {
                header: Header {
                    version: 2,
                    marker: i == payloads_len - 1,
                    payload_type: self.payload_type,
                    sequence_number: self.sequencer.next_sequence_number(),
                    timestamp: self.timestamp,
                    ssrc: self.ssrc,
                    ..Default::default()
                },
                payload: pp,
                padding_size: 0,
            });
        }
        self.timestamp = self.timestamp.wrapping_add(samples);

        Ok(packets)
    }

    pub fn skip_samples(&mut self, skipped_samples: u32) {
        self.timestamp = self.timestamp.wrapping_add(skipped_samples);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codecs::opus::OpusPayloader;

    #[test]
    fn test_packetizer_assigns_sequential_numbers() -> Result<()> {
        let mut p = Packetizer::new(0x1234, 111, 48000, Box::<OpusPayloader>::default());
        let first = p.packetize(1200, &Bytes::from_static(&[0x01]), 960)?;
        let second = p.packetize(1200, &Bytes::from_static(&[0x02]), 960)?;
        assert_eq!(first.len(), 1);
        assert_eq!(second.len(), 1);
        assert_eq!(
            second[0].header.sequence_number,
            first[0].header.sequence_number.wrapping_add(1)
        );
        assert_eq!(
            second[0].header.timestamp,
            first[0].header.timestamp.wrapping_add(960)
        );
        assert!(first[0].header.marker);
        Ok(())
    }
}
