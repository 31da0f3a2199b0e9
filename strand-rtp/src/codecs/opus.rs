use bytes::Bytes;

use shared::error::{Error, Result};

use crate::packetizer::{Depacketizer, Payloader};

/// Opus frames map 1:1 onto RTP payloads (RFC 7587).
#[derive(Default, Debug, Clone)]
pub struct OpusPayloader;

impl Payloader for OpusPayloader {
    fn payload(&mut self, _mtu: usize, payload: &Bytes) -> Result<Vec<Bytes>> {
        if payload.is_empty() {
            return Ok(vec![]);
        }
        Ok(vec![payload.clone()])
    }
}

#[derive(Default, Debug, Clone)]
pub struct OpusPacket;

impl Depacketizer for OpusPacket {
    fn depacketize(&mut self, packet: &Bytes) -> Result<Bytes> {
        if packet.is_empty() {
            return Err(Error::ErrShortPacket);
        }
        Ok(packet.clone())
    }

    fn is_partition_head(&self, _payload: &Bytes) -> bool {
        true
    }

    fn is_partition_tail(&self, _marker: bool, _payload: &Bytes) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_opus_payload_passthrough() -> Result<()> {
        let mut p = OpusPayloader;
        let payloads = p.payload(1200, &Bytes::from_static(&[0x90, 0x91, 0x92]))?;
        assert_eq!(payloads, vec![Bytes::from_static(&[0x90, 0x91, 0x92])]);
        assert!(p.payload(1200, &Bytes::new())?.is_empty());
        Ok(())
    }

    #[test]
    fn test_opus_depacketize_empty_errors() {
        let mut d = OpusPacket;
        assert!(d.depacketize(&Bytes::new()).is_err());
    }
}
