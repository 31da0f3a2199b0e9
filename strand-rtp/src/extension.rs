use bytes::{Buf, BufMut, Bytes, BytesMut};

use shared::error::{Error, Result};

// Header extension URIs negotiated through SDP extmap attributes.
pub const SDES_MID_URI: &str = "urn:ietf:params:rtp-hdrext:sdes:mid";
pub const SDES_RTP_STREAM_ID_URI: &str = "urn:ietf:params:rtp-hdrext:sdes:rtp-stream-id";
pub const SDES_REPAIRED_RTP_STREAM_ID_URI: &str =
    "urn:ietf:params:rtp-hdrext:sdes:repaired-rtp-stream-id";
pub const ABS_SEND_TIME_URI: &str = "http://www.webrtc.org/experiments/rtp-hdrext/abs-send-time";
pub const TRANSPORT_CC_URI: &str =
    "http://www.ietf.org/id/draft-holmer-rmcat-transport-wide-cc-extensions-01";
pub const AUDIO_LEVEL_URI: &str = "urn:ietf:params:rtp-hdrext:ssrc-audio-level";

/// AbsSendTime is a 24-bit 6.18 fixed point NTP timestamp
/// (<http://www.webrtc.org/experiments/rtp-hdrext/abs-send-time>).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AbsSendTimeExtension {
    pub timestamp: u64,
}

impl AbsSendTimeExtension {
    /// Creates the extension from a 64-bit NTP timestamp.
    pub fn new(send_time_ntp: u64) -> Self {
        AbsSendTimeExtension {
            timestamp: send_time_ntp >> 14 & 0x00FF_FFFF,
        }
    }

    /// Reconstructs the NTP timestamp near the given receive time,
    /// compensating for 24-bit wrap (~64 s range).
    pub fn estimate(&self, receive_ntp: u64) -> u64 {
        let receive = receive_ntp >> 14 & 0x00FF_FFFF;
        let mut ntp24 = self.timestamp;
        // unwrap against the receive time
        if receive < ntp24 && (ntp24 - receive) > 0x0080_0000 {
            ntp24 = ntp24.wrapping_sub(0x0100_0000);
        } else if receive > ntp24 && (receive - ntp24) > 0x0080_0000 {
            ntp24 += 0x0100_0000;
        }
        (receive_ntp & !((1u64 << 38) - 1)).wrapping_add(ntp24 << 14)
    }

    pub fn marshal(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(3);
        buf.put_u8((self.timestamp >> 16) as u8);
        buf.put_u8((self.timestamp >> 8) as u8);
        buf.put_u8(self.timestamp as u8);
        buf.freeze()
    }

    pub fn unmarshal<B: Buf>(buf: &mut B) -> Result<Self> {
        if buf.remaining() < 3 {
            return Err(Error::ErrBufferTooSmall);
        }
        let b0 = buf.get_u8() as u64;
        let b1 = buf.get_u8() as u64;
        let b2 = buf.get_u8() as u64;
        Ok(AbsSendTimeExtension {
            timestamp: b0 << 16 | b1 << 8 | b2,
        })
    }
}

/// TransportCcExtension carries the transport-wide sequence number consumed
/// by TWCC feedback.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TransportCcExtension {
    pub transport_sequence: u16,
}

impl TransportCcExtension {
    pub fn marshal(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(2);
        buf.put_u16(self.transport_sequence);
        buf.freeze()
    }

    pub fn unmarshal<B: Buf>(buf: &mut B) -> Result<Self> {
        if buf.remaining() < 2 {
            return Err(Error::ErrBufferTooSmall);
        }
        Ok(TransportCcExtension {
            transport_sequence: buf.get_u16(),
        })
    }
}

/// AudioLevelExtension (RFC 6464): voice-activity flag plus -dBov level.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AudioLevelExtension {
    pub level: u8,
    pub voice: bool,
}

impl AudioLevelExtension {
    pub fn marshal(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(1);
        let mut b = self.level & 0x7F;
        if self.voice {
            b |= 0x80;
        }
        buf.put_u8(b);
        buf.freeze()
    }

    pub fn unmarshal<B: Buf>(buf: &mut B) -> Result<Self> {
        if buf.remaining() < 1 {
            return Err(Error::ErrBufferTooSmall);
        }
        let b = buf.get_u8();
        Ok(AudioLevelExtension {
            level: b & 0x7F,
            voice: b & 0x80 != 0,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_abs_send_time_round_trip() -> Result<()> {
        let ext = AbsSendTimeExtension { timestamp: 0x123456 };
        let raw = ext.marshal();
        assert_eq!(raw.len(), 3);
        let mut buf = &raw[..];
        assert_eq!(AbsSendTimeExtension::unmarshal(&mut buf)?, ext);
        Ok(())
    }

    #[test]
    fn test_transport_cc_round_trip() -> Result<()> {
        let ext = TransportCcExtension {
            transport_sequence: 12345,
        };
        let raw = ext.marshal();
        let mut buf = &raw[..];
        assert_eq!(TransportCcExtension::unmarshal(&mut buf)?, ext);
        Ok(())
    }

    #[test]
    fn test_audio_level_round_trip() -> Result<()> {
        let ext = AudioLevelExtension {
            level: 56,
            voice: true,
        };
        let raw = ext.marshal();
        let mut buf = &raw[..];
        assert_eq!(AudioLevelExtension::unmarshal(&mut buf)?, ext);
        Ok(())
    }
}
