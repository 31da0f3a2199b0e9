use std::collections::VecDeque;
use std::time::Instant;

use serde::Serialize;

use rtp::jitter::JitterBuffer;
use rtp::packet::Packet;

/// Media kind of an m-section.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize)]
pub enum MediaKind {
    #[serde(rename = "audio")]
    Audio,
    #[serde(rename = "video")]
    Video,
}

impl MediaKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MediaKind::Audio => "audio",
            MediaKind::Video => "video",
        }
    }
}

/// Transceiver direction (W3C `RTCRtpTransceiverDirection`).
#[derive(Debug, Copy, Clone, PartialEq, Eq, Default, Serialize)]
pub enum RTCRtpTransceiverDirection {
    #[default]
    #[serde(rename = "sendrecv")]
    Sendrecv,
    #[serde(rename = "sendonly")]
    Sendonly,
    #[serde(rename = "recvonly")]
    Recvonly,
    #[serde(rename = "inactive")]
    Inactive,
}

impl RTCRtpTransceiverDirection {
    pub fn as_str(&self) -> &'static str {
        match self {
            RTCRtpTransceiverDirection::Sendrecv => "sendrecv",
            RTCRtpTransceiverDirection::Sendonly => "sendonly",
            RTCRtpTransceiverDirection::Recvonly => "recvonly",
            RTCRtpTransceiverDirection::Inactive => "inactive",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "sendrecv" => Some(RTCRtpTransceiverDirection::Sendrecv),
            "sendonly" => Some(RTCRtpTransceiverDirection::Sendonly),
            "recvonly" => Some(RTCRtpTransceiverDirection::Recvonly),
            "inactive" => Some(RTCRtpTransceiverDirection::Inactive),
            _ => None,
        }
    }

    /// The direction the answerer advertises for an offered direction.
    pub fn reverse(&self) -> Self {
        match self {
            RTCRtpTransceiverDirection::Sendonly => RTCRtpTransceiverDirection::Recvonly,
            RTCRtpTransceiverDirection::Recvonly => RTCRtpTransceiverDirection::Sendonly,
            other => *other,
        }
    }

    pub fn has_send(&self) -> bool {
        matches!(
            self,
            RTCRtpTransceiverDirection::Sendrecv | RTCRtpTransceiverDirection::Sendonly
        )
    }

    pub fn has_recv(&self) -> bool {
        matches!(
            self,
            RTCRtpTransceiverDirection::Sendrecv | RTCRtpTransceiverDirection::Recvonly
        )
    }
}

/// A negotiated codec and its RTX companion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RTCRtpCodec {
    pub payload_type: u8,
    pub name: String,
    pub clock_rate: u32,
    pub channels: u16,
    pub fmtp: String,
    pub rtcp_fb: Vec<String>,
    pub rtx_payload_type: Option<u8>,
}

/// Codecs registered by default, in preference order.
pub fn default_codecs(kind: MediaKind) -> Vec<RTCRtpCodec> {
    match kind {
        MediaKind::Audio => vec![RTCRtpCodec {
            payload_type: 111,
            name: "opus".to_owned(),
            clock_rate: 48000,
            channels: 2,
            fmtp: "minptime=10;useinbandfec=1".to_owned(),
            rtcp_fb: vec!["transport-cc".to_owned()],
            rtx_payload_type: None,
        }],
        MediaKind::Video => vec![
            RTCRtpCodec {
                payload_type: 96,
                name: "VP8".to_owned(),
                clock_rate: 90000,
                channels: 0,
                fmtp: String::new(),
                rtcp_fb: vec![
                    "goog-remb".to_owned(),
                    "transport-cc".to_owned(),
                    "ccm fir".to_owned(),
                    "nack".to_owned(),
                    "nack pli".to_owned(),
                ],
                rtx_payload_type: Some(97),
            },
            RTCRtpCodec {
                payload_type: 98,
                name: "VP9".to_owned(),
                clock_rate: 90000,
                channels: 0,
                fmtp: "profile-id=0".to_owned(),
                rtcp_fb: vec![
                    "goog-remb".to_owned(),
                    "transport-cc".to_owned(),
                    "ccm fir".to_owned(),
                    "nack".to_owned(),
                    "nack pli".to_owned(),
                ],
                rtx_payload_type: Some(99),
            },
            RTCRtpCodec {
                payload_type: 102,
                name: "H264".to_owned(),
                clock_rate: 90000,
                channels: 0,
                fmtp: "level-asymmetry-allowed=1;packetization-mode=1;profile-level-id=42001f"
                    .to_owned(),
                rtcp_fb: vec![
                    "goog-remb".to_owned(),
                    "transport-cc".to_owned(),
                    "ccm fir".to_owned(),
                    "nack".to_owned(),
                    "nack pli".to_owned(),
                ],
                rtx_payload_type: Some(103),
            },
        ],
    }
}

const SEND_HISTORY_CAPACITY: usize = 512;

/// Send half of a transceiver.
pub struct RTCRtpSender {
    pub ssrc: u32,
    pub rtx_ssrc: u32,
    pub(crate) rtx_sequencer: rtp::sequence::Sequencer,
    /// Recently sent packets kept for NACK-triggered retransmission.
    pub(crate) history: VecDeque<Packet>,
    pub packets_sent: u64,
    pub bytes_sent: u64,
    pub(crate) last_timestamp: u32,
}

impl RTCRtpSender {
    pub(crate) fn new() -> Self {
        RTCRtpSender {
            ssrc: rand::random(),
            rtx_ssrc: rand::random(),
            rtx_sequencer: rtp::sequence::Sequencer::new_random(),
            history: VecDeque::with_capacity(SEND_HISTORY_CAPACITY),
            packets_sent: 0,
            bytes_sent: 0,
            last_timestamp: 0,
        }
    }

    pub(crate) fn remember(&mut self, packet: &Packet) {
        if self.history.len() == SEND_HISTORY_CAPACITY {
            self.history.pop_front();
        }
        self.history.push_back(packet.clone());
    }

    pub(crate) fn lookup(&self, sequence_number: u16) -> Option<&Packet> {
        self.history
            .iter()
            .rev()
            .find(|p| p.header.sequence_number == sequence_number)
    }
}

/// One logical inbound stream: an SSRC (and optionally a simulcast RID)
/// feeding a jitter buffer.
pub struct ReceiverTrack {
    pub ssrc: u32,
    pub rid: Option<String>,
    pub(crate) jitter: JitterBuffer,
    pub packets_received: u64,
    pub bytes_received: u64,
    pub packets_discarded: u64,
    /// Mid-32 NTP bits and arrival of the last sender report, for RR.
    pub(crate) last_sr_ntp: u32,
    pub(crate) last_sr_at: Option<Instant>,
    pub(crate) highest_seq: u16,
}

impl ReceiverTrack {
    pub(crate) fn new(ssrc: u32, rid: Option<String>) -> Self {
        ReceiverTrack {
            ssrc,
            rid,
            jitter: JitterBuffer::default(),
            packets_received: 0,
            bytes_received: 0,
            packets_discarded: 0,
            last_sr_ntp: 0,
            last_sr_at: None,
            highest_seq: 0,
        }
    }
}

/// Receive half of a transceiver; simulcast layers appear as extra
/// tracks keyed by RID.
#[derive(Default)]
pub struct RTCRtpReceiver {
    pub tracks: Vec<ReceiverTrack>,
}

/// A transceiver: the sender/receiver pair bound to one m-section.
pub struct RTCRtpTransceiver {
    pub mid: Option<String>,
    pub kind: MediaKind,
    pub direction: RTCRtpTransceiverDirection,
    pub codecs: Vec<RTCRtpCodec>,
    pub sender: RTCRtpSender,
    pub receiver: RTCRtpReceiver,
    /// RIDs this side offers to send as simulcast layers.
    pub simulcast_send_rids: Vec<String>,
    /// Remote SSRCs learned from SDP ssrc attributes.
    pub(crate) remote_ssrcs: Vec<u32>,
    pub(crate) remote_rtx_ssrc: Option<u32>,
    pub(crate) stopped: bool,
}

impl RTCRtpTransceiver {
    pub fn new(kind: MediaKind, direction: RTCRtpTransceiverDirection) -> Self {
        RTCRtpTransceiver {
            mid: None,
            kind,
            direction,
            codecs: default_codecs(kind),
            sender: RTCRtpSender::new(),
            receiver: RTCRtpReceiver::default(),
            simulcast_send_rids: vec![],
            remote_ssrcs: vec![],
            remote_rtx_ssrc: None,
            stopped: false,
        }
    }

    /// Primary negotiated codec.
    pub fn codec(&self) -> Option<&RTCRtpCodec> {
        self.codecs.first()
    }

    /// Finds the codec a payload type belongs to, RTX included.
    pub fn codec_for_payload_type(&self, payload_type: u8) -> Option<(&RTCRtpCodec, bool)> {
        for codec in &self.codecs {
            if codec.payload_type == payload_type {
                return Some((codec, false));
            }
            if codec.rtx_payload_type == Some(payload_type) {
                return Some((codec, true));
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_direction_reverse() {
        assert_eq!(
            RTCRtpTransceiverDirection::Sendonly.reverse(),
            RTCRtpTransceiverDirection::Recvonly
        );
        assert_eq!(
            RTCRtpTransceiverDirection::Sendrecv.reverse(),
            RTCRtpTransceiverDirection::Sendrecv
        );
    }

    #[test]
    fn test_codec_for_payload_type_finds_rtx() {
        let transceiver = RTCRtpTransceiver::new(
            MediaKind::Video,
            RTCRtpTransceiverDirection::Sendrecv,
        );
        let (codec, is_rtx) = transceiver.codec_for_payload_type(97).unwrap();
        assert_eq!(codec.name, "VP8");
        assert!(is_rtx);
        let (codec, is_rtx) = transceiver.codec_for_payload_type(96).unwrap();
        assert_eq!(codec.name, "VP8");
        assert!(!is_rtx);
        assert!(transceiver.codec_for_payload_type(64).is_none());
    }

    #[test]
    fn test_sender_history_lookup() {
        let mut sender = RTCRtpSender::new();
        for seq in 0..600u16 {
            sender.remember(&Packet {
                header: rtp::header::Header {
                    sequence_number: seq,
                    ..Default::default()
                },
                ..Default::default()
            });
        }
        // oldest entries rolled out of the bounded history
        assert!(sender.lookup(10).is_none());
        assert!(sender.lookup(599).is_some());
    }
}
