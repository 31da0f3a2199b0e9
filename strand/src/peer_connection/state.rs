use std::fmt;

use serde::Serialize;

/// Signaling state of the offer/answer machine
/// (W3C `RTCSignalingState`).
#[derive(Debug, Copy, Clone, PartialEq, Eq, Default, Serialize)]
pub enum RTCSignalingState {
    #[default]
    #[serde(rename = "stable")]
    Stable,
    #[serde(rename = "have-local-offer")]
    HaveLocalOffer,
    #[serde(rename = "have-remote-offer")]
    HaveRemoteOffer,
    #[serde(rename = "have-local-pranswer")]
    HaveLocalPranswer,
    #[serde(rename = "have-remote-pranswer")]
    HaveRemotePranswer,
    #[serde(rename = "closed")]
    Closed,
}

impl fmt::Display for RTCSignalingState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RTCSignalingState::Stable => "stable",
            RTCSignalingState::HaveLocalOffer => "have-local-offer",
            RTCSignalingState::HaveRemoteOffer => "have-remote-offer",
            RTCSignalingState::HaveLocalPranswer => "have-local-pranswer",
            RTCSignalingState::HaveRemotePranswer => "have-remote-pranswer",
            RTCSignalingState::Closed => "closed",
        };
        write!(f, "{s}")
    }
}

/// Aggregate connection state (W3C `RTCPeerConnectionState`).
#[derive(Debug, Copy, Clone, PartialEq, Eq, Default, Serialize)]
pub enum RTCPeerConnectionState {
    #[default]
    #[serde(rename = "new")]
    New,
    #[serde(rename = "connecting")]
    Connecting,
    #[serde(rename = "connected")]
    Connected,
    #[serde(rename = "disconnected")]
    Disconnected,
    #[serde(rename = "failed")]
    Failed,
    #[serde(rename = "closed")]
    Closed,
}

impl fmt::Display for RTCPeerConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RTCPeerConnectionState::New => "new",
            RTCPeerConnectionState::Connecting => "connecting",
            RTCPeerConnectionState::Connected => "connected",
            RTCPeerConnectionState::Disconnected => "disconnected",
            RTCPeerConnectionState::Failed => "failed",
            RTCPeerConnectionState::Closed => "closed",
        };
        write!(f, "{s}")
    }
}

/// Candidate gathering progress (W3C `RTCIceGatheringState`).
#[derive(Debug, Copy, Clone, PartialEq, Eq, Default, Serialize)]
pub enum RTCIceGatheringState {
    #[default]
    #[serde(rename = "new")]
    New,
    #[serde(rename = "gathering")]
    Gathering,
    #[serde(rename = "complete")]
    Complete,
}
