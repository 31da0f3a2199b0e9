use std::fmt;

use serde::{Deserialize, Serialize};

use shared::error::{Error, Result};

/// SDP message type in the offer/answer exchange (W3C `RTCSdpType`).
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum RTCSdpType {
    #[serde(rename = "offer")]
    Offer,
    #[serde(rename = "pranswer")]
    Pranswer,
    #[serde(rename = "answer")]
    Answer,
    #[serde(rename = "rollback")]
    Rollback,
}

impl fmt::Display for RTCSdpType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RTCSdpType::Offer => "offer",
            RTCSdpType::Pranswer => "pranswer",
            RTCSdpType::Answer => "answer",
            RTCSdpType::Rollback => "rollback",
        };
        write!(f, "{s}")
    }
}

/// An (sdp type, sdp text) pair as exchanged over signaling.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RTCSessionDescription {
    #[serde(rename = "type")]
    pub sdp_type: RTCSdpType,
    pub sdp: String,
}

impl RTCSessionDescription {
    pub fn offer(sdp: String) -> Self {
        RTCSessionDescription {
            sdp_type: RTCSdpType::Offer,
            sdp,
        }
    }

    pub fn answer(sdp: String) -> Self {
        RTCSessionDescription {
            sdp_type: RTCSdpType::Answer,
            sdp,
        }
    }

    pub fn rollback() -> Self {
        RTCSessionDescription {
            sdp_type: RTCSdpType::Rollback,
            sdp: String::new(),
        }
    }

    pub(crate) fn parsed(&self) -> Result<sdp::SessionDescription> {
        if self.sdp_type == RTCSdpType::Rollback {
            return Err(Error::SdpInvalidValue("rollback has no sdp".to_owned()));
        }
        sdp::SessionDescription::unmarshal(&self.sdp)
    }
}
