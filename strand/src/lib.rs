#![warn(rust_2018_idioms)]

pub mod peer_connection;
pub mod rtp_transceiver;
pub mod statistics;

pub use peer_connection::configuration::RTCConfiguration;
pub use peer_connection::sdp_type::{RTCSdpType, RTCSessionDescription};
pub use peer_connection::state::{
    RTCIceGatheringState, RTCPeerConnectionState, RTCSignalingState,
};
pub use peer_connection::{PeerConnection, PeerConnectionEvent};
pub use rtp_transceiver::{MediaKind, RTCRtpCodec, RTCRtpTransceiverDirection};

pub use data::data_channel::{DataChannelConfig, DataChannelMessage, DataChannelState};
