#![warn(rust_2018_idioms)]

pub mod compound_packet;
pub mod extended_report;
pub mod full_intra_request;
pub mod goodbye;
pub mod header;
pub mod packet;
pub mod picture_loss_indication;
pub mod raw_packet;
pub mod receiver_estimated_maximum_bitrate;
pub mod receiver_report;
pub mod reception_report;
pub mod sender_report;
pub mod source_description;
pub mod transport_layer_cc;
pub mod transport_layer_nack;

pub use header::{Header, PacketType};
pub use packet::RtcpPacket;
