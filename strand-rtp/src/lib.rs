#![warn(rust_2018_idioms)]

pub mod codecs;
pub mod extension;
pub mod header;
pub mod jitter;
pub mod packet;
pub mod packetizer;
pub mod rtx;
pub mod sequence;

pub use header::{Extension, Header};
pub use packet::Packet;
pub use packetizer::{Depacketizer, Packetizer, Payloader};
pub use sequence::Sequencer;
