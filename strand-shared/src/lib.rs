#![warn(rust_2018_idioms)]

pub mod error;
pub mod marshal;
pub mod replay_detector;
pub mod transport;
pub mod util;

pub use transport::{FourTuple, TaggedBytesMut, TransportContext, TransportMessage};
