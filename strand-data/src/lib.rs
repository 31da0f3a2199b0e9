#![warn(rust_2018_idioms)]

pub mod data_channel;
pub mod message;

pub use data_channel::{DataChannel, DataChannelConfig, DataChannelMessage, DataChannelState};
pub use message::{ChannelType, DataChannelAck, DataChannelOpen, Message};
