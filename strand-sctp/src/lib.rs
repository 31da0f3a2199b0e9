#![warn(rust_2018_idioms)]

pub mod association;
pub mod chunk;
pub mod packet;
pub mod param;
pub mod queue;
pub mod util;

pub use association::{
    Association, AssociationConfig, AssociationEvent, AssociationState, ReliabilityType, Side,
};
pub use chunk::payload_data::PayloadProtocolIdentifier;
