#![warn(rust_2018_idioms)]

pub mod common;
pub mod media;
pub mod session;

pub use common::{Address, Attribute, Bandwidth, ConnectionInformation};
pub use media::{MediaDescription, MediaName, RangedPort};
pub use session::{Origin, SessionDescription, TimeDescription, Timing};
