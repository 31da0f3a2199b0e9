#![warn(rust_2018_idioms)]

pub mod context;
pub mod key_derivation;
pub mod protection_profile;

pub use context::Context;
pub use protection_profile::ProtectionProfile;
