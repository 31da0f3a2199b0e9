#![warn(rust_2018_idioms)]

pub mod alert;
pub mod cipher_suite;
pub mod config;
pub mod conn;
pub mod crypto;
pub mod extension;
pub mod fragment_buffer;
pub mod handshake;
pub mod prf;
pub mod record_layer;
pub mod state;

pub use config::{Certificate, HandshakeConfig};
pub use conn::{DTLSConn, DtlsEvent};
pub use extension::SrtpProtectionProfile;
