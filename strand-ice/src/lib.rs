#![warn(rust_2018_idioms)]

pub mod agent;
pub mod candidate;
pub mod state;

pub use agent::{Agent, AgentConfig, Credentials, Event, IceTransmit};
pub use candidate::{unmarshal_candidate, Candidate, CandidateType};
pub use state::ConnectionState;
