use std::fmt;

use serde::Serialize;

/// ConnectionState of the ICE agent (RFC 8445 section 6.1.3).
///
/// The happy path only moves forward: `New -> Checking -> Connected ->
/// Completed`. `Disconnected` and `Failed` are reachable from any live
/// state after consent or check failures; `Closed` is terminal.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Default, Serialize)]
pub enum ConnectionState {
    #[default]
    #[serde(rename = "new")]
    New,
    #[serde(rename = "checking")]
    Checking,
    #[serde(rename = "connected")]
    Connected,
    #[serde(rename = "completed")]
    Completed,
    #[serde(rename = "disconnected")]
    Disconnected,
    #[serde(rename = "failed")]
    Failed,
    #[serde(rename = "closed")]
    Closed,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ConnectionState::New => "new",
            ConnectionState::Checking => "checking",
            ConnectionState::Connected => "connected",
            ConnectionState::Completed => "completed",
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Failed => "failed",
            ConnectionState::Closed => "closed",
        };
        write!(f, "{s}")
    }
}
