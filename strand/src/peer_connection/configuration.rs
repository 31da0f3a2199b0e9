use std::net::SocketAddr;

use shared::error::{Error, Result};

/// Bundle policy; only max-bundle semantics are implemented: every
/// m-section shares the single transport stack.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Default)]
pub enum RTCBundlePolicy {
    #[default]
    MaxBundle,
    Balanced,
}

/// An ICE server entry; only STUN URLs are consumed by the agent.
#[derive(Debug, Clone, Default)]
pub struct RTCIceServer {
    pub urls: Vec<String>,
}

/// PeerConnection configuration.
#[derive(Debug, Clone, Default)]
pub struct RTCConfiguration {
    pub ice_servers: Vec<RTCIceServer>,
    pub bundle_policy: RTCBundlePolicy,
    /// Wall clock base (unix milliseconds) for NTP timestamps in RTCP
    /// sender reports and stats; the sans-IO core never reads the OS
    /// clock itself.
    pub wall_clock_base_ms: u64,
}

/// Parses `stun:host:port` URLs into socket addresses for the agent. The
/// embedder resolves hostnames; only literal addresses are accepted here.
pub fn parse_stun_url(raw: &str) -> Result<SocketAddr> {
    let url = url::Url::parse(raw).map_err(|_| Error::ErrHost)?;
    if url.scheme() != "stun" {
        return Err(Error::ErrSchemeType);
    }
    let host = url.path();
    host.parse().map_err(|_| Error::ErrAddressParseFailed)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_stun_url() -> Result<()> {
        let addr = parse_stun_url("stun:192.0.2.4:3478")?;
        assert_eq!(addr, "192.0.2.4:3478".parse().unwrap());
        Ok(())
    }

    #[test]
    fn test_parse_stun_url_rejects_other_schemes() {
        assert_eq!(parse_stun_url("turns:1.2.3.4:5349"), Err(Error::ErrSchemeType));
    }
}
