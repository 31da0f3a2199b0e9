#[cfg(test)]
mod candidate_test;
pub mod candidate_pair;

use std::collections::hash_map::DefaultHasher;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::net::{IpAddr, SocketAddr};

use serde::Serialize;

use shared::error::{Error, Result};

pub(crate) const DEFAULT_LOCAL_PREFERENCE: u16 = 65535;
pub(crate) const COMPONENT_RTP: u16 = 1;

/// Candidate type (RFC 8445 section 5.1.1.1).
#[derive(Debug, Copy, Clone, PartialEq, Eq, Default, Serialize)]
pub enum CandidateType {
    #[serde(rename = "host")]
    #[default]
    Host,
    #[serde(rename = "srflx")]
    ServerReflexive,
    #[serde(rename = "prflx")]
    PeerReflexive,
    #[serde(rename = "relay")]
    Relay,
}

impl CandidateType {
    /// Type preference used in the candidate priority formula
    /// (RFC 8445 section 5.1.2.2).
    pub fn preference(&self) -> u16 {
        match self {
            CandidateType::Host => 126,
            CandidateType::PeerReflexive => 110,
            CandidateType::ServerReflexive => 100,
            CandidateType::Relay => 0,
        }
    }
}

impl fmt::Display for CandidateType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            CandidateType::Host => "host",
            CandidateType::ServerReflexive => "srflx",
            CandidateType::PeerReflexive => "prflx",
            CandidateType::Relay => "relay",
        };
        write!(f, "{s}")
    }
}

/// An ICE candidate: an immutable transport address tuple, created once by
/// gathering (local) or signaling (remote).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Candidate {
    pub foundation: String,
    pub component: u16,
    pub transport: String,
    pub priority: u32,
    pub address: IpAddr,
    pub port: u16,
    pub typ: CandidateType,
    pub related_address: Option<SocketAddr>,
    pub generation: Option<u32>,
    pub ufrag: Option<String>,
}

impl fmt::Display for Candidate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} {}:{}{}",
            self.typ,
            self.transport,
            self.address,
            self.port,
            match &self.related_address {
                Some(related) => format!(" related {related}"),
                None => String::new(),
            }
        )
    }
}

fn compute_foundation(typ: CandidateType, address: IpAddr, transport: &str) -> String {
    let mut hasher = DefaultHasher::new();
    (typ as u8, address, transport).hash(&mut hasher);
    (hasher.finish() as u32).to_string()
}

fn compute_priority(typ: CandidateType, component: u16) -> u32 {
    ((typ.preference() as u32) << 24)
        | ((DEFAULT_LOCAL_PREFERENCE as u32) << 8)
        | (256 - component as u32)
}

impl Candidate {
    pub fn host(address: IpAddr, port: u16) -> Self {
        Candidate {
            foundation: compute_foundation(CandidateType::Host, address, "udp"),
            component: COMPONENT_RTP,
            transport: "udp".to_owned(),
            priority: compute_priority(CandidateType::Host, COMPONENT_RTP),
            address,
            port,
            typ: CandidateType::Host,
            related_address: None,
            generation: Some(0),
            ufrag: None,
        }
    }

    pub fn server_reflexive(address: IpAddr, port: u16, base: SocketAddr) -> Self {
        Candidate {
            foundation: compute_foundation(CandidateType::ServerReflexive, address, "udp"),
            component: COMPONENT_RTP,
            transport: "udp".to_owned(),
            priority: compute_priority(CandidateType::ServerReflexive, COMPONENT_RTP),
            address,
            port,
            typ: CandidateType::ServerReflexive,
            related_address: Some(base),
            generation: Some(0),
            ufrag: None,
        }
    }

    pub fn peer_reflexive(address: IpAddr, port: u16, base: SocketAddr) -> Self {
        Candidate {
            foundation: compute_foundation(CandidateType::PeerReflexive, address, "udp"),
            component: COMPONENT_RTP,
            transport: "udp".to_owned(),
            priority: compute_priority(CandidateType::PeerReflexive, COMPONENT_RTP),
            address,
            port,
            typ: CandidateType::PeerReflexive,
            related_address: Some(base),
            generation: None,
            ufrag: None,
        }
    }

    pub fn addr(&self) -> SocketAddr {
        SocketAddr::new(self.address, self.port)
    }

    /// The priority a peer-reflexive candidate learned through this
    /// candidate would carry in a connectivity check.
    pub fn prflx_priority(&self) -> u32 {
        compute_priority(CandidateType::PeerReflexive, self.component)
    }

    /// Renders the candidate-attribute value (RFC 8839 section 5.1).
    pub fn marshal(&self) -> String {
        let mut out = format!(
            "candidate:{} {} {} {} {} {} typ {}",
            self.foundation,
            self.component,
            self.transport,
            self.priority,
            self.address,
            self.port,
            self.typ,
        );
        if let Some(related) = &self.related_address {
            out += &format!(" raddr {} rport {}", related.ip(), related.port());
        }
        if let Some(generation) = self.generation {
            out += &format!(" generation {generation}");
        }
        if let Some(ufrag) = &self.ufrag {
            out += &format!(" ufrag {ufrag}");
        }
        out
    }
}

/// Parses a candidate-attribute value, with or without the "candidate:"
/// prefix.
pub fn unmarshal_candidate(raw: &str) -> Result<Candidate> {
    let raw = raw.trim().trim_start_matches("candidate:");
    let fields: Vec<&str> = raw.split_whitespace().collect();
    if fields.len() < 8 {
        return Err(Error::ErrAttributeTooShortIceCandidate);
    }

    let foundation = fields[0].to_owned();
    let component: u16 = fields[1].parse().map_err(|_| Error::ErrParseComponent)?;
    let transport = fields[2].to_lowercase();
    let priority: u32 = fields[3].parse().map_err(|_| Error::ErrParsePriority)?;
    let address: IpAddr = fields[4].parse().map_err(|_| Error::ErrAddressParseFailed)?;
    let port: u16 = fields[5].parse().map_err(|_| Error::ErrParsePort)?;

    if fields[6] != "typ" {
        return Err(Error::ErrParseType);
    }
    let typ = match fields[7] {
        "host" => CandidateType::Host,
        "srflx" => CandidateType::ServerReflexive,
        "prflx" => CandidateType::PeerReflexive,
        "relay" => CandidateType::Relay,
        _ => return Err(Error::ErrUnknownCandidateType),
    };

    let mut related_address = None;
    let mut generation = None;
    let mut ufrag = None;
    let mut raddr: Option<IpAddr> = None;
    let mut index = 8;
    while index < fields.len() {
        match fields.get(index).copied() {
            Some("raddr") => {
                let value = fields
                    .get(index + 1)
                    .ok_or(Error::ErrParseRelatedAddr)?;
                raddr = Some(value.parse().map_err(|_| Error::ErrParseRelatedAddr)?);
                index += 2;
            }
            Some("rport") => {
                let value = fields.get(index + 1).ok_or(Error::ErrParseRelatedAddr)?;
                let rport: u16 = value.parse().map_err(|_| Error::ErrParseRelatedAddr)?;
                if let Some(ip) = raddr {
                    related_address = Some(SocketAddr::new(ip, rport));
                }
                index += 2;
            }
            Some("generation") => {
                let value = fields.get(index + 1).ok_or(Error::ErrParseType)?;
                generation = value.parse().ok();
                index += 2;
            }
            Some("ufrag") => {
                ufrag = fields.get(index + 1).map(|s| (*s).to_owned());
                index += 2;
            }
            Some(_) => {
                // unknown extension attribute, skip its value
                index += 2;
            }
            None => break,
        }
    }

    Ok(Candidate {
        foundation,
        component,
        transport,
        priority,
        address,
        port,
        typ,
        related_address,
        generation,
        ufrag,
    })
}
