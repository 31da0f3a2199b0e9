#[cfg(test)]
mod session_test;

use std::fmt;

use shared::error::{Error, Result};

use crate::common::{Address, Attribute, Bandwidth, ConnectionInformation};
use crate::media::{MediaDescription, MediaName, RangedPort};

/// Origin defines the "o=" field.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Origin {
    pub username: String,
    pub session_id: u64,
    pub session_version: u64,
    pub network_type: String,
    pub address_type: String,
    pub unicast_address: String,
}

impl fmt::Display for Origin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} {} {} {} {}",
            self.username,
            self.session_id,
            self.session_version,
            self.network_type,
            self.address_type,
            self.unicast_address,
        )
    }
}

impl Origin {
    pub fn new() -> Self {
        Origin {
            username: "-".to_owned(),
            session_id: 0,
            session_version: 0,
            network_type: "IN".to_owned(),
            address_type: "IP4".to_owned(),
            unicast_address: "0.0.0.0".to_owned(),
        }
    }
}

/// Timing defines the "t=" field.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Timing {
    pub start_time: u64,
    pub stop_time: u64,
}

impl fmt::Display for Timing {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.start_time, self.stop_time)
    }
}

/// TimeDescription carries a "t=" line with its "r=" repeats verbatim.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct TimeDescription {
    pub timing: Timing,
    pub repeat_times: Vec<String>,
}

/// SessionDescription is a parsed SDP message.
///
/// The generator emits lines in the canonical v/o/s/i/u/e/p/c/b/t/a order
/// with CRLF terminators; the parser tolerates LF-only input.
#[derive(Debug, Default, Clone)]
pub struct SessionDescription {
    /// `v=0`
    pub version: u32,
    /// `o=<username> <sess-id> <sess-version> <nettype> <addrtype> <unicast-address>`
    pub origin: Origin,
    /// `s=<session name>`
    pub session_name: String,
    /// `i=<session description>`
    pub session_information: Option<String>,
    /// `u=<uri>`
    pub uri: Option<String>,
    /// `e=<email-address>`
    pub email_address: Option<String>,
    /// `p=<phone-number>`
    pub phone_number: Option<String>,
    /// `c=<nettype> <addrtype> <connection-address>`
    pub connection_information: Option<ConnectionInformation>,
    /// `b=<bwtype>:<bandwidth>`
    pub bandwidth: Vec<Bandwidth>,
    /// `t=<start-time> <stop-time>`
    pub time_descriptions: Vec<TimeDescription>,
    /// Session-level attributes.
    pub attributes: Vec<Attribute>,
    /// All m-sections in order.
    pub media_descriptions: Vec<MediaDescription>,
}

impl SessionDescription {
    /// Constructs the session-level boilerplate every JSEP description
    /// starts from.
    pub fn new_jsep_session_description() -> Self {
        SessionDescription {
            version: 0,
            origin: Origin::new(),
            session_name: "-".to_owned(),
            time_descriptions: vec![TimeDescription::default()],
            ..Default::default()
        }
    }

    /// Returns the value of the first session-level attribute with the key.
    pub fn attribute(&self, key: &str) -> Option<Option<&str>> {
        for a in &self.attributes {
            if a.key == key {
                return Some(a.value.as_deref());
            }
        }
        None
    }

    pub fn has_attribute(&self, key: &str) -> bool {
        self.attributes.iter().any(|a| a.key == key)
    }

    pub fn with_property_attribute(mut self, key: String) -> Self {
        self.attributes.push(Attribute::new(key, None));
        self
    }

    pub fn with_value_attribute(mut self, key: String, value: String) -> Self {
        self.attributes.push(Attribute::new(key, Some(value)));
        self
    }

    pub fn with_media(mut self, md: MediaDescription) -> Self {
        self.media_descriptions.push(md);
        self
    }

    /// marshal renders the description as CRLF-terminated SDP text.
    pub fn marshal(&self) -> String {
        let mut out = String::new();

        out += &format!("v={}\r\n", self.version);
        out += &format!("o={}\r\n", self.origin);
        out += &format!("s={}\r\n", self.session_name);
        if let Some(info) = &self.session_information {
            out += &format!("i={info}\r\n");
        }
        if let Some(uri) = &self.uri {
            out += &format!("u={uri}\r\n");
        }
        if let Some(email) = &self.email_address {
            out += &format!("e={email}\r\n");
        }
        if let Some(phone) = &self.phone_number {
            out += &format!("p={phone}\r\n");
        }
        if let Some(ci) = &self.connection_information {
            out += &format!("c={ci}\r\n");
        }
        for b in &self.bandwidth {
            out += &format!("b={b}\r\n");
        }
        for td in &self.time_descriptions {
            out += &format!("t={}\r\n", td.timing);
            for r in &td.repeat_times {
                out += &format!("r={r}\r\n");
            }
        }
        for a in &self.attributes {
            out += &format!("a={a}\r\n");
        }
        for md in &self.media_descriptions {
            out += &format!("m={}\r\n", md.media_name);
            if let Some(title) = &md.media_title {
                out += &format!("i={title}\r\n");
            }
            if let Some(ci) = &md.connection_information {
                out += &format!("c={ci}\r\n");
            }
            for b in &md.bandwidth {
                out += &format!("b={b}\r\n");
            }
            for a in &md.attributes {
                out += &format!("a={a}\r\n");
            }
        }

        out
    }

    /// unmarshal parses SDP text into a SessionDescription.
    pub fn unmarshal(input: &str) -> Result<Self> {
        let mut sd = SessionDescription::default();
        let mut saw_version = false;
        let mut current_media: Option<MediaDescription> = None;

        for raw_line in input.lines() {
            let line = raw_line.trim_end_matches('\r');
            if line.is_empty() {
                continue;
            }
            let (key, value) = line
                .split_once('=')
                .ok_or_else(|| Error::SdpInvalidSyntax(line.to_owned()))?;
            if key.len() != 1 {
                return Err(Error::SdpInvalidSyntax(line.to_owned()));
            }

            match key {
                "v" => {
                    sd.version = value
                        .parse()
                        .map_err(|_| Error::SdpInvalidValue(value.to_owned()))?;
                    saw_version = true;
                }
                "o" => sd.origin = parse_origin(value)?,
                "s" => sd.session_name = value.to_owned(),
                "i" => match &mut current_media {
                    Some(md) => md.media_title = Some(value.to_owned()),
                    None => sd.session_information = Some(value.to_owned()),
                },
                "u" => sd.uri = Some(value.to_owned()),
                "e" => sd.email_address = Some(value.to_owned()),
                "p" => sd.phone_number = Some(value.to_owned()),
                "c" => {
                    let ci = parse_connection_information(value)?;
                    match &mut current_media {
                        Some(md) => md.connection_information = Some(ci),
                        None => sd.connection_information = Some(ci),
                    }
                }
                "b" => {
                    let b = parse_bandwidth(value)?;
                    match &mut current_media {
                        Some(md) => md.bandwidth.push(b),
                        None => sd.bandwidth.push(b),
                    }
                }
                "t" => {
                    if current_media.is_some() {
                        return Err(Error::SdpInvalidSyntax(line.to_owned()));
                    }
                    sd.time_descriptions.push(TimeDescription {
                        timing: parse_timing(value)?,
                        repeat_times: vec![],
                    });
                }
                "r" => {
                    if let Some(td) = sd.time_descriptions.last_mut() {
                        td.repeat_times.push(value.to_owned());
                    } else {
                        return Err(Error::SdpInvalidSyntax(line.to_owned()));
                    }
                }
                "z" | "k" => {
                    // time zones and encryption keys are obsolete; ignored
                }
                "a" => {
                    let a = Attribute::from_line(value);
                    match &mut current_media {
                        Some(md) => md.attributes.push(a),
                        None => sd.attributes.push(a),
                    }
                }
                "m" => {
                    if let Some(md) = current_media.take() {
                        sd.media_descriptions.push(md);
                    }
                    current_media = Some(MediaDescription {
                        media_name: parse_media_name(value)?,
                        ..Default::default()
                    });
                }
                _ => return Err(Error::SdpInvalidSyntax(line.to_owned())),
            }
        }

        if let Some(md) = current_media.take() {
            sd.media_descriptions.push(md);
        }
        if !saw_version {
            return Err(Error::SdpInvalidSyntax("missing v= line".to_owned()));
        }

        Ok(sd)
    }
}

fn parse_origin(value: &str) -> Result<Origin> {
    let fields: Vec<&str> = value.split_whitespace().collect();
    if fields.len() != 6 {
        return Err(Error::SdpInvalidValue(value.to_owned()));
    }
    Ok(Origin {
        username: fields[0].to_owned(),
        session_id: fields[1]
            .parse()
            .map_err(|_| Error::SdpInvalidValue(fields[1].to_owned()))?,
        session_version: fields[2]
            .parse()
            .map_err(|_| Error::SdpInvalidValue(fields[2].to_owned()))?,
        network_type: fields[3].to_owned(),
        address_type: fields[4].to_owned(),
        unicast_address: fields[5].to_owned(),
    })
}

fn parse_connection_information(value: &str) -> Result<ConnectionInformation> {
    let fields: Vec<&str> = value.split_whitespace().collect();
    if fields.len() < 2 {
        return Err(Error::SdpInvalidValue(value.to_owned()));
    }

    let address = if fields.len() > 2 {
        let parts: Vec<&str> = fields[2].split('/').collect();
        let mut addr = Address {
            address: parts[0].to_owned(),
            ttl: None,
            range: None,
        };
        if parts.len() > 1 {
            addr.ttl = Some(
                parts[1]
                    .parse()
                    .map_err(|_| Error::SdpInvalidValue(fields[2].to_owned()))?,
            );
        }
        if parts.len() > 2 {
            addr.range = Some(
                parts[2]
                    .parse()
                    .map_err(|_| Error::SdpInvalidValue(fields[2].to_owned()))?,
            );
        }
        Some(addr)
    } else {
        None
    };

    Ok(ConnectionInformation {
        network_type: fields[0].to_owned(),
        address_type: fields[1].to_owned(),
        address,
    })
}

fn parse_bandwidth(value: &str) -> Result<Bandwidth> {
    let (typ, bw) = value
        .split_once(':')
        .ok_or_else(|| Error::SdpInvalidValue(value.to_owned()))?;
    let experimental = typ.starts_with("X-");
    let bandwidth_type = typ.trim_start_matches("X-").to_owned();
    Ok(Bandwidth {
        experimental,
        bandwidth_type,
        bandwidth: bw
            .parse()
            .map_err(|_| Error::SdpInvalidValue(bw.to_owned()))?,
    })
}

fn parse_timing(value: &str) -> Result<Timing> {
    let fields: Vec<&str> = value.split_whitespace().collect();
    if fields.len() != 2 {
        return Err(Error::SdpInvalidValue(value.to_owned()));
    }
    Ok(Timing {
        start_time: fields[0]
            .parse()
            .map_err(|_| Error::SdpInvalidValue(fields[0].to_owned()))?,
        stop_time: fields[1]
            .parse()
            .map_err(|_| Error::SdpInvalidValue(fields[1].to_owned()))?,
    })
}

fn parse_media_name(value: &str) -> Result<MediaName> {
    let fields: Vec<&str> = value.split_whitespace().collect();
    if fields.len() < 3 {
        return Err(Error::SdpInvalidValue(value.to_owned()));
    }

    let (port_str, range) = match fields[1].split_once('/') {
        Some((p, r)) => (
            p,
            Some(
                r.parse()
                    .map_err(|_| Error::SdpInvalidValue(fields[1].to_owned()))?,
            ),
        ),
        None => (fields[1], None),
    };

    Ok(MediaName {
        media: fields[0].to_owned(),
        port: RangedPort {
            value: port_str
                .parse()
                .map_err(|_| Error::SdpInvalidValue(port_str.to_owned()))?,
            range,
        },
        protos: fields[2].split('/').map(str::to_owned).collect(),
        formats: fields[3..].iter().map(|s| (*s).to_owned()).collect(),
    })
}
