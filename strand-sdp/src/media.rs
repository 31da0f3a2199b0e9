use std::fmt;

use crate::common::{Attribute, Bandwidth, ConnectionInformation};

/// RangedPort supports "port" and "port/number-of-ports" notations.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct RangedPort {
    pub value: u16,
    pub range: Option<u32>,
}

impl fmt::Display for RangedPort {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.range {
            Some(range) => write!(f, "{}/{}", self.value, range),
            None => write!(f, "{}", self.value),
        }
    }
}

/// MediaName describes the "m=" field.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct MediaName {
    pub media: String,
    pub port: RangedPort,
    pub protos: Vec<String>,
    pub formats: Vec<String>,
}

impl fmt::Display for MediaName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} {}",
            self.media,
            self.port,
            self.protos.join("/"),
        )?;
        for format in &self.formats {
            write!(f, " {format}")?;
        }
        Ok(())
    }
}

/// MediaDescription represents one m-section (RFC 4566 section 5.14).
#[derive(Debug, Default, Clone)]
pub struct MediaDescription {
    /// `m=<media> <port>/<number of ports> <proto> <fmt> ...`
    pub media_name: MediaName,

    /// `i=<session description>`
    pub media_title: Option<String>,

    /// `c=<nettype> <addrtype> <connection-address>`
    pub connection_information: Option<ConnectionInformation>,

    /// `b=<bwtype>:<bandwidth>`
    pub bandwidth: Vec<Bandwidth>,

    /// Media-level attributes, in order of appearance.
    pub attributes: Vec<Attribute>,
}

impl MediaDescription {
    /// Returns whether an attribute exists.
    pub fn has_attribute(&self, key: &str) -> bool {
        self.attributes.iter().any(|a| a.key == key)
    }

    /// Returns the value of the first attribute with the given key, and
    /// whether it exists at all.
    pub fn attribute(&self, key: &str) -> Option<Option<&str>> {
        for a in &self.attributes {
            if a.key == key {
                return Some(a.value.as_deref());
            }
        }
        None
    }

    /// Returns the values of every attribute with the given key.
    pub fn attributes_with_key<'a>(&'a self, key: &'a str) -> impl Iterator<Item = &'a str> {
        self.attributes
            .iter()
            .filter(move |a| a.key == key)
            .filter_map(|a| a.value.as_deref())
    }

    /// Creates an m-section with the port/proto defaults every WebRTC agent
    /// expects (JSEP).
    pub fn new_jsep_media_description(media: String) -> Self {
        MediaDescription {
            media_name: MediaName {
                media,
                port: RangedPort { value: 9, range: None },
                protos: vec![
                    "UDP".to_owned(),
                    "TLS".to_owned(),
                    "RTP".to_owned(),
                    "SAVPF".to_owned(),
                ],
                formats: vec![],
            },
            media_title: None,
            connection_information: Some(ConnectionInformation {
                network_type: "IN".to_owned(),
                address_type: "IP4".to_owned(),
                address: Some(crate::common::Address {
                    address: "0.0.0.0".to_owned(),
                    ttl: None,
                    range: None,
                }),
            }),
            bandwidth: vec![],
            attributes: vec![],
        }
    }

    /// Adds a property attribute `a=key`.
    pub fn with_property_attribute(mut self, key: String) -> Self {
        self.attributes.push(Attribute::new(key, None));
        self
    }

    /// Adds a value attribute `a=key:value`.
    pub fn with_value_attribute(mut self, key: String, value: String) -> Self {
        self.attributes.push(Attribute::new(key, Some(value)));
        self
    }

    pub fn with_fingerprint(self, algorithm: String, value: String) -> Self {
        self.with_value_attribute("fingerprint".to_owned(), algorithm + " " + &value)
    }

    pub fn with_ice_credentials(self, username: String, password: String) -> Self {
        self.with_value_attribute("ice-ufrag".to_owned(), username)
            .with_value_attribute("ice-pwd".to_owned(), password)
    }

    /// Adds codec information: the payload type to the format list plus the
    /// rtpmap and optional fmtp attributes.
    pub fn with_codec(
        mut self,
        payload_type: u8,
        name: String,
        clockrate: u32,
        channels: u16,
        fmtp: String,
    ) -> Self {
        self.media_name.formats.push(payload_type.to_string());
        let rtpmap = if channels > 0 {
            format!("{payload_type} {name}/{clockrate}/{channels}")
        } else {
            format!("{payload_type} {name}/{clockrate}")
        };

        let mut md = self.with_value_attribute("rtpmap".to_owned(), rtpmap);
        if !fmtp.is_empty() {
            md = md.with_value_attribute("fmtp".to_owned(), format!("{payload_type} {fmtp}"));
        }
        md
    }
}
