use std::fmt;

/// Attribute describes the "a=" field as a key/optional-value pair.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Attribute {
    pub key: String,
    pub value: Option<String>,
}

impl fmt::Display for Attribute {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.value {
            Some(value) => write!(f, "{}:{}", self.key, value),
            None => write!(f, "{}", self.key),
        }
    }
}

impl Attribute {
    pub fn new(key: String, value: Option<String>) -> Self {
        Attribute { key, value }
    }

    /// Parses "key:value" or a bare property key.
    pub fn from_line(line: &str) -> Self {
        match line.split_once(':') {
            Some((key, value)) => Attribute {
                key: key.to_owned(),
                value: Some(value.to_owned()),
            },
            None => Attribute {
                key: line.to_owned(),
                value: None,
            },
        }
    }

    pub fn is_ice_candidate(&self) -> bool {
        self.key == "candidate"
    }
}

/// ConnectionInformation describes the "c=" field.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ConnectionInformation {
    pub network_type: String,
    pub address_type: String,
    pub address: Option<Address>,
}

impl fmt::Display for ConnectionInformation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.address {
            Some(address) => write!(f, "{} {} {}", self.network_type, self.address_type, address),
            None => write!(f, "{} {}", self.network_type, self.address_type),
        }
    }
}

/// Address describes a structured connection address with its optional TTL
/// and address-count ranges.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Address {
    pub address: String,
    pub ttl: Option<u32>,
    pub range: Option<u32>,
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.address)?;
        if let Some(ttl) = self.ttl {
            write!(f, "/{ttl}")?;
        }
        if let Some(range) = self.range {
            write!(f, "/{range}")?;
        }
        Ok(())
    }
}

/// Bandwidth describes the "b=" field.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Bandwidth {
    pub experimental: bool,
    pub bandwidth_type: String,
    pub bandwidth: u64,
}

impl fmt::Display for Bandwidth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let experimental = if self.experimental { "X-" } else { "" };
        write!(f, "{}{}:{}", experimental, self.bandwidth_type, self.bandwidth)
    }
}
