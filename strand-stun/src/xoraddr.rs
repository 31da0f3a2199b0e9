#[cfg(test)]
mod xoraddr_test;

use std::fmt;
use std::net::IpAddr;

use shared::error::{Error, Result};

use crate::addr::{FAMILY_IPV4, FAMILY_IPV6, IPV4LEN, IPV6LEN};
use crate::attributes::{AttrType, ATTR_XOR_MAPPED_ADDRESS};
use crate::message::{Getter, Message, Setter, MAGIC_COOKIE, TRANSACTION_ID_SIZE};

/// XOR-MAPPED-ADDRESS attribute (RFC 8489 section 14.2).
///
/// The port is XORed with the most significant 16 bits of the magic cookie;
/// an IPv4 address is XORed with the magic cookie, an IPv6 address with the
/// concatenation of the magic cookie and the transaction id.
#[derive(PartialEq, Eq, Debug)]
pub struct XorMappedAddress {
    pub ip: IpAddr,
    pub port: u16,
}

impl Default for XorMappedAddress {
    fn default() -> Self {
        XorMappedAddress {
            ip: IpAddr::V4(std::net::Ipv4Addr::UNSPECIFIED),
            port: 0,
        }
    }
}

impl fmt::Display for XorMappedAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.ip {
            IpAddr::V4(ip) => write!(f, "{}:{}", ip, self.port),
            IpAddr::V6(ip) => write!(f, "[{}]:{}", ip, self.port),
        }
    }
}

fn xor_bytes(a: &[u8], b: &[u8]) -> Vec<u8> {
    let n = std::cmp::min(a.len(), b.len());
    let mut out = Vec::with_capacity(n);
    for i in 0..n {
        out.push(a[i] ^ b[i]);
    }
    out
}

impl Setter for XorMappedAddress {
    fn add_to(&self, m: &mut Message) -> Result<()> {
        self.add_to_as(m, ATTR_XOR_MAPPED_ADDRESS)
    }
}

impl Getter for XorMappedAddress {
    fn get_from(&mut self, m: &Message) -> Result<()> {
        self.get_from_as(m, ATTR_XOR_MAPPED_ADDRESS)
    }
}

impl XorMappedAddress {
    pub fn add_to_as(&self, m: &mut Message, t: AttrType) -> Result<()> {
        let (family, ip) = match self.ip {
            IpAddr::V4(ip) => (FAMILY_IPV4, ip.octets().to_vec()),
            IpAddr::V6(ip) => (FAMILY_IPV6, ip.octets().to_vec()),
        };

        let mut xor_pad = MAGIC_COOKIE.to_be_bytes().to_vec();
        xor_pad.extend_from_slice(&m.transaction_id.0);

        let xor_ip = xor_bytes(&ip, &xor_pad);

        let mut value = vec![0u8; 4];
        value[0..2].copy_from_slice(&family.to_be_bytes());
        value[2..4].copy_from_slice(&(self.port ^ (MAGIC_COOKIE >> 16) as u16).to_be_bytes());
        value.extend_from_slice(&xor_ip);
        m.add(t, &value);
        Ok(())
    }

    pub fn get_from_as(&mut self, m: &Message, t: AttrType) -> Result<()> {
        let v = m.get(t)?;
        if v.len() <= 4 {
            return Err(Error::ErrUnexpectedHeaderEof);
        }

        let family = u16::from_be_bytes([v[0], v[1]]);
        if family != FAMILY_IPV4 && family != FAMILY_IPV6 {
            return Err(Error::Other(format!("bad address family value: {family}")));
        }
        self.port = u16::from_be_bytes([v[2], v[3]]) ^ (MAGIC_COOKIE >> 16) as u16;

        let mut xor_pad = [0u8; 4 + TRANSACTION_ID_SIZE];
        xor_pad[0..4].copy_from_slice(&MAGIC_COOKIE.to_be_bytes());
        xor_pad[4..].copy_from_slice(&m.transaction_id.0);

        if family == FAMILY_IPV6 {
            if v.len() < 4 + IPV6LEN {
                return Err(Error::ErrBadIpLength);
            }
            let ip = xor_bytes(&v[4..4 + IPV6LEN], &xor_pad);
            let mut octets = [0u8; IPV6LEN];
            octets.copy_from_slice(&ip);
            self.ip = IpAddr::from(octets);
        } else {
            if v.len() < 4 + IPV4LEN {
                return Err(Error::ErrBadIpLength);
            }
            let ip = xor_bytes(&v[4..4 + IPV4LEN], &xor_pad[..IPV4LEN]);
            let mut octets = [0u8; IPV4LEN];
            octets.copy_from_slice(&ip);
            self.ip = IpAddr::from(octets);
        }

        Ok(())
    }
}
