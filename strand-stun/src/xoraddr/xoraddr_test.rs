use super::*;
use crate::message::{TransactionId, BINDING_SUCCESS};

#[test]
fn test_xor_mapped_address_ipv4_round_trip() -> shared::error::Result<()> {
    let mut m = Message::new();
    m.set_type(BINDING_SUCCESS);
    m.new_transaction_id();
    m.write_header();

    let addr = XorMappedAddress {
        ip: "192.168.1.100".parse().unwrap(),
        port: 31102,
    };
    addr.add_to(&mut m)?;

    let mut decoded = Message::new();
    decoded.unmarshal_binary(&m.raw)?;
    let mut got = XorMappedAddress::default();
    got.get_from(&decoded)?;
    assert_eq!(got, addr);
    Ok(())
}

#[test]
fn test_xor_mapped_address_ipv4_pad_is_cookie() -> shared::error::Result<()> {
    let mut m = Message::new();
    m.set_type(BINDING_SUCCESS);
    m.new_transaction_id();

    XorMappedAddress {
        ip: "127.0.0.1".parse().unwrap(),
        port: 0,
    }
    .add_to(&mut m)?;

    let v = m.get(crate::attributes::ATTR_XOR_MAPPED_ADDRESS)?;
    let cookie = MAGIC_COOKIE.to_be_bytes();
    assert_eq!(v[4] ^ cookie[0], 127);
    assert_eq!(v[5] ^ cookie[1], 0);
    assert_eq!(v[6] ^ cookie[2], 0);
    assert_eq!(v[7] ^ cookie[3], 1);
    // port xored with the top 16 bits of the cookie
    assert_eq!(u16::from_be_bytes([v[2], v[3]]), 0 ^ 0x2112);
    Ok(())
}

#[test]
fn test_xor_mapped_address_ipv6_pad_is_cookie_and_transaction_id() -> shared::error::Result<()> {
    let mut m = Message::new();
    m.set_type(BINDING_SUCCESS);
    m.transaction_id = TransactionId([1, 2, 3, 4, 5, 6, 7, 8, 9, 10, 11, 12]);
    m.write_header();

    let ip: std::net::IpAddr = "2001:db8::1".parse().unwrap();
    XorMappedAddress { ip, port: 443 }.add_to(&mut m)?;

    let v = m.get(crate::attributes::ATTR_XOR_MAPPED_ADDRESS)?;
    let mut pad = MAGIC_COOKIE.to_be_bytes().to_vec();
    pad.extend_from_slice(&m.transaction_id.0);
    let octets = match ip {
        std::net::IpAddr::V6(ip) => ip.octets(),
        _ => unreachable!(),
    };
    for i in 0..16 {
        assert_eq!(v[4 + i] ^ pad[i], octets[i], "octet {i}");
    }

    let mut got = XorMappedAddress::default();
    got.get_from(&m)?;
    assert_eq!(got.ip, ip);
    assert_eq!(got.port, 443);
    Ok(())
}
