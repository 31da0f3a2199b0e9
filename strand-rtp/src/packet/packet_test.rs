use super::*;
use crate::header::{Extension, EXTENSION_PROFILE_ONE_BYTE};

#[rustfmt::skip]
static PARSED_PACKET_BYTES: [u8; 32] = [
    0x90, 0xe0, 0x69, 0x8f, // v=2, ext, marker, pt=96, seq=27023
    0xd9, 0xc2, 0x93, 0xda, // timestamp
    0x1c, 0x64, 0x27, 0x82, // ssrc
    0xbe, 0xde, 0x00, 0x01, // one-byte extension header, 1 word
    0x50, 0xaa, 0x00, 0x00, // id=5 len=1 payload=0xAA + padding
    0x98, 0x36, 0xbe, 0x88, // payload
    0x9e, 0x00, 0x00, 0x00,
    0x00, 0x00, 0x00, 0x00,
];

#[test]
fn test_packet_unmarshal() -> shared::error::Result<()> {
    let mut buf = &PARSED_PACKET_BYTES[..];
    let p = Packet::unmarshal(&mut buf)?;

    assert_eq!(p.header.version, 2);
    assert!(p.header.marker);
    assert!(p.header.extension);
    assert_eq!(p.header.payload_type, 96);
    assert_eq!(p.header.sequence_number, 27023);
    assert_eq!(p.header.timestamp, 3653407706);
    assert_eq!(p.header.ssrc, 476325762);
    assert_eq!(p.header.extension_profile, EXTENSION_PROFILE_ONE_BYTE);
    assert_eq!(p.header.get_extension(5), Some(Bytes::from_static(&[0xAA])));
    assert_eq!(p.payload.len(), 12);
    Ok(())
}

#[test]
fn test_packet_round_trip() -> shared::error::Result<()> {
    let mut buf = &PARSED_PACKET_BYTES[..];
    let p = Packet::unmarshal(&mut buf)?;
    let raw = p.marshal()?;
    assert_eq!(&raw[..], &PARSED_PACKET_BYTES[..]);

    let mut reparse = &raw[..];
    assert_eq!(Packet::unmarshal(&mut reparse)?, p);
    Ok(())
}

#[test]
fn test_packet_with_padding() -> shared::error::Result<()> {
    let p = Packet {
        header: Header {
            version: 2,
            padding: true,
            payload_type: 111,
            sequence_number: 1,
            timestamp: 960,
            ssrc: 0xdeadbeef,
            ..Default::default()
        },
        payload: Bytes::from_static(&[0x01, 0x02, 0x03]),
        padding_size: 5,
    };

    let raw = p.marshal()?;
    assert_eq!(raw.len(), 12 + 3 + 5);
    assert_eq!(raw[raw.len() - 1], 5);

    let mut buf = &raw[..];
    let decoded = Packet::unmarshal(&mut buf)?;
    assert_eq!(decoded.payload, p.payload);
    assert_eq!(decoded.padding_size, 5);
    Ok(())
}

#[test]
fn test_packet_unmarshal_too_short() {
    let mut buf = &PARSED_PACKET_BYTES[..10];
    assert!(Packet::unmarshal(&mut buf).is_err());
}

#[test]
fn test_header_set_extension_promotes_profile() -> shared::error::Result<()> {
    let mut h = Header {
        version: 2,
        ..Default::default()
    };
    h.set_extension(3, Bytes::from_static(&[0x11, 0x22]))?;
    assert!(h.extension);
    assert_eq!(h.extension_profile, EXTENSION_PROFILE_ONE_BYTE);
    assert_eq!(
        h.extensions,
        vec![Extension {
            id: 3,
            payload: Bytes::from_static(&[0x11, 0x22])
        }]
    );

    // out-of-range id for the one-byte profile
    assert!(h.set_extension(15, Bytes::from_static(&[0x00])).is_err());
    Ok(())
}
