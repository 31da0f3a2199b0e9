use super::*;
use crate::attributes::{ATTR_PRIORITY, ATTR_USERNAME};
use crate::textattrs::TextAttribute;

#[rustfmt::skip]
static BINDING_REQUEST_BYTES: [u8; 52] = [
    0x00, 0x01, 0x00, 0x20, // binding request, length 32
    0x21, 0x12, 0xa4, 0x42, // magic cookie
    0x01, 0x02, 0x03, 0x04, // transaction id
    0x05, 0x06, 0x07, 0x08,
    0x09, 0x0a, 0x0b, 0x0c,
    0x00, 0x06, 0x00, 0x11, // USERNAME, length 17
    0x61, 0x62, 0x63, 0x64, // "abcd"
    0x31, 0x32, 0x33, 0x34, // "1234"
    0x3a, 0x65, 0x66, 0x67, // ":efg"
    0x68, 0x35, 0x36, 0x37, // "h567"
    0x38, 0x00, 0x00, 0x00, // "8" + padding
    0x00, 0x24, 0x00, 0x04, // PRIORITY, length 4
    0x7e, 0xff, 0xff, 0xff, // 2130706431
];

#[test]
fn test_message_decode_binding_request() -> shared::error::Result<()> {
    let mut m = Message::new();
    m.unmarshal_binary(&BINDING_REQUEST_BYTES)?;

    assert_eq!(m.typ.method, METHOD_BINDING);
    assert_eq!(m.typ.class, CLASS_REQUEST);
    assert_eq!(m.transaction_id.0.len(), TRANSACTION_ID_SIZE);
    assert_eq!(m.length, 32);

    let mut username = TextAttribute::default();
    username.get_from_as(&m, ATTR_USERNAME)?;
    assert_eq!(username.text, "abcd1234:efgh5678");

    let priority = m.get(ATTR_PRIORITY)?;
    assert_eq!(
        u32::from_be_bytes([priority[0], priority[1], priority[2], priority[3]]),
        2130706431
    );
    Ok(())
}

#[test]
fn test_message_reencode_preserves_bytes() -> shared::error::Result<()> {
    let mut m = Message::new();
    m.unmarshal_binary(&BINDING_REQUEST_BYTES)?;

    // rebuild from decoded state, preserving attribute order
    let mut rebuilt = Message::new();
    rebuilt.transaction_id = m.transaction_id;
    rebuilt.set_type(m.typ);
    rebuilt.write_header();
    for a in &m.attributes.0 {
        rebuilt.add(a.typ, &a.value);
    }

    assert_eq!(rebuilt.raw, &BINDING_REQUEST_BYTES);
    Ok(())
}

#[test]
fn test_message_is_message() {
    assert!(is_message(&BINDING_REQUEST_BYTES));
    assert!(!is_message(&BINDING_REQUEST_BYTES[..19]));
    let mut bad_cookie = BINDING_REQUEST_BYTES;
    bad_cookie[4] = 0;
    assert!(!is_message(&bad_cookie));
}

#[test]
fn test_message_decode_truncated() {
    let mut m = Message::new();
    assert!(m.unmarshal_binary(&BINDING_REQUEST_BYTES[..30]).is_err());
}

#[test]
fn test_message_unknown_comprehension_required() {
    // type 0x7fff is comprehension-required and unknown
    let mut raw = vec![
        0x00, 0x01, 0x00, 0x08, 0x21, 0x12, 0xa4, 0x42, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0,
        0x7f, 0xff, 0x00, 0x04, 0xde, 0xad, 0xbe, 0xef,
    ];
    let mut m = Message::new();
    assert_eq!(
        m.unmarshal_binary(&raw),
        Err(shared::error::Error::ErrUnknownComprehensionRequired(0x7fff))
    );

    // the same attribute in the comprehension-optional range is retained
    raw[20] = 0xff;
    let mut m = Message::new();
    m.unmarshal_binary(&raw).unwrap();
    assert_eq!(m.attributes.0.len(), 1);
    assert_eq!(m.attributes.0[0].value, &[0xde, 0xad, 0xbe, 0xef]);
}

#[test]
fn test_message_type_round_trip() {
    for (typ, value) in [
        (BINDING_REQUEST, 0x0001u16),
        (BINDING_SUCCESS, 0x0101),
        (BINDING_ERROR_RESPONSE, 0x0111),
        (BINDING_INDICATION, 0x0011),
    ] {
        assert_eq!(typ.value(), value, "{typ}");
        let mut decoded = MessageType::default();
        decoded.read_value(value);
        assert_eq!(decoded, typ);
    }
}
