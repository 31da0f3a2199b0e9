use super::*;
use shared::marshal::Marshal;

fn test_keys() -> (Vec<u8>, Vec<u8>) {
    let master_key: Vec<u8> = (0u8..16).collect();
    let master_salt: Vec<u8> = (16u8..28).collect();
    (master_key, master_salt)
}

fn rtp_packet(ssrc: u32, seq: u16, ts: u32, payload: &'static [u8]) -> Vec<u8> {
    let p = rtp::packet::Packet {
        header: rtp::header::Header {
            version: 2,
            payload_type: 96,
            sequence_number: seq,
            timestamp: ts,
            ssrc,
            ..Default::default()
        },
        payload: bytes::Bytes::from_static(payload),
        padding_size: 0,
    };
    p.marshal().unwrap().to_vec()
}

#[test]
fn test_srtp_zero_payload_round_trip() -> shared::error::Result<()> {
    let (key, salt) = test_keys();
    let mut tx = Context::new(&key, &salt, ProtectionProfile::AeadAes128Gcm)?;
    let mut rx = Context::new(&key, &salt, ProtectionProfile::AeadAes128Gcm)?;

    let plain = rtp_packet(0x12345678, 0, 0, &[]);
    let protected = tx.protect_rtp(&plain)?;
    // zero-byte payload gains exactly the 16-byte auth tag
    assert_eq!(protected.len(), plain.len() + 16);

    let unprotected = rx.unprotect_rtp(&protected)?;
    assert_eq!(&unprotected[..], &plain[..]);
    Ok(())
}

#[test]
fn test_srtp_ciphertext_deterministic() -> shared::error::Result<()> {
    let (key, salt) = test_keys();
    let mut a = Context::new(&key, &salt, ProtectionProfile::AeadAes128Gcm)?;
    let mut b = Context::new(&key, &salt, ProtectionProfile::AeadAes128Gcm)?;

    let plain = rtp_packet(0x12345678, 7, 1234, &[1, 2, 3, 4]);
    assert_eq!(a.protect_rtp(&plain)?, b.protect_rtp(&plain)?);
    Ok(())
}

#[test]
fn test_srtp_ten_thousand_sequential_packets() -> shared::error::Result<()> {
    let (key, salt) = test_keys();
    let mut tx = Context::new(&key, &salt, ProtectionProfile::AeadAes128Gcm)?;
    let mut rx = Context::new(&key, &salt, ProtectionProfile::AeadAes128Gcm)?;

    for i in 0..10_000u32 {
        let plain = rtp_packet(0x12345678, i as u16, i * 160, &[0x42; 8]);
        let protected = tx.protect_rtp(&plain)?;
        let unprotected = rx.unprotect_rtp(&protected)?;
        assert_eq!(&unprotected[..], &plain[..], "packet {i}");
    }
    Ok(())
}

#[test]
fn test_srtp_seq_wrap_increments_roc_once() -> shared::error::Result<()> {
    let (key, salt) = test_keys();
    let mut tx = Context::new(&key, &salt, ProtectionProfile::AeadAes128Gcm)?;
    let mut rx = Context::new(&key, &salt, ProtectionProfile::AeadAes128Gcm)?;

    for seq in [0xFFFEu16, 0xFFFF, 0x0000, 0x0001] {
        let plain = rtp_packet(0xabcd, seq, 0, &[9; 4]);
        let protected = tx.protect_rtp(&plain)?;
        rx.unprotect_rtp(&protected)?;
    }
    assert_eq!(tx.roc(0xabcd), Some(1));
    assert_eq!(rx.roc(0xabcd), Some(1));
    Ok(())
}

#[test]
fn test_srtp_replayed_packet_rejected() -> shared::error::Result<()> {
    let (key, salt) = test_keys();
    let mut tx = Context::new(&key, &salt, ProtectionProfile::AeadAes128Gcm)?;
    let mut rx = Context::new(&key, &salt, ProtectionProfile::AeadAes128Gcm)?;

    let plain = rtp_packet(0x1111, 5, 0, &[1]);
    let protected = tx.protect_rtp(&plain)?;
    rx.unprotect_rtp(&protected)?;
    assert_eq!(
        rx.unprotect_rtp(&protected),
        Err(Error::SrtpSsrcDuplicated(0x1111, 5))
    );
    Ok(())
}

#[test]
fn test_srtp_tampered_packet_rejected() -> shared::error::Result<()> {
    let (key, salt) = test_keys();
    let mut tx = Context::new(&key, &salt, ProtectionProfile::AeadAes128Gcm)?;
    let mut rx = Context::new(&key, &salt, ProtectionProfile::AeadAes128Gcm)?;

    let plain = rtp_packet(0x2222, 1, 0, &[1, 2, 3]);
    let mut protected = tx.protect_rtp(&plain)?.to_vec();
    let last = protected.len() - 1;
    protected[last] ^= 0xff;
    assert_eq!(
        rx.unprotect_rtp(&protected),
        Err(Error::ErrFailedToVerifyAuthTag)
    );
    Ok(())
}

#[test]
fn test_srtcp_round_trip() -> shared::error::Result<()> {
    let (key, salt) = test_keys();
    let mut tx = Context::new(&key, &salt, ProtectionProfile::AeadAes128Gcm)?;
    let mut rx = Context::new(&key, &salt, ProtectionProfile::AeadAes128Gcm)?;

    let rr = rtcp::receiver_report::ReceiverReport {
        ssrc: 0x902f9e2e,
        reports: vec![],
    };
    let plain = rtcp::packet::marshal(&[rtcp::packet::RtcpPacket::ReceiverReport(rr)])?;

    let protected = tx.protect_rtcp(&plain)?;
    assert_eq!(protected.len(), plain.len() + 16 + 4);
    // E-bit set in the trailer
    assert_eq!(protected[protected.len() - 4] & 0x80, 0x80);

    let unprotected = rx.unprotect_rtcp(&protected)?;
    assert_eq!(&unprotected[..], &plain[..]);

    // replay of the same compound packet is rejected
    assert!(rx.unprotect_rtcp(&protected).is_err());
    Ok(())
}

#[test]
fn test_context_rejects_bad_key_lengths() {
    let (key, _) = test_keys();
    assert!(Context::new(&key, &[0u8; 5], ProtectionProfile::AeadAes128Gcm).is_err());
    assert!(Context::new(&key[..10], &[0u8; 12], ProtectionProfile::AeadAes128Gcm).is_err());
}
