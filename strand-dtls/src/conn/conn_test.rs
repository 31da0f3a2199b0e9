use super::*;
use crate::config::Certificate;

fn config() -> HandshakeConfig {
    let _ = env_logger::builder().is_test(true).try_init();
    HandshakeConfig::new(Certificate::generate_self_signed(vec!["strand".to_owned()]).unwrap())
}

/// Shuttles datagrams between the two conns until both go quiet.
fn pump(client: &mut DTLSConn, server: &mut DTLSConn, now: Instant) {
    for _ in 0..64 {
        let mut progressed = false;
        while let Some(datagram) = client.poll_transmit() {
            server.handle_read(&datagram, now).unwrap();
            progressed = true;
        }
        while let Some(datagram) = server.poll_transmit() {
            client.handle_read(&datagram, now).unwrap();
            progressed = true;
        }
        if !progressed {
            break;
        }
    }
}

fn drain_events(conn: &mut DTLSConn) -> Vec<DtlsEvent> {
    let mut out = vec![];
    while let Some(event) = conn.poll_event() {
        out.push(event);
    }
    out
}

#[test]
fn test_handshake_loopback() {
    let now = Instant::now();
    let mut client = DTLSConn::new(config(), true, now);
    let mut server = DTLSConn::new(config(), false, now);

    pump(&mut client, &mut server, now);

    assert!(client.is_handshake_complete(), "client not complete");
    assert!(server.is_handshake_complete(), "server not complete");
    assert!(drain_events(&mut client).contains(&DtlsEvent::HandshakeComplete));
    assert!(drain_events(&mut server).contains(&DtlsEvent::HandshakeComplete));

    // both sides negotiated the mandatory SRTP profile
    assert_eq!(
        client.selected_srtp_protection_profile(),
        SrtpProtectionProfile::AeadAes128Gcm
    );
    assert_eq!(
        server.selected_srtp_protection_profile(),
        SrtpProtectionProfile::AeadAes128Gcm
    );

    // each side holds the peer's certificate for fingerprint checks
    assert_eq!(client.peer_certificates().len(), 1);
    assert_eq!(server.peer_certificates().len(), 1);
}

#[test]
fn test_exported_keying_material_matches() {
    let now = Instant::now();
    let mut client = DTLSConn::new(config(), true, now);
    let mut server = DTLSConn::new(config(), false, now);
    pump(&mut client, &mut server, now);

    let client_material = client
        .export_keying_material("EXTRACTOR-dtls_srtp", 56)
        .unwrap();
    let server_material = server
        .export_keying_material("EXTRACTOR-dtls_srtp", 56)
        .unwrap();
    assert_eq!(client_material, server_material);
    assert_eq!(client_material.len(), 56);
}

#[test]
fn test_application_data_both_directions() {
    let now = Instant::now();
    let mut client = DTLSConn::new(config(), true, now);
    let mut server = DTLSConn::new(config(), false, now);
    pump(&mut client, &mut server, now);
    drain_events(&mut client);
    drain_events(&mut server);

    client.write(b"from client").unwrap();
    server.write(b"from server").unwrap();
    pump(&mut client, &mut server, now);

    assert_eq!(
        drain_events(&mut server),
        vec![DtlsEvent::ApplicationData(Bytes::from_static(b"from client"))]
    );
    assert_eq!(
        drain_events(&mut client),
        vec![DtlsEvent::ApplicationData(Bytes::from_static(b"from server"))]
    );
}

#[test]
fn test_write_before_handshake_fails() {
    let now = Instant::now();
    let mut client = DTLSConn::new(config(), true, now);
    assert_eq!(client.write(b"early"), Err(Error::ErrHandshakeInProgress));
}

#[test]
fn test_handshake_recovers_from_lost_flight() {
    let now = Instant::now();
    let mut client = DTLSConn::new(config(), true, now);
    let mut server = DTLSConn::new(config(), false, now);

    // drop the client's first flight entirely
    while client.poll_transmit().is_some() {}

    // the retransmit timer recovers it
    let retry = client.poll_timeout().expect("timer armed");
    client.handle_timeout(retry).unwrap();
    pump(&mut client, &mut server, retry);

    assert!(client.is_handshake_complete());
    assert!(server.is_handshake_complete());
}

#[test]
fn test_handshake_times_out() {
    let now = Instant::now();
    let mut client = DTLSConn::new(config(), true, now);
    let deadline = now + Duration::from_secs(31);
    assert_eq!(
        client.handle_timeout(deadline),
        Err(Error::ErrHandshakeTimeout)
    );
    assert!(client.is_closed());
}

#[test]
fn test_close_notify_reaches_peer() {
    let now = Instant::now();
    let mut client = DTLSConn::new(config(), true, now);
    let mut server = DTLSConn::new(config(), false, now);
    pump(&mut client, &mut server, now);
    drain_events(&mut client);
    drain_events(&mut server);

    client.close();
    while let Some(datagram) = client.poll_transmit() {
        server.handle_read(&datagram, now).unwrap();
    }
    assert_eq!(drain_events(&mut server), vec![DtlsEvent::PeerClosed]);
    assert!(server.is_closed());
}
