use super::*;

fn pair(now: Instant) -> (Association, Association) {
    let _ = env_logger::builder().is_test(true).try_init();
    let client = Association::new(AssociationConfig::new(Side::Client), now);
    let server = Association::new(AssociationConfig::new(Side::Server), now);
    (client, server)
}

/// Shuttles packets between the two associations until both go quiet.
fn pump(a: &mut Association, b: &mut Association, now: Instant) {
    for _ in 0..64 {
        let mut progressed = false;
        while let Some(raw) = a.poll_transmit() {
            b.handle_read(&Bytes::from(raw), now).unwrap();
            progressed = true;
        }
        while let Some(raw) = b.poll_transmit() {
            a.handle_read(&Bytes::from(raw), now).unwrap();
            progressed = true;
        }
        if !progressed {
            break;
        }
    }
}

fn connect(now: Instant) -> (Association, Association) {
    let (mut client, mut server) = pair(now);
    pump(&mut client, &mut server, now);
    assert!(client.is_established());
    assert!(server.is_established());
    assert_eq!(client.poll_event(), Some(AssociationEvent::Connected));
    assert_eq!(server.poll_event(), Some(AssociationEvent::Connected));
    (client, server)
}

fn collect_data(assoc: &mut Association) -> Vec<(u16, Bytes)> {
    let mut out = vec![];
    while let Some(event) = assoc.poll_event() {
        if let AssociationEvent::Data {
            stream_id, data, ..
        } = event
        {
            out.push((stream_id, data));
        }
    }
    out
}

#[test]
fn test_four_way_handshake() {
    connect(Instant::now());
}

#[test]
fn test_data_both_directions() {
    let now = Instant::now();
    let (mut client, mut server) = connect(now);

    client
        .write(
            1,
            PayloadProtocolIdentifier::Binary,
            &Bytes::from_static(b"ping"),
            ReliabilityType::Reliable,
            true,
            now,
        )
        .unwrap();
    pump(&mut client, &mut server, now);
    assert_eq!(collect_data(&mut server), vec![(1, Bytes::from_static(b"ping"))]);

    server
        .write(
            1,
            PayloadProtocolIdentifier::Binary,
            &Bytes::from_static(b"pong"),
            ReliabilityType::Reliable,
            true,
            now,
        )
        .unwrap();
    pump(&mut client, &mut server, now);
    assert_eq!(collect_data(&mut client), vec![(1, Bytes::from_static(b"pong"))]);
}

#[test]
fn test_large_message_fragmented_and_reassembled() {
    let now = Instant::now();
    let (mut client, mut server) = connect(now);

    let big = Bytes::from(vec![0x5A; 10_000]);
    client
        .write(
            3,
            PayloadProtocolIdentifier::Binary,
            &big,
            ReliabilityType::Reliable,
            true,
            now,
        )
        .unwrap();
    pump(&mut client, &mut server, now);

    let received = collect_data(&mut server);
    assert_eq!(received.len(), 1);
    assert_eq!(received[0].1, big);
}

#[test]
fn test_ordered_delivery_across_messages() {
    let now = Instant::now();
    let (mut client, mut server) = connect(now);

    for i in 0..5u8 {
        client
            .write(
                7,
                PayloadProtocolIdentifier::Binary,
                &Bytes::from(vec![i]),
                ReliabilityType::Reliable,
                true,
                now,
            )
            .unwrap();
    }
    pump(&mut client, &mut server, now);

    let received = collect_data(&mut server);
    let payloads: Vec<u8> = received.iter().map(|(_, d)| d[0]).collect();
    assert_eq!(payloads, vec![0, 1, 2, 3, 4]);
}

#[test]
fn test_lost_data_chunk_is_retransmitted() {
    let now = Instant::now();
    let (mut client, mut server) = connect(now);

    client
        .write(
            1,
            PayloadProtocolIdentifier::Binary,
            &Bytes::from_static(b"lost then found"),
            ReliabilityType::Reliable,
            true,
            now,
        )
        .unwrap();

    // the network drops the DATA packet
    while client.poll_transmit().is_some() {}
    assert!(collect_data(&mut server).is_empty());

    // T3-rtx fires and the chunk is retransmitted
    let deadline = client.poll_timeout().expect("T3 armed");
    client.handle_timeout(deadline).unwrap();
    pump(&mut client, &mut server, deadline);

    assert_eq!(
        collect_data(&mut server),
        vec![(1, Bytes::from_static(b"lost then found"))]
    );
}

#[test]
fn test_duplicate_packet_reported_not_delivered_twice() {
    let now = Instant::now();
    let (mut client, mut server) = connect(now);

    client
        .write(
            1,
            PayloadProtocolIdentifier::Binary,
            &Bytes::from_static(b"once"),
            ReliabilityType::Reliable,
            true,
            now,
        )
        .unwrap();

    let raw = Bytes::from(client.poll_transmit().expect("data packet"));
    server.handle_read(&raw, now).unwrap();
    server.handle_read(&raw, now).unwrap();

    assert_eq!(collect_data(&mut server), vec![(1, Bytes::from_static(b"once"))]);
}

#[test]
fn test_unordered_message_delivered() {
    let now = Instant::now();
    let (mut client, mut server) = connect(now);

    client
        .write(
            2,
            PayloadProtocolIdentifier::String,
            &Bytes::from_static(b"whenever"),
            ReliabilityType::Reliable,
            false,
            now,
        )
        .unwrap();
    pump(&mut client, &mut server, now);

    let mut delivered = false;
    while let Some(event) = server.poll_event() {
        if let AssociationEvent::Data {
            unordered, data, ..
        } = event
        {
            assert!(unordered);
            assert_eq!(data, Bytes::from_static(b"whenever"));
            delivered = true;
        }
    }
    assert!(delivered);
}

#[test]
fn test_stream_reset_round_trip() {
    let now = Instant::now();
    let (mut client, mut server) = connect(now);

    client.reset_stream(4, now).unwrap();
    pump(&mut client, &mut server, now);

    let mut reset_seen = false;
    while let Some(event) = server.poll_event() {
        if let AssociationEvent::StreamsReset { stream_ids } = event {
            assert_eq!(stream_ids, vec![4]);
            reset_seen = true;
        }
    }
    assert!(reset_seen);
}

#[test]
fn test_graceful_shutdown() {
    let now = Instant::now();
    let (mut client, mut server) = connect(now);

    client.close(now).unwrap();
    pump(&mut client, &mut server, now);

    assert_eq!(client.state(), AssociationState::Closed);
    assert_eq!(server.state(), AssociationState::Closed);
}

#[test]
fn test_write_too_large_rejected() {
    let now = Instant::now();
    let (mut client, _server) = connect(now);
    let huge = Bytes::from(vec![0; DEFAULT_MAX_MESSAGE_SIZE as usize + 1]);
    assert_eq!(
        client.write(
            0,
            PayloadProtocolIdentifier::Binary,
            &huge,
            ReliabilityType::Reliable,
            true,
            now,
        ),
        Err(Error::ErrOutboundPacketTooLarge)
    );
}

#[test]
fn test_init_retransmitted_when_lost() {
    let now = Instant::now();
    let (mut client, mut server) = pair(now);

    // INIT is lost
    while client.poll_transmit().is_some() {}

    let deadline = client.poll_timeout().expect("T1-init armed");
    client.handle_timeout(deadline).unwrap();
    pump(&mut client, &mut server, deadline);

    assert!(client.is_established());
    assert!(server.is_established());
}
