//! Two in-process peer connections negotiate over a memory pipe and
//! exchange data channel messages.

use std::net::SocketAddr;
use std::time::{Duration, Instant};

use strand::{
    DataChannelConfig, DataChannelMessage, PeerConnection, PeerConnectionEvent, RTCConfiguration,
    RTCPeerConnectionState,
};

struct TestEndpoint {
    pc: PeerConnection,
    addr: SocketAddr,
    opened: Vec<(u16, String)>,
    messages: Vec<(u16, DataChannelMessage)>,
    candidates_out: Vec<String>,
}

impl TestEndpoint {
    fn new(addr: &str) -> Self {
        let _ = env_logger::builder().is_test(true).try_init();
        TestEndpoint {
            pc: PeerConnection::new(RTCConfiguration::default()).unwrap(),
            addr: addr.parse().unwrap(),
            opened: vec![],
            messages: vec![],
            candidates_out: vec![],
        }
    }

    fn drain_events(&mut self) {
        while let Some(event) = self.pc.poll_event() {
            match event {
                PeerConnectionEvent::IceCandidate(candidate) => {
                    self.candidates_out.push(candidate);
                }
                PeerConnectionEvent::DataChannelOpened { stream_id, label } => {
                    self.opened.push((stream_id, label));
                }
                PeerConnectionEvent::DataChannelMessage { stream_id, message } => {
                    self.messages.push((stream_id, message));
                }
                _ => {}
            }
        }
    }
}

/// One simulated event-loop step: timers fire, datagrams shuttle, trickle
/// candidates cross signaling.
fn step(a: &mut TestEndpoint, b: &mut TestEndpoint, now: Instant) {
    a.pc.handle_timeout(now).unwrap();
    b.pc.handle_timeout(now).unwrap();

    for _ in 0..8 {
        let mut progressed = false;
        while let Some(transmit) = a.pc.poll_transmit() {
            let _ = b
                .pc
                .handle_read(transmit.peer_addr, transmit.local_addr, &transmit.message, now);
            progressed = true;
        }
        while let Some(transmit) = b.pc.poll_transmit() {
            let _ = a
                .pc
                .handle_read(transmit.peer_addr, transmit.local_addr, &transmit.message, now);
            progressed = true;
        }
        if !progressed {
            break;
        }
    }

    a.drain_events();
    b.drain_events();

    for candidate in std::mem::take(&mut a.candidates_out) {
        let _ = b.pc.add_ice_candidate(&candidate, now);
    }
    for candidate in std::mem::take(&mut b.candidates_out) {
        let _ = a.pc.add_ice_candidate(&candidate, now);
    }
}

fn connect(a: &mut TestEndpoint, b: &mut TestEndpoint, start: Instant) -> Instant {
    // offer/answer over "signaling"
    let offer = a.pc.create_offer().unwrap();
    a.pc.set_local_description(offer.clone(), start).unwrap();
    b.pc.set_remote_description(offer, start).unwrap();
    let answer = b.pc.create_answer().unwrap();
    b.pc.set_local_description(answer.clone(), start).unwrap();
    a.pc.set_remote_description(answer, start).unwrap();

    // the embedder owns the sockets: hand each side its bound address
    a.pc.add_host_address(a.addr).unwrap();
    b.pc.add_host_address(b.addr).unwrap();

    // both sides must reach connected within five simulated seconds
    let mut now = start;
    for _ in 0..500 {
        step(a, b, now);
        if a.pc.connection_state() == RTCPeerConnectionState::Connected
            && b.pc.connection_state() == RTCPeerConnectionState::Connected
        {
            return now;
        }
        now += Duration::from_millis(10);
    }
    panic!(
        "never connected: a={} b={} (ice a={} b={})",
        a.pc.connection_state(),
        b.pc.connection_state(),
        a.pc.ice_connection_state(),
        b.pc.ice_connection_state()
    );
}

#[test]
fn test_loopback_data_channel_ping_pong() {
    let start = Instant::now();
    let mut a = TestEndpoint::new("10.0.0.1:4000");
    let mut b = TestEndpoint::new("10.0.0.2:4000");

    a.pc.create_data_channel(DataChannelConfig::new("chat".to_owned()))
        .unwrap();

    let mut now = connect(&mut a, &mut b, start);
    assert!(now - start < Duration::from_secs(5), "connect took too long");

    // DCEP open/ack completes on both sides
    for _ in 0..50 {
        step(&mut a, &mut b, now);
        if !a.opened.is_empty() && !b.opened.is_empty() {
            break;
        }
        now += Duration::from_millis(10);
    }
    assert_eq!(a.opened.len(), 1, "creator open event");
    assert_eq!(b.opened.len(), 1, "acceptor open event");
    assert_eq!(a.opened[0].1, "chat");
    assert_eq!(b.opened[0].1, "chat");
    let stream_id = a.opened[0].0;
    assert_eq!(stream_id, b.opened[0].0);

    // ping
    a.pc.data_channel_send(
        stream_id,
        DataChannelMessage::Text("ping".to_owned()),
        now,
    )
    .unwrap();
    for _ in 0..50 {
        step(&mut a, &mut b, now);
        if !b.messages.is_empty() {
            break;
        }
        now += Duration::from_millis(10);
    }
    assert_eq!(
        b.messages,
        vec![(stream_id, DataChannelMessage::Text("ping".to_owned()))],
        "ping delivered exactly once"
    );

    // pong
    b.pc.data_channel_send(
        stream_id,
        DataChannelMessage::Text("pong".to_owned()),
        now,
    )
    .unwrap();
    for _ in 0..50 {
        step(&mut a, &mut b, now);
        if !a.messages.is_empty() {
            break;
        }
        now += Duration::from_millis(10);
    }
    assert_eq!(
        a.messages,
        vec![(stream_id, DataChannelMessage::Text("pong".to_owned()))],
        "pong delivered exactly once"
    );

    // a few more quiet steps must not duplicate deliveries
    for _ in 0..20 {
        now += Duration::from_millis(10);
        step(&mut a, &mut b, now);
    }
    assert_eq!(b.messages.len(), 1);
    assert_eq!(a.messages.len(), 1);
}

#[test]
fn test_stats_report_covers_subsystems() {
    let start = Instant::now();
    let mut a = TestEndpoint::new("10.0.0.1:4100");
    let mut b = TestEndpoint::new("10.0.0.2:4100");
    a.pc.create_data_channel(DataChannelConfig::new("stats".to_owned()))
        .unwrap();
    let now = connect(&mut a, &mut b, start);

    let report = a.pc.get_stats(now);
    let entries = report.as_object().unwrap();
    let types: Vec<&str> = entries
        .values()
        .filter_map(|v| v.get("type").and_then(|t| t.as_str()))
        .collect();
    assert!(types.contains(&"peer-connection"));
    assert!(types.contains(&"transport"));
    assert!(types.contains(&"certificate"));
    assert!(types.contains(&"local-candidate"));
    assert!(types.contains(&"remote-candidate"));
    assert!(types.contains(&"candidate-pair"));
}

#[test]
fn test_close_is_terminal() {
    let start = Instant::now();
    let mut a = TestEndpoint::new("10.0.0.1:4200");
    let mut b = TestEndpoint::new("10.0.0.2:4200");
    a.pc.create_data_channel(DataChannelConfig::new("bye".to_owned()))
        .unwrap();
    let now = connect(&mut a, &mut b, start);

    a.pc.close(now);
    assert_eq!(a.pc.connection_state(), RTCPeerConnectionState::Closed);
    assert!(a.pc.create_offer().is_err());
    assert!(a
        .pc
        .handle_read(a.addr, b.addr, &[0, 1, 0, 0], now)
        .is_err());
}
