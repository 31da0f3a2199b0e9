use super::*;
use std::net::{IpAddr, Ipv4Addr};

fn addr(last: u8, port: u16) -> SocketAddr {
    SocketAddr::new(IpAddr::V4(Ipv4Addr::new(10, 0, 0, last)), port)
}

fn agent_pair() -> (Agent, Agent) {
    let _ = env_logger::builder().is_test(true).try_init();
    let mut controlling = Agent::new(AgentConfig::new(true));
    let mut controlled = Agent::new(AgentConfig::new(false));

    let a_creds = controlling.local_credentials().clone();
    let b_creds = controlled.local_credentials().clone();
    controlling
        .set_remote_credentials(b_creds.ufrag, b_creds.pwd)
        .unwrap();
    controlled
        .set_remote_credentials(a_creds.ufrag, a_creds.pwd)
        .unwrap();

    controlling.add_local_candidate(Candidate::host(addr(1, 4000).ip(), 4000));
    controlled.add_local_candidate(Candidate::host(addr(2, 5000).ip(), 5000));

    controlling.add_remote_candidate(Candidate::host(addr(2, 5000).ip(), 5000));
    controlled.add_remote_candidate(Candidate::host(addr(1, 4000).ip(), 4000));

    (controlling, controlled)
}

/// Delivers every queued transmit to the other agent, addressed by the
/// candidate sockets.
fn pump(a: &mut Agent, b: &mut Agent, now: Instant) {
    for _ in 0..32 {
        let mut progressed = false;
        while let Some(transmit) = a.poll_transmit() {
            let _ = b.handle_read(
                transmit.peer_addr,
                transmit.local_addr,
                &transmit.message,
                now,
            );
            progressed = true;
        }
        while let Some(transmit) = b.poll_transmit() {
            let _ = a.handle_read(
                transmit.peer_addr,
                transmit.local_addr,
                &transmit.message,
                now,
            );
            progressed = true;
        }
        if !progressed {
            break;
        }
    }
}

fn run_until_connected(a: &mut Agent, b: &mut Agent) {
    let mut now = Instant::now();
    a.start(now);
    b.start(now);
    for _ in 0..64 {
        a.handle_timeout(now).unwrap();
        b.handle_timeout(now).unwrap();
        pump(a, b, now);
        if a.selected_pair().is_some() && b.selected_pair().is_some() {
            return;
        }
        now += Duration::from_millis(50);
    }
    panic!(
        "agents never connected: a={} b={}",
        a.connection_state(),
        b.connection_state()
    );
}

#[test]
fn test_connectivity_host_to_host() {
    let (mut controlling, mut controlled) = agent_pair();
    run_until_connected(&mut controlling, &mut controlled);

    let (local, remote) = controlling.selected_pair().unwrap();
    assert_eq!(local.addr(), addr(1, 4000));
    assert_eq!(remote.addr(), addr(2, 5000));

    assert!(matches!(
        controlling.connection_state(),
        ConnectionState::Connected | ConnectionState::Completed
    ));
    assert!(matches!(
        controlled.connection_state(),
        ConnectionState::Connected | ConnectionState::Completed
    ));
}

#[test]
fn test_state_advances_monotonically() {
    let (mut controlling, mut controlled) = agent_pair();
    run_until_connected(&mut controlling, &mut controlled);

    let mut seen = vec![ConnectionState::New];
    while let Some(event) = controlling.poll_event() {
        if let Event::ConnectionStateChange(state) = event {
            seen.push(state);
        }
    }
    // new -> checking -> connected (-> completed)
    let expected_prefix = [
        ConnectionState::New,
        ConnectionState::Checking,
        ConnectionState::Connected,
    ];
    assert!(seen.len() >= 3, "states seen: {seen:?}");
    assert_eq!(&seen[..3], &expected_prefix);
    if let Some(last) = seen.get(3) {
        assert_eq!(*last, ConnectionState::Completed);
    }
}

#[test]
fn test_selected_pair_event_emitted() {
    let (mut controlling, mut controlled) = agent_pair();
    run_until_connected(&mut controlling, &mut controlled);

    let mut pair_event = false;
    while let Some(event) = controlled.poll_event() {
        if matches!(event, Event::SelectedCandidatePairChange(_, _)) {
            pair_event = true;
        }
    }
    assert!(pair_event);
}

#[test]
fn test_check_with_wrong_password_is_dropped() {
    let (mut controlling, mut controlled) = agent_pair();
    // the controlling agent signs its checks with a bad password, so the
    // controlled side silently discards them and nomination never happens
    let b_creds = controlled.local_credentials().clone();
    controlling
        .set_remote_credentials(b_creds.ufrag, "wrong-password-entirely".to_owned())
        .unwrap();

    let mut now = Instant::now();
    controlling.start(now);
    controlled.start(now);
    for _ in 0..8 {
        controlling.handle_timeout(now).unwrap();
        controlled.handle_timeout(now).unwrap();
        pump(&mut controlling, &mut controlled, now);
        now += Duration::from_millis(50);
    }

    assert!(controlling.selected_pair().is_none());
}

#[test]
fn test_set_remote_credentials_validation() {
    let mut agent = Agent::new(AgentConfig::new(true));
    assert_eq!(
        agent.set_remote_credentials(String::new(), "pwd".to_owned()),
        Err(Error::ErrRemoteUfragEmpty)
    );
    assert_eq!(
        agent.set_remote_credentials("ufrag".to_owned(), String::new()),
        Err(Error::ErrRemotePwdEmpty)
    );
}

#[test]
fn test_gathering_emits_requests_and_learns_srflx() {
    let _ = env_logger::builder().is_test(true).try_init();
    let server = addr(200, 3478);
    let mut config = AgentConfig::new(true);
    config.stun_servers = vec![server];
    let mut agent = Agent::new(config);
    agent.add_local_candidate(Candidate::host(addr(1, 4000).ip(), 4000));

    let now = Instant::now();
    agent.gather_server_reflexive(now);

    let transmit = agent.poll_transmit().expect("binding request queued");
    assert_eq!(transmit.peer_addr, server);

    // fake a server response with the mapped address
    let mut request = Message::new();
    request.unmarshal_binary(&transmit.message).unwrap();
    let mut response = Message::new();
    response.set_type(BINDING_SUCCESS);
    response.transaction_id = request.transaction_id;
    response.write_header();
    XorMappedAddress {
        ip: "203.0.113.7".parse().unwrap(),
        port: 61000,
    }
    .add_to(&mut response)
    .unwrap();

    agent
        .handle_read(transmit.local_addr, server, &response.raw, now)
        .unwrap();

    let srflx = agent
        .local_candidates()
        .iter()
        .find(|c| c.typ == CandidateType::ServerReflexive)
        .expect("srflx candidate learned");
    assert_eq!(srflx.port, 61000);
    assert_eq!(srflx.related_address, Some(addr(1, 4000)));

    let mut trickled = false;
    while let Some(event) = agent.poll_event() {
        if matches!(event, Event::NewLocalCandidate(_)) {
            trickled = true;
        }
    }
    assert!(trickled);
}

#[test]
fn test_closed_agent_rejects_reads() {
    let (mut controlling, _) = agent_pair();
    controlling.close();
    assert_eq!(
        controlling.handle_read(addr(1, 4000), addr(2, 5000), &[0, 1, 0, 0], Instant::now()),
        Err(Error::ErrAgentClosed)
    );
}
