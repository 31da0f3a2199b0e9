use super::*;

#[test]
fn test_unmarshal_host_candidate() -> Result<()> {
    let candidate = unmarshal_candidate(
        "candidate:6815297761 1 udp 2130706431 192.168.1.100 31102 typ host generation 0 ufrag b7l3",
    )?;

    assert_eq!(candidate.foundation, "6815297761");
    assert_eq!(candidate.component, 1);
    assert_eq!(candidate.transport, "udp");
    assert_eq!(candidate.priority, 2130706431);
    assert_eq!(candidate.address, "192.168.1.100".parse::<IpAddr>().unwrap());
    assert_eq!(candidate.port, 31102);
    assert_eq!(candidate.typ, CandidateType::Host);
    assert_eq!(candidate.generation, Some(0));
    assert_eq!(candidate.ufrag.as_deref(), Some("b7l3"));
    Ok(())
}

#[test]
fn test_candidate_round_trip() -> Result<()> {
    let raw =
        "candidate:6815297761 1 udp 2130706431 192.168.1.100 31102 typ host generation 0 ufrag b7l3";
    let candidate = unmarshal_candidate(raw)?;
    assert_eq!(candidate.marshal(), raw);

    let reparsed = unmarshal_candidate(&candidate.marshal())?;
    assert_eq!(reparsed, candidate);
    Ok(())
}

#[test]
fn test_unmarshal_srflx_candidate_with_related() -> Result<()> {
    let candidate = unmarshal_candidate(
        "842163049 1 udp 1677729535 203.0.113.9 40123 typ srflx raddr 10.0.0.2 rport 54321",
    )?;
    assert_eq!(candidate.typ, CandidateType::ServerReflexive);
    assert_eq!(
        candidate.related_address,
        Some("10.0.0.2:54321".parse().unwrap())
    );
    Ok(())
}

#[test]
fn test_unmarshal_rejects_malformed() {
    assert!(unmarshal_candidate("candidate:1 1 udp").is_err());
    assert!(unmarshal_candidate("candidate:1 one udp 1 1.2.3.4 80 typ host").is_err());
    assert!(unmarshal_candidate("candidate:1 1 udp 1 1.2.3.4 80 typ wat").is_err());
    assert!(unmarshal_candidate("candidate:1 1 udp 1 1.2.3.4 80 blah host").is_err());
}

#[test]
fn test_host_candidate_priority() {
    let candidate = Candidate::host("10.0.0.1".parse().unwrap(), 4000);
    // type pref 126, local pref 65535, component 1
    assert_eq!(candidate.priority, (126 << 24) | (65535 << 8) | 255);
}

#[test]
fn test_type_preferences() {
    assert_eq!(CandidateType::Host.preference(), 126);
    assert_eq!(CandidateType::PeerReflexive.preference(), 110);
    assert_eq!(CandidateType::ServerReflexive.preference(), 100);
    assert_eq!(CandidateType::Relay.preference(), 0);
}

#[test]
fn test_foundation_groups_equivalent_candidates() {
    let a = Candidate::host("10.0.0.1".parse().unwrap(), 4000);
    let b = Candidate::host("10.0.0.1".parse().unwrap(), 4002);
    let c = Candidate::host("10.0.0.2".parse().unwrap(), 4000);
    assert_eq!(a.foundation, b.foundation);
    assert_ne!(a.foundation, c.foundation);
}
