use super::*;
use crate::rtp_transceiver::default_codecs;

fn audio_plan() -> SessionPlan {
    SessionPlan {
        session_id: 1234,
        session_version: 2,
        ice_ufrag: "ufrag".to_owned(),
        ice_pwd: "pwd01234567890123456789".to_owned(),
        fingerprint: "sha-256 AA:BB".to_owned(),
        setup: "actpass".to_owned(),
        sections: vec![
            MediaSectionPlan {
                mid: "0".to_owned(),
                kind: SectionKind::Audio,
                direction: RTCRtpTransceiverDirection::Sendrecv,
                codecs: default_codecs(MediaKind::Audio),
                ssrcs: Some((111111, 222222, "cname".to_owned())),
                send_rids: vec![],
                candidates: vec![],
            },
            MediaSectionPlan {
                mid: "1".to_owned(),
                kind: SectionKind::Application,
                direction: RTCRtpTransceiverDirection::Sendrecv,
                codecs: vec![],
                ssrcs: None,
                send_rids: vec![],
                candidates: vec![],
            },
        ],
    }
}

#[test]
fn test_render_offer_has_expected_lines() {
    let rendered = render(&audio_plan()).marshal();

    assert!(rendered.contains("a=group:BUNDLE 0 1\r\n"));
    assert!(rendered.contains("m=audio 9 UDP/TLS/RTP/SAVPF 111\r\n"));
    assert!(rendered.contains("a=rtpmap:111 opus/48000/2\r\n"));
    assert!(rendered.contains("a=fmtp:111 minptime=10;useinbandfec=1\r\n"));
    assert!(rendered.contains("a=ice-ufrag:ufrag\r\n"));
    assert!(rendered.contains("a=fingerprint:sha-256 AA:BB\r\n"));
    assert!(rendered.contains("a=setup:actpass\r\n"));
    assert!(rendered.contains("a=mid:0\r\n"));
    assert!(rendered.contains("a=sendrecv\r\n"));
    assert!(rendered.contains("a=rtcp-mux\r\n"));
    assert!(rendered.contains("a=ssrc:111111 cname:cname\r\n"));
    assert!(rendered.contains("m=application 9 UDP/DTLS/SCTP webrtc-datachannel\r\n"));
    assert!(rendered.contains("a=sctp-port:5000\r\n"));
    assert!(rendered.contains("a=max-message-size:262144\r\n"));
}

#[test]
fn test_video_section_carries_rtx_and_fid() {
    let mut plan = audio_plan();
    plan.sections[0] = MediaSectionPlan {
        mid: "0".to_owned(),
        kind: SectionKind::Video,
        direction: RTCRtpTransceiverDirection::Sendonly,
        codecs: default_codecs(MediaKind::Video),
        ssrcs: Some((1000, 2000, "cname".to_owned())),
        send_rids: vec![],
        candidates: vec![],
    };
    let rendered = render(&plan).marshal();

    assert!(rendered.contains("a=rtpmap:96 VP8/90000\r\n"));
    assert!(rendered.contains("a=rtpmap:97 rtx/90000\r\n"));
    assert!(rendered.contains("a=fmtp:97 apt=96\r\n"));
    assert!(rendered.contains("a=rtcp-fb:96 nack\r\n"));
    assert!(rendered.contains("a=ssrc-group:FID 1000 2000\r\n"));
    assert!(rendered.contains("a=sendonly\r\n"));
}

#[test]
fn test_simulcast_section_renders_rid_lines() {
    let mut plan = audio_plan();
    plan.sections[0] = MediaSectionPlan {
        mid: "0".to_owned(),
        kind: SectionKind::Video,
        direction: RTCRtpTransceiverDirection::Sendonly,
        codecs: default_codecs(MediaKind::Video),
        ssrcs: Some((1000, 2000, "cname".to_owned())),
        send_rids: vec!["hi".to_owned(), "lo".to_owned()],
        candidates: vec![],
    };
    let rendered = render(&plan).marshal();
    assert!(rendered.contains("a=rid:hi send\r\n"));
    assert!(rendered.contains("a=rid:lo send\r\n"));
    assert!(rendered.contains("a=simulcast:send hi;lo\r\n"));
}

#[test]
fn test_parse_remote_round_trip() -> shared::error::Result<()> {
    let rendered = render(&audio_plan()).marshal();
    let parsed = sdp::SessionDescription::unmarshal(&rendered)?;
    let remote = parse_remote(&parsed)?;

    assert_eq!(remote.ice_ufrag, "ufrag");
    assert_eq!(remote.ice_pwd, "pwd01234567890123456789");
    assert_eq!(remote.fingerprint, "sha-256 AA:BB");
    assert_eq!(remote.setup, "actpass");
    assert_eq!(remote.media.len(), 2);

    let audio = &remote.media[0];
    assert_eq!(audio.mid, "0");
    assert_eq!(audio.direction, RTCRtpTransceiverDirection::Sendrecv);
    assert_eq!(audio.codecs.len(), 1);
    assert_eq!(audio.codecs[0].name, "opus");
    assert_eq!(audio.codecs[0].payload_type, 111);
    assert_eq!(audio.ssrcs, vec![111111]);

    assert!(matches!(remote.media[1].kind, SectionKind::Application));
    Ok(())
}

#[test]
fn test_parse_remote_video_rtx_folding() -> shared::error::Result<()> {
    let mut plan = audio_plan();
    plan.sections[0] = MediaSectionPlan {
        mid: "0".to_owned(),
        kind: SectionKind::Video,
        direction: RTCRtpTransceiverDirection::Sendrecv,
        codecs: default_codecs(MediaKind::Video),
        ssrcs: Some((1000, 2000, "cname".to_owned())),
        send_rids: vec![],
        candidates: vec![],
    };
    let parsed = sdp::SessionDescription::unmarshal(&render(&plan).marshal())?;
    let remote = parse_remote(&parsed)?;

    let video = &remote.media[0];
    let vp8 = video.codecs.iter().find(|c| c.name == "VP8").unwrap();
    assert_eq!(vp8.rtx_payload_type, Some(97));
    assert_eq!(video.ssrcs, vec![1000]);
    assert_eq!(video.rtx_ssrc, Some(2000));
    Ok(())
}

#[test]
fn test_parse_remote_requires_credentials() {
    let bare = "v=0\r\no=- 1 1 IN IP4 0.0.0.0\r\ns=-\r\nt=0 0\r\n\
m=audio 9 UDP/TLS/RTP/SAVPF 111\r\na=mid:0\r\n";
    let parsed = sdp::SessionDescription::unmarshal(bare).unwrap();
    assert!(parse_remote(&parsed).is_err());
}

#[test]
fn test_intersect_codecs_adopts_remote_numbering() {
    let ours = default_codecs(MediaKind::Video);
    let mut theirs = default_codecs(MediaKind::Video);
    // remote numbered VP8 differently
    theirs[0].payload_type = 120;
    theirs[0].rtx_payload_type = Some(121);
    theirs.retain(|c| c.name == "VP8");

    let negotiated = intersect_codecs(&ours, &theirs);
    assert_eq!(negotiated.len(), 1);
    assert_eq!(negotiated[0].payload_type, 120);
    assert_eq!(negotiated[0].rtx_payload_type, Some(121));
}
