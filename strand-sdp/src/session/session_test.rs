use super::*;

const CANONICAL_OFFER: &str = "v=0\r\n\
o=- 4596489990601351948 2 IN IP4 127.0.0.1\r\n\
s=-\r\n\
t=0 0\r\n\
a=group:BUNDLE 0 1\r\n\
a=msid-semantic: WMS\r\n\
m=audio 9 UDP/TLS/RTP/SAVPF 111\r\n\
c=IN IP4 0.0.0.0\r\n\
a=rtcp:9 IN IP4 0.0.0.0\r\n\
a=ice-ufrag:yxYb\r\n\
a=ice-pwd:05iMxO9GujD2fUWXSoi0ByNd\r\n\
a=fingerprint:sha-256 84:0F:61:E5:24:F3:3E:09:4F:2A:1E:73:F9:3B:C4:B7:5D:D6:0E:2C:D2:35:2D:94:F2:A5:8F:E3:27:84:10:D4\r\n\
a=setup:actpass\r\n\
a=mid:0\r\n\
a=sendrecv\r\n\
a=rtpmap:111 opus/48000/2\r\n\
a=fmtp:111 minptime=10;useinbandfec=1\r\n\
m=video 9 UDP/TLS/RTP/SAVPF 96 97\r\n\
c=IN IP4 0.0.0.0\r\n\
a=mid:1\r\n\
a=recvonly\r\n\
a=rtpmap:96 VP8/90000\r\n\
a=rtpmap:97 rtx/90000\r\n\
a=fmtp:97 apt=96\r\n\
a=ssrc-group:FID 2541098696 3297810577\r\n\
a=rid:hi send\r\n\
a=simulcast:send hi;lo\r\n";

#[test]
fn test_unmarshal_marshal_round_trip() -> shared::error::Result<()> {
    let sd = SessionDescription::unmarshal(CANONICAL_OFFER)?;
    assert_eq!(sd.marshal(), CANONICAL_OFFER);
    Ok(())
}

#[test]
fn test_unmarshal_session_fields() -> shared::error::Result<()> {
    let sd = SessionDescription::unmarshal(CANONICAL_OFFER)?;

    assert_eq!(sd.version, 0);
    assert_eq!(sd.origin.session_id, 4596489990601351948);
    assert_eq!(sd.origin.session_version, 2);
    assert_eq!(sd.session_name, "-");
    assert_eq!(sd.time_descriptions.len(), 1);
    assert_eq!(sd.attribute("group"), Some(Some("BUNDLE 0 1")));
    assert_eq!(sd.media_descriptions.len(), 2);

    let audio = &sd.media_descriptions[0];
    assert_eq!(audio.media_name.media, "audio");
    assert_eq!(audio.media_name.port.value, 9);
    assert_eq!(audio.media_name.protos, vec!["UDP", "TLS", "RTP", "SAVPF"]);
    assert_eq!(audio.media_name.formats, vec!["111"]);
    assert_eq!(audio.attribute("mid"), Some(Some("0")));
    assert_eq!(audio.attribute("ice-ufrag"), Some(Some("yxYb")));
    assert!(audio.has_attribute("sendrecv"));

    let video = &sd.media_descriptions[1];
    assert_eq!(video.media_name.formats, vec!["96", "97"]);
    assert_eq!(
        video.attribute("ssrc-group"),
        Some(Some("FID 2541098696 3297810577"))
    );
    assert_eq!(video.attribute("simulcast"), Some(Some("send hi;lo")));
    Ok(())
}

#[test]
fn test_unmarshal_tolerates_lf_only() -> shared::error::Result<()> {
    let lf_only = CANONICAL_OFFER.replace("\r\n", "\n");
    let sd = SessionDescription::unmarshal(&lf_only)?;
    // output is normalized back to CRLF
    assert_eq!(sd.marshal(), CANONICAL_OFFER);
    Ok(())
}

#[test]
fn test_unmarshal_rejects_garbage() {
    assert!(SessionDescription::unmarshal("not sdp at all").is_err());
    assert!(SessionDescription::unmarshal("o=- 1 1 IN IP4 0.0.0.0\r\n").is_err());
    assert!(SessionDescription::unmarshal("v=0\r\nm=audio nine RTP/AVP 0\r\n").is_err());
}

#[test]
fn test_jsep_session_description_defaults() {
    let sd = SessionDescription::new_jsep_session_description();
    let out = sd.marshal();
    assert!(out.starts_with("v=0\r\n"));
    assert!(out.contains("s=-\r\n"));
    assert!(out.contains("t=0 0\r\n"));
}

#[test]
fn test_media_builder_helpers() {
    let md = crate::media::MediaDescription::new_jsep_media_description("audio".to_owned())
        .with_ice_credentials("ufrag".to_owned(), "pwd".to_owned())
        .with_codec(111, "opus".to_owned(), 48000, 2, "minptime=10".to_owned());

    assert_eq!(md.media_name.formats, vec!["111"]);
    assert_eq!(md.attribute("rtpmap"), Some(Some("111 opus/48000/2")));
    assert_eq!(md.attribute("fmtp"), Some(Some("111 minptime=10")));
    assert_eq!(md.attribute("ice-ufrag"), Some(Some("ufrag")));
}
