//! Offer/answer rendering and parsing glue between the transceiver table
//! and the line-oriented sdp crate.

use sdp::{MediaDescription, SessionDescription};

use shared::error::{Error, Result};

use crate::rtp_transceiver::{MediaKind, RTCRtpCodec, RTCRtpTransceiverDirection};

pub(crate) const SCTP_PORT: u16 = 5000;
pub(crate) const MAX_MESSAGE_SIZE: u32 = 262144;

pub(crate) const EXT_MID_ID: u8 = 1;
pub(crate) const EXT_RID_ID: u8 = 2;
pub(crate) const EXT_ABS_SEND_TIME_ID: u8 = 3;
pub(crate) const EXT_TRANSPORT_CC_ID: u8 = 4;

/// One m-section to render.
pub(crate) struct MediaSectionPlan {
    pub mid: String,
    pub kind: SectionKind,
    pub direction: RTCRtpTransceiverDirection,
    pub codecs: Vec<RTCRtpCodec>,
    /// (primary ssrc, rtx ssrc, cname) for sending sections.
    pub ssrcs: Option<(u32, u32, String)>,
    /// RIDs offered for simulcast sending.
    pub send_rids: Vec<String>,
    pub candidates: Vec<String>,
}

#[derive(Copy, Clone, PartialEq, Eq)]
pub(crate) enum SectionKind {
    Audio,
    Video,
    Application,
}

impl SectionKind {
    fn media(&self) -> &'static str {
        match self {
            SectionKind::Audio => "audio",
            SectionKind::Video => "video",
            SectionKind::Application => "application",
        }
    }
}

pub(crate) struct SessionPlan {
    pub session_id: u64,
    pub session_version: u64,
    pub ice_ufrag: String,
    pub ice_pwd: String,
    pub fingerprint: String,
    /// "actpass", "active" or "passive".
    pub setup: String,
    pub sections: Vec<MediaSectionPlan>,
}

/// Renders a complete offer or answer.
pub(crate) fn render(plan: &SessionPlan) -> SessionDescription {
    let mut description = SessionDescription::new_jsep_session_description();
    description.origin.session_id = plan.session_id;
    description.origin.session_version = plan.session_version;
    description.origin.unicast_address = "127.0.0.1".to_owned();

    let bundle = plan
        .sections
        .iter()
        .map(|s| s.mid.as_str())
        .collect::<Vec<_>>()
        .join(" ");
    description = description
        .with_value_attribute("group".to_owned(), format!("BUNDLE {bundle}"))
        .with_value_attribute("msid-semantic".to_owned(), " WMS".to_owned());

    for section in &plan.sections {
        description = description.with_media(render_section(plan, section));
    }

    description
}

fn render_section(plan: &SessionPlan, section: &MediaSectionPlan) -> MediaDescription {
    let mut md = MediaDescription::new_jsep_media_description(section.kind.media().to_owned());

    if section.kind == SectionKind::Application {
        md.media_name.protos = vec!["UDP".to_owned(), "DTLS".to_owned(), "SCTP".to_owned()];
        md.media_name.formats = vec!["webrtc-datachannel".to_owned()];
    }

    md = md
        .with_ice_credentials(plan.ice_ufrag.clone(), plan.ice_pwd.clone())
        .with_value_attribute("fingerprint".to_owned(), plan.fingerprint.clone())
        .with_value_attribute("setup".to_owned(), plan.setup.clone())
        .with_value_attribute("mid".to_owned(), section.mid.clone());

    for candidate in &section.candidates {
        md = md.with_value_attribute("candidate".to_owned(), candidate.clone());
    }

    if section.kind == SectionKind::Application {
        return md
            .with_value_attribute("sctp-port".to_owned(), SCTP_PORT.to_string())
            .with_value_attribute("max-message-size".to_owned(), MAX_MESSAGE_SIZE.to_string());
    }

    md = md
        .with_value_attribute("rtcp".to_owned(), "9 IN IP4 0.0.0.0".to_owned())
        .with_value_attribute(
            "extmap".to_owned(),
            format!("{EXT_MID_ID} {}", rtp::extension::SDES_MID_URI),
        )
        .with_value_attribute(
            "extmap".to_owned(),
            format!("{EXT_RID_ID} {}", rtp::extension::SDES_RTP_STREAM_ID_URI),
        )
        .with_value_attribute(
            "extmap".to_owned(),
            format!("{EXT_ABS_SEND_TIME_ID} {}", rtp::extension::ABS_SEND_TIME_URI),
        )
        .with_value_attribute(
            "extmap".to_owned(),
            format!("{EXT_TRANSPORT_CC_ID} {}", rtp::extension::TRANSPORT_CC_URI),
        )
        .with_property_attribute(section.direction.as_str().to_owned())
        .with_property_attribute("rtcp-mux".to_owned());

    for codec in &section.codecs {
        md = md.with_codec(
            codec.payload_type,
            codec.name.clone(),
            codec.clock_rate,
            codec.channels,
            codec.fmtp.clone(),
        );
        for fb in &codec.rtcp_fb {
            md = md.with_value_attribute(
                "rtcp-fb".to_owned(),
                format!("{} {}", codec.payload_type, fb),
            );
        }
        if let Some(rtx_payload_type) = codec.rtx_payload_type {
            md = md.with_codec(
                rtx_payload_type,
                "rtx".to_owned(),
                codec.clock_rate,
                0,
                format!("apt={}", codec.payload_type),
            );
        }
    }

    for rid in &section.send_rids {
        md = md.with_value_attribute("rid".to_owned(), format!("{rid} send"));
    }
    if !section.send_rids.is_empty() {
        md = md.with_value_attribute(
            "simulcast".to_owned(),
            format!("send {}", section.send_rids.join(";")),
        );
    }

    if section.direction.has_send() {
        if let Some((ssrc, rtx_ssrc, cname)) = &section.ssrcs {
            if section.send_rids.is_empty() {
                md = md
                    .with_value_attribute(
                        "ssrc-group".to_owned(),
                        format!("FID {ssrc} {rtx_ssrc}"),
                    )
                    .with_value_attribute("ssrc".to_owned(), format!("{ssrc} cname:{cname}"))
                    .with_value_attribute(
                        "ssrc".to_owned(),
                        format!("{rtx_ssrc} cname:{cname}"),
                    );
            }
        }
    }

    md
}

/// Everything the session needs from one remote m-section.
pub(crate) struct RemoteMedia {
    pub mid: String,
    pub kind: SectionKind,
    pub direction: RTCRtpTransceiverDirection,
    pub codecs: Vec<RTCRtpCodec>,
    pub ssrcs: Vec<u32>,
    pub rtx_ssrc: Option<u32>,
    /// RIDs the remote announces for sending (we receive these layers).
    pub recv_rids: Vec<String>,
    pub candidates: Vec<String>,
}

pub(crate) struct RemoteDescription {
    pub ice_ufrag: String,
    pub ice_pwd: String,
    pub fingerprint: String,
    pub setup: String,
    pub media: Vec<RemoteMedia>,
}

/// Extracts transport parameters and per-section media facts from a
/// remote description.
pub(crate) fn parse_remote(parsed: &SessionDescription) -> Result<RemoteDescription> {
    let mut ice_ufrag = None;
    let mut ice_pwd = None;
    let mut fingerprint = None;
    let mut setup = None;

    // transport attributes may sit at session or media level
    if let Some(Some(value)) = parsed.attribute("ice-ufrag") {
        ice_ufrag = Some(value.to_owned());
    }
    if let Some(Some(value)) = parsed.attribute("ice-pwd") {
        ice_pwd = Some(value.to_owned());
    }
    if let Some(Some(value)) = parsed.attribute("fingerprint") {
        fingerprint = Some(value.to_owned());
    }

    let mut media = vec![];
    for (index, md) in parsed.media_descriptions.iter().enumerate() {
        if let Some(Some(value)) = md.attribute("ice-ufrag") {
            ice_ufrag.get_or_insert_with(|| value.to_owned());
        }
        if let Some(Some(value)) = md.attribute("ice-pwd") {
            ice_pwd.get_or_insert_with(|| value.to_owned());
        }
        if let Some(Some(value)) = md.attribute("fingerprint") {
            fingerprint.get_or_insert_with(|| value.to_owned());
        }
        if let Some(Some(value)) = md.attribute("setup") {
            setup.get_or_insert_with(|| value.to_owned());
        }

        let kind = match md.media_name.media.as_str() {
            "audio" => SectionKind::Audio,
            "video" => SectionKind::Video,
            "application" => SectionKind::Application,
            other => {
                return Err(Error::SdpInvalidValue(other.to_owned()));
            }
        };

        let mid = md
            .attribute("mid")
            .flatten()
            .map(str::to_owned)
            .unwrap_or_else(|| index.to_string());

        let direction = ["sendrecv", "sendonly", "recvonly", "inactive"]
            .iter()
            .find(|d| md.has_attribute(d))
            .and_then(|d| RTCRtpTransceiverDirection::from_str(d))
            .unwrap_or_default();

        let codecs = parse_codecs(md);

        // ssrc-group:FID <primary> <rtx>
        let mut ssrcs: Vec<u32> = vec![];
        let mut rtx_ssrc = None;
        if let Some(Some(group)) = md.attribute("ssrc-group") {
            let fields: Vec<&str> = group.split_whitespace().collect();
            if fields.len() >= 3 && fields[0] == "FID" {
                if let (Ok(primary), Ok(rtx)) = (fields[1].parse(), fields[2].parse()) {
                    ssrcs.push(primary);
                    rtx_ssrc = Some(rtx);
                }
            }
        }
        for value in md.attributes_with_key("ssrc") {
            if let Some(ssrc_str) = value.split_whitespace().next() {
                if let Ok(ssrc) = ssrc_str.parse::<u32>() {
                    if !ssrcs.contains(&ssrc) && Some(ssrc) != rtx_ssrc {
                        ssrcs.push(ssrc);
                    }
                }
            }
        }

        let mut recv_rids = vec![];
        for value in md.attributes_with_key("rid") {
            let mut fields = value.split_whitespace();
            if let (Some(rid), Some("send")) = (fields.next(), fields.next()) {
                recv_rids.push(rid.to_owned());
            }
        }

        let candidates = md
            .attributes_with_key("candidate")
            .map(str::to_owned)
            .collect();

        media.push(RemoteMedia {
            mid,
            kind,
            direction,
            codecs,
            ssrcs,
            rtx_ssrc,
            recv_rids,
            candidates,
        });
    }

    Ok(RemoteDescription {
        ice_ufrag: ice_ufrag.ok_or(Error::ErrSessionDescriptionMissingIceUfrag)?,
        ice_pwd: ice_pwd.ok_or(Error::ErrSessionDescriptionMissingIcePwd)?,
        fingerprint: fingerprint.ok_or(Error::ErrSessionDescriptionNoFingerprint)?,
        setup: setup.unwrap_or_else(|| "actpass".to_owned()),
        media,
    })
}

/// Rebuilds the codec table of one remote m-section from its rtpmap,
/// fmtp and rtcp-fb attributes, folding rtx entries into their apt
/// targets.
fn parse_codecs(md: &MediaDescription) -> Vec<RTCRtpCodec> {
    struct RawCodec {
        payload_type: u8,
        name: String,
        clock_rate: u32,
        channels: u16,
        fmtp: String,
        rtcp_fb: Vec<String>,
    }

    let mut raw: Vec<RawCodec> = vec![];
    for value in md.attributes_with_key("rtpmap") {
        let (pt_str, rest) = match value.split_once(' ') {
            Some(parts) => parts,
            None => continue,
        };
        let payload_type: u8 = match pt_str.parse() {
            Ok(pt) => pt,
            Err(_) => continue,
        };
        let mut parts = rest.split('/');
        let name = parts.next().unwrap_or_default().to_owned();
        let clock_rate: u32 = parts.next().and_then(|c| c.parse().ok()).unwrap_or(90000);
        let channels: u16 = parts.next().and_then(|c| c.parse().ok()).unwrap_or(0);
        raw.push(RawCodec {
            payload_type,
            name,
            clock_rate,
            channels,
            fmtp: String::new(),
            rtcp_fb: vec![],
        });
    }

    for value in md.attributes_with_key("fmtp") {
        if let Some((pt_str, params)) = value.split_once(' ') {
            if let Ok(payload_type) = pt_str.parse::<u8>() {
                if let Some(codec) = raw.iter_mut().find(|c| c.payload_type == payload_type) {
                    codec.fmtp = params.to_owned();
                }
            }
        }
    }
    for value in md.attributes_with_key("rtcp-fb") {
        if let Some((pt_str, fb)) = value.split_once(' ') {
            if let Ok(payload_type) = pt_str.parse::<u8>() {
                if let Some(codec) = raw.iter_mut().find(|c| c.payload_type == payload_type) {
                    codec.rtcp_fb.push(fb.to_owned());
                }
            }
        }
    }

    // fold rtx codecs into their associated payload types
    let mut codecs: Vec<RTCRtpCodec> = vec![];
    for codec in raw.iter().filter(|c| !c.name.eq_ignore_ascii_case("rtx")) {
        let rtx_payload_type = raw
            .iter()
            .filter(|c| c.name.eq_ignore_ascii_case("rtx"))
            .find(|c| {
                c.fmtp
                    .split(';')
                    .any(|p| p.trim() == format!("apt={}", codec.payload_type))
            })
            .map(|c| c.payload_type);
        codecs.push(RTCRtpCodec {
            payload_type: codec.payload_type,
            name: codec.name.clone(),
            clock_rate: codec.clock_rate,
            channels: codec.channels,
            fmtp: codec.fmtp.clone(),
            rtcp_fb: codec.rtcp_fb.clone(),
            rtx_payload_type,
        });
    }
    codecs
}

/// Intersects our codec preferences with the remote list, adopting the
/// remote payload type numbering (answer rule).
pub(crate) fn intersect_codecs(
    ours: &[RTCRtpCodec],
    theirs: &[RTCRtpCodec],
) -> Vec<RTCRtpCodec> {
    let mut out = vec![];
    for remote in theirs {
        if let Some(local) = ours
            .iter()
            .find(|c| c.name.eq_ignore_ascii_case(&remote.name) && c.clock_rate == remote.clock_rate)
        {
            let mut negotiated = remote.clone();
            // keep our feedback subset if the remote advertised more
            negotiated
                .rtcp_fb
                .retain(|fb| local.rtcp_fb.contains(fb));
            out.push(negotiated);
        }
    }
    out
}

#[cfg(test)]
mod sdp_test;
