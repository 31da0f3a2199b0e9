pub mod certificate;
pub mod configuration;
pub mod sdp;
pub mod sdp_type;
pub mod state;

use std::collections::VecDeque;
use std::net::SocketAddr;
use std::time::{Duration, Instant};

use bytes::{Bytes, BytesMut};
use log::{debug, trace, warn};

use data::data_channel::{DataChannel, DataChannelConfig, DataChannelMessage, DataChannelState};
use data::message::Message as DcepMessage;
use dtls::{DTLSConn, DtlsEvent, HandshakeConfig};
use ice::{unmarshal_candidate, Agent, AgentConfig, Candidate, ConnectionState};
use sctp::{
    Association, AssociationConfig, AssociationEvent, PayloadProtocolIdentifier, Side,
};
use shared::error::{Error, Result};
use shared::marshal::{Marshal, Unmarshal};
use srtp::{Context as SrtpContext, ProtectionProfile};

use crate::peer_connection::certificate::RTCCertificate;
use crate::peer_connection::configuration::{parse_stun_url, RTCConfiguration};
use crate::peer_connection::sdp::{
    intersect_codecs, parse_remote, render, MediaSectionPlan, RemoteDescription, SectionKind,
    SessionPlan, EXT_MID_ID, EXT_RID_ID,
};
use crate::peer_connection::sdp_type::{RTCSdpType, RTCSessionDescription};
use crate::peer_connection::state::{
    RTCIceGatheringState, RTCPeerConnectionState, RTCSignalingState,
};
use crate::rtp_transceiver::{
    MediaKind, RTCRtpTransceiver, RTCRtpTransceiverDirection, ReceiverTrack,
};
use crate::statistics;

const RTCP_REPORT_INTERVAL: Duration = Duration::from_secs(1);
const NACK_CHECK_INTERVAL: Duration = Duration::from_millis(100);
const KEYING_MATERIAL_LABEL: &str = "EXTRACTOR-dtls_srtp";

/// An outbound datagram addressed by the selected candidate pair.
#[derive(Debug)]
pub struct Transmit {
    pub local_addr: SocketAddr,
    pub peer_addr: SocketAddr,
    pub message: BytesMut,
}

/// Typed events surfaced to the embedding application.
#[derive(Debug, PartialEq)]
pub enum PeerConnectionEvent {
    SignalingStateChange(RTCSignalingState),
    ConnectionStateChange(RTCPeerConnectionState),
    IceConnectionStateChange(ConnectionState),
    IceGatheringStateChange(RTCIceGatheringState),
    /// A local candidate to trickle to the peer.
    IceCandidate(String),
    NegotiationNeeded,
    /// A new inbound stream appeared on a transceiver.
    Track {
        mid: String,
        ssrc: u32,
        rid: Option<String>,
        kind: MediaKind,
    },
    /// An in-order RTP packet ready for depacketizing.
    RtpReceived {
        mid: String,
        rid: Option<String>,
        packet: rtp::packet::Packet,
    },
    /// The remote asked for a keyframe (PLI or FIR).
    KeyframeRequest { mid: String },
    DataChannelOpened { stream_id: u16, label: String },
    DataChannelMessage {
        stream_id: u16,
        message: DataChannelMessage,
    },
    DataChannelClosed { stream_id: u16 },
}

/// The session coordinator: owns the bundled ICE/DTLS/SRTP/SCTP stack,
/// the transceiver table and the data channels, and routes every
/// demultiplexed packet (spec: one event loop owns all session state).
pub struct PeerConnection {
    config: RTCConfiguration,
    certificate: RTCCertificate,

    signaling_state: RTCSignalingState,
    connection_state: RTCPeerConnectionState,
    ice_gathering_state: RTCIceGatheringState,

    local_description: Option<RTCSessionDescription>,
    remote_description: Option<RTCSessionDescription>,
    remote_parsed: Option<RemoteDescription>,

    session_id: u64,
    session_version: u64,
    cname: String,

    ice: Agent,
    dtls: Option<DTLSConn>,
    /// true = DTLS client (the "active" side).
    dtls_role: Option<bool>,
    srtp_tx: Option<SrtpContext>,
    srtp_rx: Option<SrtpContext>,
    sctp: Option<Association>,
    has_application_section: bool,

    pub(crate) transceivers: Vec<RTCRtpTransceiver>,
    data_channels: Vec<DataChannel>,
    /// Channels created before the SCTP transport existed.
    pending_channels: Vec<DataChannelConfig>,
    next_even_stream_id: u16,
    next_odd_stream_id: u16,

    events: VecDeque<PeerConnectionEvent>,
    transmits: VecDeque<Transmit>,

    started_at: Option<Instant>,
    last_rtcp_report: Option<Instant>,
    last_nack_check: Option<Instant>,

    pub(crate) stats_packets_sent: u64,
    pub(crate) stats_packets_received: u64,
    pub(crate) stats_bytes_sent: u64,
    pub(crate) stats_bytes_received: u64,

    closed: bool,
}

impl PeerConnection {
    pub fn new(config: RTCConfiguration) -> Result<Self> {
        let certificate = RTCCertificate::generate()?;
        let mut stun_servers = vec![];
        for server in &config.ice_servers {
            for raw in &server.urls {
                if let Ok(addr) = parse_stun_url(raw) {
                    stun_servers.push(addr);
                }
            }
        }

        // the role flips to controlled if we end up answering
        let mut agent_config = AgentConfig::new(true);
        agent_config.stun_servers = stun_servers;

        Ok(PeerConnection {
            config,
            certificate,
            signaling_state: RTCSignalingState::Stable,
            connection_state: RTCPeerConnectionState::New,
            ice_gathering_state: RTCIceGatheringState::New,
            local_description: None,
            remote_description: None,
            remote_parsed: None,
            session_id: rand::random::<u32>() as u64,
            session_version: 2,
            cname: shared::util::rand_alpha(16),
            ice: Agent::new(agent_config),
            dtls: None,
            dtls_role: None,
            srtp_tx: None,
            srtp_rx: None,
            sctp: None,
            has_application_section: false,
            transceivers: vec![],
            data_channels: vec![],
            pending_channels: vec![],
            next_even_stream_id: 0,
            next_odd_stream_id: 1,
            events: VecDeque::new(),
            transmits: VecDeque::new(),
            started_at: None,
            last_rtcp_report: None,
            last_nack_check: None,
            stats_packets_sent: 0,
            stats_packets_received: 0,
            stats_bytes_sent: 0,
            stats_bytes_received: 0,
            closed: false,
        })
    }

    // --- accessors -------------------------------------------------------

    pub fn signaling_state(&self) -> RTCSignalingState {
        self.signaling_state
    }

    pub fn connection_state(&self) -> RTCPeerConnectionState {
        self.connection_state
    }

    pub fn ice_connection_state(&self) -> ConnectionState {
        self.ice.connection_state()
    }

    pub fn ice_gathering_state(&self) -> RTCIceGatheringState {
        self.ice_gathering_state
    }

    pub fn local_description(&self) -> Option<&RTCSessionDescription> {
        self.local_description.as_ref()
    }

    pub fn remote_description(&self) -> Option<&RTCSessionDescription> {
        self.remote_description.as_ref()
    }

    pub(crate) fn certificate_fingerprint(&self) -> String {
        self.certificate.fingerprint()
    }

    pub(crate) fn ice_agent(&self) -> &Agent {
        &self.ice
    }

    pub(crate) fn data_channels(&self) -> &[DataChannel] {
        &self.data_channels
    }

    pub(crate) fn wall_clock_ms(&self, now: Instant) -> u64 {
        let elapsed = self
            .started_at
            .map(|started| now.duration_since(started).as_millis() as u64)
            .unwrap_or(0);
        self.config.wall_clock_base_ms + elapsed
    }

    // --- transceivers and channels --------------------------------------

    pub fn add_transceiver(
        &mut self,
        kind: MediaKind,
        direction: RTCRtpTransceiverDirection,
    ) -> Result<usize> {
        if self.closed {
            return Err(Error::ErrConnectionClosed);
        }
        self.transceivers
            .push(RTCRtpTransceiver::new(kind, direction));
        self.events.push_back(PeerConnectionEvent::NegotiationNeeded);
        Ok(self.transceivers.len() - 1)
    }

    /// Adds a simulcast send transceiver with its layer RIDs.
    pub fn add_simulcast_transceiver(
        &mut self,
        kind: MediaKind,
        rids: Vec<String>,
    ) -> Result<usize> {
        let index = self.add_transceiver(kind, RTCRtpTransceiverDirection::Sendonly)?;
        self.transceivers[index].simulcast_send_rids = rids;
        Ok(index)
    }

    pub fn transceivers(&self) -> &[RTCRtpTransceiver] {
        &self.transceivers
    }

    /// Creates a data channel. In-band channels DCEP-negotiate once the
    /// transport connects.
    pub fn create_data_channel(&mut self, config: DataChannelConfig) -> Result<()> {
        if self.closed {
            return Err(Error::ErrConnectionClosed);
        }
        if config.max_retransmits.is_some() && config.max_packet_life_time.is_some() {
            return Err(Error::ErrRetransmitsOrPacketLifeTime);
        }
        let first = self.data_channels.is_empty() && self.pending_channels.is_empty();
        self.pending_channels.push(config);
        if first {
            self.events.push_back(PeerConnectionEvent::NegotiationNeeded);
        }
        Ok(())
    }

    /// Sends a message on an open channel.
    pub fn data_channel_send(
        &mut self,
        stream_id: u16,
        message: DataChannelMessage,
        now: Instant,
    ) -> Result<()> {
        let channel = self
            .data_channels
            .iter_mut()
            .find(|c| c.stream_id == stream_id)
            .ok_or(Error::ErrDataChannelClosed)?;
        if channel.state != DataChannelState::Open {
            return Err(Error::ErrDataChannelClosed);
        }
        let reliability = channel.reliability();
        let ordered = channel.ordered;
        let (ppid, payload) = channel.outgoing(&message);

        let sctp = self.sctp.as_mut().ok_or(Error::ErrDataChannelClosed)?;
        sctp.write(stream_id, ppid, &payload, reliability, ordered, now)?;
        self.drive(now);
        Ok(())
    }

    /// Closes one data channel via an SCTP outgoing stream reset.
    pub fn data_channel_close(&mut self, stream_id: u16, now: Instant) -> Result<()> {
        if let Some(channel) = self
            .data_channels
            .iter_mut()
            .find(|c| c.stream_id == stream_id)
        {
            channel.state = DataChannelState::Closing;
            if let Some(sctp) = self.sctp.as_mut() {
                sctp.reset_stream(stream_id, now)?;
            }
        }
        Ok(())
    }

    pub fn data_channel_buffered_amount(&self, stream_id: u16) -> usize {
        self.sctp
            .as_ref()
            .map(|sctp| sctp.buffered_amount(stream_id))
            .unwrap_or(0)
    }

    // --- candidates ------------------------------------------------------

    /// Registers a bound local UDP socket address as a host candidate.
    /// The embedder owns the socket; the session only routes datagrams.
    pub fn add_host_address(&mut self, addr: SocketAddr) -> Result<()> {
        if self.closed {
            return Err(Error::ErrConnectionClosed);
        }
        let candidate = Candidate::host(addr.ip(), addr.port());
        self.events
            .push_back(PeerConnectionEvent::IceCandidate(candidate.marshal()));
        self.ice.add_local_candidate(candidate);
        if self.ice_gathering_state == RTCIceGatheringState::New {
            self.set_gathering_state(RTCIceGatheringState::Gathering);
        }
        Ok(())
    }

    /// Marks local gathering finished.
    pub fn end_of_candidates(&mut self) {
        self.set_gathering_state(RTCIceGatheringState::Complete);
    }

    /// Adds a remote candidate received over signaling.
    pub fn add_ice_candidate(&mut self, candidate: &str, now: Instant) -> Result<()> {
        if self.closed {
            return Err(Error::ErrConnectionClosed);
        }
        if self.remote_description.is_none() {
            return Err(Error::ErrNoRemoteDescription);
        }
        let candidate = unmarshal_candidate(candidate)?;
        self.ice.add_remote_candidate(candidate);
        self.drive(now);
        Ok(())
    }

    // --- offer / answer --------------------------------------------------

    /// Ensures every transceiver and the application section have mids.
    fn assign_mids(&mut self) {
        let mut next_mid = 0usize;
        for transceiver in &mut self.transceivers {
            if transceiver.mid.is_none() {
                transceiver.mid = Some(next_mid.to_string());
            }
            next_mid = next_mid.max(
                transceiver
                    .mid
                    .as_ref()
                    .and_then(|m| m.parse::<usize>().ok())
                    .map(|m| m + 1)
                    .unwrap_or(next_mid),
            );
        }
    }

    fn section_plans(&self, setup: &str) -> SessionPlan {
        let candidates: Vec<String> = self
            .ice
            .local_candidates()
            .iter()
            .map(|c| c.marshal().trim_start_matches("candidate:").to_owned())
            .collect();

        let mut sections = vec![];
        for transceiver in &self.transceivers {
            sections.push(MediaSectionPlan {
                mid: transceiver.mid.clone().unwrap_or_default(),
                kind: match transceiver.kind {
                    MediaKind::Audio => SectionKind::Audio,
                    MediaKind::Video => SectionKind::Video,
                },
                direction: transceiver.direction,
                codecs: transceiver.codecs.clone(),
                ssrcs: Some((
                    transceiver.sender.ssrc,
                    transceiver.sender.rtx_ssrc,
                    self.cname.clone(),
                )),
                send_rids: transceiver.simulcast_send_rids.clone(),
                candidates: candidates.clone(),
            });
        }

        if self.wants_application_section() {
            sections.push(MediaSectionPlan {
                mid: sections.len().to_string(),
                kind: SectionKind::Application,
                direction: RTCRtpTransceiverDirection::Sendrecv,
                codecs: vec![],
                ssrcs: None,
                send_rids: vec![],
                candidates,
            });
        }

        let credentials = self.ice.local_credentials();
        SessionPlan {
            session_id: self.session_id,
            session_version: self.session_version,
            ice_ufrag: credentials.ufrag.clone(),
            ice_pwd: credentials.pwd.clone(),
            fingerprint: self.certificate_fingerprint(),
            setup: setup.to_owned(),
            sections,
        }
    }

    fn wants_application_section(&self) -> bool {
        !self.data_channels.is_empty()
            || !self.pending_channels.is_empty()
            || self.has_application_section
    }

    pub fn create_offer(&mut self) -> Result<RTCSessionDescription> {
        if self.closed {
            return Err(Error::ErrConnectionClosed);
        }
        self.assign_mids();
        let plan = self.section_plans("actpass");
        Ok(RTCSessionDescription::offer(render(&plan).marshal()))
    }

    pub fn create_answer(&mut self) -> Result<RTCSessionDescription> {
        if self.closed {
            return Err(Error::ErrConnectionClosed);
        }
        if self.remote_parsed.is_none()
            || self.signaling_state != RTCSignalingState::HaveRemoteOffer
        {
            return Err(Error::ErrNoRemoteDescription);
        }
        // the answerer normally takes the active role (DTLS client),
        // unless the offerer already claimed it
        let setup = if self.dtls_role == Some(false) {
            "passive"
        } else {
            "active"
        };
        let plan = self.section_plans(setup);
        Ok(RTCSessionDescription::answer(render(&plan).marshal()))
    }

    pub fn set_local_description(
        &mut self,
        description: RTCSessionDescription,
        now: Instant,
    ) -> Result<()> {
        if self.closed {
            return Err(Error::ErrConnectionClosed);
        }

        let next_state = match (self.signaling_state, description.sdp_type) {
            (RTCSignalingState::Stable, RTCSdpType::Offer) => RTCSignalingState::HaveLocalOffer,
            (RTCSignalingState::HaveRemoteOffer, RTCSdpType::Answer) => RTCSignalingState::Stable,
            (RTCSignalingState::HaveRemoteOffer, RTCSdpType::Pranswer) => {
                RTCSignalingState::HaveLocalPranswer
            }
            (RTCSignalingState::HaveLocalPranswer, RTCSdpType::Answer) => RTCSignalingState::Stable,
            (RTCSignalingState::HaveLocalOffer, RTCSdpType::Rollback) => {
                self.local_description = None;
                self.set_signaling_state(RTCSignalingState::Stable);
                return Ok(());
            }
            _ => return Err(Error::ErrIncorrectSignalingState),
        };

        description.parsed()?;
        self.local_description = Some(description.clone());
        self.set_signaling_state(next_state);

        if description.sdp_type == RTCSdpType::Answer && self.dtls_role.is_none() {
            // answerer default: the active side, i.e. the DTLS client
            self.dtls_role = Some(true);
        }

        if self.started_at.is_none() {
            self.started_at = Some(now);
            self.ice.start(now);
        }
        if self.ice_gathering_state == RTCIceGatheringState::New {
            self.set_gathering_state(RTCIceGatheringState::Gathering);
        }
        self.ice.gather_server_reflexive(now);
        self.drive(now);
        Ok(())
    }

    pub fn set_remote_description(
        &mut self,
        description: RTCSessionDescription,
        now: Instant,
    ) -> Result<()> {
        if self.closed {
            return Err(Error::ErrConnectionClosed);
        }

        let next_state = match (self.signaling_state, description.sdp_type) {
            (RTCSignalingState::Stable, RTCSdpType::Offer) => RTCSignalingState::HaveRemoteOffer,
            (RTCSignalingState::HaveLocalOffer, RTCSdpType::Answer) => RTCSignalingState::Stable,
            (RTCSignalingState::HaveLocalOffer, RTCSdpType::Pranswer) => {
                RTCSignalingState::HaveRemotePranswer
            }
            (RTCSignalingState::HaveRemotePranswer, RTCSdpType::Answer) => {
                RTCSignalingState::Stable
            }
            (RTCSignalingState::HaveRemoteOffer, RTCSdpType::Rollback) => {
                self.remote_description = None;
                self.remote_parsed = None;
                self.set_signaling_state(RTCSignalingState::Stable);
                return Ok(());
            }
            _ => return Err(Error::ErrIncorrectSignalingState),
        };

        let parsed = description.parsed()?;
        let remote = parse_remote(&parsed)?;

        self.ice
            .set_remote_credentials(remote.ice_ufrag.clone(), remote.ice_pwd.clone())?;

        // DTLS role from the remote setup attribute: when the remote is
        // (or will be) "active", it is the client and we take the server
        // side; otherwise we answer "active" and act as the client
        self.dtls_role = Some(remote.setup != "active");

        self.apply_remote_media(&remote, description.sdp_type, now)?;

        self.remote_description = Some(description);
        self.remote_parsed = Some(remote);
        self.set_signaling_state(next_state);

        if self.started_at.is_none() {
            self.started_at = Some(now);
            self.ice.start(now);
        }
        if self.connection_state == RTCPeerConnectionState::New {
            self.set_connection_state(RTCPeerConnectionState::Connecting);
        }
        self.drive(now);
        Ok(())
    }

    fn apply_remote_media(
        &mut self,
        remote: &RemoteDescription,
        sdp_type: RTCSdpType,
        _now: Instant,
    ) -> Result<()> {
        for media in &remote.media {
            match media.kind {
                SectionKind::Application => {
                    self.has_application_section = true;
                }
                kind => {
                    let media_kind = if kind == SectionKind::Audio {
                        MediaKind::Audio
                    } else {
                        MediaKind::Video
                    };

                    // match by mid, else adopt the section into a fresh
                    // transceiver
                    let index = self
                        .transceivers
                        .iter()
                        .position(|t| t.mid.as_deref() == Some(media.mid.as_str()));
                    let index = match index {
                        Some(index) => index,
                        None => {
                            let mut transceiver = RTCRtpTransceiver::new(
                                media_kind,
                                media.direction.reverse(),
                            );
                            transceiver.mid = Some(media.mid.clone());
                            self.transceivers.push(transceiver);
                            self.transceivers.len() - 1
                        }
                    };

                    let transceiver = &mut self.transceivers[index];
                    if sdp_type == RTCSdpType::Offer {
                        // answering: adopt the offerer's numbering
                        let negotiated = intersect_codecs(&transceiver.codecs, &media.codecs);
                        if negotiated.is_empty() && !media.codecs.is_empty() {
                            return Err(Error::ErrCodecNotFound);
                        }
                        transceiver.codecs = negotiated;
                    }
                    transceiver.remote_ssrcs = media.ssrcs.clone();
                    transceiver.remote_rtx_ssrc = media.rtx_ssrc;
                    for rid in &media.recv_rids {
                        // simulcast layers bind their SSRCs on arrival
                        if !transceiver
                            .receiver
                            .tracks
                            .iter()
                            .any(|t| t.rid.as_deref() == Some(rid))
                        {
                            transceiver
                                .receiver
                                .tracks
                                .push(ReceiverTrack::new(0, Some(rid.clone())));
                        }
                    }
                }
            }

            for candidate in &media.candidates {
                if let Ok(candidate) = unmarshal_candidate(candidate) {
                    self.ice.add_remote_candidate(candidate);
                }
            }
        }
        Ok(())
    }

    // --- the drive loop --------------------------------------------------

    /// Pumps every subsystem until nothing more moves. This is the single
    /// place cross-layer routing happens.
    fn drive(&mut self, now: Instant) {
        for _ in 0..16 {
            let mut progressed = false;
            progressed |= self.pump_ice(now);
            progressed |= self.pump_dtls(now);
            progressed |= self.pump_sctp(now);
            if !progressed {
                break;
            }
        }
    }

    fn pump_ice(&mut self, now: Instant) -> bool {
        let mut progressed = false;
        while let Some(transmit) = self.ice.poll_transmit() {
            self.transmits.push_back(Transmit {
                local_addr: transmit.local_addr,
                peer_addr: transmit.peer_addr,
                message: transmit.message,
            });
            progressed = true;
        }
        while let Some(event) = self.ice.poll_event() {
            progressed = true;
            match event {
                ice::Event::ConnectionStateChange(state) => {
                    self.events
                        .push_back(PeerConnectionEvent::IceConnectionStateChange(state));
                    match state {
                        ConnectionState::Failed => {
                            self.set_connection_state(RTCPeerConnectionState::Failed);
                        }
                        ConnectionState::Disconnected => {
                            self.set_connection_state(RTCPeerConnectionState::Disconnected);
                        }
                        _ => {}
                    }
                }
                ice::Event::SelectedCandidatePairChange(local, remote) => {
                    debug!("selected pair {local} -> {remote}");
                    self.maybe_start_dtls(now);
                }
                ice::Event::NewLocalCandidate(candidate) => {
                    self.events
                        .push_back(PeerConnectionEvent::IceCandidate(candidate.marshal()));
                }
            }
        }
        if self.ice.selected_pair().is_some() && self.dtls.is_none() {
            self.maybe_start_dtls(now);
            progressed |= self.dtls.is_some();
        }
        progressed
    }

    fn maybe_start_dtls(&mut self, now: Instant) {
        if self.dtls.is_some() {
            return;
        }
        let is_client = match self.dtls_role {
            Some(role) => role,
            None => return,
        };
        if self.ice.selected_pair().is_none() {
            return;
        }
        debug!(
            "starting dtls as {}",
            if is_client { "client" } else { "server" }
        );
        let handshake_config = HandshakeConfig::new(self.certificate.certificate.clone());
        self.dtls = Some(DTLSConn::new(handshake_config, is_client, now));
    }

    fn selected_addrs(&self) -> Option<(SocketAddr, SocketAddr)> {
        self.ice
            .selected_pair()
            .map(|(local, remote)| (local.addr(), remote.addr()))
    }

    fn pump_dtls(&mut self, now: Instant) -> bool {
        let (local_addr, peer_addr) = match self.selected_addrs() {
            Some(addrs) => addrs,
            None => return false,
        };
        let dtls = match &mut self.dtls {
            Some(dtls) => dtls,
            None => return false,
        };

        let mut progressed = false;
        while let Some(datagram) = dtls.poll_transmit() {
            self.transmits.push_back(Transmit {
                local_addr,
                peer_addr,
                message: BytesMut::from(&datagram[..]),
            });
            progressed = true;
        }

        let mut events = vec![];
        while let Some(event) = dtls.poll_event() {
            events.push(event);
        }

        let mut completed = false;
        let mut app_data = vec![];
        for event in events {
            progressed = true;
            match event {
                DtlsEvent::HandshakeComplete => completed = true,
                DtlsEvent::ApplicationData(data) => app_data.push(data),
                DtlsEvent::PeerClosed => {
                    self.set_connection_state(RTCPeerConnectionState::Disconnected);
                }
            }
        }

        if completed {
            if let Err(err) = self.on_dtls_complete(now) {
                warn!("dtls completion failed: {err}");
                self.set_connection_state(RTCPeerConnectionState::Failed);
            }
        }
        for data in app_data {
            if let Some(sctp) = &mut self.sctp {
                if let Err(err) = sctp.handle_read(&data, now) {
                    trace!("sctp dropped packet: {err}");
                }
            }
        }
        progressed
    }

    fn on_dtls_complete(&mut self, now: Instant) -> Result<()> {
        let dtls = self.dtls.as_ref().ok_or(Error::ErrConnClosed)?;

        // pin the peer certificate against the signaled fingerprint
        let remote_fingerprint = self
            .remote_parsed
            .as_ref()
            .map(|r| r.fingerprint.clone())
            .ok_or(Error::ErrSessionDescriptionNoFingerprint)?;
        let peer_certificate = dtls
            .peer_certificates()
            .first()
            .ok_or(Error::ErrNonCertificate)?;
        let actual = format!(
            "sha-256 {}",
            dtls::crypto::certificate_fingerprint(peer_certificate)
        );
        if !actual.eq_ignore_ascii_case(remote_fingerprint.trim()) {
            return Err(Error::ErrSessionDescriptionInvalidFingerprint);
        }

        // derive the SRTP contexts from the exported keying material
        let profile = ProtectionProfile::AeadAes128Gcm;
        let key_len = profile.key_len();
        let salt_len = profile.salt_len();
        let material =
            dtls.export_keying_material(KEYING_MATERIAL_LABEL, profile.keying_material_len())?;
        let client_key = &material[..key_len];
        let server_key = &material[key_len..2 * key_len];
        let client_salt = &material[2 * key_len..2 * key_len + salt_len];
        let server_salt = &material[2 * key_len + salt_len..];

        let is_client = self.dtls_role.unwrap_or(true);
        let (tx_key, tx_salt, rx_key, rx_salt) = if is_client {
            (client_key, client_salt, server_key, server_salt)
        } else {
            (server_key, server_salt, client_key, client_salt)
        };
        self.srtp_tx = Some(SrtpContext::new(tx_key, tx_salt, profile)?);
        self.srtp_rx = Some(SrtpContext::new(rx_key, rx_salt, profile)?);

        // data transport: DTLS client doubles as the SCTP client
        if self.has_application_section || self.wants_application_section() {
            let side = if is_client { Side::Client } else { Side::Server };
            self.sctp = Some(Association::new(AssociationConfig::new(side), now));
        }

        self.set_connection_state(RTCPeerConnectionState::Connected);
        Ok(())
    }

    fn pump_sctp(&mut self, now: Instant) -> bool {
        let mut progressed = false;

        let mut outgoing = vec![];
        let mut events = vec![];
        if let Some(sctp) = &mut self.sctp {
            while let Some(packet) = sctp.poll_transmit() {
                outgoing.push(packet);
            }
            while let Some(event) = sctp.poll_event() {
                events.push(event);
            }
        }

        // SCTP packets ride as DTLS application data
        if !outgoing.is_empty() {
            progressed = true;
            if let Some(dtls) = &mut self.dtls {
                for packet in outgoing {
                    if let Err(err) = dtls.write(&packet) {
                        trace!("dtls write failed: {err}");
                    }
                }
            }
        }

        for event in events {
            progressed = true;
            match event {
                AssociationEvent::Connected => self.on_sctp_connected(now),
                AssociationEvent::Data {
                    stream_id,
                    ppid,
                    data,
                    ..
                } => self.on_sctp_data(stream_id, ppid, data, now),
                AssociationEvent::StreamsReset { stream_ids } => {
                    for stream_id in stream_ids {
                        if let Some(channel) = self
                            .data_channels
                            .iter_mut()
                            .find(|c| c.stream_id == stream_id)
                        {
                            channel.state = DataChannelState::Closed;
                            self.events
                                .push_back(PeerConnectionEvent::DataChannelClosed { stream_id });
                        }
                    }
                }
                AssociationEvent::Closed => {
                    for channel in &mut self.data_channels {
                        if channel.state != DataChannelState::Closed {
                            channel.state = DataChannelState::Closed;
                            self.events.push_back(PeerConnectionEvent::DataChannelClosed {
                                stream_id: channel.stream_id,
                            });
                        }
                    }
                }
            }
        }

        progressed
    }

    fn next_stream_id(&mut self) -> u16 {
        // DTLS client owns even ids, server odd (RFC 8832 section 6)
        if self.dtls_role.unwrap_or(true) {
            let id = self.next_even_stream_id;
            self.next_even_stream_id += 2;
            id
        } else {
            let id = self.next_odd_stream_id;
            self.next_odd_stream_id += 2;
            id
        }
    }

    fn on_sctp_connected(&mut self, now: Instant) {
        debug!("sctp established, opening {} channel(s)", self.pending_channels.len());
        let pending = std::mem::take(&mut self.pending_channels);
        for config in pending {
            let stream_id = config.negotiated.unwrap_or_else(|| self.next_stream_id());
            match DataChannel::dial(&config, stream_id) {
                Ok((mut channel, open)) => {
                    match open {
                        Some(open) => {
                            if let Some(sctp) = &mut self.sctp {
                                let _ = sctp.write(
                                    stream_id,
                                    PayloadProtocolIdentifier::Dcep,
                                    &open,
                                    sctp::ReliabilityType::Reliable,
                                    true,
                                    now,
                                );
                            }
                        }
                        None => {
                            channel.on_transport_open();
                            self.events.push_back(PeerConnectionEvent::DataChannelOpened {
                                stream_id,
                                label: channel.label.clone(),
                            });
                        }
                    }
                    self.data_channels.push(channel);
                }
                Err(err) => warn!("data channel open failed: {err}"),
            }
        }
    }

    fn on_sctp_data(
        &mut self,
        stream_id: u16,
        ppid: PayloadProtocolIdentifier,
        data: Bytes,
        now: Instant,
    ) {
        if ppid == PayloadProtocolIdentifier::Dcep {
            match DcepMessage::unmarshal(&data) {
                Ok(DcepMessage::Open(open)) => match DataChannel::accept(stream_id, open) {
                    Ok((channel, ack)) => {
                        if let Some(sctp) = &mut self.sctp {
                            let _ = sctp.write(
                                stream_id,
                                PayloadProtocolIdentifier::Dcep,
                                &ack,
                                sctp::ReliabilityType::Reliable,
                                true,
                                now,
                            );
                        }
                        self.events.push_back(PeerConnectionEvent::DataChannelOpened {
                            stream_id,
                            label: channel.label.clone(),
                        });
                        self.data_channels.push(channel);
                    }
                    Err(err) => warn!("rejecting DCEP open: {err}"),
                },
                Ok(DcepMessage::Ack(_)) => {
                    if let Some(channel) = self
                        .data_channels
                        .iter_mut()
                        .find(|c| c.stream_id == stream_id)
                    {
                        channel.handle_ack();
                        if channel.state == DataChannelState::Open {
                            self.events.push_back(PeerConnectionEvent::DataChannelOpened {
                                stream_id,
                                label: channel.label.clone(),
                            });
                        }
                    }
                }
                Err(err) => warn!("bad DCEP message: {err}"),
            }
            return;
        }

        if let Some(channel) = self
            .data_channels
            .iter_mut()
            .find(|c| c.stream_id == stream_id)
        {
            match channel.incoming(ppid, data) {
                Ok(message) => self
                    .events
                    .push_back(PeerConnectionEvent::DataChannelMessage { stream_id, message }),
                Err(err) => warn!("undecodable channel message: {err}"),
            }
        }
    }

    // --- I/O surface -----------------------------------------------------

    /// Feeds one received UDP datagram, demultiplexed by first byte
    /// (RFC 7983): STUN, DTLS or RTP/RTCP.
    pub fn handle_read(
        &mut self,
        local_addr: SocketAddr,
        peer_addr: SocketAddr,
        datagram: &[u8],
        now: Instant,
    ) -> Result<()> {
        if self.closed {
            return Err(Error::ErrConnectionClosed);
        }
        self.stats_packets_received += 1;
        self.stats_bytes_received += datagram.len() as u64;

        if shared::util::match_stun(datagram) {
            self.ice.handle_read(local_addr, peer_addr, datagram, now)?;
        } else if shared::util::match_dtls(datagram) {
            self.ice.note_activity(now);
            if self.dtls.is_none() {
                self.maybe_start_dtls(now);
            }
            if let Some(dtls) = &mut self.dtls {
                dtls.handle_read(datagram, now)?;
            }
        } else if shared::util::match_srtcp(datagram) {
            self.ice.note_activity(now);
            self.handle_rtcp(datagram)?;
        } else if shared::util::match_srtp(datagram) {
            self.ice.note_activity(now);
            self.handle_rtp(datagram, now)?;
        } else {
            trace!("undemuxable datagram, discarding");
        }

        self.drive(now);
        Ok(())
    }

    fn handle_rtp(&mut self, datagram: &[u8], now: Instant) -> Result<()> {
        let srtp_rx = match &mut self.srtp_rx {
            Some(context) => context,
            None => return Ok(()), // media before keys: drop silently
        };
        let decrypted = match srtp_rx.unprotect_rtp(datagram) {
            Ok(decrypted) => decrypted,
            Err(err) => {
                trace!("srtp discard: {err}");
                return Ok(());
            }
        };

        let mut reader = &decrypted[..];
        let mut packet = rtp::packet::Packet::unmarshal(&mut reader)?;

        // route (a) by known SSRC, (b) by MID extension, (c) by payload
        // type; otherwise adopt a new inbound stream
        let ssrc = packet.header.ssrc;
        let mid_hint = packet
            .header
            .get_extension(EXT_MID_ID)
            .and_then(|raw| String::from_utf8(raw.to_vec()).ok());
        let rid_hint = packet
            .header
            .get_extension(EXT_RID_ID)
            .and_then(|raw| String::from_utf8(raw.to_vec()).ok());

        let index = self.route_rtp(ssrc, packet.header.payload_type, mid_hint, &rid_hint);
        let index = match index {
            Some(index) => index,
            None => {
                trace!("unroutable rtp ssrc={ssrc}, discarding");
                return Ok(());
            }
        };

        let transceiver = &mut self.transceivers[index];
        let mid = transceiver.mid.clone().unwrap_or_default();

        // unwrap RTX onto the primary stream
        let mut rid = rid_hint;
        if Some(ssrc) == transceiver.remote_rtx_ssrc
            || transceiver
                .codec_for_payload_type(packet.header.payload_type)
                .map(|(_, is_rtx)| is_rtx)
                .unwrap_or(false)
        {
            let (codec, _) = transceiver
                .codec_for_payload_type(packet.header.payload_type)
                .ok_or(Error::ErrCodecNotFound)?;
            let primary_ssrc = *transceiver.remote_ssrcs.first().unwrap_or(&ssrc);
            packet = rtp::rtx::unwrap(&packet, primary_ssrc, codec.payload_type)?;
            rid = None;
        }

        // find or create the receiver track for this (ssrc, rid)
        let packet_ssrc = packet.header.ssrc;
        let track_index = match transceiver.receiver.tracks.iter().position(|t| {
            t.ssrc == packet_ssrc || (t.ssrc == 0 && rid.is_some() && t.rid == rid)
        }) {
            Some(track_index) => {
                if transceiver.receiver.tracks[track_index].ssrc == 0 {
                    transceiver.receiver.tracks[track_index].ssrc = packet_ssrc;
                    self.events.push_back(PeerConnectionEvent::Track {
                        mid: mid.clone(),
                        ssrc: packet_ssrc,
                        rid: rid.clone(),
                        kind: transceiver.kind,
                    });
                }
                track_index
            }
            None => {
                transceiver
                    .receiver
                    .tracks
                    .push(ReceiverTrack::new(packet_ssrc, rid.clone()));
                self.events.push_back(PeerConnectionEvent::Track {
                    mid: mid.clone(),
                    ssrc: packet_ssrc,
                    rid: rid.clone(),
                    kind: transceiver.kind,
                });
                transceiver.receiver.tracks.len() - 1
            }
        };

        let track = &mut transceiver.receiver.tracks[track_index];
        track.packets_received += 1;
        track.bytes_received += packet.payload.len() as u64;
        track.highest_seq = packet.header.sequence_number;
        track.jitter.push(packet, now);

        let rid = track.rid.clone();
        let mut delivered = vec![];
        while let Some(ready) = track.jitter.pop(now) {
            delivered.push(ready);
        }
        for packet in delivered {
            self.events.push_back(PeerConnectionEvent::RtpReceived {
                mid: mid.clone(),
                rid: rid.clone(),
                packet,
            });
        }
        Ok(())
    }

    fn route_rtp(
        &mut self,
        ssrc: u32,
        payload_type: u8,
        mid_hint: Option<String>,
        rid_hint: &Option<String>,
    ) -> Option<usize> {
        // (a) SSRC already known
        if let Some(index) = self.transceivers.iter().position(|t| {
            t.remote_ssrcs.contains(&ssrc)
                || t.remote_rtx_ssrc == Some(ssrc)
                || t.receiver.tracks.iter().any(|track| track.ssrc == ssrc)
        }) {
            return Some(index);
        }

        // (b) MID header extension
        if let Some(mid) = mid_hint {
            if let Some(index) = self
                .transceivers
                .iter()
                .position(|t| t.mid.as_deref() == Some(mid.as_str()))
            {
                self.transceivers[index].remote_ssrcs.push(ssrc);
                return Some(index);
            }
        }

        // (b') RID-only simulcast layers bind to a transceiver expecting
        // that rid
        if let Some(rid) = rid_hint {
            if let Some(index) = self.transceivers.iter().position(|t| {
                t.receiver
                    .tracks
                    .iter()
                    .any(|track| track.rid.as_deref() == Some(rid.as_str()))
            }) {
                return Some(index);
            }
        }

        // (c) payload type fallback
        self.transceivers
            .iter()
            .position(|t| t.codec_for_payload_type(payload_type).is_some())
    }

    fn handle_rtcp(&mut self, datagram: &[u8]) -> Result<()> {
        let srtp_rx = match &mut self.srtp_rx {
            Some(context) => context,
            None => return Ok(()),
        };
        let decrypted = match srtp_rx.unprotect_rtcp(datagram) {
            Ok(decrypted) => decrypted,
            Err(err) => {
                trace!("srtcp discard: {err}");
                return Ok(());
            }
        };

        let mut reader = &decrypted[..];
        let packets = rtcp::packet::unmarshal(&mut reader)?;
        for packet in packets {
            match packet {
                rtcp::packet::RtcpPacket::SenderReport(sr) => {
                    for transceiver in &mut self.transceivers {
                        for track in &mut transceiver.receiver.tracks {
                            if track.ssrc == sr.ssrc {
                                track.last_sr_ntp = (sr.ntp_time >> 16) as u32;
                            }
                        }
                    }
                }
                rtcp::packet::RtcpPacket::TransportLayerNack(nack) => {
                    self.handle_nack(nack)?;
                }
                rtcp::packet::RtcpPacket::PictureLossIndication(pli) => {
                    if let Some(mid) = self.mid_for_sender_ssrc(pli.media_ssrc) {
                        self.events
                            .push_back(PeerConnectionEvent::KeyframeRequest { mid });
                    }
                }
                rtcp::packet::RtcpPacket::FullIntraRequest(fir) => {
                    if let Some(mid) = self.mid_for_sender_ssrc(fir.media_ssrc) {
                        self.events
                            .push_back(PeerConnectionEvent::KeyframeRequest { mid });
                    }
                }
                _ => {}
            }
        }
        Ok(())
    }

    fn mid_for_sender_ssrc(&self, ssrc: u32) -> Option<String> {
        self.transceivers
            .iter()
            .find(|t| t.sender.ssrc == ssrc || t.sender.rtx_ssrc == ssrc)
            .and_then(|t| t.mid.clone())
    }

    /// NACK: replay requested packets from the sender history as RTX.
    fn handle_nack(&mut self, nack: rtcp::transport_layer_nack::TransportLayerNack) -> Result<()> {
        let index = match self
            .transceivers
            .iter()
            .position(|t| t.sender.ssrc == nack.media_ssrc)
        {
            Some(index) => index,
            None => return Ok(()),
        };

        let mut resends = vec![];
        {
            let transceiver = &mut self.transceivers[index];
            let rtx_payload_type = transceiver
                .codec()
                .and_then(|c| c.rtx_payload_type)
                .unwrap_or(transceiver.codec().map(|c| c.payload_type).unwrap_or(96));
            for pair in &nack.nacks {
                for seq in pair.packet_list() {
                    if let Some(original) = transceiver.sender.lookup(seq).cloned() {
                        let rtx_seq = transceiver.sender.rtx_sequencer.next_sequence_number();
                        resends.push(rtp::rtx::wrap(
                            &original,
                            transceiver.sender.rtx_ssrc,
                            rtx_payload_type,
                            rtx_seq,
                        ));
                    }
                }
            }
        }
        for packet in resends {
            self.send_rtp_packet(&packet)?;
        }
        Ok(())
    }

    /// Sends one RTP packet on a transceiver, stamping the sender SSRC
    /// and the negotiated MID extension.
    pub fn write_rtp(&mut self, transceiver_index: usize, mut packet: rtp::packet::Packet) -> Result<()> {
        let transceiver = self
            .transceivers
            .get_mut(transceiver_index)
            .ok_or(Error::ErrSenderNotCreatedByConnection)?;
        if !transceiver.direction.has_send() {
            return Err(Error::ErrSenderNotCreatedByConnection);
        }

        packet.header.ssrc = transceiver.sender.ssrc;
        if let Some(mid) = &transceiver.mid {
            let _ = packet
                .header
                .set_extension(EXT_MID_ID, Bytes::from(mid.clone().into_bytes()));
        }
        transceiver.sender.packets_sent += 1;
        transceiver.sender.bytes_sent += packet.payload.len() as u64;
        transceiver.sender.last_timestamp = packet.header.timestamp;
        transceiver.sender.remember(&packet);

        self.send_rtp_packet(&packet)
    }

    fn send_rtp_packet(&mut self, packet: &rtp::packet::Packet) -> Result<()> {
        let (local_addr, peer_addr) = self
            .selected_addrs()
            .ok_or(Error::ErrNoCandidatePairs)?;
        let srtp_tx = self.srtp_tx.as_mut().ok_or(Error::ErrConnClosed)?;
        let plaintext = packet.marshal()?;
        let protected = srtp_tx.protect_rtp(&plaintext)?;

        self.stats_packets_sent += 1;
        self.stats_bytes_sent += protected.len() as u64;
        self.transmits.push_back(Transmit {
            local_addr,
            peer_addr,
            message: BytesMut::from(&protected[..]),
        });
        Ok(())
    }

    /// Sends a compound RTCP packet (protected).
    pub fn write_rtcp(&mut self, packets: &[rtcp::packet::RtcpPacket]) -> Result<()> {
        let (local_addr, peer_addr) = self
            .selected_addrs()
            .ok_or(Error::ErrNoCandidatePairs)?;
        let srtp_tx = self.srtp_tx.as_mut().ok_or(Error::ErrConnClosed)?;
        let plaintext = rtcp::packet::marshal(packets)?;
        let protected = srtp_tx.protect_rtcp(&plaintext)?;
        self.transmits.push_back(Transmit {
            local_addr,
            peer_addr,
            message: BytesMut::from(&protected[..]),
        });
        Ok(())
    }

    /// Asks the remote sender of a track for a keyframe.
    pub fn request_keyframe(&mut self, ssrc: u32) -> Result<()> {
        let pli = rtcp::picture_loss_indication::PictureLossIndication {
            sender_ssrc: 0,
            media_ssrc: ssrc,
        };
        self.write_rtcp(&[rtcp::packet::RtcpPacket::PictureLossIndication(pli)])
    }

    pub fn poll_transmit(&mut self) -> Option<Transmit> {
        self.transmits.pop_front()
    }

    pub fn poll_event(&mut self) -> Option<PeerConnectionEvent> {
        self.events.pop_front()
    }

    pub fn poll_timeout(&self) -> Option<Instant> {
        if self.closed {
            return None;
        }
        let mut next: Option<Instant> = self.ice.poll_timeout();
        let mut merge = |candidate: Option<Instant>| {
            next = match (next, candidate) {
                (Some(a), Some(b)) => Some(a.min(b)),
                (None, candidate) => candidate,
                (next, None) => next,
            };
        };
        merge(self.dtls.as_ref().and_then(|d| d.poll_timeout()));
        merge(self.sctp.as_ref().and_then(|s| s.poll_timeout()));
        merge(
            self.last_rtcp_report
                .map(|last| last + RTCP_REPORT_INTERVAL),
        );
        merge(self.last_nack_check.map(|last| last + NACK_CHECK_INTERVAL));
        next
    }

    pub fn handle_timeout(&mut self, now: Instant) -> Result<()> {
        if self.closed {
            return Ok(());
        }

        self.ice.handle_timeout(now)?;
        if let Some(dtls) = &mut self.dtls {
            if let Err(err) = dtls.handle_timeout(now) {
                warn!("dtls failed: {err}");
                self.set_connection_state(RTCPeerConnectionState::Failed);
            }
        }
        if let Some(sctp) = &mut self.sctp {
            if let Err(err) = sctp.handle_timeout(now) {
                warn!("sctp failed: {err}");
            }
        }

        let report_due = match self.last_rtcp_report {
            Some(last) => now.duration_since(last) >= RTCP_REPORT_INTERVAL,
            None => self.srtp_tx.is_some(),
        };
        if report_due {
            self.last_rtcp_report = Some(now);
            let _ = self.send_rtcp_reports(now);
        }

        let nack_due = match self.last_nack_check {
            Some(last) => now.duration_since(last) >= NACK_CHECK_INTERVAL,
            None => self.srtp_tx.is_some(),
        };
        if nack_due {
            self.last_nack_check = Some(now);
            self.drain_jitter_buffers(now);
            let _ = self.send_nacks();
        }

        self.drive(now);
        Ok(())
    }

    /// Releases packets whose jitter wait deadline expired.
    fn drain_jitter_buffers(&mut self, now: Instant) {
        let mut delivered = vec![];
        for transceiver in &mut self.transceivers {
            let mid = transceiver.mid.clone().unwrap_or_default();
            for track in &mut transceiver.receiver.tracks {
                while let Some(packet) = track.jitter.pop(now) {
                    delivered.push((mid.clone(), track.rid.clone(), packet));
                }
            }
        }
        for (mid, rid, packet) in delivered {
            self.events
                .push_back(PeerConnectionEvent::RtpReceived { mid, rid, packet });
        }
    }

    /// Periodic SR/RR + SDES per the RTP pipeline spec.
    fn send_rtcp_reports(&mut self, now: Instant) -> Result<()> {
        if self.srtp_tx.is_none() || self.selected_addrs().is_none() {
            return Ok(());
        }

        let ntp = media::ntp::unix_ms_to_ntp(self.wall_clock_ms(now));
        let mut packets = vec![];
        for transceiver in &self.transceivers {
            if transceiver.direction.has_send() && transceiver.sender.packets_sent > 0 {
                packets.push(rtcp::packet::RtcpPacket::SenderReport(
                    rtcp::sender_report::SenderReport {
                        ssrc: transceiver.sender.ssrc,
                        ntp_time: ntp,
                        rtp_time: transceiver.sender.last_timestamp,
                        packet_count: transceiver.sender.packets_sent as u32,
                        octet_count: transceiver.sender.bytes_sent as u32,
                        reports: vec![],
                    },
                ));
            }
            for track in &transceiver.receiver.tracks {
                if track.packets_received == 0 {
                    continue;
                }
                packets.push(rtcp::packet::RtcpPacket::ReceiverReport(
                    rtcp::receiver_report::ReceiverReport {
                        ssrc: transceiver.sender.ssrc,
                        reports: vec![rtcp::reception_report::ReceptionReport {
                            ssrc: track.ssrc,
                            fraction_lost: 0,
                            total_lost: track.packets_discarded as u32 & 0x00FF_FFFF,
                            last_sequence_number: track.highest_seq as u32,
                            jitter: 0,
                            last_sender_report: track.last_sr_ntp,
                            delay: 0,
                        }],
                    },
                ));
            }
        }
        if packets.is_empty() {
            return Ok(());
        }
        packets.push(rtcp::packet::RtcpPacket::SourceDescription(
            rtcp::source_description::SourceDescription::new_cname(
                self.transceivers
                    .first()
                    .map(|t| t.sender.ssrc)
                    .unwrap_or(1),
                self.cname.clone(),
            ),
        ));
        self.write_rtcp(&packets)
    }

    /// Emits generic NACKs for gaps the jitter buffers are tracking.
    fn send_nacks(&mut self) -> Result<()> {
        if self.srtp_tx.is_none() || self.selected_addrs().is_none() {
            return Ok(());
        }

        let mut nacks = vec![];
        for transceiver in &self.transceivers {
            let supports_nack = transceiver
                .codec()
                .map(|c| c.rtcp_fb.iter().any(|fb| fb == "nack"))
                .unwrap_or(false);
            if !supports_nack {
                continue;
            }
            for track in &transceiver.receiver.tracks {
                let missing = track.jitter.missing(64);
                if missing.is_empty() {
                    continue;
                }
                nacks.push(rtcp::packet::RtcpPacket::TransportLayerNack(
                    rtcp::transport_layer_nack::TransportLayerNack {
                        sender_ssrc: transceiver.sender.ssrc,
                        media_ssrc: track.ssrc,
                        nacks: rtcp::transport_layer_nack::nack_pairs_from_sequence_numbers(
                            &missing,
                        ),
                    },
                ));
            }
        }
        if nacks.is_empty() {
            return Ok(());
        }
        self.write_rtcp(&nacks)
    }

    /// Timestamped statistics for every subsystem.
    pub fn get_stats(&self, now: Instant) -> serde_json::Value {
        statistics::build_report(self, now)
    }

    /// Tears the session down; every pending operation is cancelled and
    /// all transports release their resources.
    pub fn close(&mut self, now: Instant) {
        if self.closed {
            return;
        }

        for channel in &mut self.data_channels {
            if channel.state != DataChannelState::Closed {
                channel.state = DataChannelState::Closed;
                self.events.push_back(PeerConnectionEvent::DataChannelClosed {
                    stream_id: channel.stream_id,
                });
            }
        }
        if let Some(sctp) = &mut self.sctp {
            let _ = sctp.close(now);
        }
        if let Some(dtls) = &mut self.dtls {
            dtls.close();
        }
        self.drive(now);
        // flush the remaining goodbye datagrams
        if let Some(sctp) = &mut self.sctp {
            while let Some(_packet) = sctp.poll_transmit() {}
        }
        self.ice.close();

        self.set_signaling_state(RTCSignalingState::Closed);
        self.set_connection_state(RTCPeerConnectionState::Closed);
        self.closed = true;
    }

    // --- state helpers ---------------------------------------------------

    fn set_signaling_state(&mut self, state: RTCSignalingState) {
        if self.signaling_state != state {
            self.signaling_state = state;
            self.events
                .push_back(PeerConnectionEvent::SignalingStateChange(state));
        }
    }

    fn set_connection_state(&mut self, state: RTCPeerConnectionState) {
        if self.connection_state != state && self.connection_state != RTCPeerConnectionState::Closed
        {
            self.connection_state = state;
            self.events
                .push_back(PeerConnectionEvent::ConnectionStateChange(state));
        }
    }

    fn set_gathering_state(&mut self, state: RTCIceGatheringState) {
        if self.ice_gathering_state != state {
            self.ice_gathering_state = state;
            self.events
                .push_back(PeerConnectionEvent::IceGatheringStateChange(state));
        }
    }
}
