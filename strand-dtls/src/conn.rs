#[cfg(test)]
mod conn_test;

use std::collections::HashMap;
use std::time::{Duration, Instant};

use bytes::Bytes;
use log::{debug, trace, warn};
use rand::Rng;
use std::collections::VecDeque;

use shared::error::{Error, Result};
use shared::replay_detector::{ReplayDetector, SlidingWindowDetector};

use crate::alert::{Alert, AlertDescription, AlertLevel};
use crate::cipher_suite::{CipherSuiteAes128Gcm, TLS_ECDHE_ECDSA_WITH_AES_128_GCM_SHA256};
use crate::config::HandshakeConfig;
use crate::crypto::{
    sign_key_exchange, signed_key_exchange_input, verify_key_exchange, EcdhKeypair,
};
use crate::extension::{
    Extension, SrtpProtectionProfile, NAMED_CURVE_P256, POINT_FORMAT_UNCOMPRESSED,
    SIGNATURE_SCHEME_ECDSA_SECP256R1_SHA256,
};
use crate::fragment_buffer::FragmentBuffer;
use crate::handshake::certificate::{
    CertificateMsg, CertificateRequest, CertificateVerify, CLIENT_CERTIFICATE_TYPE_ECDSA_SIGN,
};
use crate::handshake::finished::{Finished, ServerHelloDone};
use crate::handshake::hello::{ClientHello, HelloVerifyRequest, ServerHello};
use crate::handshake::key_exchange::{ClientKeyExchange, ServerKeyExchange};
use crate::handshake::{
    HandshakeHeader, HandshakeMessage, HandshakeType, HANDSHAKE_HEADER_LENGTH,
};
use crate::prf::{
    prf_encryption_keys, prf_exported_keying_material, prf_extended_master_secret,
    prf_master_secret, prf_verify_data_client, prf_verify_data_server,
};
use crate::record_layer::{
    ContentType, RecordLayerHeader, PROTOCOL_VERSION1_2, RECORD_LAYER_HEADER_SIZE,
};
use crate::state::State;

const COOKIE_LENGTH: usize = 20;
const MIN_REMOTE_RETRANSMIT_INTERVAL: Duration = Duration::from_millis(500);
const MAX_HANDSHAKE_FRAGMENT: usize = 1152;
const MAX_DATAGRAM: usize = 1400;
const MAX_BUFFERED_FUTURE_RECORDS: usize = 32;
const REPLAY_WINDOW: usize = 64;
const GCM_KEY_LENGTH: usize = 16;
const GCM_IV_LENGTH: usize = 4;

/// Events surfaced to the owner of the connection.
#[derive(Debug, PartialEq, Eq)]
pub enum DtlsEvent {
    /// Handshake finished; keying material can now be exported.
    HandshakeComplete,
    /// Decrypted application data.
    ApplicationData(Bytes),
    /// The peer sent close_notify or a fatal alert.
    PeerClosed,
}

/// Handshake flights (RFC 6347 section 4.2.4). Odd flights belong to the
/// client, even flights to the server.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
enum Flight {
    // client
    Flight1,
    Flight3,
    Flight5,
    // server
    Flight0,
    Flight2,
    Flight4,
    Flight6,
    Done,
}

/// A sans-IO DTLS 1.2 endpoint for one peer.
///
/// Datagrams go in through `handle_read`, come out of `poll_transmit`;
/// timers are driven through `poll_timeout`/`handle_timeout`. All
/// handshake and record state lives behind `&mut self`.
pub struct DTLSConn {
    config: HandshakeConfig,
    pub(crate) state: State,
    flight: Flight,

    fragment_buffer: FragmentBuffer,
    queued_messages: VecDeque<(HandshakeHeader, Vec<u8>, HandshakeMessage)>,
    handshake_transcript: Vec<u8>,

    transmits: VecDeque<Vec<u8>>,
    events: VecDeque<DtlsEvent>,

    // last flight as (content type, epoch, plaintext payload) records
    last_flight: Vec<(ContentType, u16, Vec<u8>)>,
    retransmit_timer: Option<Instant>,
    retransmit_interval: Duration,
    handshake_deadline: Instant,
    remote_retransmit_detected: bool,
    last_flight_sent_at: Option<Instant>,

    remote_replay: HashMap<u16, SlidingWindowDetector>,
    buffered_future_records: Vec<Vec<u8>>,
    buffered_app_data: Vec<Bytes>,

    handshake_completed: bool,
    closed: bool,

    // server-side stateless cookie
    local_cookie: Vec<u8>,
}

impl DTLSConn {
    pub fn new(config: HandshakeConfig, is_client: bool, now: Instant) -> Self {
        let retransmit_interval = config.initial_retransmit_interval;
        let handshake_deadline = now + config.handshake_timeout;
        let mut conn = DTLSConn {
            config,
            state: State::new(is_client),
            flight: if is_client {
                Flight::Flight1
            } else {
                Flight::Flight0
            },
            fragment_buffer: FragmentBuffer::new(),
            queued_messages: VecDeque::new(),
            handshake_transcript: vec![],
            transmits: VecDeque::new(),
            events: VecDeque::new(),
            last_flight: vec![],
            retransmit_timer: None,
            retransmit_interval,
            handshake_deadline,
            remote_retransmit_detected: false,
            last_flight_sent_at: None,
            remote_replay: HashMap::new(),
            buffered_future_records: vec![],
            buffered_app_data: vec![],
            handshake_completed: false,
            closed: false,
            local_cookie: vec![],
        };

        if is_client {
            if let Err(err) = conn.send_client_hello(now) {
                warn!("initial ClientHello failed: {err}");
            }
        }
        conn
    }

    pub fn is_handshake_complete(&self) -> bool {
        self.handshake_completed
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    pub fn selected_srtp_protection_profile(&self) -> SrtpProtectionProfile {
        self.state.srtp_protection_profile
    }

    pub fn peer_certificates(&self) -> &[Vec<u8>] {
        &self.state.peer_certificates
    }

    pub fn poll_transmit(&mut self) -> Option<Vec<u8>> {
        self.transmits.pop_front()
    }

    pub fn poll_event(&mut self) -> Option<DtlsEvent> {
        self.events.pop_front()
    }

    pub fn poll_timeout(&self) -> Option<Instant> {
        if self.handshake_completed || self.closed {
            return None;
        }
        match self.retransmit_timer {
            Some(t) => Some(t.min(self.handshake_deadline)),
            None => Some(self.handshake_deadline),
        }
    }

    pub fn handle_timeout(&mut self, now: Instant) -> Result<()> {
        if self.handshake_completed || self.closed {
            return Ok(());
        }
        if now >= self.handshake_deadline {
            self.closed = true;
            return Err(Error::ErrHandshakeTimeout);
        }
        if let Some(timer) = self.retransmit_timer {
            if now >= timer {
                debug!(
                    "[{}] retransmitting flight {:?}",
                    srv_cli_str(self.state.is_client),
                    self.flight
                );
                self.retransmit_interval =
                    (self.retransmit_interval * 2).min(self.config.max_retransmit_interval);
                self.retransmit_timer = Some(now + self.retransmit_interval);
                self.last_flight_sent_at = Some(now);
                self.resend_last_flight()?;
            }
        }
        Ok(())
    }

    /// Sends application data over the established connection.
    pub fn write(&mut self, data: &[u8]) -> Result<()> {
        if self.closed {
            return Err(Error::ErrConnClosed);
        }
        if !self.handshake_completed {
            return Err(Error::ErrHandshakeInProgress);
        }
        let record = self.build_record(ContentType::ApplicationData, self.state.local_epoch, data)?;
        self.transmits.push_back(record);
        Ok(())
    }

    /// Sends close_notify and refuses further traffic.
    pub fn close(&mut self) {
        if self.closed {
            return;
        }
        let alert = Alert {
            alert_level: AlertLevel::Warning,
            alert_description: AlertDescription::CloseNotify,
        };
        if let Ok(record) =
            self.build_record(ContentType::Alert, self.state.local_epoch, &alert.marshal())
        {
            self.transmits.push_back(record);
        }
        self.closed = true;
    }

    /// RFC 5705 keying material export; the SRTP extractor refuses the
    /// reserved TLS labels.
    pub fn export_keying_material(&self, label: &str, length: usize) -> Result<Vec<u8>> {
        if !self.handshake_completed {
            return Err(Error::ErrHandshakeInProgress);
        }
        if label.is_empty() {
            return Err(Error::ErrReservedExportKeyingMaterial);
        }
        let (client_random, server_random) = if self.state.is_client {
            (self.state.local_random.0, self.state.remote_random.0)
        } else {
            (self.state.remote_random.0, self.state.local_random.0)
        };
        prf_exported_keying_material(
            &self.state.master_secret,
            &client_random,
            &server_random,
            label,
            length,
        )
    }

    /// Feeds one received datagram, which may carry several records.
    pub fn handle_read(&mut self, datagram: &[u8], now: Instant) -> Result<()> {
        if self.closed {
            return Err(Error::ErrConnClosed);
        }

        let mut offset = 0;
        while offset + RECORD_LAYER_HEADER_SIZE <= datagram.len() {
            let mut peek = &datagram[offset..];
            let header = RecordLayerHeader::unmarshal(&mut peek)?;
            let record_len = RECORD_LAYER_HEADER_SIZE + header.content_len as usize;
            if offset + record_len > datagram.len() {
                return Err(Error::ErrInvalidPacketLength);
            }
            let record = datagram[offset..offset + record_len].to_vec();
            offset += record_len;
            self.handle_record(&record, now)?;
        }

        self.drive(now)
    }

    fn handle_record(&mut self, record: &[u8], now: Instant) -> Result<()> {
        let mut reader = &record[..];
        let header = RecordLayerHeader::unmarshal(&mut reader)?;
        let body = &record[RECORD_LAYER_HEADER_SIZE..];

        // records for a future epoch wait until the epoch advances
        if header.epoch > self.state.remote_epoch {
            if self.buffered_future_records.len() < MAX_BUFFERED_FUTURE_RECORDS {
                trace!(
                    "[{}] buffering early epoch {} record",
                    srv_cli_str(self.state.is_client),
                    header.epoch
                );
                self.buffered_future_records.push(record.to_vec());
            }
            return Ok(());
        }

        // anti-replay, committed only after successful processing
        let detector = self
            .remote_replay
            .entry(header.epoch)
            .or_insert_with(|| SlidingWindowDetector::new(REPLAY_WINDOW, (1 << 48) - 1));
        if !detector.check(header.sequence_number) {
            trace!(
                "[{}] replayed record epoch={} seq={}, discarding",
                srv_cli_str(self.state.is_client),
                header.epoch,
                header.sequence_number
            );
            return Ok(());
        }

        let plaintext: Vec<u8> = if header.epoch == 0 {
            body.to_vec()
        } else {
            let cipher = match &self.state.cipher_suite {
                Some(cipher) => cipher,
                // encrypted record before keys exist: drop silently
                None => return Ok(()),
            };
            match cipher.decrypt(&header, body) {
                Ok(plaintext) => plaintext,
                Err(_) => {
                    trace!(
                        "[{}] record failed authentication, discarding",
                        srv_cli_str(self.state.is_client)
                    );
                    return Ok(());
                }
            }
        };

        if let Some(detector) = self.remote_replay.get_mut(&header.epoch) {
            detector.accept();
        }

        match header.content_type {
            ContentType::ChangeCipherSpec => {
                if plaintext.len() != 1 || plaintext[0] != 1 {
                    return Err(Error::ErrUnhandledContextType);
                }
                if self.state.remote_epoch == 0 {
                    self.state.remote_epoch = 1;
                    let buffered = std::mem::take(&mut self.buffered_future_records);
                    for record in buffered {
                        self.handle_record(&record, now)?;
                    }
                }
            }
            ContentType::Alert => {
                let mut reader = &plaintext[..];
                let alert = Alert::unmarshal(&mut reader)?;
                debug!(
                    "[{}] received {}",
                    srv_cli_str(self.state.is_client),
                    alert
                );
                if alert.alert_level == AlertLevel::Fatal
                    || alert.alert_description == AlertDescription::CloseNotify
                {
                    self.closed = true;
                    self.events.push_back(DtlsEvent::PeerClosed);
                }
            }
            ContentType::Handshake => {
                self.handle_handshake_payload(&plaintext)?;
            }
            ContentType::ApplicationData => {
                if header.epoch == 0 {
                    return Err(Error::ErrApplicationDataEpochZero);
                }
                let data = Bytes::from(plaintext);
                if self.handshake_completed {
                    self.events.push_back(DtlsEvent::ApplicationData(data));
                } else {
                    self.buffered_app_data.push(data);
                }
            }
        }

        Ok(())
    }

    /// One record payload may carry several handshake fragments.
    fn handle_handshake_payload(&mut self, payload: &[u8]) -> Result<()> {
        let mut offset = 0;
        while offset + HANDSHAKE_HEADER_LENGTH <= payload.len() {
            let mut peek = &payload[offset..];
            let header = HandshakeHeader::unmarshal(&mut peek)?;
            let fragment_len = HANDSHAKE_HEADER_LENGTH + header.fragment_length as usize;
            if offset + fragment_len > payload.len() {
                return Err(Error::ErrLengthMismatch);
            }

            if header.message_sequence < self.state.handshake_recv_sequence {
                // the peer is retransmitting: it has not seen our reply
                self.remote_retransmit_detected = true;
            } else {
                self.fragment_buffer
                    .push(&payload[offset..offset + fragment_len])?;
            }
            offset += fragment_len;
        }

        while let Some((header, wire)) = self
            .fragment_buffer
            .pop(self.state.handshake_recv_sequence)
        {
            let mut body = &wire[HANDSHAKE_HEADER_LENGTH..];
            let message = HandshakeMessage::unmarshal_body(header.handshake_type, &mut body)?;
            trace!(
                "[{}] <- {:?} (seq {})",
                srv_cli_str(self.state.is_client),
                header.handshake_type,
                header.message_sequence
            );
            self.state.handshake_recv_sequence += 1;
            self.queued_messages.push_back((header, wire, message));
        }

        Ok(())
    }

    /// Advances the flight state machine over the queued messages.
    fn drive(&mut self, now: Instant) -> Result<()> {
        if self.remote_retransmit_detected {
            self.remote_retransmit_detected = false;
            // throttled: a retransmitting peer means our reply was lost,
            // but answering every duplicate would feed a resend storm
            let quiet_long_enough = self
                .last_flight_sent_at
                .map(|at| now.duration_since(at) >= MIN_REMOTE_RETRANSMIT_INTERVAL)
                .unwrap_or(false);
            if !self.last_flight.is_empty() && quiet_long_enough {
                self.last_flight_sent_at = Some(now);
                self.resend_last_flight()?;
            }
        }

        while let Some((_, wire, message)) = self.queued_messages.pop_front() {
            if self.state.is_client {
                self.drive_client(wire, message, now)?;
            } else {
                self.drive_server(wire, message, now)?;
            }
        }
        Ok(())
    }

    // --- client side -----------------------------------------------------

    fn send_client_hello(&mut self, now: Instant) -> Result<()> {
        let hello = ClientHello {
            version: PROTOCOL_VERSION1_2,
            random: self.state.local_random,
            session_id: vec![],
            cookie: self.state.cookie.clone(),
            cipher_suites: vec![TLS_ECDHE_ECDSA_WITH_AES_128_GCM_SHA256],
            compression_methods: vec![0],
            extensions: vec![
                Extension::SupportedGroups(vec![NAMED_CURVE_P256]),
                Extension::SupportedPointFormats(vec![POINT_FORMAT_UNCOMPRESSED]),
                Extension::SignatureAlgorithms(vec![SIGNATURE_SCHEME_ECDSA_SECP256R1_SHA256]),
                Extension::UseSrtp(self.config.srtp_protection_profiles.clone()),
                Extension::ExtendedMasterSecret,
                Extension::RenegotiationInfo,
            ],
        };

        let records = vec![self.handshake_record(HandshakeMessage::ClientHello(hello))?];
        self.send_flight(records, now)
    }

    fn drive_client(
        &mut self,
        wire: Vec<u8>,
        message: HandshakeMessage,
        now: Instant,
    ) -> Result<()> {
        match (self.flight, message) {
            (Flight::Flight1, HandshakeMessage::HelloVerifyRequest(hvr)) => {
                self.state.cookie = hvr.cookie;
                // the pre-cookie hello and the HVR are excluded from the
                // transcript (RFC 6347 section 4.2.1)
                self.handshake_transcript.clear();
                self.flight = Flight::Flight3;
                self.send_client_hello(now)?;
            }
            (Flight::Flight1 | Flight::Flight3, HandshakeMessage::ServerHello(hello)) => {
                if hello.cipher_suite != TLS_ECDHE_ECDSA_WITH_AES_128_GCM_SHA256 {
                    self.abort(AlertDescription::HandshakeFailure)?;
                    return Err(Error::ErrCipherSuiteNoIntersection);
                }
                for extension in &hello.extensions {
                    match extension {
                        Extension::UseSrtp(profiles) => {
                            let chosen = profiles.first().copied().unwrap_or_default();
                            if !self.config.srtp_protection_profiles.contains(&chosen) {
                                self.abort(AlertDescription::IllegalParameter)?;
                                return Err(Error::ErrClientNoMatchingSrtpProfile);
                            }
                            self.state.srtp_protection_profile = chosen;
                        }
                        Extension::ExtendedMasterSecret => {
                            self.state.extended_master_secret = true;
                        }
                        _ => {}
                    }
                }
                if self.state.srtp_protection_profile == SrtpProtectionProfile::Unsupported
                    && !self.config.srtp_protection_profiles.is_empty()
                {
                    self.abort(AlertDescription::IllegalParameter)?;
                    return Err(Error::ErrRequestedButNoSrtpExtension);
                }
                self.state.remote_random = hello.random;
                self.handshake_transcript.extend_from_slice(&wire);
            }
            (Flight::Flight1 | Flight::Flight3, HandshakeMessage::Certificate(cert)) => {
                self.state.peer_certificates = cert.certificates.clone();
                self.handshake_transcript.extend_from_slice(&wire);
            }
            (Flight::Flight1 | Flight::Flight3, HandshakeMessage::ServerKeyExchange(ske)) => {
                if ske.named_curve != NAMED_CURVE_P256 {
                    self.abort(AlertDescription::IllegalParameter)?;
                    return Err(Error::ErrInvalidNamedCurve);
                }
                if !self.config.insecure_skip_verify {
                    let leaf = self
                        .state
                        .peer_certificates
                        .first()
                        .ok_or(Error::ErrInvalidCertificate)?;
                    let input = signed_key_exchange_input(
                        &self.state.local_random.0,
                        &self.state.remote_random.0,
                        ske.named_curve,
                        &ske.public_key,
                    );
                    verify_key_exchange(leaf, &input, &ske.signature)?;
                }
                self.state.remote_public_key = ske.public_key.clone();
                self.handshake_transcript.extend_from_slice(&wire);
            }
            (Flight::Flight1 | Flight::Flight3, HandshakeMessage::CertificateRequest(_)) => {
                self.state.remote_requested_certificate = true;
                self.handshake_transcript.extend_from_slice(&wire);
            }
            (Flight::Flight1 | Flight::Flight3, HandshakeMessage::ServerHelloDone(_)) => {
                self.handshake_transcript.extend_from_slice(&wire);
                self.send_client_flight5(now)?;
                self.flight = Flight::Flight5;
            }
            (Flight::Flight5, HandshakeMessage::Finished(finished)) => {
                let expected = prf_verify_data_server(
                    &self.state.master_secret,
                    &self.handshake_transcript,
                )?;
                if expected != finished.verify_data {
                    self.abort(AlertDescription::DecryptError)?;
                    return Err(Error::ErrVerifyDataMismatch);
                }
                self.handshake_transcript.extend_from_slice(&wire);
                self.complete_handshake();
            }
            (flight, message) => {
                debug!(
                    "[client] ignoring {:?} in {:?}",
                    message.handshake_type(),
                    flight
                );
            }
        }
        Ok(())
    }

    fn send_client_flight5(&mut self, now: Instant) -> Result<()> {
        let keypair = EcdhKeypair::generate();
        self.state.pre_master_secret = keypair.shared_secret(&self.state.remote_public_key)?;

        let mut records = vec![];

        if self.state.remote_requested_certificate {
            let cert_msg = CertificateMsg {
                certificates: vec![self.config.certificate.certificate.clone()],
            };
            records.push(self.handshake_record(HandshakeMessage::Certificate(cert_msg))?);
        }

        let cke = ClientKeyExchange {
            public_key: keypair.public_key.clone(),
        };
        records.push(self.handshake_record(HandshakeMessage::ClientKeyExchange(cke))?);
        self.state.local_keypair = Some(keypair);

        self.derive_keys()?;

        if self.state.remote_requested_certificate {
            let signature =
                sign_key_exchange(&self.config.certificate.private_key, &self.handshake_transcript);
            let verify = CertificateVerify {
                hash_algorithm: 4,      // sha256
                signature_algorithm: 3, // ecdsa
                signature,
            };
            records.push(self.handshake_record(HandshakeMessage::CertificateVerify(verify))?);
        }

        records.push((ContentType::ChangeCipherSpec, 0, vec![1]));
        self.state.local_epoch = 1;

        let verify_data =
            prf_verify_data_client(&self.state.master_secret, &self.handshake_transcript)?;
        self.state.local_verify_data = verify_data.clone();
        records.push(self.handshake_record(HandshakeMessage::Finished(Finished { verify_data }))?);

        self.send_flight(records, now)
    }

    // --- server side -----------------------------------------------------

    fn drive_server(
        &mut self,
        wire: Vec<u8>,
        message: HandshakeMessage,
        now: Instant,
    ) -> Result<()> {
        match (self.flight, message) {
            (Flight::Flight0 | Flight::Flight2, HandshakeMessage::ClientHello(hello)) => {
                if self.local_cookie.is_empty() || hello.cookie != self.local_cookie {
                    // stateless retry with a fresh cookie
                    if self.local_cookie.is_empty() {
                        let mut cookie = vec![0u8; COOKIE_LENGTH];
                        rand::thread_rng().fill(&mut cookie[..]);
                        self.local_cookie = cookie;
                    }
                    if !hello.cookie.is_empty() {
                        self.abort(AlertDescription::AccessDenied)?;
                        return Err(Error::ErrCookieMismatch);
                    }
                    let hvr = HelloVerifyRequest {
                        version: PROTOCOL_VERSION1_2,
                        cookie: self.local_cookie.clone(),
                    };
                    let records =
                        vec![self.handshake_record(HandshakeMessage::HelloVerifyRequest(hvr))?];
                    // flight 2 is never armed for retransmission; a lost
                    // HVR is recovered by the client's own timer
                    self.send_records(records)?;
                    self.flight = Flight::Flight2;
                    return Ok(());
                }

                if !hello
                    .cipher_suites
                    .contains(&TLS_ECDHE_ECDSA_WITH_AES_128_GCM_SHA256)
                {
                    self.abort(AlertDescription::HandshakeFailure)?;
                    return Err(Error::ErrCipherSuiteNoIntersection);
                }

                let mut chosen_profile = SrtpProtectionProfile::Unsupported;
                for extension in &hello.extensions {
                    match extension {
                        Extension::UseSrtp(profiles) => {
                            chosen_profile = self
                                .config
                                .srtp_protection_profiles
                                .iter()
                                .find(|p| profiles.contains(p))
                                .copied()
                                .unwrap_or(SrtpProtectionProfile::Unsupported);
                        }
                        Extension::SupportedGroups(groups) => {
                            if !groups.contains(&NAMED_CURVE_P256) {
                                self.abort(AlertDescription::IllegalParameter)?;
                                return Err(Error::ErrNoSupportedEllipticCurves);
                            }
                        }
                        Extension::ExtendedMasterSecret => {
                            self.state.extended_master_secret = true;
                        }
                        _ => {}
                    }
                }
                if chosen_profile == SrtpProtectionProfile::Unsupported {
                    self.abort(AlertDescription::InsufficientSecurity)?;
                    return Err(Error::ErrServerNoMatchingSrtpProfile);
                }
                self.state.srtp_protection_profile = chosen_profile;
                self.state.remote_random = hello.random;
                self.handshake_transcript.extend_from_slice(&wire);

                self.send_server_flight4(now)?;
                self.flight = Flight::Flight4;
            }
            (Flight::Flight4, HandshakeMessage::Certificate(cert)) => {
                self.state.peer_certificates = cert.certificates.clone();
                self.handshake_transcript.extend_from_slice(&wire);
            }
            (Flight::Flight4, HandshakeMessage::ClientKeyExchange(cke)) => {
                let keypair = self
                    .state
                    .local_keypair
                    .as_ref()
                    .ok_or(Error::ErrInvalidFsmTransition)?;
                self.state.pre_master_secret = keypair.shared_secret(&cke.public_key)?;
                self.handshake_transcript.extend_from_slice(&wire);
                self.derive_keys()?;
            }
            (Flight::Flight4, HandshakeMessage::CertificateVerify(verify)) => {
                if !self.config.insecure_skip_verify {
                    let leaf = self
                        .state
                        .peer_certificates
                        .first()
                        .ok_or(Error::ErrInvalidCertificate)?;
                    verify_key_exchange(leaf, &self.handshake_transcript, &verify.signature)?;
                }
                self.handshake_transcript.extend_from_slice(&wire);
            }
            (Flight::Flight4, HandshakeMessage::Finished(finished)) => {
                let expected = prf_verify_data_client(
                    &self.state.master_secret,
                    &self.handshake_transcript,
                )?;
                if expected != finished.verify_data {
                    self.abort(AlertDescription::DecryptError)?;
                    return Err(Error::ErrVerifyDataMismatch);
                }
                self.handshake_transcript.extend_from_slice(&wire);

                let mut records = vec![(ContentType::ChangeCipherSpec, 0, vec![1])];
                self.state.local_epoch = 1;
                let verify_data = prf_verify_data_server(
                    &self.state.master_secret,
                    &self.handshake_transcript,
                )?;
                self.state.local_verify_data = verify_data.clone();
                records.push(
                    self.handshake_record(HandshakeMessage::Finished(Finished { verify_data }))?,
                );
                self.send_flight(records, now)?;
                // the final flight keeps no timer: it is replayed when the
                // client retransmits
                self.retransmit_timer = None;
                self.flight = Flight::Flight6;
                self.complete_handshake();
            }
            (flight, message) => {
                debug!(
                    "[server] ignoring {:?} in {:?}",
                    message.handshake_type(),
                    flight
                );
            }
        }
        Ok(())
    }

    fn send_server_flight4(&mut self, now: Instant) -> Result<()> {
        let mut records = vec![];

        let mut extensions = vec![
            Extension::UseSrtp(vec![self.state.srtp_protection_profile]),
            Extension::SupportedPointFormats(vec![POINT_FORMAT_UNCOMPRESSED]),
            Extension::RenegotiationInfo,
        ];
        if self.state.extended_master_secret {
            extensions.push(Extension::ExtendedMasterSecret);
        }
        let hello = ServerHello {
            version: PROTOCOL_VERSION1_2,
            random: self.state.local_random,
            session_id: vec![],
            cipher_suite: TLS_ECDHE_ECDSA_WITH_AES_128_GCM_SHA256,
            compression_method: 0,
            extensions,
        };
        records.push(self.handshake_record(HandshakeMessage::ServerHello(hello))?);

        let cert_msg = CertificateMsg {
            certificates: vec![self.config.certificate.certificate.clone()],
        };
        records.push(self.handshake_record(HandshakeMessage::Certificate(cert_msg))?);

        let keypair = EcdhKeypair::generate();
        let input = signed_key_exchange_input(
            &self.state.remote_random.0,
            &self.state.local_random.0,
            NAMED_CURVE_P256,
            &keypair.public_key,
        );
        let signature = sign_key_exchange(&self.config.certificate.private_key, &input);
        let ske = ServerKeyExchange {
            named_curve: NAMED_CURVE_P256,
            public_key: keypair.public_key.clone(),
            hash_algorithm: 4,      // sha256
            signature_algorithm: 3, // ecdsa
            signature,
        };
        self.state.local_keypair = Some(keypair);
        records.push(self.handshake_record(HandshakeMessage::ServerKeyExchange(ske))?);

        let request = CertificateRequest {
            certificate_types: vec![CLIENT_CERTIFICATE_TYPE_ECDSA_SIGN],
            signature_algorithms: vec![SIGNATURE_SCHEME_ECDSA_SECP256R1_SHA256],
        };
        records.push(self.handshake_record(HandshakeMessage::CertificateRequest(request))?);

        records.push(self.handshake_record(HandshakeMessage::ServerHelloDone(ServerHelloDone))?);

        self.send_flight(records, now)
    }

    // --- shared plumbing -------------------------------------------------

    /// Computes the master secret and session keys once the pre-master
    /// secret is known.
    fn derive_keys(&mut self) -> Result<()> {
        let (client_random, server_random) = if self.state.is_client {
            (self.state.local_random.0, self.state.remote_random.0)
        } else {
            (self.state.remote_random.0, self.state.local_random.0)
        };

        self.state.master_secret = if self.state.extended_master_secret {
            let session_hash = {
                use sha2::{Digest, Sha256};
                let mut hasher = Sha256::new();
                hasher.update(&self.handshake_transcript);
                hasher.finalize().to_vec()
            };
            prf_extended_master_secret(&self.state.pre_master_secret, &session_hash)?
        } else {
            prf_master_secret(
                &self.state.pre_master_secret,
                &client_random,
                &server_random,
            )?
        };

        let keys = prf_encryption_keys(
            &self.state.master_secret,
            &client_random,
            &server_random,
            GCM_KEY_LENGTH,
            GCM_IV_LENGTH,
        )?;

        self.state.cipher_suite = Some(if self.state.is_client {
            CipherSuiteAes128Gcm::new(
                &keys.client_write_key,
                &keys.client_write_iv,
                &keys.server_write_key,
                &keys.server_write_iv,
            )?
        } else {
            CipherSuiteAes128Gcm::new(
                &keys.server_write_key,
                &keys.server_write_iv,
                &keys.client_write_key,
                &keys.client_write_iv,
            )?
        });

        Ok(())
    }

    fn complete_handshake(&mut self) {
        self.handshake_completed = true;
        self.retransmit_timer = None;
        self.events.push_back(DtlsEvent::HandshakeComplete);
        for data in std::mem::take(&mut self.buffered_app_data) {
            self.events.push_back(DtlsEvent::ApplicationData(data));
        }
        debug!(
            "[{}] handshake completed",
            srv_cli_str(self.state.is_client)
        );
    }

    /// Serializes a handshake message into (content type, epoch, payload)
    /// records, fragmenting if needed, and adds it to the transcript.
    fn handshake_record(
        &mut self,
        message: HandshakeMessage,
    ) -> Result<(ContentType, u16, Vec<u8>)> {
        let body = message.marshal_body()?;
        let header = HandshakeHeader {
            handshake_type: message.handshake_type(),
            length: body.len() as u32,
            message_sequence: self.state.handshake_send_sequence,
            fragment_offset: 0,
            fragment_length: body.len() as u32,
        };
        self.state.handshake_send_sequence += 1;

        let mut wire = header.marshal();
        wire.extend_from_slice(&body);

        // HelloVerifyRequest never enters the transcript; the first
        // ClientHello is dropped from it when a HVR arrives
        if message.handshake_type() != HandshakeType::HelloVerifyRequest {
            self.handshake_transcript.extend_from_slice(&wire);
        }

        let epoch = if message.handshake_type() == HandshakeType::Finished {
            1
        } else {
            0
        };
        Ok((ContentType::Handshake, epoch, wire))
    }

    fn build_record(&mut self, content_type: ContentType, epoch: u16, payload: &[u8]) -> Result<Vec<u8>> {
        while self.state.local_sequence_number.len() <= epoch as usize {
            self.state.local_sequence_number.push(0);
        }
        let sequence_number = self.state.local_sequence_number[epoch as usize];
        self.state.local_sequence_number[epoch as usize] += 1;

        let mut header = RecordLayerHeader {
            content_type,
            protocol_version: PROTOCOL_VERSION1_2,
            epoch,
            sequence_number,
            content_len: payload.len() as u16,
        };

        let body = if epoch == 0 {
            payload.to_vec()
        } else {
            let cipher = self
                .state
                .cipher_suite
                .as_ref()
                .ok_or(Error::ErrCipherSuiteUnset)?;
            cipher.encrypt(&header, payload)?
        };

        header.content_len = body.len() as u16;
        let mut record = header.marshal()?;
        record.extend_from_slice(&body);
        Ok(record)
    }

    /// Fragments oversized handshake payloads into separate records.
    fn fragment_records(
        &mut self,
        records: &[(ContentType, u16, Vec<u8>)],
    ) -> Result<Vec<Vec<u8>>> {
        let mut out = vec![];
        for (content_type, epoch, payload) in records {
            if *content_type == ContentType::Handshake && payload.len() > MAX_HANDSHAKE_FRAGMENT {
                let mut reader = &payload[..];
                let header = HandshakeHeader::unmarshal(&mut reader)?;
                let body = &payload[HANDSHAKE_HEADER_LENGTH..];
                let mut offset = 0;
                while offset < body.len() {
                    let len = (body.len() - offset).min(MAX_HANDSHAKE_FRAGMENT);
                    let fragment_header = HandshakeHeader {
                        fragment_offset: offset as u32,
                        fragment_length: len as u32,
                        ..header
                    };
                    let mut fragment = fragment_header.marshal();
                    fragment.extend_from_slice(&body[offset..offset + len]);
                    out.push(self.build_record(*content_type, *epoch, &fragment)?);
                    offset += len;
                }
            } else {
                out.push(self.build_record(*content_type, *epoch, payload)?);
            }
        }
        Ok(out)
    }

    /// Serializes records into datagrams and queues them, remembering the
    /// flight for retransmission.
    fn send_flight(&mut self, records: Vec<(ContentType, u16, Vec<u8>)>, now: Instant) -> Result<()> {
        self.last_flight = records;
        self.retransmit_interval = self.config.initial_retransmit_interval;
        self.retransmit_timer = Some(now + self.retransmit_interval);
        self.last_flight_sent_at = Some(now);
        let records = self.last_flight.clone();
        self.queue_datagrams(&records)
    }

    /// Like send_flight but without arming the retransmit timer.
    fn send_records(&mut self, records: Vec<(ContentType, u16, Vec<u8>)>) -> Result<()> {
        self.queue_datagrams(&records)
    }

    fn resend_last_flight(&mut self) -> Result<()> {
        let records = self.last_flight.clone();
        self.queue_datagrams(&records)
    }

    fn queue_datagrams(&mut self, records: &[(ContentType, u16, Vec<u8>)]) -> Result<()> {
        let wire_records = self.fragment_records(records)?;
        let mut datagram: Vec<u8> = vec![];
        for record in wire_records {
            if !datagram.is_empty() && datagram.len() + record.len() > MAX_DATAGRAM {
                self.transmits.push_back(std::mem::take(&mut datagram));
            }
            datagram.extend_from_slice(&record);
        }
        if !datagram.is_empty() {
            self.transmits.push_back(datagram);
        }
        Ok(())
    }

    fn abort(&mut self, description: AlertDescription) -> Result<()> {
        let alert = Alert {
            alert_level: AlertLevel::Fatal,
            alert_description: description,
        };
        let record =
            self.build_record(ContentType::Alert, self.state.local_epoch, &alert.marshal())?;
        self.transmits.push_back(record);
        self.closed = true;
        Ok(())
    }
}

pub(crate) fn srv_cli_str(is_client: bool) -> &'static str {
    if is_client {
        "client"
    } else {
        "server"
    }
}
