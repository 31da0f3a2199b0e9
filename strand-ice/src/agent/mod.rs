#[cfg(test)]
mod agent_test;

use std::collections::VecDeque;
use std::net::SocketAddr;
use std::time::{Duration, Instant};

use bytes::BytesMut;
use log::{debug, trace, warn};

use shared::error::{Error, Result};
use stun::attributes::{
    ATTR_ICE_CONTROLLED, ATTR_ICE_CONTROLLING, ATTR_PRIORITY, ATTR_USERNAME, ATTR_USE_CANDIDATE,
};
use stun::error_code::{ErrorCodeAttribute, CODE_ROLE_CONFLICT};
use stun::fingerprint::FINGERPRINT;
use stun::integrity::MessageIntegrity;
use stun::message::{
    is_message, Checker, Getter, Message, Setter, TransactionId, BINDING_ERROR_RESPONSE,
    BINDING_REQUEST, BINDING_SUCCESS,
};
use stun::textattrs::TextAttribute;
use stun::xoraddr::XorMappedAddress;

use crate::candidate::candidate_pair::{CandidatePair, CandidatePairState};
use crate::candidate::{Candidate, CandidateType};
use crate::state::ConnectionState;

const DEFAULT_CHECK_INTERVAL: Duration = Duration::from_millis(50);
const DEFAULT_KEEPALIVE_INTERVAL: Duration = Duration::from_secs(5);
const DEFAULT_DISCONNECTED_TIMEOUT: Duration = Duration::from_secs(30);
const DEFAULT_FAILED_TIMEOUT: Duration = Duration::from_secs(40);
const STUN_RTO: Duration = Duration::from_millis(500);
const MAX_BINDING_REQUEST_RETRANSMITS: u16 = 7;
const UFRAG_LENGTH: usize = 16;
const PWD_LENGTH: usize = 32;

/// ICE short-term credentials.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Credentials {
    pub ufrag: String,
    pub pwd: String,
}

impl Credentials {
    pub fn generate() -> Self {
        Credentials {
            ufrag: shared::util::rand_alpha_number(UFRAG_LENGTH),
            pwd: shared::util::rand_alpha_number(PWD_LENGTH),
        }
    }
}

/// An outbound datagram the embedder must put on the wire.
#[derive(Debug)]
pub struct IceTransmit {
    /// The local candidate's socket this datagram leaves from.
    pub local_addr: SocketAddr,
    pub peer_addr: SocketAddr,
    pub message: BytesMut,
}

/// Events surfaced to the session.
#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    ConnectionStateChange(ConnectionState),
    SelectedCandidatePairChange(Box<Candidate>, Box<Candidate>),
    /// A reflexive local candidate was discovered (trickle it to the
    /// peer).
    NewLocalCandidate(Box<Candidate>),
}

pub struct AgentConfig {
    pub is_controlling: bool,
    pub local_credentials: Credentials,
    /// STUN servers to query for server-reflexive candidates, already
    /// resolved by the embedder.
    pub stun_servers: Vec<SocketAddr>,
    pub check_interval: Duration,
    pub keepalive_interval: Duration,
    pub disconnected_timeout: Duration,
    pub failed_timeout: Duration,
}

impl AgentConfig {
    pub fn new(is_controlling: bool) -> Self {
        AgentConfig {
            is_controlling,
            local_credentials: Credentials::generate(),
            stun_servers: vec![],
            check_interval: DEFAULT_CHECK_INTERVAL,
            keepalive_interval: DEFAULT_KEEPALIVE_INTERVAL,
            disconnected_timeout: DEFAULT_DISCONNECTED_TIMEOUT,
            failed_timeout: DEFAULT_FAILED_TIMEOUT,
        }
    }
}

#[derive(Debug, Clone)]
struct BindingRequest {
    transaction_id: TransactionId,
    pair: Option<usize>,
    destination: SocketAddr,
    source: SocketAddr,
    is_use_candidate: bool,
    /// Role claimed when the request went out, for 487 handling.
    sent_controlling: bool,
    sent_at: Instant,
    retransmits: u16,
    /// Gathering request towards a STUN server rather than a check.
    gathering_base: Option<SocketAddr>,
}

/// The ICE agent: candidates, the checklist and the nomination logic for
/// one bundled component.
pub struct Agent {
    is_controlling: bool,
    tie_breaker: u64,
    connection_state: ConnectionState,

    local_credentials: Credentials,
    remote_credentials: Option<Credentials>,

    local_candidates: Vec<Candidate>,
    remote_candidates: Vec<Candidate>,
    checklist: Vec<CandidatePair>,
    selected_pair: Option<usize>,

    pending_requests: Vec<BindingRequest>,
    stun_servers: Vec<SocketAddr>,

    check_interval: Duration,
    keepalive_interval: Duration,
    disconnected_timeout: Duration,
    failed_timeout: Duration,

    last_tick: Option<Instant>,
    last_consent_sent: Option<Instant>,
    last_activity: Option<Instant>,
    start_time: Option<Instant>,

    transmits: VecDeque<IceTransmit>,
    events: VecDeque<Event>,
}

impl Agent {
    pub fn new(config: AgentConfig) -> Self {
        Agent {
            is_controlling: config.is_controlling,
            tie_breaker: rand::random::<u64>(),
            connection_state: ConnectionState::New,
            local_credentials: config.local_credentials,
            remote_credentials: None,
            local_candidates: vec![],
            remote_candidates: vec![],
            checklist: vec![],
            selected_pair: None,
            pending_requests: vec![],
            stun_servers: config.stun_servers,
            check_interval: config.check_interval,
            keepalive_interval: config.keepalive_interval,
            disconnected_timeout: config.disconnected_timeout,
            failed_timeout: config.failed_timeout,
            last_tick: None,
            last_consent_sent: None,
            last_activity: None,
            start_time: None,
            transmits: VecDeque::new(),
            events: VecDeque::new(),
        }
    }

    pub fn local_credentials(&self) -> &Credentials {
        &self.local_credentials
    }

    pub fn set_remote_credentials(&mut self, ufrag: String, pwd: String) -> Result<()> {
        if ufrag.is_empty() {
            return Err(Error::ErrRemoteUfragEmpty);
        }
        if pwd.is_empty() {
            return Err(Error::ErrRemotePwdEmpty);
        }
        self.remote_credentials = Some(Credentials { ufrag, pwd });
        Ok(())
    }

    pub fn is_controlling(&self) -> bool {
        self.is_controlling
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.connection_state
    }

    pub fn local_candidates(&self) -> &[Candidate] {
        &self.local_candidates
    }

    pub fn remote_candidates(&self) -> &[Candidate] {
        &self.remote_candidates
    }

    pub fn selected_pair(&self) -> Option<(&Candidate, &Candidate)> {
        let pair = self.checklist.get(self.selected_pair?)?;
        Some((
            &self.local_candidates[pair.local_index],
            &self.remote_candidates[pair.remote_index],
        ))
    }

    pub fn checklist(&self) -> &[CandidatePair] {
        &self.checklist
    }

    /// Restart with fresh credentials (RFC 8445 section 9).
    pub fn restart(&mut self) {
        self.local_credentials = Credentials::generate();
        self.remote_credentials = None;
        self.remote_candidates.clear();
        self.checklist.clear();
        self.selected_pair = None;
        self.pending_requests.clear();
        self.set_connection_state(ConnectionState::New);
    }

    pub fn close(&mut self) {
        self.checklist.clear();
        self.pending_requests.clear();
        self.selected_pair = None;
        self.set_connection_state(ConnectionState::Closed);
    }

    // --- candidates ------------------------------------------------------

    /// Adds a local candidate the embedder gathered (it owns the socket).
    pub fn add_local_candidate(&mut self, candidate: Candidate) {
        if self
            .local_candidates
            .iter()
            .any(|c| c.addr() == candidate.addr() && c.typ == candidate.typ)
        {
            return;
        }
        self.local_candidates.push(candidate);
        self.form_pairs();
    }

    pub fn add_remote_candidate(&mut self, candidate: Candidate) {
        if self
            .remote_candidates
            .iter()
            .any(|c| c.addr() == candidate.addr())
        {
            return;
        }
        self.remote_candidates.push(candidate);
        self.form_pairs();
    }

    /// Queues server-reflexive gathering requests for every (host
    /// candidate, STUN server) combination.
    pub fn gather_server_reflexive(&mut self, now: Instant) {
        let bases: Vec<SocketAddr> = self
            .local_candidates
            .iter()
            .filter(|c| c.typ == CandidateType::Host)
            .map(|c| c.addr())
            .collect();
        let servers = self.stun_servers.clone();
        for base in bases {
            for server in &servers {
                if base.is_ipv4() != server.is_ipv4() {
                    continue;
                }
                let mut message = Message::new();
                message.set_type(BINDING_REQUEST);
                message.new_transaction_id();
                message.write_header();

                self.pending_requests.push(BindingRequest {
                    transaction_id: message.transaction_id,
                    pair: None,
                    destination: *server,
                    source: base,
                    is_use_candidate: false,
                    sent_controlling: self.is_controlling,
                    sent_at: now,
                    retransmits: 0,
                    gathering_base: Some(base),
                });
                self.transmits.push_back(IceTransmit {
                    local_addr: base,
                    peer_addr: *server,
                    message: BytesMut::from(&message.raw[..]),
                });
            }
        }
    }

    fn form_pairs(&mut self) {
        for local_index in 0..self.local_candidates.len() {
            for remote_index in 0..self.remote_candidates.len() {
                let local = &self.local_candidates[local_index];
                let remote = &self.remote_candidates[remote_index];
                if local.addr().is_ipv4() != remote.addr().is_ipv4() {
                    continue;
                }
                if local.component != remote.component {
                    continue;
                }
                let exists = self.checklist.iter().any(|p| {
                    p.local_index == local_index && p.remote_index == remote_index
                });
                if exists {
                    continue;
                }
                self.checklist.push(CandidatePair::new(
                    local_index,
                    remote_index,
                    local.priority,
                    remote.priority,
                    self.is_controlling,
                ));
            }
        }

        // the checklist is append-only (pending checks hold indices into
        // it); walk it in priority order to unfreeze the best pair of
        // each foundation combination
        let mut order: Vec<usize> = (0..self.checklist.len()).collect();
        order.sort_by_key(|&i| std::cmp::Reverse(self.checklist[i].priority()));
        let mut seen_foundations: Vec<(String, String)> = vec![];
        for i in order {
            let pair = self.checklist[i];
            let key = (
                self.local_candidates[pair.local_index].foundation.clone(),
                self.remote_candidates[pair.remote_index].foundation.clone(),
            );
            if pair.state == CandidatePairState::Frozen && !seen_foundations.contains(&key) {
                self.checklist[i].state = CandidatePairState::Waiting;
            }
            seen_foundations.push(key);
        }
    }

    /// A same-foundation success unfreezes sibling pairs (RFC 8445
    /// section 6.1.4.2).
    fn unfreeze_foundation(&mut self, foundation: &str) {
        for pair in &mut self.checklist {
            if pair.state == CandidatePairState::Frozen
                && self.local_candidates[pair.local_index].foundation == foundation
            {
                pair.state = CandidatePairState::Waiting;
            }
        }
    }

    // --- timers ----------------------------------------------------------

    pub fn poll_transmit(&mut self) -> Option<IceTransmit> {
        self.transmits.pop_front()
    }

    pub fn poll_event(&mut self) -> Option<Event> {
        self.events.pop_front()
    }

    pub fn poll_timeout(&self) -> Option<Instant> {
        if self.connection_state == ConnectionState::Closed
            || self.connection_state == ConnectionState::Failed
        {
            return None;
        }
        match self.last_tick {
            Some(last) => Some(last + self.check_interval),
            None => None,
        }
    }

    pub fn handle_timeout(&mut self, now: Instant) -> Result<()> {
        if self.connection_state == ConnectionState::Closed {
            return Ok(());
        }
        self.last_tick = Some(now);

        self.retransmit_requests(now);
        self.send_checks(now);
        self.nominate(now);
        self.consent_freshness(now);
        Ok(())
    }

    fn retransmit_requests(&mut self, now: Instant) {
        let mut resend: Vec<(SocketAddr, SocketAddr, TransactionId)> = vec![];
        let mut failed_pairs: Vec<usize> = vec![];

        self.pending_requests.retain_mut(|request| {
            let rto = STUN_RTO * 2u32.pow(request.retransmits as u32);
            if now < request.sent_at + rto {
                return true;
            }
            if request.retransmits >= MAX_BINDING_REQUEST_RETRANSMITS {
                if let Some(pair) = request.pair {
                    failed_pairs.push(pair);
                }
                return false;
            }
            request.retransmits += 1;
            request.sent_at = now;
            resend.push((request.source, request.destination, request.transaction_id));
            true
        });

        for pair_index in failed_pairs {
            if let Some(pair) = self.checklist.get_mut(pair_index) {
                if pair.state == CandidatePairState::InProgress {
                    pair.state = CandidatePairState::Failed;
                    debug!("check failed after retries: {pair}");
                }
            }
        }

        for (source, destination, transaction_id) in resend {
            if let Err(err) = self.send_binding_request_raw(source, destination, transaction_id) {
                warn!("retransmit failed: {err}");
            }
        }

        self.update_liveness_state();
    }

    fn send_binding_request_raw(
        &mut self,
        source: SocketAddr,
        destination: SocketAddr,
        transaction_id: TransactionId,
    ) -> Result<()> {
        // rebuild the check with the same transaction id
        let pair_index = self
            .pending_requests
            .iter()
            .find(|r| r.transaction_id == transaction_id)
            .and_then(|r| r.pair);
        match pair_index {
            Some(pair_index) => {
                let is_use_candidate = self
                    .pending_requests
                    .iter()
                    .find(|r| r.transaction_id == transaction_id)
                    .map(|r| r.is_use_candidate)
                    .unwrap_or(false);
                let message =
                    self.build_check_message(pair_index, is_use_candidate, Some(transaction_id))?;
                self.transmits.push_back(IceTransmit {
                    local_addr: source,
                    peer_addr: destination,
                    message: BytesMut::from(&message.raw[..]),
                });
            }
            None => {
                // gathering request: header-only binding request
                let mut message = Message::new();
                message.set_type(BINDING_REQUEST);
                message.transaction_id = transaction_id;
                message.write_header();
                self.transmits.push_back(IceTransmit {
                    local_addr: source,
                    peer_addr: destination,
                    message: BytesMut::from(&message.raw[..]),
                });
            }
        }
        Ok(())
    }

    fn send_checks(&mut self, now: Instant) {
        if self.remote_credentials.is_none() {
            return;
        }
        if self.selected_pair.is_some() {
            return;
        }

        // one new check per tick keeps the pacing bounded
        let next = self
            .checklist
            .iter()
            .enumerate()
            .filter(|(_, p)| p.state == CandidatePairState::Waiting)
            .max_by_key(|(_, p)| p.priority())
            .map(|(i, _)| i);

        if let Some(pair_index) = next {
            if self.connection_state == ConnectionState::New {
                self.set_connection_state(ConnectionState::Checking);
                self.start_time = Some(now);
            }
            if let Err(err) = self.send_check(pair_index, false, now) {
                warn!("send_check failed: {err}");
            }
        }
    }

    fn nominate(&mut self, now: Instant) {
        if !self.is_controlling || self.selected_pair.is_some() {
            return;
        }
        // regular nomination: repeat the check with USE-CANDIDATE on the
        // best succeeded pair
        let best = self
            .checklist
            .iter()
            .enumerate()
            .filter(|(_, p)| p.state == CandidatePairState::Succeeded && !p.nominated)
            .max_by_key(|(_, p)| p.priority())
            .map(|(i, _)| i);
        if let Some(pair_index) = best {
            let already_nominating = self
                .pending_requests
                .iter()
                .any(|r| r.is_use_candidate && r.pair == Some(pair_index));
            if !already_nominating {
                debug!("nominating pair {}", self.checklist[pair_index]);
                if let Err(err) = self.send_check(pair_index, true, now) {
                    warn!("nomination check failed: {err}");
                }
            }
        }
    }

    fn consent_freshness(&mut self, now: Instant) {
        let pair_index = match self.selected_pair {
            Some(pair_index) => pair_index,
            None => return,
        };

        let due = match self.last_consent_sent {
            Some(last) => now.duration_since(last) >= self.keepalive_interval,
            None => true,
        };
        if due {
            self.last_consent_sent = Some(now);
            if let Err(err) = self.send_check(pair_index, false, now) {
                warn!("consent check failed: {err}");
            }
        }

        self.update_liveness_state();
    }

    fn update_liveness_state(&mut self) {
        if !matches!(
            self.connection_state,
            ConnectionState::Connected | ConnectionState::Completed | ConnectionState::Disconnected
        ) {
            // while still checking: fail once every pair is terminal and
            // none succeeded
            if self.connection_state == ConnectionState::Checking
                && !self.checklist.is_empty()
                && self
                    .checklist
                    .iter()
                    .all(|p| p.state == CandidatePairState::Failed)
            {
                self.set_connection_state(ConnectionState::Failed);
            }
            return;
        }

        if let (Some(last_activity), Some(last_tick)) = (self.last_activity, self.last_tick) {
            let silence = last_tick.duration_since(last_activity);
            if silence >= self.failed_timeout {
                self.set_connection_state(ConnectionState::Failed);
            } else if silence >= self.disconnected_timeout {
                self.set_connection_state(ConnectionState::Disconnected);
            }
        }
    }

    // --- sending checks --------------------------------------------------

    fn build_check_message(
        &self,
        pair_index: usize,
        is_use_candidate: bool,
        transaction_id: Option<TransactionId>,
    ) -> Result<Message> {
        let remote_credentials = self
            .remote_credentials
            .as_ref()
            .ok_or(Error::ErrRemoteUfragEmpty)?;
        let pair = &self.checklist[pair_index];
        let local = &self.local_candidates[pair.local_index];

        let username = format!(
            "{}:{}",
            remote_credentials.ufrag, self.local_credentials.ufrag
        );

        let mut message = Message::new();
        message.set_type(BINDING_REQUEST);
        match transaction_id {
            Some(transaction_id) => {
                message.transaction_id = transaction_id;
            }
            None => message.new_transaction_id(),
        }
        message.write_header();

        TextAttribute::new(ATTR_USERNAME, username).add_to(&mut message)?;
        if self.is_controlling {
            message.add(ATTR_ICE_CONTROLLING, &self.tie_breaker.to_be_bytes());
            if is_use_candidate {
                message.add(ATTR_USE_CANDIDATE, &[]);
            }
        } else {
            message.add(ATTR_ICE_CONTROLLED, &self.tie_breaker.to_be_bytes());
        }
        message.add(ATTR_PRIORITY, &local.prflx_priority().to_be_bytes());
        MessageIntegrity::new_short_term_integrity(remote_credentials.pwd.clone())
            .add_to(&mut message)?;
        FINGERPRINT.add_to(&mut message)?;

        Ok(message)
    }

    fn send_check(&mut self, pair_index: usize, is_use_candidate: bool, now: Instant) -> Result<()> {
        let message = self.build_check_message(pair_index, is_use_candidate, None)?;
        let pair = &mut self.checklist[pair_index];
        if pair.state == CandidatePairState::Waiting {
            pair.state = CandidatePairState::InProgress;
        }
        pair.binding_request_count += 1;

        let local_addr = self.local_candidates[pair.local_index].addr();
        let peer_addr = self.remote_candidates[pair.remote_index].addr();

        self.pending_requests.push(BindingRequest {
            transaction_id: message.transaction_id,
            pair: Some(pair_index),
            destination: peer_addr,
            source: local_addr,
            is_use_candidate,
            sent_controlling: self.is_controlling,
            sent_at: now,
            retransmits: 0,
            gathering_base: None,
        });
        self.transmits.push_back(IceTransmit {
            local_addr,
            peer_addr,
            message: BytesMut::from(&message.raw[..]),
        });
        trace!("sent check pair={pair_index} use_candidate={is_use_candidate}");
        Ok(())
    }

    // --- receiving -------------------------------------------------------

    /// Feeds an inbound STUN datagram received on `local_addr` from
    /// `peer_addr`.
    pub fn handle_read(
        &mut self,
        local_addr: SocketAddr,
        peer_addr: SocketAddr,
        datagram: &[u8],
        now: Instant,
    ) -> Result<()> {
        if self.connection_state == ConnectionState::Closed {
            return Err(Error::ErrAgentClosed);
        }
        if !is_message(datagram) {
            return Err(Error::ErrInvalidMagicCookie);
        }

        let mut message = Message::new();
        message.unmarshal_binary(datagram)?;

        if message.typ == BINDING_REQUEST {
            self.handle_binding_request(message, local_addr, peer_addr, now)
        } else if message.typ == BINDING_SUCCESS || message.typ == BINDING_ERROR_RESPONSE {
            self.handle_binding_response(message, local_addr, peer_addr, now)
        } else {
            Ok(())
        }
    }

    fn handle_binding_request(
        &mut self,
        message: Message,
        local_addr: SocketAddr,
        peer_addr: SocketAddr,
        now: Instant,
    ) -> Result<()> {
        let remote_credentials = match &self.remote_credentials {
            Some(credentials) => credentials.clone(),
            // a check can arrive before the remote description
            None => return Ok(()),
        };

        // USERNAME must be "local-ufrag:remote-ufrag" from our view
        let mut username = TextAttribute::default();
        username.get_from_as(&message, ATTR_USERNAME)?;
        let expected = format!(
            "{}:{}",
            self.local_credentials.ufrag, remote_credentials.ufrag
        );
        if username.text != expected {
            debug!("username mismatch, dropping request");
            return Err(Error::ErrMismatchUsername);
        }

        // integrity under our password; failures are dropped silently
        if MessageIntegrity::new_short_term_integrity(self.local_credentials.pwd.clone())
            .check(&message)
            .is_err()
        {
            trace!("integrity mismatch on inbound check, discarding");
            return Ok(());
        }

        // role conflict (RFC 8445 section 7.3.1.1)
        if self.is_controlling && message.contains(ATTR_ICE_CONTROLLING) {
            let their_tie_breaker = u64::from_be_bytes(
                message.get(ATTR_ICE_CONTROLLING)?[..8]
                    .try_into()
                    .map_err(|_| Error::ErrAttributeSizeInvalid)?,
            );
            if self.tie_breaker >= their_tie_breaker {
                self.send_role_conflict(&message, local_addr, peer_addr)?;
                return Ok(());
            }
            debug!("switching to controlled role after conflict");
            self.is_controlling = false;
            self.recompute_pair_priorities();
        } else if !self.is_controlling && message.contains(ATTR_ICE_CONTROLLED) {
            let their_tie_breaker = u64::from_be_bytes(
                message.get(ATTR_ICE_CONTROLLED)?[..8]
                    .try_into()
                    .map_err(|_| Error::ErrAttributeSizeInvalid)?,
            );
            if self.tie_breaker >= their_tie_breaker {
                debug!("switching to controlling role after conflict");
                self.is_controlling = true;
                self.recompute_pair_priorities();
            } else {
                self.send_role_conflict(&message, local_addr, peer_addr)?;
                return Ok(());
            }
        }

        self.last_activity = Some(now);

        // learn a peer-reflexive remote candidate
        if !self
            .remote_candidates
            .iter()
            .any(|c| c.addr() == peer_addr)
        {
            let mut prflx = Candidate::peer_reflexive(peer_addr.ip(), peer_addr.port(), peer_addr);
            if let Ok(priority_raw) = message.get(ATTR_PRIORITY) {
                if priority_raw.len() >= 4 {
                    prflx.priority = u32::from_be_bytes(priority_raw[..4].try_into().unwrap());
                }
            }
            debug!("learned prflx remote candidate {prflx}");
            self.add_remote_candidate(prflx);
        }

        // triggered check + possible nomination
        let pair_index = self.find_pair(local_addr, peer_addr);
        if let Some(pair_index) = pair_index {
            let use_candidate = message.contains(ATTR_USE_CANDIDATE);
            let pair = &mut self.checklist[pair_index];
            if use_candidate && !self.is_controlling {
                pair.nominated = true;
                if pair.state == CandidatePairState::Succeeded {
                    self.select_pair(pair_index);
                }
            }
            let pair = &self.checklist[pair_index];
            if pair.state == CandidatePairState::Frozen
                || pair.state == CandidatePairState::Waiting
            {
                self.checklist[pair_index].state = CandidatePairState::Waiting;
                let _ = self.send_check(pair_index, false, now);
            }
        }

        // binding success response with the reflexive transport address
        let mut response = Message::new();
        response.set_type(BINDING_SUCCESS);
        response.transaction_id = message.transaction_id;
        response.write_header();
        XorMappedAddress {
            ip: peer_addr.ip(),
            port: peer_addr.port(),
        }
        .add_to(&mut response)?;
        MessageIntegrity::new_short_term_integrity(self.local_credentials.pwd.clone())
            .add_to(&mut response)?;
        FINGERPRINT.add_to(&mut response)?;

        self.transmits.push_back(IceTransmit {
            local_addr,
            peer_addr,
            message: BytesMut::from(&response.raw[..]),
        });
        Ok(())
    }

    fn send_role_conflict(
        &mut self,
        request: &Message,
        local_addr: SocketAddr,
        peer_addr: SocketAddr,
    ) -> Result<()> {
        let mut response = Message::new();
        response.set_type(BINDING_ERROR_RESPONSE);
        response.transaction_id = request.transaction_id;
        response.write_header();
        ErrorCodeAttribute {
            code: CODE_ROLE_CONFLICT,
            reason: b"Role Conflict".to_vec(),
        }
        .add_to(&mut response)?;
        MessageIntegrity::new_short_term_integrity(self.local_credentials.pwd.clone())
            .add_to(&mut response)?;
        FINGERPRINT.add_to(&mut response)?;

        self.transmits.push_back(IceTransmit {
            local_addr,
            peer_addr,
            message: BytesMut::from(&response.raw[..]),
        });
        Ok(())
    }

    fn recompute_pair_priorities(&mut self) {
        // order is never mutated (indices are handles); only the role
        // flag feeding the priority formula changes
        for pair in &mut self.checklist {
            pair.ice_role_controlling = self.is_controlling;
        }
    }

    fn handle_binding_response(
        &mut self,
        mut message: Message,
        local_addr: SocketAddr,
        peer_addr: SocketAddr,
        now: Instant,
    ) -> Result<()> {
        let request_index = match self
            .pending_requests
            .iter()
            .position(|r| r.transaction_id == message.transaction_id)
        {
            Some(request_index) => request_index,
            None => {
                trace!("response for unknown transaction, discarding");
                return Ok(());
            }
        };
        let request = self.pending_requests.remove(request_index);

        if request.destination != peer_addr {
            debug!("response source does not match request destination, discarding");
            return Ok(());
        }

        // gathering response from a STUN server
        if let Some(base) = request.gathering_base {
            let mut reflexive = XorMappedAddress::default();
            if reflexive.get_from(&message).is_err() {
                return Ok(());
            }
            let candidate = Candidate::server_reflexive(reflexive.ip, reflexive.port, base);
            if !self
                .local_candidates
                .iter()
                .any(|c| c.addr() == candidate.addr() && c.typ == candidate.typ)
            {
                debug!("gathered srflx candidate {candidate}");
                self.events
                    .push_back(Event::NewLocalCandidate(Box::new(candidate.clone())));
                self.add_local_candidate(candidate);
            }
            return Ok(());
        }

        let remote_credentials = match &self.remote_credentials {
            Some(credentials) => credentials.clone(),
            None => return Ok(()),
        };

        if message.typ == BINDING_ERROR_RESPONSE {
            let mut error = ErrorCodeAttribute::default();
            if error.get_from(&message).is_ok() && error.code == CODE_ROLE_CONFLICT {
                // switch only if the role has not changed since the
                // request went out (RFC 8445 section 7.2.5.1)
                if self.is_controlling == request.sent_controlling {
                    debug!("role conflict error response, switching role");
                    self.is_controlling = !self.is_controlling;
                    self.recompute_pair_priorities();
                }
                if let Some(pair_index) = request.pair {
                    if pair_index < self.checklist.len() {
                        self.checklist[pair_index].state = CandidatePairState::Waiting;
                    }
                }
            }
            return Ok(());
        }

        // success responses must carry a valid integrity
        if MessageIntegrity::new_short_term_integrity(remote_credentials.pwd)
            .check(&mut message)
            .is_err()
        {
            trace!("integrity mismatch on response, discarding");
            return Ok(());
        }

        self.last_activity = Some(now);

        let pair_index = match request.pair {
            Some(pair_index) if pair_index < self.checklist.len() => pair_index,
            _ => return Ok(()),
        };

        // discover a peer-reflexive local candidate
        let mut mapped = XorMappedAddress::default();
        if mapped.get_from(&message).is_ok() {
            let mapped_addr = SocketAddr::new(mapped.ip, mapped.port);
            if !self.local_candidates.iter().any(|c| c.addr() == mapped_addr) {
                let prflx =
                    Candidate::peer_reflexive(mapped.ip, mapped.port, local_addr);
                debug!("learned prflx local candidate {prflx}");
                self.events
                    .push_back(Event::NewLocalCandidate(Box::new(prflx.clone())));
                self.add_local_candidate(prflx);
            }
        }

        let foundation = self.local_candidates[self.checklist[pair_index].local_index]
            .foundation
            .clone();
        {
            let pair = &mut self.checklist[pair_index];
            if pair.state != CandidatePairState::Succeeded {
                pair.state = CandidatePairState::Succeeded;
            }
            pair.rtt_ms = Some(now.duration_since(request.sent_at).as_millis() as u64);
        }
        self.unfreeze_foundation(&foundation);

        if request.is_use_candidate {
            self.checklist[pair_index].nominated = true;
        }
        if self.checklist[pair_index].nominated && self.selected_pair.is_none() {
            self.select_pair(pair_index);
        }

        Ok(())
    }

    fn find_pair(&self, local_addr: SocketAddr, peer_addr: SocketAddr) -> Option<usize> {
        self.checklist.iter().position(|p| {
            self.local_candidates[p.local_index].addr() == local_addr
                && self.remote_candidates[p.remote_index].addr() == peer_addr
        })
    }

    fn select_pair(&mut self, pair_index: usize) {
        self.selected_pair = Some(pair_index);
        let pair = &self.checklist[pair_index];
        let local = self.local_candidates[pair.local_index].clone();
        let remote = self.remote_candidates[pair.remote_index].clone();
        debug!("selected pair {local} <-> {remote}");
        self.events.push_back(Event::SelectedCandidatePairChange(
            Box::new(local),
            Box::new(remote),
        ));
        self.set_connection_state(ConnectionState::Connected);

        // with a nominated pair and no checks left to run, checking is done
        let done = self.checklist.iter().all(|p| {
            !matches!(
                p.state,
                CandidatePairState::Waiting | CandidatePairState::InProgress
            )
        });
        if done {
            self.set_connection_state(ConnectionState::Completed);
        }
    }

    fn set_connection_state(&mut self, state: ConnectionState) {
        if self.connection_state == state {
            return;
        }
        // never step backwards from a terminal state
        if self.connection_state == ConnectionState::Closed {
            return;
        }
        debug!("ice state {} -> {}", self.connection_state, state);
        self.connection_state = state;
        self.events.push_back(Event::ConnectionStateChange(state));
    }

    /// Tells the agent the session saw traffic from the selected peer
    /// (consent is refreshed by authenticated checks; data packets keep
    /// the disconnect detector quiet too).
    pub fn note_activity(&mut self, now: Instant) {
        self.last_activity = Some(now);
    }

    /// Kicks the first timeout tick so poll_timeout has a base.
    pub fn start(&mut self, now: Instant) {
        if self.last_tick.is_none() {
            self.last_tick = Some(now);
        }
    }
}
