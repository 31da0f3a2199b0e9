#[cfg(test)]
mod association_test;
pub(crate) mod timer;

use std::collections::{BTreeSet, HashMap, VecDeque};
use std::time::Instant;

use bytes::Bytes;
use log::{debug, trace, warn};
use rand::Rng;

use shared::error::{Error, Result};

use crate::chunk::control::{
    ChunkAbort, ChunkCookieAck, ChunkCookieEcho, ChunkHeartbeat, ChunkHeartbeatAck, ChunkInit,
    ChunkShutdown, ChunkShutdownAck, ChunkShutdownComplete,
};
use crate::chunk::forward_tsn::{ChunkForwardTsn, ForwardTsnStream};
use crate::chunk::payload_data::{ChunkPayloadData, PayloadProtocolIdentifier};
use crate::chunk::reconfig::ChunkReconfig;
use crate::chunk::sack::{ChunkSelectiveAck, GapAckBlock};
use crate::chunk::Chunk;
use crate::packet::Packet;
use crate::param::{Param, RECONFIG_RESULT_SUCCESS_PERFORMED};
use crate::queue::{InflightQueue, ReassemblyQueue};
use crate::util::{sna32gt, sna32lt, sna32lte};

use timer::{RtoManager, Timer, TimerTable};

const DEFAULT_MAX_MESSAGE_SIZE: u32 = 262144;
const DEFAULT_MAX_RECEIVE_BUFFER: u32 = 1024 * 1024;
const DEFAULT_MAX_STREAMS: u16 = 1024;
const COMMON_HEADER_SIZE: u32 = 12;
const DATA_CHUNK_HEADER_SIZE: u32 = 16;
const INITIAL_MTU: u32 = 1228;
const MIN_CWND_MTU: u32 = 4;
const COOKIE_SIZE: usize = 32;
const MAX_GAP_ACK_BLOCKS: usize = 16;

/// Whether this endpoint initiates the association.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum Side {
    Client,
    Server,
}

/// Association state (RFC 4960 section 4).
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum AssociationState {
    Closed,
    CookieWait,
    CookieEchoed,
    Established,
    ShutdownPending,
    ShutdownSent,
    ShutdownReceived,
    ShutdownAckSent,
}

/// Per-message reliability, mapped from data channel options.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ReliabilityType {
    Reliable,
    /// Retransmit at most N times, then abandon.
    Rexmit(u32),
    /// Retransmit for at most N milliseconds, then abandon.
    Timed(u32),
}

/// Events the association surfaces to its owner.
#[derive(Debug, PartialEq)]
pub enum AssociationEvent {
    Connected,
    /// One reassembled user message.
    Data {
        stream_id: u16,
        ppid: PayloadProtocolIdentifier,
        unordered: bool,
        data: Bytes,
    },
    /// The peer reset its outgoing streams (our incoming side).
    StreamsReset { stream_ids: Vec<u16> },
    Closed,
}

pub struct AssociationConfig {
    pub side: Side,
    pub max_message_size: u32,
    pub max_receive_buffer_size: u32,
    pub max_num_outbound_streams: u16,
    pub max_num_inbound_streams: u16,
}

impl AssociationConfig {
    pub fn new(side: Side) -> Self {
        AssociationConfig {
            side,
            max_message_size: DEFAULT_MAX_MESSAGE_SIZE,
            max_receive_buffer_size: DEFAULT_MAX_RECEIVE_BUFFER,
            max_num_outbound_streams: DEFAULT_MAX_STREAMS,
            max_num_inbound_streams: DEFAULT_MAX_STREAMS,
        }
    }
}

/// A single deterministic SCTP association carried over DTLS.
///
/// Inbound packets enter through `handle_read`; outbound packets drain
/// from `poll_transmit`; timers run on `poll_timeout`/`handle_timeout`.
pub struct Association {
    side: Side,
    state: AssociationState,
    config: AssociationConfig,

    source_port: u16,
    destination_port: u16,
    my_verification_tag: u32,
    peer_verification_tag: u32,

    // sender
    my_next_tsn: u32,
    cumulative_tsn_ack_point: u32,
    advanced_peer_tsn_ack_point: u32,
    inflight: InflightQueue,
    pending: VecDeque<ChunkPayloadData>,
    stream_next_ssn: HashMap<u16, u16>,
    rwnd: u32, // peer's advertised window
    cwnd: u32,
    ssthresh: u32,
    partial_bytes_acked: u32,
    in_fast_recovery: bool,
    fast_recover_exit_point: u32,
    will_send_forward_tsn: bool,
    will_retransmit_fast: bool,

    // receiver
    peer_tsn_base: u32,
    cum_offset: i64, // offset of the cumulative received TSN, -1 before any
    received_offsets: BTreeSet<i64>,
    duplicate_tsns: Vec<u32>,
    reassembly: HashMap<u16, ReassemblyQueue>,
    ack_pending: bool,

    // stream reset
    my_next_reset_seq: u32,
    peer_next_reset_seq: u32,
    pending_reset: Option<(u32, Vec<u16>)>,
    will_send_reset: bool,

    // handshake
    my_cookie: Vec<u8>,
    handshake_resend: Option<Chunk>,

    timers: TimerTable,
    rto_mgr: RtoManager,

    transmits: VecDeque<Vec<u8>>,
    events: VecDeque<AssociationEvent>,
}

impl Association {
    pub fn new(config: AssociationConfig, now: Instant) -> Self {
        let my_verification_tag: u32 = rand::thread_rng().gen();
        let my_initial_tsn: u32 = rand::thread_rng().gen();
        let side = config.side;

        let cwnd = (INITIAL_MTU * MIN_CWND_MTU).min(4380.max(2 * INITIAL_MTU));
        let mut assoc = Association {
            side,
            state: AssociationState::Closed,
            source_port: 5000,
            destination_port: 5000,
            my_verification_tag,
            peer_verification_tag: 0,
            my_next_tsn: my_initial_tsn,
            cumulative_tsn_ack_point: my_initial_tsn.wrapping_sub(1),
            advanced_peer_tsn_ack_point: my_initial_tsn.wrapping_sub(1),
            inflight: InflightQueue::default(),
            pending: VecDeque::new(),
            stream_next_ssn: HashMap::new(),
            rwnd: 0,
            cwnd,
            ssthresh: config.max_receive_buffer_size,
            partial_bytes_acked: 0,
            in_fast_recovery: false,
            fast_recover_exit_point: 0,
            will_send_forward_tsn: false,
            will_retransmit_fast: false,
            peer_tsn_base: 0,
            cum_offset: -1,
            received_offsets: BTreeSet::new(),
            duplicate_tsns: vec![],
            reassembly: HashMap::new(),
            ack_pending: false,
            my_next_reset_seq: my_initial_tsn,
            peer_next_reset_seq: 0,
            pending_reset: None,
            will_send_reset: false,
            my_cookie: vec![],
            handshake_resend: None,
            timers: TimerTable::new(),
            rto_mgr: RtoManager::new(),
            transmits: VecDeque::new(),
            events: VecDeque::new(),
            config,
        };

        if side == Side::Client {
            assoc.send_init(now);
        }
        assoc
    }

    pub fn state(&self) -> AssociationState {
        self.state
    }

    pub fn is_established(&self) -> bool {
        self.state == AssociationState::Established
    }

    pub fn max_message_size(&self) -> u32 {
        self.config.max_message_size
    }

    pub fn poll_transmit(&mut self) -> Option<Vec<u8>> {
        self.transmits.pop_front()
    }

    pub fn poll_event(&mut self) -> Option<AssociationEvent> {
        self.events.pop_front()
    }

    pub fn poll_timeout(&self) -> Option<Instant> {
        self.timers.next_timeout()
    }

    /// Bytes queued locally (pending plus in flight) for a stream.
    pub fn buffered_amount(&self, stream_id: u16) -> usize {
        let pending: usize = self
            .pending
            .iter()
            .filter(|c| c.stream_identifier == stream_id)
            .map(|c| c.user_data.len())
            .sum();
        let inflight: usize = self
            .inflight
            .iter()
            .filter(|c| c.stream_identifier == stream_id && !c.acked)
            .map(|c| c.user_data.len())
            .sum();
        pending + inflight
    }

    // --- handshake -------------------------------------------------------

    fn send_init(&mut self, now: Instant) {
        let init = ChunkInit {
            initiate_tag: self.my_verification_tag,
            advertised_receiver_window_credit: self.config.max_receive_buffer_size,
            num_outbound_streams: self.config.max_num_outbound_streams,
            num_inbound_streams: self.config.max_num_inbound_streams,
            initial_tsn: self.my_next_tsn,
            params: vec![Param::ForwardTsnSupported],
        };
        let chunk = Chunk::Init(init);
        self.handshake_resend = Some(chunk.clone());
        self.send_packet(vec![chunk], 0);
        self.state = AssociationState::CookieWait;
        self.timers.start(Timer::T1Init, now, self.rto_mgr.get_rto());
        debug!("[{:?}] sent INIT", self.side);
    }

    /// Feeds one inbound SCTP packet.
    pub fn handle_read(&mut self, raw: &Bytes, now: Instant) -> Result<()> {
        let packet = Packet::unmarshal(raw)?;

        // verification tag rules, RFC 4960 section 8.5
        let has_init = packet
            .chunks
            .iter()
            .any(|c| matches!(c, Chunk::Init(_)));
        if has_init {
            if packet.verification_tag != 0 {
                return Err(Error::ErrInitChunkVerifyTagNotZero);
            }
            if packet.chunks.len() != 1 {
                return Err(Error::ErrInitChunkBundled);
            }
        } else if packet.verification_tag != self.my_verification_tag {
            trace!("[{:?}] bad verification tag, discarding", self.side);
            return Ok(());
        }

        for chunk in packet.chunks {
            self.handle_chunk(chunk, now)?;
        }

        self.flush(now);
        Ok(())
    }

    pub fn handle_timeout(&mut self, now: Instant) -> Result<()> {
        for timer in Timer::VALUES {
            let (expired, failure, _retries) = self.timers.is_expired(timer, now);
            if !expired {
                continue;
            }
            if failure {
                self.state = AssociationState::Closed;
                self.events.push_back(AssociationEvent::Closed);
                return Err(match timer {
                    Timer::T1Init => Error::ErrHandshakeInitAck,
                    Timer::T1Cookie => Error::ErrHandshakeCookieEcho,
                    _ => Error::ErrTimeout,
                });
            }

            match timer {
                Timer::T1Init | Timer::T1Cookie => {
                    if let Some(chunk) = self.handshake_resend.clone() {
                        let tag = if timer == Timer::T1Init {
                            0
                        } else {
                            self.peer_verification_tag
                        };
                        self.send_packet(vec![chunk], tag);
                    }
                    self.timers.start(timer, now, self.rto_mgr.get_rto());
                }
                Timer::T3Rtx => {
                    self.on_retransmission_timeout(now);
                }
                Timer::Ack => {
                    if self.ack_pending {
                        self.send_sack();
                    }
                }
                Timer::T2Shutdown => {
                    match self.state {
                        AssociationState::ShutdownSent => {
                            let cumulative_tsn_ack = self.peer_cumulative_tsn();
                            self.send_packet(
                                vec![Chunk::Shutdown(ChunkShutdown { cumulative_tsn_ack })],
                                self.peer_verification_tag,
                            );
                        }
                        AssociationState::ShutdownAckSent => {
                            self.send_packet(
                                vec![Chunk::ShutdownAck(ChunkShutdownAck)],
                                self.peer_verification_tag,
                            );
                        }
                        _ => {}
                    }
                    self.timers.start(Timer::T2Shutdown, now, self.rto_mgr.get_rto());
                }
            }
        }

        self.flush(now);
        Ok(())
    }

    fn handle_chunk(&mut self, chunk: Chunk, now: Instant) -> Result<()> {
        match chunk {
            Chunk::Init(init) => self.handle_init(init, now),
            Chunk::InitAck(init_ack) => self.handle_init_ack(init_ack, now),
            Chunk::CookieEcho(echo) => self.handle_cookie_echo(echo),
            Chunk::CookieAck(_) => self.handle_cookie_ack(),
            Chunk::PayloadData(data) => self.handle_data(data, now),
            Chunk::Sack(sack) => self.handle_sack(sack, now),
            Chunk::Heartbeat(hb) => {
                self.send_packet(
                    vec![Chunk::HeartbeatAck(ChunkHeartbeatAck { info: hb.info })],
                    self.peer_verification_tag,
                );
                Ok(())
            }
            Chunk::HeartbeatAck(_) => Ok(()),
            Chunk::Abort(abort) => {
                debug!("[{:?}] received ABORT: {:?}", self.side, abort.error_causes);
                self.state = AssociationState::Closed;
                self.events.push_back(AssociationEvent::Closed);
                Ok(())
            }
            Chunk::Error(err) => {
                warn!("[{:?}] received ERROR: {:?}", self.side, err.error_causes);
                Ok(())
            }
            Chunk::Shutdown(_) => self.handle_shutdown(now),
            Chunk::ShutdownAck(_) => {
                if matches!(
                    self.state,
                    AssociationState::ShutdownSent | AssociationState::ShutdownAckSent
                ) {
                    self.timers.stop(Timer::T2Shutdown);
                    self.send_packet(
                        vec![Chunk::ShutdownComplete(ChunkShutdownComplete)],
                        self.peer_verification_tag,
                    );
                    self.state = AssociationState::Closed;
                    self.events.push_back(AssociationEvent::Closed);
                }
                Ok(())
            }
            Chunk::ShutdownComplete(_) => {
                if self.state == AssociationState::ShutdownAckSent {
                    self.timers.stop(Timer::T2Shutdown);
                    self.state = AssociationState::Closed;
                    self.events.push_back(AssociationEvent::Closed);
                }
                Ok(())
            }
            Chunk::Reconfig(reconfig) => self.handle_reconfig(reconfig),
            Chunk::ForwardTsn(fwd) => self.handle_forward_tsn(fwd),
        }
    }

    fn handle_init(&mut self, init: ChunkInit, _now: Instant) -> Result<()> {
        if self.side != Side::Server {
            return Ok(());
        }

        self.peer_verification_tag = init.initiate_tag;
        self.peer_tsn_base = init.initial_tsn;
        self.cum_offset = -1;
        self.rwnd = init.advertised_receiver_window_credit;
        self.peer_next_reset_seq = init.initial_tsn;

        if self.my_cookie.is_empty() {
            let mut cookie = vec![0u8; COOKIE_SIZE];
            rand::thread_rng().fill(&mut cookie[..]);
            self.my_cookie = cookie;
        }

        let init_ack = ChunkInit {
            initiate_tag: self.my_verification_tag,
            advertised_receiver_window_credit: self.config.max_receive_buffer_size,
            num_outbound_streams: self.config.max_num_outbound_streams,
            num_inbound_streams: self.config.max_num_inbound_streams,
            initial_tsn: self.my_next_tsn,
            params: vec![
                Param::StateCookie(self.my_cookie.clone()),
                Param::ForwardTsnSupported,
            ],
        };
        self.send_packet(vec![Chunk::InitAck(init_ack)], self.peer_verification_tag);
        debug!("[{:?}] sent INIT ACK", self.side);
        Ok(())
    }

    fn handle_init_ack(&mut self, init_ack: ChunkInit, now: Instant) -> Result<()> {
        if self.state != AssociationState::CookieWait {
            return Ok(());
        }

        self.timers.stop(Timer::T1Init);
        self.peer_verification_tag = init_ack.initiate_tag;
        self.peer_tsn_base = init_ack.initial_tsn;
        self.cum_offset = -1;
        self.rwnd = init_ack.advertised_receiver_window_credit;
        self.ssthresh = self.rwnd;
        self.peer_next_reset_seq = init_ack.initial_tsn;

        let cookie = init_ack
            .state_cookie()
            .ok_or(Error::ErrInitAckNoCookie)?
            .to_vec();

        let chunk = Chunk::CookieEcho(ChunkCookieEcho { cookie });
        self.handshake_resend = Some(chunk.clone());
        self.send_packet(vec![chunk], self.peer_verification_tag);
        self.state = AssociationState::CookieEchoed;
        self.timers.start(Timer::T1Cookie, now, self.rto_mgr.get_rto());
        debug!("[{:?}] sent COOKIE ECHO", self.side);
        Ok(())
    }

    fn handle_cookie_echo(&mut self, echo: ChunkCookieEcho) -> Result<()> {
        if self.side != Side::Server || self.my_cookie.is_empty() {
            return Ok(());
        }
        if echo.cookie != self.my_cookie {
            return Err(Error::ErrHandshakeCookieEcho);
        }

        self.send_packet(
            vec![Chunk::CookieAck(ChunkCookieAck)],
            self.peer_verification_tag,
        );
        if self.state != AssociationState::Established {
            self.state = AssociationState::Established;
            self.events.push_back(AssociationEvent::Connected);
        }
        Ok(())
    }

    fn handle_cookie_ack(&mut self) -> Result<()> {
        if self.state != AssociationState::CookieEchoed {
            return Ok(());
        }
        self.timers.stop(Timer::T1Cookie);
        self.handshake_resend = None;
        self.state = AssociationState::Established;
        self.events.push_back(AssociationEvent::Connected);
        Ok(())
    }

    // --- receive path ----------------------------------------------------

    fn peer_cumulative_tsn(&self) -> u32 {
        if self.cum_offset < 0 {
            self.peer_tsn_base.wrapping_sub(1)
        } else {
            self.peer_tsn_base.wrapping_add(self.cum_offset as u32)
        }
    }

    fn handle_data(&mut self, data: ChunkPayloadData, now: Instant) -> Result<()> {
        if !matches!(
            self.state,
            AssociationState::Established
                | AssociationState::CookieEchoed
                | AssociationState::ShutdownPending
                | AssociationState::ShutdownSent
        ) {
            return Ok(());
        }

        let offset = data.tsn.wrapping_sub(self.peer_tsn_base) as i64;
        let immediate = data.immediate_sack;

        if offset <= self.cum_offset || self.received_offsets.contains(&offset) {
            self.duplicate_tsns.push(data.tsn);
        } else {
            self.received_offsets.insert(offset);
            while self.received_offsets.remove(&(self.cum_offset + 1)) {
                self.cum_offset += 1;
            }

            let queue = self
                .reassembly
                .entry(data.stream_identifier)
                .or_insert_with(|| ReassemblyQueue::new(data.stream_identifier));
            queue.push(data);

            let mut ready = vec![];
            for queue in self.reassembly.values_mut() {
                while let Some(message) = queue.pop() {
                    ready.push(message);
                }
            }
            for message in ready {
                self.events.push_back(AssociationEvent::Data {
                    stream_id: message.stream_identifier,
                    ppid: message.ppid,
                    unordered: message.unordered,
                    data: message.data,
                });
            }
        }

        // delayed SACK: arm the timer on the first unacked packet, go
        // immediate on gaps, duplicates or the I bit
        let has_gap = !self.received_offsets.is_empty();
        if immediate || has_gap || !self.duplicate_tsns.is_empty() || self.ack_pending {
            self.ack_pending = true;
            self.send_sack();
        } else {
            self.ack_pending = true;
            if !self.timers.is_running(Timer::Ack) {
                self.timers.start(Timer::Ack, now, 0);
            }
        }
        Ok(())
    }

    fn send_sack(&mut self) {
        let cumulative_tsn_ack = self.peer_cumulative_tsn();

        let mut gap_ack_blocks: Vec<GapAckBlock> = vec![];
        for &offset in &self.received_offsets {
            let rel = (offset - self.cum_offset) as u32;
            if rel > u16::MAX as u32 {
                break;
            }
            let rel = rel as u16;
            match gap_ack_blocks.last_mut() {
                Some(block) if block.end + 1 == rel => block.end = rel,
                _ => {
                    if gap_ack_blocks.len() == MAX_GAP_ACK_BLOCKS {
                        break;
                    }
                    gap_ack_blocks.push(GapAckBlock {
                        start: rel,
                        end: rel,
                    });
                }
            }
        }

        let buffered: usize = self.reassembly.values().map(|q| q.buffered_bytes()).sum();
        let a_rwnd = self
            .config
            .max_receive_buffer_size
            .saturating_sub(buffered as u32);

        let sack = ChunkSelectiveAck {
            cumulative_tsn_ack,
            advertised_receiver_window_credit: a_rwnd,
            gap_ack_blocks,
            duplicate_tsn: std::mem::take(&mut self.duplicate_tsns),
        };
        self.send_packet(vec![Chunk::Sack(sack)], self.peer_verification_tag);
        self.ack_pending = false;
        self.timers.stop(Timer::Ack);
    }

    fn handle_forward_tsn(&mut self, fwd: ChunkForwardTsn) -> Result<()> {
        let new_offset = fwd.new_cumulative_tsn.wrapping_sub(self.peer_tsn_base) as i64;
        if new_offset > self.cum_offset {
            self.cum_offset = new_offset;
            self.received_offsets.retain(|&o| o > new_offset);
            // also absorb anything now contiguous
            while self.received_offsets.remove(&(self.cum_offset + 1)) {
                self.cum_offset += 1;
            }
        }
        for stream in &fwd.streams {
            if let Some(queue) = self.reassembly.get_mut(&stream.identifier) {
                queue.forward_ssn(stream.sequence);
                let mut ready = vec![];
                while let Some(message) = queue.pop() {
                    ready.push(message);
                }
                for message in ready {
                    self.events.push_back(AssociationEvent::Data {
                        stream_id: message.stream_identifier,
                        ppid: message.ppid,
                        unordered: message.unordered,
                        data: message.data,
                    });
                }
            }
        }
        self.ack_pending = true;
        self.send_sack();
        Ok(())
    }

    // --- send path -------------------------------------------------------

    /// Queues one user message, fragmenting it into DATA chunks.
    pub fn write(
        &mut self,
        stream_id: u16,
        ppid: PayloadProtocolIdentifier,
        data: &Bytes,
        reliability: ReliabilityType,
        ordered: bool,
        now: Instant,
    ) -> Result<()> {
        if matches!(
            self.state,
            AssociationState::ShutdownPending
                | AssociationState::ShutdownSent
                | AssociationState::ShutdownReceived
                | AssociationState::ShutdownAckSent
        ) {
            return Err(Error::ErrPayloadDataStateNotExist);
        }
        if self.state == AssociationState::Closed && self.side == Side::Server {
            return Err(Error::ErrPayloadDataStateNotExist);
        }
        if data.len() > self.config.max_message_size as usize {
            return Err(Error::ErrOutboundPacketTooLarge);
        }

        let ssn = if ordered {
            let next = self.stream_next_ssn.entry(stream_id).or_insert(0);
            let ssn = *next;
            *next = next.wrapping_add(1);
            ssn
        } else {
            0
        };

        let (max_retransmits, lifetime_ms) = match reliability {
            ReliabilityType::Reliable => (None, None),
            ReliabilityType::Rexmit(n) => (Some(n), None),
            ReliabilityType::Timed(ms) => (None, Some(ms)),
        };

        let max_fragment = (INITIAL_MTU - COMMON_HEADER_SIZE - DATA_CHUNK_HEADER_SIZE) as usize;
        let total = data.len().max(1);
        let mut offset = 0;
        let mut first = true;
        while offset < total {
            let end = (offset + max_fragment).min(data.len());
            let chunk = ChunkPayloadData {
                unordered: !ordered,
                beginning_fragment: first,
                ending_fragment: end == data.len(),
                tsn: self.my_next_tsn,
                stream_identifier: stream_id,
                stream_sequence_number: ssn,
                payload_type: ppid,
                user_data: data.slice(offset..end),
                max_retransmits,
                expires_at: lifetime_ms
                    .map(|ms| now + std::time::Duration::from_millis(ms as u64)),
                ..Default::default()
            };
            self.my_next_tsn = self.my_next_tsn.wrapping_add(1);
            self.pending.push_back(chunk);
            first = false;
            if end == data.len() {
                break;
            }
            offset = end;
        }

        self.flush(now);
        Ok(())
    }

    /// Moves pending chunks into flight and emits everything due.
    fn flush(&mut self, now: Instant) {
        if self.will_retransmit_fast {
            self.will_retransmit_fast = false;
            self.retransmit_marked(now);
        }

        if self.state == AssociationState::Established
            || self.state == AssociationState::ShutdownPending
        {
            // retransmissions marked by timers go first
            self.retransmit_marked(now);

            let mut burst = vec![];
            let mut bytes = 0u32;
            loop {
                let outstanding = self.inflight.bytes_outstanding() as u32;
                let window = self.cwnd.min(self.rwnd.max(1));
                let can_send = if self.inflight.is_empty() && burst.is_empty() {
                    true // zero window probe
                } else {
                    outstanding + bytes < window
                };
                if !can_send {
                    break;
                }
                let mut chunk = match self.pending.pop_front() {
                    Some(chunk) => chunk,
                    None => break,
                };
                chunk.since = Some(now);
                chunk.nsent = 1;
                bytes += chunk.user_data.len() as u32;
                burst.push(Chunk::PayloadData(chunk.clone()));
                self.inflight.push(chunk);
            }

            if !burst.is_empty() {
                self.send_data_chunks(burst);
                if !self.timers.is_running(Timer::T3Rtx) {
                    self.timers.start(Timer::T3Rtx, now, self.rto_mgr.get_rto());
                }
            }
        }

        if self.will_send_forward_tsn {
            self.will_send_forward_tsn = false;
            self.send_forward_tsn();
        }

        if self.will_send_reset {
            self.will_send_reset = false;
            if let Some((request_sequence, stream_ids)) = self.pending_reset.clone() {
                let reconfig = ChunkReconfig {
                    param_a: Some(Param::OutgoingResetRequest {
                        request_sequence,
                        response_sequence: self.peer_next_reset_seq.wrapping_sub(1),
                        last_tsn: self.my_next_tsn.wrapping_sub(1),
                        stream_identifiers: stream_ids,
                    }),
                    param_b: None,
                };
                self.send_packet(
                    vec![Chunk::Reconfig(reconfig)],
                    self.peer_verification_tag,
                );
            }
        }

        // shutdown once everything in flight has been delivered
        if self.state == AssociationState::ShutdownPending
            && self.inflight.is_empty()
            && self.pending.is_empty()
        {
            let cumulative_tsn_ack = self.peer_cumulative_tsn();
            self.send_packet(
                vec![Chunk::Shutdown(ChunkShutdown { cumulative_tsn_ack })],
                self.peer_verification_tag,
            );
            self.state = AssociationState::ShutdownSent;
            self.timers.start(Timer::T2Shutdown, now, self.rto_mgr.get_rto());
        }
    }

    fn retransmit_marked(&mut self, now: Instant) {
        let mut chunks = vec![];
        let mut abandoned_any = false;
        for chunk in self.inflight.iter_mut() {
            if chunk.acked || chunk.abandoned || !chunk.retransmit {
                continue;
            }
            if let Some(max) = chunk.max_retransmits {
                if chunk.nsent > max {
                    chunk.abandoned = true;
                    chunk.retransmit = false;
                    abandoned_any = true;
                    continue;
                }
            }
            if let Some(expires_at) = chunk.expires_at {
                if now >= expires_at {
                    chunk.abandoned = true;
                    chunk.retransmit = false;
                    abandoned_any = true;
                    continue;
                }
            }
            chunk.retransmit = false;
            chunk.nsent += 1;
            chunk.since = Some(now);
            chunks.push(Chunk::PayloadData(chunk.clone()));
        }

        if abandoned_any {
            self.advance_forward_tsn_point();
        }
        if !chunks.is_empty() {
            self.send_data_chunks(chunks);
            if !self.timers.is_running(Timer::T3Rtx) {
                self.timers.start(Timer::T3Rtx, now, self.rto_mgr.get_rto());
            }
        }
    }

    fn send_data_chunks(&mut self, chunks: Vec<Chunk>) {
        // bundle into packets up to the MTU
        let mut bundle: Vec<Chunk> = vec![];
        let mut size = COMMON_HEADER_SIZE as usize;
        for chunk in chunks {
            let chunk_size = if let Chunk::PayloadData(data) = &chunk {
                DATA_CHUNK_HEADER_SIZE as usize + data.user_data.len()
            } else {
                64
            };
            if !bundle.is_empty() && size + chunk_size > INITIAL_MTU as usize {
                let done = std::mem::take(&mut bundle);
                self.send_packet(done, self.peer_verification_tag);
                size = COMMON_HEADER_SIZE as usize;
            }
            size += chunk_size;
            bundle.push(chunk);
        }
        if !bundle.is_empty() {
            self.send_packet(bundle, self.peer_verification_tag);
        }
    }

    fn handle_sack(&mut self, sack: ChunkSelectiveAck, now: Instant) -> Result<()> {
        // stale SACK?
        if sna32lt(sack.cumulative_tsn_ack, self.cumulative_tsn_ack_point) {
            return Ok(());
        }

        let mut total_bytes_acked = 0usize;
        let cum_advanced = sna32gt(sack.cumulative_tsn_ack, self.cumulative_tsn_ack_point);

        // cumulative ack
        let popped = self.inflight.pop_cumulative(sack.cumulative_tsn_ack);
        for chunk in &popped {
            if !chunk.acked {
                total_bytes_acked += chunk.user_data.len();
            }
            // RTT from the first transmission only (Karn's rule)
            if chunk.nsent == 1 {
                if let Some(since) = chunk.since {
                    let rtt = now.duration_since(since).as_millis() as u64;
                    self.rto_mgr.set_new_rtt(rtt);
                }
            }
        }
        self.cumulative_tsn_ack_point = sack.cumulative_tsn_ack;

        // gap ack blocks
        let mut htna = sack.cumulative_tsn_ack;
        for block in &sack.gap_ack_blocks {
            for rel in block.start..=block.end {
                let tsn = sack.cumulative_tsn_ack.wrapping_add(rel as u32);
                if let Some(bytes) = self.inflight.mark_acked(tsn) {
                    total_bytes_acked += bytes;
                    if sna32gt(tsn, htna) {
                        htna = tsn;
                    }
                }
            }
        }

        // peer window: advertised minus what is still outstanding
        self.rwnd = sack
            .advertised_receiver_window_credit
            .saturating_sub(self.inflight.bytes_outstanding() as u32);

        // congestion control (RFC 4960 section 7.2)
        if cum_advanced {
            if self.cwnd < self.ssthresh {
                // slow start
                self.cwnd += (total_bytes_acked as u32).min(INITIAL_MTU);
            } else {
                self.partial_bytes_acked += total_bytes_acked as u32;
                if self.partial_bytes_acked >= self.cwnd {
                    self.partial_bytes_acked -= self.cwnd;
                    self.cwnd += INITIAL_MTU;
                }
            }
            if self.in_fast_recovery && sna32gt(sack.cumulative_tsn_ack, self.fast_recover_exit_point)
            {
                self.in_fast_recovery = false;
            }
        }

        // fast retransmit: three SACKs reporting a chunk missing
        if !sack.gap_ack_blocks.is_empty() {
            let mut fast_retransmit = false;
            for chunk in self.inflight.iter_mut() {
                if chunk.acked || chunk.abandoned {
                    continue;
                }
                if sna32lt(chunk.tsn, htna) {
                    chunk.missing_indicator += 1;
                    if chunk.missing_indicator == 3 {
                        chunk.retransmit = true;
                        fast_retransmit = true;
                    }
                }
            }
            if fast_retransmit {
                if !self.in_fast_recovery {
                    self.in_fast_recovery = true;
                    self.fast_recover_exit_point = htna;
                    self.ssthresh = (self.cwnd / 2).max(MIN_CWND_MTU * INITIAL_MTU);
                    self.cwnd = self.ssthresh;
                    self.partial_bytes_acked = 0;
                }
                self.will_retransmit_fast = true;
            }
        }

        // abandoned chunks advance the forward-TSN point
        self.advance_forward_tsn_point();

        // restart or stop T3 (RFC 4960 section 6.3.2)
        self.timers.stop(Timer::T3Rtx);
        if !self.inflight.is_empty() {
            self.timers.start(Timer::T3Rtx, now, self.rto_mgr.get_rto());
        }

        Ok(())
    }

    fn advance_forward_tsn_point(&mut self) {
        if sna32lt(self.advanced_peer_tsn_ack_point, self.cumulative_tsn_ack_point) {
            self.advanced_peer_tsn_ack_point = self.cumulative_tsn_ack_point;
        }
        let mut advanced = false;
        for chunk in self.inflight.iter() {
            if chunk.abandoned
                && chunk.tsn == self.advanced_peer_tsn_ack_point.wrapping_add(1)
            {
                self.advanced_peer_tsn_ack_point = chunk.tsn;
                advanced = true;
            } else if !chunk.acked {
                break;
            }
        }
        if advanced {
            self.will_send_forward_tsn = true;
        }
    }

    fn send_forward_tsn(&mut self) {
        let mut streams: Vec<ForwardTsnStream> = vec![];
        for chunk in self.inflight.iter() {
            if chunk.abandoned
                && sna32lte(chunk.tsn, self.advanced_peer_tsn_ack_point)
                && !chunk.unordered
            {
                match streams
                    .iter_mut()
                    .find(|s| s.identifier == chunk.stream_identifier)
                {
                    Some(stream) => {
                        stream.sequence = stream.sequence.max(chunk.stream_sequence_number);
                    }
                    None => streams.push(ForwardTsnStream {
                        identifier: chunk.stream_identifier,
                        sequence: chunk.stream_sequence_number,
                    }),
                }
            }
        }

        let fwd = ChunkForwardTsn {
            new_cumulative_tsn: self.advanced_peer_tsn_ack_point,
            streams,
        };
        self.send_packet(vec![Chunk::ForwardTsn(fwd)], self.peer_verification_tag);
    }

    fn on_retransmission_timeout(&mut self, now: Instant) {
        // RFC 4960 section 6.3.3
        self.ssthresh = (self.cwnd / 2).max(MIN_CWND_MTU * INITIAL_MTU);
        self.cwnd = INITIAL_MTU;
        self.partial_bytes_acked = 0;
        self.in_fast_recovery = false;

        for chunk in self.inflight.iter_mut() {
            if !chunk.acked && !chunk.abandoned {
                chunk.retransmit = true;
            }
        }
        self.retransmit_marked(now);
        self.timers.start(Timer::T3Rtx, now, self.rto_mgr.get_rto());
    }

    // --- stream reset ----------------------------------------------------

    /// Requests an outgoing reset for a stream (used by data channel
    /// close).
    pub fn reset_stream(&mut self, stream_id: u16, now: Instant) -> Result<()> {
        if self.state != AssociationState::Established {
            return Err(Error::ErrResetPacketInStateNotExist);
        }
        let request_sequence = self.my_next_reset_seq;
        self.my_next_reset_seq = self.my_next_reset_seq.wrapping_add(1);
        self.pending_reset = Some((request_sequence, vec![stream_id]));
        self.will_send_reset = true;
        self.stream_next_ssn.remove(&stream_id);
        self.flush(now);
        Ok(())
    }

    fn handle_reconfig(&mut self, reconfig: ChunkReconfig) -> Result<()> {
        for param in [reconfig.param_a, reconfig.param_b].into_iter().flatten() {
            match param {
                Param::OutgoingResetRequest {
                    request_sequence,
                    stream_identifiers,
                    ..
                } => {
                    self.peer_next_reset_seq = request_sequence.wrapping_add(1);
                    for stream_id in &stream_identifiers {
                        if let Some(queue) = self.reassembly.get_mut(stream_id) {
                            queue.reset();
                        }
                    }
                    self.events.push_back(AssociationEvent::StreamsReset {
                        stream_ids: stream_identifiers,
                    });
                    let response = ChunkReconfig {
                        param_a: Some(Param::ReconfigResponse {
                            response_sequence: request_sequence,
                            result: RECONFIG_RESULT_SUCCESS_PERFORMED,
                        }),
                        param_b: None,
                    };
                    self.send_packet(
                        vec![Chunk::Reconfig(response)],
                        self.peer_verification_tag,
                    );
                }
                Param::ReconfigResponse { .. } => {
                    self.pending_reset = None;
                }
                _ => {}
            }
        }
        Ok(())
    }

    // --- shutdown --------------------------------------------------------

    /// Starts a graceful shutdown; outstanding data is delivered first.
    pub fn close(&mut self, now: Instant) -> Result<()> {
        match self.state {
            AssociationState::Established => {
                self.state = AssociationState::ShutdownPending;
                self.flush(now);
                Ok(())
            }
            AssociationState::Closed => Ok(()),
            _ => Err(Error::ErrShutdownNonEstablished),
        }
    }

    /// Tears the association down immediately with an ABORT.
    pub fn abort(&mut self) {
        if self.state != AssociationState::Closed {
            self.send_packet(
                vec![Chunk::Abort(ChunkAbort { error_causes: vec![] })],
                self.peer_verification_tag,
            );
            self.state = AssociationState::Closed;
            self.events.push_back(AssociationEvent::Closed);
        }
    }

    fn handle_shutdown(&mut self, now: Instant) -> Result<()> {
        if matches!(
            self.state,
            AssociationState::Established | AssociationState::ShutdownReceived
        ) {
            self.state = AssociationState::ShutdownReceived;
            if self.inflight.is_empty() && self.pending.is_empty() {
                self.send_packet(
                    vec![Chunk::ShutdownAck(ChunkShutdownAck)],
                    self.peer_verification_tag,
                );
                self.state = AssociationState::ShutdownAckSent;
                self.timers.start(Timer::T2Shutdown, now, self.rto_mgr.get_rto());
            }
        } else if self.state == AssociationState::ShutdownSent {
            // both sides shut down simultaneously
            self.send_packet(
                vec![Chunk::ShutdownAck(ChunkShutdownAck)],
                self.peer_verification_tag,
            );
            self.state = AssociationState::ShutdownAckSent;
            self.timers.start(Timer::T2Shutdown, now, self.rto_mgr.get_rto());
        }
        Ok(())
    }

    fn send_packet(&mut self, chunks: Vec<Chunk>, verification_tag: u32) {
        let packet = Packet {
            source_port: self.source_port,
            destination_port: self.destination_port,
            verification_tag,
            chunks,
        };
        match packet.marshal() {
            Ok(raw) => self.transmits.push_back(raw),
            Err(err) => warn!("[{:?}] failed to marshal packet: {err}", self.side),
        }
    }
}
