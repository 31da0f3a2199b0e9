use std::collections::BTreeMap;
use std::time::{Duration, Instant};

use crate::packet::Packet;

const DEFAULT_MAX_PACKETS: usize = 512;
const DEFAULT_MAX_WAIT: Duration = Duration::from_millis(100);

/// JitterBuffer reorders incoming RTP packets by sequence number within a
/// bounded window.
///
/// Packets are released in order once contiguous; when the head of the
/// buffer has been blocked on a gap longer than the wait deadline, the gap
/// is abandoned and delivery continues from the next buffered packet.
/// Missing ranges are exposed for NACK generation.
pub struct JitterBuffer {
    max_packets: usize,
    max_wait: Duration,

    // buffered packets keyed by extended sequence number
    buffer: BTreeMap<u64, Packet>,
    // next extended sequence number owed to the consumer
    next_ext: Option<u64>,
    // highest extended sequence number seen
    highest_ext: u64,
    started: bool,

    // when the head first blocked on a gap
    blocked_since: Option<Instant>,
}

impl Default for JitterBuffer {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_PACKETS, DEFAULT_MAX_WAIT)
    }
}

impl JitterBuffer {
    pub fn new(max_packets: usize, max_wait: Duration) -> Self {
        JitterBuffer {
            max_packets,
            max_wait,
            buffer: BTreeMap::new(),
            next_ext: None,
            highest_ext: 0,
            started: false,
            blocked_since: None,
        }
    }

    /// Extends a 16-bit sequence number into the 64-bit space around the
    /// highest sequence number seen so far.
    fn extend(&mut self, seq: u16) -> u64 {
        if !self.started {
            self.started = true;
            self.highest_ext = 1u64 << 16 | seq as u64;
            return self.highest_ext;
        }

        let highest_seq = self.highest_ext as u16;
        let delta = seq.wrapping_sub(highest_seq);
        let ext = if delta < 1 << 15 {
            // at or ahead of the highest
            self.highest_ext + delta as u64
        } else {
            // behind the highest
            self.highest_ext - (u16::MAX as u64 + 1 - delta as u64)
        };

        if ext > self.highest_ext {
            self.highest_ext = ext;
        }
        ext
    }

    /// push inserts a packet. Duplicates and packets older than the
    /// delivery cursor are dropped.
    pub fn push(&mut self, packet: Packet, now: Instant) {
        let ext = self.extend(packet.header.sequence_number);

        if let Some(next) = self.next_ext {
            if ext < next {
                return; // too old
            }
        } else {
            self.next_ext = Some(ext);
        }

        if self.buffer.contains_key(&ext) {
            return; // duplicate
        }
        self.buffer.insert(ext, packet);

        // bounded window: abandon the oldest gap when over capacity
        if self.buffer.len() > self.max_packets {
            if let Some((&lowest, _)) = self.buffer.iter().next() {
                self.next_ext = Some(lowest);
                self.blocked_since = None;
            }
        }

        if self.blocked_since.is_none() && !self.head_ready() {
            self.blocked_since = Some(now);
        }
    }

    fn head_ready(&self) -> bool {
        match self.next_ext {
            Some(next) => self.buffer.contains_key(&next),
            None => false,
        }
    }

    /// pop returns the next in-order packet, or skips the gap once the wait
    /// deadline has expired.
    pub fn pop(&mut self, now: Instant) -> Option<Packet> {
        let next = self.next_ext?;

        if let Some(packet) = self.buffer.remove(&next) {
            self.next_ext = Some(next + 1);
            self.blocked_since = None;
            if !self.head_ready() && !self.buffer.is_empty() {
                self.blocked_since = Some(now);
            }
            return Some(packet);
        }

        if self.buffer.is_empty() {
            return None;
        }

        // gap at the head: wait for the deadline, then abandon it
        match self.blocked_since {
            Some(since) if now.duration_since(since) >= self.max_wait => {
                let (&lowest, _) = self.buffer.iter().next()?;
                self.next_ext = Some(lowest);
                self.blocked_since = None;
                self.pop(now)
            }
            Some(_) => None,
            None => {
                self.blocked_since = Some(now);
                None
            }
        }
    }

    /// poll_timeout returns the instant at which the head gap will be
    /// abandoned.
    pub fn poll_timeout(&self) -> Option<Instant> {
        self.blocked_since.map(|since| since + self.max_wait)
    }

    /// missing returns up to `max` sequence numbers between the delivery
    /// cursor and the highest received packet that have not arrived, for
    /// NACK generation.
    pub fn missing(&self, max: usize) -> Vec<u16> {
        let next = match self.next_ext {
            Some(next) => next,
            None => return vec![],
        };

        let mut out = vec![];
        for ext in next..=self.highest_ext {
            if !self.buffer.contains_key(&ext) {
                out.push(ext as u16);
                if out.len() >= max {
                    break;
                }
            }
        }
        out
    }

    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::header::Header;
    use bytes::Bytes;

    fn packet(seq: u16) -> Packet {
        Packet {
            header: Header {
                version: 2,
                sequence_number: seq,
                ..Default::default()
            },
            payload: Bytes::from_static(&[0xab]),
            padding_size: 0,
        }
    }

    #[test]
    fn test_jitter_reorder() {
        let now = Instant::now();
        let mut jb = JitterBuffer::default();
        for seq in [100u16, 102, 101, 103] {
            jb.push(packet(seq), now);
        }

        let mut out = vec![];
        while let Some(p) = jb.pop(now) {
            out.push(p.header.sequence_number);
        }
        assert_eq!(out, vec![100, 101, 102, 103]);
    }

    #[test]
    fn test_jitter_duplicate_dropped() {
        let now = Instant::now();
        let mut jb = JitterBuffer::default();
        jb.push(packet(10), now);
        jb.push(packet(10), now);
        assert_eq!(jb.len(), 1);
    }

    #[test]
    fn test_jitter_gap_blocks_until_deadline() {
        let now = Instant::now();
        let mut jb = JitterBuffer::new(512, Duration::from_millis(50));
        jb.push(packet(1), now);
        jb.push(packet(3), now);

        assert_eq!(jb.pop(now).map(|p| p.header.sequence_number), Some(1));
        // seq 2 is missing: head blocked
        assert_eq!(jb.pop(now), None);
        assert!(jb.poll_timeout().is_some());

        // once the deadline passes the gap is abandoned
        let later = now + Duration::from_millis(60);
        assert_eq!(jb.pop(later).map(|p| p.header.sequence_number), Some(3));
    }

    #[test]
    fn test_jitter_missing_for_nack() {
        let now = Instant::now();
        let mut jb = JitterBuffer::default();
        jb.push(packet(100), now);
        jb.push(packet(104), now);
        assert_eq!(jb.pop(now).map(|p| p.header.sequence_number), Some(100));
        assert_eq!(jb.missing(16), vec![101, 102, 103]);
    }

    #[test]
    fn test_jitter_sequence_wrap() {
        let now = Instant::now();
        let mut jb = JitterBuffer::default();
        for seq in [0xFFFEu16, 0xFFFF, 0, 1] {
            jb.push(packet(seq), now);
        }
        let mut out = vec![];
        while let Some(p) = jb.pop(now) {
            out.push(p.header.sequence_number);
        }
        assert_eq!(out, vec![0xFFFE, 0xFFFF, 0, 1]);
    }

    #[test]
    fn test_jitter_old_packet_dropped() {
        let now = Instant::now();
        let mut jb = JitterBuffer::default();
        jb.push(packet(50), now);
        assert_eq!(jb.pop(now).map(|p| p.header.sequence_number), Some(50));
        jb.push(packet(49), now);
        assert!(jb.is_empty());
    }
}
