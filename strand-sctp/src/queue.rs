use std::collections::{BTreeMap, VecDeque};

use bytes::{Bytes, BytesMut};

use crate::chunk::payload_data::{ChunkPayloadData, PayloadProtocolIdentifier};
use crate::util::{sna16lt, sna32lte};

/// Sender-side queue of DATA chunks that are in flight, kept in
/// transmission (serial TSN) order.
#[derive(Default)]
pub(crate) struct InflightQueue {
    chunks: VecDeque<ChunkPayloadData>,
    n_bytes: usize,
}

impl InflightQueue {
    pub(crate) fn push(&mut self, chunk: ChunkPayloadData) {
        self.n_bytes += chunk.user_data.len();
        self.chunks.push_back(chunk);
    }

    /// Drops every chunk covered by the cumulative ack, returning them.
    pub(crate) fn pop_cumulative(&mut self, cumulative_tsn_ack: u32) -> Vec<ChunkPayloadData> {
        let mut popped = vec![];
        while let Some(chunk) = self.chunks.front() {
            if sna32lte(chunk.tsn, cumulative_tsn_ack) {
                let chunk = self.chunks.pop_front().unwrap();
                if !chunk.acked {
                    self.n_bytes -= chunk.user_data.len();
                }
                popped.push(chunk);
            } else {
                break;
            }
        }
        popped
    }

    /// Marks a gap-acked TSN; returns the chunk size if newly acked.
    pub(crate) fn mark_acked(&mut self, tsn: u32) -> Option<usize> {
        for chunk in &mut self.chunks {
            if chunk.tsn == tsn {
                if chunk.acked {
                    return None;
                }
                chunk.acked = true;
                chunk.retransmit = false;
                let len = chunk.user_data.len();
                self.n_bytes -= len;
                return Some(len);
            }
        }
        None
    }

    pub(crate) fn iter_mut(&mut self) -> impl Iterator<Item = &mut ChunkPayloadData> {
        self.chunks.iter_mut()
    }

    pub(crate) fn iter(&self) -> impl Iterator<Item = &ChunkPayloadData> {
        self.chunks.iter()
    }

    pub(crate) fn front(&self) -> Option<&ChunkPayloadData> {
        self.chunks.front()
    }

    pub(crate) fn len(&self) -> usize {
        self.chunks.len()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    /// Outstanding (unacked) bytes.
    pub(crate) fn bytes_outstanding(&self) -> usize {
        self.n_bytes
    }
}

/// One message reassembled from DATA chunk fragments.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct ReassembledMessage {
    pub(crate) stream_identifier: u16,
    pub(crate) stream_sequence_number: u16,
    pub(crate) unordered: bool,
    pub(crate) ppid: PayloadProtocolIdentifier,
    pub(crate) data: Bytes,
}

/// Receiver-side per-stream reassembly: fragments are grouped by TSN
/// continuity, ordered messages additionally gated on SSN order.
pub(crate) struct ReassemblyQueue {
    pub(crate) stream_identifier: u16,
    next_ssn: u16,
    // fragments awaiting assembly, keyed by TSN
    fragments: BTreeMap<u32, ChunkPayloadData>,
    // complete ordered messages waiting for their SSN turn
    pending_ordered: BTreeMap<u16, ReassembledMessage>,
    ready: VecDeque<ReassembledMessage>,
    n_bytes: usize,
}

impl ReassemblyQueue {
    pub(crate) fn new(stream_identifier: u16) -> Self {
        ReassemblyQueue {
            stream_identifier,
            next_ssn: 0,
            fragments: BTreeMap::new(),
            pending_ordered: BTreeMap::new(),
            ready: VecDeque::new(),
            n_bytes: 0,
        }
    }

    pub(crate) fn push(&mut self, chunk: ChunkPayloadData) {
        if self.fragments.contains_key(&chunk.tsn) {
            return;
        }
        self.n_bytes += chunk.user_data.len();
        self.fragments.insert(chunk.tsn, chunk);
        self.assemble();
    }

    /// Scans for begin..end fragment runs with consecutive TSNs.
    fn assemble(&mut self) {
        loop {
            let mut found: Option<(u32, u32)> = None; // (begin_tsn, end_tsn)
            for (&tsn, chunk) in &self.fragments {
                if !chunk.beginning_fragment {
                    continue;
                }
                // walk forward over consecutive TSNs
                let mut cursor = tsn;
                loop {
                    match self.fragments.get(&cursor) {
                        Some(c) => {
                            if c.ending_fragment {
                                found = Some((tsn, cursor));
                                break;
                            }
                            cursor = cursor.wrapping_add(1);
                        }
                        None => break,
                    }
                }
                if found.is_some() {
                    break;
                }
            }

            let (begin, end) = match found {
                Some(range) => range,
                None => return,
            };

            let mut data = BytesMut::new();
            let mut cursor = begin;
            let first = self.fragments.get(&begin).cloned();
            loop {
                let chunk = self.fragments.remove(&cursor).expect("fragment run");
                self.n_bytes -= chunk.user_data.len();
                data.extend_from_slice(&chunk.user_data);
                if cursor == end {
                    break;
                }
                cursor = cursor.wrapping_add(1);
            }

            let first = first.expect("fragment run head");
            let message = ReassembledMessage {
                stream_identifier: first.stream_identifier,
                stream_sequence_number: first.stream_sequence_number,
                unordered: first.unordered,
                ppid: first.payload_type,
                data: data.freeze(),
            };

            if message.unordered {
                self.ready.push_back(message);
            } else {
                self.pending_ordered
                    .insert(message.stream_sequence_number, message);
                self.release_ordered();
            }
        }
    }

    fn release_ordered(&mut self) {
        while let Some(message) = self.pending_ordered.remove(&self.next_ssn) {
            self.ready.push_back(message);
            self.next_ssn = self.next_ssn.wrapping_add(1);
        }
    }

    pub(crate) fn pop(&mut self) -> Option<ReassembledMessage> {
        self.ready.pop_front()
    }

    /// Skips ordered delivery forward (FORWARD TSN with a stream entry).
    pub(crate) fn forward_ssn(&mut self, ssn: u16) {
        if sna16lt(self.next_ssn, ssn.wrapping_add(1)) {
            self.next_ssn = ssn.wrapping_add(1);
        }
        self.release_ordered();
    }

    /// Drops stale ordered state on incoming stream reset.
    pub(crate) fn reset(&mut self) {
        self.next_ssn = 0;
        self.pending_ordered.clear();
        self.fragments.clear();
        self.n_bytes = 0;
    }

    pub(crate) fn buffered_bytes(&self) -> usize {
        self.n_bytes
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chunk(tsn: u32, ssn: u16, b: bool, e: bool, data: &'static [u8]) -> ChunkPayloadData {
        ChunkPayloadData {
            beginning_fragment: b,
            ending_fragment: e,
            tsn,
            stream_identifier: 0,
            stream_sequence_number: ssn,
            payload_type: PayloadProtocolIdentifier::Binary,
            user_data: Bytes::from_static(data),
            ..Default::default()
        }
    }

    #[test]
    fn test_reassembly_single_fragment() {
        let mut q = ReassemblyQueue::new(0);
        q.push(chunk(1, 0, true, true, b"hello"));
        let msg = q.pop().unwrap();
        assert_eq!(msg.data, Bytes::from_static(b"hello"));
        assert!(q.pop().is_none());
    }

    #[test]
    fn test_reassembly_fragmented_message() {
        let mut q = ReassemblyQueue::new(0);
        q.push(chunk(1, 0, true, false, b"he"));
        assert!(q.pop().is_none());
        q.push(chunk(3, 0, false, true, b"lo"));
        assert!(q.pop().is_none());
        q.push(chunk(2, 0, false, false, b"l"));
        assert_eq!(q.pop().unwrap().data, Bytes::from_static(b"hello"));
    }

    #[test]
    fn test_reassembly_ordered_delivery() {
        let mut q = ReassemblyQueue::new(0);
        // ssn 1 arrives first, must wait for ssn 0
        q.push(chunk(2, 1, true, true, b"second"));
        assert!(q.pop().is_none());
        q.push(chunk(1, 0, true, true, b"first"));
        assert_eq!(q.pop().unwrap().data, Bytes::from_static(b"first"));
        assert_eq!(q.pop().unwrap().data, Bytes::from_static(b"second"));
    }

    #[test]
    fn test_reassembly_unordered_immediate() {
        let mut q = ReassemblyQueue::new(0);
        let mut c = chunk(5, 9, true, true, b"now");
        c.unordered = true;
        q.push(c);
        assert_eq!(q.pop().unwrap().data, Bytes::from_static(b"now"));
    }

    #[test]
    fn test_forward_ssn_skips_gap() {
        let mut q = ReassemblyQueue::new(0);
        q.push(chunk(10, 2, true, true, b"later"));
        assert!(q.pop().is_none());
        // messages 0 and 1 were abandoned by the sender
        q.forward_ssn(1);
        assert_eq!(q.pop().unwrap().data, Bytes::from_static(b"later"));
    }

    #[test]
    fn test_inflight_queue_cumulative_pop() {
        let mut q = InflightQueue::default();
        for tsn in 1..=3u32 {
            q.push(chunk(tsn, 0, true, true, b"x"));
        }
        let popped = q.pop_cumulative(2);
        assert_eq!(popped.len(), 2);
        assert_eq!(q.len(), 1);
        assert_eq!(q.bytes_outstanding(), 1);
    }

    #[test]
    fn test_inflight_queue_mark_acked() {
        let mut q = InflightQueue::default();
        q.push(chunk(1, 0, true, true, b"ab"));
        assert_eq!(q.mark_acked(1), Some(2));
        assert_eq!(q.mark_acked(1), None);
        assert_eq!(q.bytes_outstanding(), 0);
    }
}
