use std::time::Instant;

use bytes::BytesMut;
use log::trace;

use rtp::codecs::opus::OpusPacket;
use rtp::codecs::vp8::Vp8Packet;
use rtp::jitter::JitterBuffer;
use rtp::packet::Packet;
use rtp::packetizer::Depacketizer;

use shared::error::{Error, Result};

use crate::lipsync::LipsyncAligner;
use crate::ntp::NtpTimeMapper;
use crate::sample::Sample;
use crate::webm::{WebmMuxer, WebmTrack};

/// Track flavors the recorder can mux.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum RecorderTrackKind {
    OpusAudio,
    Vp8Video,
}

struct RecorderTrack {
    kind: RecorderTrackKind,
    number: u64,
    jitter: JitterBuffer,
    mapper: NtpTimeMapper,
    depacketizer: Box<dyn Depacketizer + Send>,
    // frame assembly
    frame: BytesMut,
    frame_rtp_timestamp: u32,
    frame_has_data: bool,
}

impl RecorderTrack {
    fn new(kind: RecorderTrackKind, number: u64) -> Self {
        let (clock_rate, depacketizer): (u32, Box<dyn Depacketizer + Send>) = match kind {
            RecorderTrackKind::OpusAudio => (48_000, Box::<OpusPacket>::default()),
            RecorderTrackKind::Vp8Video => (90_000, Box::<Vp8Packet>::default()),
        };
        RecorderTrack {
            kind,
            number,
            jitter: JitterBuffer::default(),
            mapper: NtpTimeMapper::new(clock_rate),
            depacketizer,
            frame: BytesMut::new(),
            frame_rtp_timestamp: 0,
            frame_has_data: false,
        }
    }
}

/// The per-track recorder chain from spec'd stages: jitter buffer,
/// NTP time mapping, depacketizing, lip-sync interleave, WebM muxing.
pub struct Recorder {
    tracks: Vec<RecorderTrack>,
    lipsync: LipsyncAligner,
    muxer: WebmMuxer,
    closed: bool,
}

impl Recorder {
    pub fn new() -> Self {
        Recorder {
            tracks: vec![],
            lipsync: LipsyncAligner::default(),
            muxer: WebmMuxer::new(),
            closed: false,
        }
    }

    /// Registers a track; returns its muxer track number.
    pub fn add_track(&mut self, kind: RecorderTrackKind) -> Result<u64> {
        if self.closed {
            return Err(Error::ErrRecorderClosed);
        }
        let number = self.tracks.len() as u64 + 1;
        self.muxer.add_track(match kind {
            RecorderTrackKind::Vp8Video => WebmTrack {
                number,
                codec_id: "V_VP8".to_owned(),
                is_video: true,
                width: 640,
                height: 480,
                sample_rate: 0.0,
                channels: 0,
            },
            RecorderTrackKind::OpusAudio => WebmTrack {
                number,
                codec_id: "A_OPUS".to_owned(),
                is_video: false,
                width: 0,
                height: 0,
                sample_rate: 48_000.0,
                channels: 2,
            },
        })?;
        self.tracks.push(RecorderTrack::new(kind, number));
        Ok(number)
    }

    /// Absorbs a sender report for wall-clock alignment of a track.
    pub fn on_sender_report(&mut self, track_number: u64, ntp_time: u64, rtp_time: u32) {
        if let Some(track) = self
            .tracks
            .iter_mut()
            .find(|t| t.number == track_number)
        {
            track.mapper.on_sender_report(ntp_time, rtp_time);
        }
    }

    /// Feeds one RTP packet into a track's chain.
    pub fn on_rtp(&mut self, track_number: u64, packet: Packet, now: Instant) -> Result<()> {
        if self.closed {
            return Err(Error::ErrRecorderClosed);
        }
        let track_index = self
            .tracks
            .iter()
            .position(|t| t.number == track_number)
            .ok_or(Error::ErrUnsupportedRecorderCodec)?;

        self.tracks[track_index].jitter.push(packet, now);
        self.drain_track(track_index, now)?;
        self.drain_lipsync()?;
        Ok(())
    }

    /// Lets jitter deadlines fire for every track.
    pub fn handle_timeout(&mut self, now: Instant) -> Result<()> {
        for track_index in 0..self.tracks.len() {
            self.drain_track(track_index, now)?;
        }
        self.drain_lipsync()
    }

    pub fn poll_timeout(&self) -> Option<Instant> {
        self.tracks
            .iter()
            .filter_map(|t| t.jitter.poll_timeout())
            .min()
    }

    fn drain_track(&mut self, track_index: usize, now: Instant) -> Result<()> {
        let track = &mut self.tracks[track_index];
        while let Some(packet) = track.jitter.pop(now) {
            let payload = match track.depacketizer.depacketize(&packet.payload) {
                Ok(payload) => payload,
                Err(err) => {
                    trace!("depacketize failed, skipping packet: {err}");
                    continue;
                }
            };

            if !track.frame_has_data {
                track.frame_rtp_timestamp = packet.header.timestamp;
                track.frame_has_data = true;
            }
            track.frame.extend_from_slice(&payload);

            let tail = track
                .depacketizer
                .is_partition_tail(packet.header.marker, &packet.payload);
            if tail {
                let data = track.frame.split().freeze();
                let is_keyframe = match track.kind {
                    RecorderTrackKind::Vp8Video => Vp8Packet::is_keyframe(&data),
                    RecorderTrackKind::OpusAudio => false,
                };
                let sample = Sample {
                    timestamp_ms: track.mapper.map(track.frame_rtp_timestamp),
                    rtp_timestamp: track.frame_rtp_timestamp,
                    is_keyframe,
                    data,
                };
                track.frame_has_data = false;
                match track.kind {
                    RecorderTrackKind::OpusAudio => self.lipsync.push_audio(sample),
                    RecorderTrackKind::Vp8Video => self.lipsync.push_video(sample),
                }
                // re-borrow for the next loop iteration
                return self.drain_track(track_index, now);
            }
        }
        Ok(())
    }

    fn drain_lipsync(&mut self) -> Result<()> {
        while let Some((is_video, sample)) = self.lipsync.pop() {
            let track_number = self
                .tracks
                .iter()
                .find(|t| {
                    matches!(t.kind, RecorderTrackKind::Vp8Video) == is_video
                })
                .map(|t| t.number)
                .unwrap_or(1);
            self.muxer.write_block(
                track_number,
                sample.timestamp_ms,
                sample.is_keyframe,
                &sample.data,
            )?;
        }
        Ok(())
    }

    /// Drains WebM bytes produced so far.
    pub fn poll_output(&mut self) -> Vec<u8> {
        self.muxer.take_output()
    }

    /// Flushes buffered samples and closes the file.
    pub fn close(&mut self) -> Result<Vec<u8>> {
        self.lipsync.flush();
        self.drain_lipsync()?;
        self.closed = true;
        Ok(self.muxer.finalize())
    }
}

impl Default for Recorder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use rtp::header::Header;

    fn vp8_packet(seq: u16, ts: u32, marker: bool, keyframe: bool) -> Packet {
        // minimal VP8 payload descriptor (S bit, pid 0) + bitstream byte
        let first_bitstream_byte = if keyframe { 0x00 } else { 0x01 };
        Packet {
            header: Header {
                version: 2,
                marker,
                payload_type: 96,
                sequence_number: seq,
                timestamp: ts,
                ssrc: 0x11,
                ..Default::default()
            },
            payload: Bytes::from(vec![0x10, first_bitstream_byte, 0xAA, 0xBB]),
            padding_size: 0,
        }
    }

    fn opus_packet(seq: u16, ts: u32) -> Packet {
        Packet {
            header: Header {
                version: 2,
                marker: true,
                payload_type: 111,
                sequence_number: seq,
                timestamp: ts,
                ssrc: 0x22,
                ..Default::default()
            },
            payload: Bytes::from_static(&[0xF8, 0x01, 0x02]),
            padding_size: 0,
        }
    }

    #[test]
    fn test_recorder_produces_webm() -> Result<()> {
        let now = Instant::now();
        let mut recorder = Recorder::new();
        let video = recorder.add_track(RecorderTrackKind::Vp8Video)?;
        let audio = recorder.add_track(RecorderTrackKind::OpusAudio)?;

        recorder.on_rtp(video, vp8_packet(1, 0, true, true), now)?;
        for i in 0..30u16 {
            recorder.on_rtp(audio, opus_packet(i, i as u32 * 960), now)?;
        }
        recorder.on_rtp(video, vp8_packet(2, 90_000, true, false), now)?;

        let out = recorder.close()?;
        assert!(!out.is_empty());
        assert_eq!(&out[..4], &[0x1A, 0x45, 0xDF, 0xA3]);
        assert!(out.windows(5).any(|w| w == b"V_VP8"));
        assert!(out.windows(6).any(|w| w == b"A_OPUS"));
        Ok(())
    }

    #[test]
    fn test_recorder_reorders_video_packets() -> Result<()> {
        let now = Instant::now();
        let mut recorder = Recorder::new();
        let video = recorder.add_track(RecorderTrackKind::Vp8Video)?;

        // arrive out of order; jitter buffer restores sequence order
        recorder.on_rtp(video, vp8_packet(10, 0, true, true), now)?;
        recorder.on_rtp(video, vp8_packet(12, 6000, true, false), now)?;
        recorder.on_rtp(video, vp8_packet(11, 3000, true, false), now)?;

        let out = recorder.close()?;
        let blocks = out.windows(2).filter(|w| w[0] == 0xA3).count();
        assert!(blocks >= 3, "expected three SimpleBlocks");
        Ok(())
    }

    #[test]
    fn test_recorder_rejects_unknown_track() {
        let mut recorder = Recorder::new();
        assert!(recorder
            .on_rtp(9, opus_packet(0, 0), Instant::now())
            .is_err());
    }
}
