use byteorder::{BigEndian, WriteBytesExt};
use bytes::Bytes;

use shared::error::{Error, Result};

// EBML / Matroska element ids used by the WebM subset.
const ID_EBML: u32 = 0x1A45_DFA3;
const ID_EBML_VERSION: u32 = 0x4286;
const ID_EBML_READ_VERSION: u32 = 0x42F7;
const ID_EBML_MAX_ID_LENGTH: u32 = 0x42F2;
const ID_EBML_MAX_SIZE_LENGTH: u32 = 0x42F3;
const ID_DOC_TYPE: u32 = 0x4282;
const ID_DOC_TYPE_VERSION: u32 = 0x4287;
const ID_DOC_TYPE_READ_VERSION: u32 = 0x4285;

const ID_SEGMENT: u32 = 0x1853_8067;
const ID_INFO: u32 = 0x1549_A966;
const ID_TIMECODE_SCALE: u32 = 0x2AD7_B1;
const ID_MUXING_APP: u32 = 0x4D80;
const ID_WRITING_APP: u32 = 0x5741;

const ID_TRACKS: u32 = 0x1654_AE6B;
const ID_TRACK_ENTRY: u32 = 0xAE;
const ID_TRACK_NUMBER: u32 = 0xD7;
const ID_TRACK_UID: u32 = 0x73C5;
const ID_TRACK_TYPE: u32 = 0x83;
const ID_CODEC_ID: u32 = 0x86;
const ID_VIDEO: u32 = 0xE0;
const ID_PIXEL_WIDTH: u32 = 0xB0;
const ID_PIXEL_HEIGHT: u32 = 0xBA;
const ID_AUDIO: u32 = 0xE1;
const ID_SAMPLING_FREQUENCY: u32 = 0xB5;
const ID_CHANNELS: u32 = 0x9F;

const ID_CLUSTER: u32 = 0x1F43_B675;
const ID_TIMECODE: u32 = 0xE7;
const ID_SIMPLE_BLOCK: u32 = 0xA3;

const TRACK_TYPE_VIDEO: u64 = 1;
const TRACK_TYPE_AUDIO: u64 = 2;

const UNKNOWN_SIZE: [u8; 8] = [0x01, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF];

/// Maximum cluster duration before rotation, in ms of timecode.
const CLUSTER_MAX_DURATION_MS: u64 = 5000;

/// One track registered with the muxer.
#[derive(Debug, Clone)]
pub struct WebmTrack {
    pub number: u64,
    /// "V_VP8" or "A_OPUS".
    pub codec_id: String,
    pub is_video: bool,
    pub width: u16,
    pub height: u16,
    pub sample_rate: f64,
    pub channels: u8,
}

fn write_id(out: &mut Vec<u8>, id: u32) {
    // element ids carry their own length marker; emit without a prefix
    let bytes = id.to_be_bytes();
    let skip = bytes.iter().take_while(|&&b| b == 0).count();
    out.extend_from_slice(&bytes[skip..]);
}

/// EBML variable-size integer with an explicit length marker.
fn write_size(out: &mut Vec<u8>, size: u64) {
    // pick the shortest representation that fits
    for length in 1..=8u32 {
        let max = (1u64 << (7 * length)) - 2;
        if size <= max {
            let marker = 1u64 << (7 * length);
            let value = marker | size;
            let bytes = value.to_be_bytes();
            out.extend_from_slice(&bytes[8 - length as usize..]);
            return;
        }
    }
}

fn write_uint_element(out: &mut Vec<u8>, id: u32, value: u64) {
    let bytes = value.to_be_bytes();
    let skip = bytes.iter().take_while(|&&b| b == 0).count().min(7);
    write_id(out, id);
    write_size(out, (8 - skip) as u64);
    out.extend_from_slice(&bytes[skip..]);
}

fn write_string_element(out: &mut Vec<u8>, id: u32, value: &str) {
    write_id(out, id);
    write_size(out, value.len() as u64);
    out.extend_from_slice(value.as_bytes());
}

fn write_float_element(out: &mut Vec<u8>, id: u32, value: f64) {
    write_id(out, id);
    write_size(out, 8);
    let mut buf = vec![];
    let _ = buf.write_f64::<BigEndian>(value);
    out.extend_from_slice(&buf);
}

fn write_master(out: &mut Vec<u8>, id: u32, body: &[u8]) {
    write_id(out, id);
    write_size(out, body.len() as u64);
    out.extend_from_slice(body);
}

/// A streaming WebM muxer: EBML header, unknown-size segment, then
/// clusters of SimpleBlocks. Output accumulates in an internal buffer the
/// owner drains.
pub struct WebmMuxer {
    tracks: Vec<WebmTrack>,
    output: Vec<u8>,
    header_written: bool,
    cluster_timecode: Option<u64>,
    finalized: bool,
}

impl WebmMuxer {
    pub fn new() -> Self {
        WebmMuxer {
            tracks: vec![],
            output: vec![],
            header_written: false,
            cluster_timecode: None,
            finalized: false,
        }
    }

    /// Registers a track; all tracks must be added before the first block.
    pub fn add_track(&mut self, track: WebmTrack) -> Result<()> {
        if self.header_written {
            return Err(Error::ErrRecorderClosed);
        }
        self.tracks.push(track);
        Ok(())
    }

    fn write_header(&mut self) {
        let mut ebml = vec![];
        write_uint_element(&mut ebml, ID_EBML_VERSION, 1);
        write_uint_element(&mut ebml, ID_EBML_READ_VERSION, 1);
        write_uint_element(&mut ebml, ID_EBML_MAX_ID_LENGTH, 4);
        write_uint_element(&mut ebml, ID_EBML_MAX_SIZE_LENGTH, 8);
        write_string_element(&mut ebml, ID_DOC_TYPE, "webm");
        write_uint_element(&mut ebml, ID_DOC_TYPE_VERSION, 2);
        write_uint_element(&mut ebml, ID_DOC_TYPE_READ_VERSION, 2);
        write_master(&mut self.output, ID_EBML, &ebml);

        // segment with unknown size: clusters stream until close
        write_id(&mut self.output, ID_SEGMENT);
        self.output.extend_from_slice(&UNKNOWN_SIZE);

        let mut info = vec![];
        write_uint_element(&mut info, ID_TIMECODE_SCALE, 1_000_000); // ms
        write_string_element(&mut info, ID_MUXING_APP, "strand");
        write_string_element(&mut info, ID_WRITING_APP, "strand");
        write_master(&mut self.output, ID_INFO, &info);

        let mut tracks = vec![];
        for track in &self.tracks {
            let mut entry = vec![];
            write_uint_element(&mut entry, ID_TRACK_NUMBER, track.number);
            write_uint_element(&mut entry, ID_TRACK_UID, track.number);
            write_uint_element(
                &mut entry,
                ID_TRACK_TYPE,
                if track.is_video {
                    TRACK_TYPE_VIDEO
                } else {
                    TRACK_TYPE_AUDIO
                },
            );
            write_string_element(&mut entry, ID_CODEC_ID, &track.codec_id);
            if track.is_video {
                let mut video = vec![];
                write_uint_element(&mut video, ID_PIXEL_WIDTH, track.width as u64);
                write_uint_element(&mut video, ID_PIXEL_HEIGHT, track.height as u64);
                write_master(&mut entry, ID_VIDEO, &video);
            } else {
                let mut audio = vec![];
                write_float_element(&mut audio, ID_SAMPLING_FREQUENCY, track.sample_rate);
                write_uint_element(&mut audio, ID_CHANNELS, track.channels as u64);
                write_master(&mut entry, ID_AUDIO, &audio);
            }
            write_master(&mut tracks, ID_TRACK_ENTRY, &entry);
        }
        write_master(&mut self.output, ID_TRACKS, &tracks);

        self.header_written = true;
    }

    fn open_cluster(&mut self, timecode_ms: u64) {
        write_id(&mut self.output, ID_CLUSTER);
        self.output.extend_from_slice(&UNKNOWN_SIZE);
        let mut timecode = vec![];
        write_uint_element(&mut timecode, ID_TIMECODE, timecode_ms);
        self.output.extend_from_slice(&timecode);
        self.cluster_timecode = Some(timecode_ms);
    }

    /// Writes one frame as a SimpleBlock; clusters rotate on video
    /// keyframes or after five seconds.
    pub fn write_block(
        &mut self,
        track_number: u64,
        timestamp_ms: u64,
        is_keyframe: bool,
        data: &Bytes,
    ) -> Result<()> {
        if self.finalized {
            return Err(Error::ErrRecorderClosed);
        }
        if !self.header_written {
            self.write_header();
        }

        let rotate = match self.cluster_timecode {
            None => true,
            Some(cluster) => {
                timestamp_ms < cluster
                    || timestamp_ms - cluster > i16::MAX as u64
                    || (is_keyframe && timestamp_ms > cluster)
                    || timestamp_ms - cluster >= CLUSTER_MAX_DURATION_MS
            }
        };
        if rotate {
            self.open_cluster(timestamp_ms);
        }

        let cluster = self.cluster_timecode.unwrap_or(0);
        let relative = (timestamp_ms - cluster) as i16;

        let mut block = vec![];
        // track numbers stay below 127 here, one-byte vint
        block.push(0x80 | track_number as u8);
        let _ = block.write_i16::<BigEndian>(relative);
        block.push(if is_keyframe { 0x80 } else { 0x00 });
        block.extend_from_slice(data);

        write_master(&mut self.output, ID_SIMPLE_BLOCK, &block);
        Ok(())
    }

    /// Drains the bytes produced so far.
    pub fn take_output(&mut self) -> Vec<u8> {
        std::mem::take(&mut self.output)
    }

    pub fn finalize(&mut self) -> Vec<u8> {
        self.finalized = true;
        self.take_output()
    }
}

impl Default for WebmMuxer {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn video_track() -> WebmTrack {
        WebmTrack {
            number: 1,
            codec_id: "V_VP8".to_owned(),
            is_video: true,
            width: 640,
            height: 480,
            sample_rate: 0.0,
            channels: 0,
        }
    }

    #[test]
    fn test_header_starts_with_ebml_magic() -> Result<()> {
        let mut muxer = WebmMuxer::new();
        muxer.add_track(video_track())?;
        muxer.write_block(1, 0, true, &Bytes::from_static(&[0x10, 0x20]))?;

        let out = muxer.take_output();
        assert_eq!(&out[..4], &[0x1A, 0x45, 0xDF, 0xA3]);
        // doctype "webm" appears in the header
        assert!(out.windows(4).any(|w| w == b"webm"));
        // segment id present
        assert!(out.windows(4).any(|w| w == [0x18, 0x53, 0x80, 0x67]));
        Ok(())
    }

    #[test]
    fn test_blocks_carry_track_and_keyframe_flag() -> Result<()> {
        let mut muxer = WebmMuxer::new();
        muxer.add_track(video_track())?;
        muxer.write_block(1, 0, true, &Bytes::from_static(&[0xAA]))?;
        let out = muxer.take_output();

        // find the SimpleBlock: id 0xA3, size 5, vint track 0x81,
        // timecode 0, keyframe flag, payload
        let needle = [0xA3, 0x85, 0x81, 0x00, 0x00, 0x80, 0xAA];
        assert!(
            out.windows(needle.len()).any(|w| w == needle),
            "SimpleBlock not found in {out:02x?}"
        );
        Ok(())
    }

    #[test]
    fn test_cluster_rotates_on_keyframe() -> Result<()> {
        let mut muxer = WebmMuxer::new();
        muxer.add_track(video_track())?;
        muxer.write_block(1, 0, true, &Bytes::from_static(&[1]))?;
        muxer.write_block(1, 33, false, &Bytes::from_static(&[2]))?;
        muxer.write_block(1, 66, true, &Bytes::from_static(&[3]))?;
        let out = muxer.take_output();

        let cluster_id = [0x1F, 0x43, 0xB6, 0x75];
        let clusters = out
            .windows(4)
            .filter(|w| *w == cluster_id)
            .count();
        assert_eq!(clusters, 2);
        Ok(())
    }

    #[test]
    fn test_write_after_finalize_fails() -> Result<()> {
        let mut muxer = WebmMuxer::new();
        muxer.add_track(video_track())?;
        muxer.finalize();
        assert!(muxer
            .write_block(1, 0, true, &Bytes::from_static(&[1]))
            .is_err());
        Ok(())
    }

    #[test]
    fn test_vint_size_boundaries() {
        let mut one = vec![];
        write_size(&mut one, 0x7E);
        assert_eq!(one, vec![0xFE]);

        let mut two = vec![];
        write_size(&mut two, 0x7F);
        assert_eq!(two, vec![0x40, 0x7F]);
    }
}
