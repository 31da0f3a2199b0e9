use std::collections::VecDeque;

use crate::sample::Sample;

/// Interleaves audio and video samples by presentation time so the muxer
/// receives blocks in rough timestamp order.
///
/// Samples buffer per lane; a lane drains only while the other lane has
/// something newer (or is past the tolerance window), which keeps one
/// stalled lane from blocking playback forever.
pub struct LipsyncAligner {
    audio: VecDeque<Sample>,
    video: VecDeque<Sample>,
    /// How far one lane may run ahead of a silent peer lane, ms.
    tolerance_ms: u64,
    ready: VecDeque<(bool, Sample)>, // (is_video, sample)
}

const DEFAULT_TOLERANCE_MS: u64 = 500;

impl Default for LipsyncAligner {
    fn default() -> Self {
        LipsyncAligner::new(DEFAULT_TOLERANCE_MS)
    }
}

impl LipsyncAligner {
    pub fn new(tolerance_ms: u64) -> Self {
        LipsyncAligner {
            audio: VecDeque::new(),
            video: VecDeque::new(),
            tolerance_ms,
            ready: VecDeque::new(),
        }
    }

    pub fn push_audio(&mut self, sample: Sample) {
        self.audio.push_back(sample);
        self.drain();
    }

    pub fn push_video(&mut self, sample: Sample) {
        self.video.push_back(sample);
        self.drain();
    }

    fn drain(&mut self) {
        loop {
            let audio_ts = self.audio.front().map(|s| s.timestamp_ms);
            let video_ts = self.video.front().map(|s| s.timestamp_ms);

            match (audio_ts, video_ts) {
                (Some(audio), Some(video)) => {
                    if audio <= video {
                        let sample = self.audio.pop_front().unwrap();
                        self.ready.push_back((false, sample));
                    } else {
                        let sample = self.video.pop_front().unwrap();
                        self.ready.push_back((true, sample));
                    }
                }
                (Some(audio), None) => {
                    // release audio only once it is old enough that a
                    // video sample could no longer sort before it
                    let newest = self.audio.back().map(|s| s.timestamp_ms).unwrap_or(audio);
                    if newest.saturating_sub(audio) >= self.tolerance_ms {
                        let sample = self.audio.pop_front().unwrap();
                        self.ready.push_back((false, sample));
                    } else {
                        return;
                    }
                }
                (None, Some(video)) => {
                    let newest = self.video.back().map(|s| s.timestamp_ms).unwrap_or(video);
                    if newest.saturating_sub(video) >= self.tolerance_ms {
                        let sample = self.video.pop_front().unwrap();
                        self.ready.push_back((true, sample));
                    } else {
                        return;
                    }
                }
                (None, None) => return,
            }
        }
    }

    /// Pops the next interleaved (is_video, sample) pair.
    pub fn pop(&mut self) -> Option<(bool, Sample)> {
        self.ready.pop_front()
    }

    /// Releases everything still buffered, in timestamp order.
    pub fn flush(&mut self) {
        let mut rest: Vec<(bool, Sample)> = self
            .audio
            .drain(..)
            .map(|s| (false, s))
            .chain(self.video.drain(..).map(|s| (true, s)))
            .collect();
        rest.sort_by_key(|(_, s)| s.timestamp_ms);
        self.ready.extend(rest);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;

    fn sample(ts: u64) -> Sample {
        Sample {
            data: Bytes::from_static(&[0]),
            timestamp_ms: ts,
            rtp_timestamp: 0,
            is_keyframe: false,
        }
    }

    #[test]
    fn test_interleaves_by_timestamp() {
        let mut aligner = LipsyncAligner::new(100);
        aligner.push_video(sample(40));
        aligner.push_audio(sample(20));
        aligner.push_audio(sample(60));
        aligner.push_video(sample(80));

        let mut order = vec![];
        while let Some((is_video, sample)) = aligner.pop() {
            order.push((is_video, sample.timestamp_ms));
        }
        assert_eq!(order, vec![(false, 20), (true, 40), (false, 60)]);
    }

    #[test]
    fn test_lone_lane_released_after_tolerance() {
        let mut aligner = LipsyncAligner::new(100);
        aligner.push_audio(sample(0));
        assert!(aligner.pop().is_none());
        aligner.push_audio(sample(150));
        // the old audio sample is now past tolerance
        assert_eq!(aligner.pop().unwrap().1.timestamp_ms, 0);
    }

    #[test]
    fn test_flush_releases_everything_sorted() {
        let mut aligner = LipsyncAligner::new(1000);
        aligner.push_audio(sample(30));
        aligner.push_video(sample(10));
        aligner.flush();

        let mut order = vec![];
        while let Some((_, sample)) = aligner.pop() {
            order.push(sample.timestamp_ms);
        }
        assert_eq!(order, vec![10, 30]);
    }
}
