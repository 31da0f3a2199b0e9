use bytes::Bytes;

/// One decodable media unit with its presentation time.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Sample {
    pub data: Bytes,
    /// Presentation time in milliseconds on the recorder's clock.
    pub timestamp_ms: u64,
    /// RTP timestamp the sample was carried with.
    pub rtp_timestamp: u32,
    pub is_keyframe: bool,
}
