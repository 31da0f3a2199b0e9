/// Maps RTP timestamps to wall-clock presentation times.
///
/// Fed with the (NTP, RTP timestamp) pairs from the stream's sender
/// reports; before the first report arrives the mapping is relative to
/// the first RTP timestamp seen.
pub struct NtpTimeMapper {
    clock_rate: u32,
    /// Last SR mapping: (ntp-derived unix milliseconds, rtp timestamp).
    anchor: Option<(u64, u32)>,
    /// Fallback anchor from the first packet, rtp-relative.
    first_rtp: Option<u32>,
}

/// Seconds between the NTP epoch (1900) and the Unix epoch (1970).
const NTP_UNIX_OFFSET_SECS: u64 = 2_208_988_800;

/// Converts a 64-bit NTP timestamp to milliseconds since the Unix epoch.
pub fn ntp_to_unix_ms(ntp: u64) -> u64 {
    let secs = (ntp >> 32).saturating_sub(NTP_UNIX_OFFSET_SECS);
    let frac = ntp & 0xFFFF_FFFF;
    secs * 1000 + (frac * 1000 >> 32)
}

/// Converts milliseconds since the Unix epoch to a 64-bit NTP timestamp.
pub fn unix_ms_to_ntp(ms: u64) -> u64 {
    let secs = ms / 1000 + NTP_UNIX_OFFSET_SECS;
    let frac = ((ms % 1000) << 32) / 1000;
    (secs << 32) | frac
}

impl NtpTimeMapper {
    pub fn new(clock_rate: u32) -> Self {
        NtpTimeMapper {
            clock_rate,
            anchor: None,
            first_rtp: None,
        }
    }

    /// Absorbs a sender report mapping.
    pub fn on_sender_report(&mut self, ntp_time: u64, rtp_time: u32) {
        self.anchor = Some((ntp_to_unix_ms(ntp_time), rtp_time));
    }

    /// Presentation time in milliseconds for an RTP timestamp.
    pub fn map(&mut self, rtp_timestamp: u32) -> u64 {
        match self.anchor {
            Some((anchor_ms, anchor_rtp)) => {
                let delta = rtp_timestamp.wrapping_sub(anchor_rtp) as i32 as i64;
                let delta_ms = delta * 1000 / self.clock_rate as i64;
                anchor_ms.saturating_add_signed(delta_ms)
            }
            None => {
                let first = *self.first_rtp.get_or_insert(rtp_timestamp);
                let delta = rtp_timestamp.wrapping_sub(first) as i32 as i64;
                (delta * 1000 / self.clock_rate as i64).max(0) as u64
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ntp_unix_round_trip() {
        let ms = 1_700_000_000_123u64;
        let ntp = unix_ms_to_ntp(ms);
        let back = ntp_to_unix_ms(ntp);
        assert!(back.abs_diff(ms) <= 1);
    }

    #[test]
    fn test_rtp_relative_before_sender_report() {
        let mut mapper = NtpTimeMapper::new(90_000);
        assert_eq!(mapper.map(90_000), 0);
        assert_eq!(mapper.map(180_000), 1000);
    }

    #[test]
    fn test_sender_report_anchors_wallclock() {
        let mut mapper = NtpTimeMapper::new(90_000);
        let ntp = unix_ms_to_ntp(5_000);
        mapper.on_sender_report(ntp, 90_000);
        // one second of RTP time past the anchor
        assert_eq!(mapper.map(180_000), 6_000);
        // half a second before the anchor
        assert_eq!(mapper.map(45_000), 4_500);
    }

    #[test]
    fn test_mapping_survives_rtp_wrap() {
        let mut mapper = NtpTimeMapper::new(90_000);
        mapper.on_sender_report(unix_ms_to_ntp(10_000), u32::MAX - 45_000);
        // 45000+1 ticks later the timestamp wrapped
        let wrapped = 0u32;
        let expected = 10_000 + (45_001 * 1000 / 90_000) as u64;
        assert_eq!(mapper.map(wrapped), expected);
    }
}
