use rand::Rng;

/// MatchFuncs as described in RFC 7983
/// <https://tools.ietf.org/html/rfc7983>
///              +----------------+
///              |        [0..3] -+--> forward to STUN
///              |                |
///              |      [20..63] -+--> forward to DTLS
///              |                |
///              |    [128..191] -+--> forward to RTP/RTCP
///              +----------------+
pub fn match_stun(buf: &[u8]) -> bool {
    !buf.is_empty() && buf[0] <= 3
}

pub fn match_dtls(buf: &[u8]) -> bool {
    !buf.is_empty() && (20..=63).contains(&buf[0])
}

pub fn match_srtp_or_srtcp(buf: &[u8]) -> bool {
    !buf.is_empty() && (128..=191).contains(&buf[0])
}

pub fn is_rtcp(buf: &[u8]) -> bool {
    // Not long enough to determine RTP/RTCP
    if buf.len() < 4 {
        return false;
    }
    let rtcp_packet_type = buf[1];
    (192..=223).contains(&rtcp_packet_type)
}

/// Matches SRTP and not SRTCP
pub fn match_srtp(buf: &[u8]) -> bool {
    match_srtp_or_srtcp(buf) && !is_rtcp(buf)
}

/// Matches SRTCP and not SRTP
pub fn match_srtcp(buf: &[u8]) -> bool {
    match_srtp_or_srtcp(buf) && is_rtcp(buf)
}

const RUNES_ALPHA: &[u8] = b"abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ";
const RUNES_ALPHA_NUMBER: &[u8] = b"abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";

/// Generates a random alphabetic sequence of the requested length.
pub fn rand_alpha(n: usize) -> String {
    rand_string(n, RUNES_ALPHA)
}

/// Generates a random alphanumeric sequence of the requested length.
pub fn rand_alpha_number(n: usize) -> String {
    rand_string(n, RUNES_ALPHA_NUMBER)
}

fn rand_string(n: usize, runes: &[u8]) -> String {
    let mut rng = rand::thread_rng();
    (0..n)
        .map(|_| {
            let idx = rng.gen_range(0..runes.len());
            runes[idx] as char
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_demux_match_funcs() {
        assert!(match_stun(&[0x00, 0x01]));
        assert!(!match_stun(&[0x16]));
        assert!(match_dtls(&[22, 254, 253]));
        assert!(!match_dtls(&[0x80]));
        assert!(match_srtp(&[0x80, 96, 0, 0]));
        assert!(match_srtcp(&[0x80, 200, 0, 1]));
        assert!(!match_srtp(&[0x80, 200, 0, 1]));
    }

    #[test]
    fn test_rand_alpha_len() {
        let s = rand_alpha(16);
        assert_eq!(s.len(), 16);
        assert!(s.chars().all(|c| c.is_ascii_alphabetic()));
    }
}
