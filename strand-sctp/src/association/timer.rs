use std::time::{Duration, Instant};

pub(crate) const ACK_INTERVAL_MS: u64 = 200;
const MAX_INIT_RETRANS: usize = 8;
const NO_MAX_RETRANS: usize = usize::MAX;
const TIMER_COUNT: usize = 5;

#[derive(Debug, Copy, Clone, Ord, PartialOrd, Eq, PartialEq)]
pub(crate) enum Timer {
    T1Init = 0,
    T1Cookie = 1,
    T2Shutdown = 2,
    T3Rtx = 3,
    Ack = 4,
}

impl Timer {
    pub(crate) const VALUES: [Self; TIMER_COUNT] = [
        Timer::T1Init,
        Timer::T1Cookie,
        Timer::T2Shutdown,
        Timer::T3Rtx,
        Timer::Ack,
    ];
}

/// Deadlines and retransmission counts for each timer kind.
#[derive(Debug, Copy, Clone, Default)]
pub(crate) struct TimerTable {
    deadlines: [Option<Instant>; TIMER_COUNT],
    retrans: [usize; TIMER_COUNT],
    max_retrans: [usize; TIMER_COUNT],
}

impl TimerTable {
    pub(crate) fn new() -> Self {
        TimerTable {
            max_retrans: [
                MAX_INIT_RETRANS, // T1Init
                MAX_INIT_RETRANS, // T1Cookie
                NO_MAX_RETRANS,   // T2Shutdown
                NO_MAX_RETRANS,   // T3Rtx
                NO_MAX_RETRANS,   // Ack
            ],
            ..Default::default()
        }
    }

    pub(crate) fn start(&mut self, timer: Timer, now: Instant, rto: u64) {
        let interval = if timer == Timer::Ack {
            ACK_INTERVAL_MS
        } else {
            backed_off(rto, self.retrans[timer as usize])
        };
        self.deadlines[timer as usize] = Some(now + Duration::from_millis(interval));
    }

    pub(crate) fn stop(&mut self, timer: Timer) {
        self.deadlines[timer as usize] = None;
        self.retrans[timer as usize] = 0;
    }

    pub(crate) fn is_running(&self, timer: Timer) -> bool {
        self.deadlines[timer as usize].is_some()
    }

    pub(crate) fn next_timeout(&self) -> Option<Instant> {
        self.deadlines.iter().filter_map(|&x| x).min()
    }

    /// Returns (expired, retries exhausted, retry count) and counts the
    /// expiry.
    pub(crate) fn is_expired(&mut self, timer: Timer, now: Instant) -> (bool, bool, usize) {
        let expired = self.deadlines[timer as usize].map_or(false, |t| t <= now);
        let mut failure = false;
        if expired {
            self.deadlines[timer as usize] = None;
            self.retrans[timer as usize] += 1;
            if self.retrans[timer as usize] > self.max_retrans[timer as usize] {
                failure = true;
            }
        }
        (expired, failure, self.retrans[timer as usize])
    }
}

const RTO_INITIAL: u64 = 3000; // msec
const RTO_MIN: u64 = 1000;
const RTO_MAX: u64 = 60000;
const RTO_ALPHA: u64 = 1;
const RTO_BETA: u64 = 2;
const RTO_BASE: u64 = 8;

/// Retransmission timeout estimation, RFC 4960 section 6.3.1.
#[derive(Default, Debug)]
pub(crate) struct RtoManager {
    pub(crate) srtt: u64,
    pub(crate) rttvar: f64,
    pub(crate) rto: u64,
}

impl RtoManager {
    pub(crate) fn new() -> Self {
        RtoManager {
            rto: RTO_INITIAL,
            ..Default::default()
        }
    }

    /// Feeds a new RTT measurement (msec), returning the smoothed RTT.
    pub(crate) fn set_new_rtt(&mut self, rtt: u64) -> u64 {
        if self.srtt == 0 {
            self.srtt = rtt;
            self.rttvar = rtt as f64 / 2.0;
        } else {
            self.rttvar = ((RTO_BASE - RTO_BETA) as f64 * self.rttvar
                + RTO_BETA as f64 * (self.srtt as i64 - rtt as i64).abs() as f64)
                / RTO_BASE as f64;
            self.srtt = ((RTO_BASE - RTO_ALPHA) * self.srtt + RTO_ALPHA * rtt) / RTO_BASE;
        }

        self.rto = (self.srtt + (4.0 * self.rttvar) as u64).clamp(RTO_MIN, RTO_MAX);

        self.srtt
    }

    pub(crate) fn get_rto(&self) -> u64 {
        self.rto
    }

    pub(crate) fn reset(&mut self) {
        self.srtt = 0;
        self.rttvar = 0.0;
        self.rto = RTO_INITIAL;
    }
}

/// RFC 4960 section 6.3.3 E2: back off the timer on each expiry.
fn backed_off(rto: u64, n_rtos: usize) -> u64 {
    if n_rtos < 31 {
        (rto << n_rtos).min(RTO_MAX)
    } else {
        RTO_MAX
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rto_initial_and_first_measurement() {
        let mut rto = RtoManager::new();
        assert_eq!(rto.get_rto(), RTO_INITIAL);
        rto.set_new_rtt(600);
        // srtt=600, rttvar=300 => rto = 600 + 1200 = 1800
        assert_eq!(rto.get_rto(), 1800);
    }

    #[test]
    fn test_rto_clamped_to_min() {
        let mut rto = RtoManager::new();
        rto.set_new_rtt(10);
        assert_eq!(rto.get_rto(), RTO_MIN);
    }

    #[test]
    fn test_timer_backoff() {
        assert_eq!(backed_off(1000, 0), 1000);
        assert_eq!(backed_off(1000, 1), 2000);
        assert_eq!(backed_off(1000, 10), RTO_MAX);
    }

    #[test]
    fn test_timer_table_expiry_counts() {
        let now = Instant::now();
        let mut table = TimerTable::new();
        table.start(Timer::T1Init, now, 1000);
        let deadline = table.next_timeout().unwrap();
        let (expired, failure, retries) = table.is_expired(Timer::T1Init, deadline);
        assert!(expired);
        assert!(!failure);
        assert_eq!(retries, 1);
    }
}
