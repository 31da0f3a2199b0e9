use std::fmt;

use serde::Serialize;

/// Candidate pair check state (RFC 8445 section 6.1.2.6). States only
/// move forward: `Frozen -> Waiting -> InProgress -> Succeeded | Failed`;
/// a succeeded pair may additionally be nominated.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default, Serialize)]
pub enum CandidatePairState {
    #[serde(rename = "frozen")]
    #[default]
    Frozen,
    #[serde(rename = "waiting")]
    Waiting,
    #[serde(rename = "in-progress")]
    InProgress,
    #[serde(rename = "failed")]
    Failed,
    #[serde(rename = "succeeded")]
    Succeeded,
}

impl fmt::Display for CandidatePairState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            CandidatePairState::Frozen => "frozen",
            CandidatePairState::Waiting => "waiting",
            CandidatePairState::InProgress => "in-progress",
            CandidatePairState::Failed => "failed",
            CandidatePairState::Succeeded => "succeeded",
        };
        write!(f, "{s}")
    }
}

/// A (local, remote) candidate pair. The pair holds indices into the
/// agent's candidate tables, never the candidates themselves.
#[derive(Clone, Copy, Debug)]
pub struct CandidatePair {
    pub local_index: usize,
    pub remote_index: usize,
    pub local_priority: u32,
    pub remote_priority: u32,
    pub(crate) ice_role_controlling: bool,
    pub(crate) state: CandidatePairState,
    pub(crate) nominated: bool,
    pub(crate) binding_request_count: u16,
    /// Rolling RTT estimate in milliseconds.
    pub(crate) rtt_ms: Option<u64>,
}

impl PartialEq for CandidatePair {
    fn eq(&self, other: &Self) -> bool {
        self.local_index == other.local_index && self.remote_index == other.remote_index
    }
}

impl fmt::Display for CandidatePair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "prio {} local {} <-> remote {} ({})",
            self.priority(),
            self.local_index,
            self.remote_index,
            self.state,
        )
    }
}

impl CandidatePair {
    pub fn new(
        local_index: usize,
        remote_index: usize,
        local_priority: u32,
        remote_priority: u32,
        ice_role_controlling: bool,
    ) -> Self {
        CandidatePair {
            local_index,
            remote_index,
            local_priority,
            remote_priority,
            ice_role_controlling,
            state: CandidatePairState::Frozen,
            nominated: false,
            binding_request_count: 0,
            rtt_ms: None,
        }
    }

    /// RFC 8445 section 6.1.2.3: with G the controlling and D the
    /// controlled priority,
    /// `pair priority = 2^32*MIN(G,D) + 2*MAX(G,D) + (G>D?1:0)`.
    pub fn priority(&self) -> u64 {
        let (g, d) = if self.ice_role_controlling {
            (self.local_priority, self.remote_priority)
        } else {
            (self.remote_priority, self.local_priority)
        };

        (1u64 << 32) * u64::from(g.min(d)) + 2 * u64::from(g.max(d)) + u64::from(g > d)
    }

    pub fn state(&self) -> CandidatePairState {
        self.state
    }

    pub fn nominated(&self) -> bool {
        self.nominated
    }

    pub fn rtt_ms(&self) -> Option<u64> {
        self.rtt_ms
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pair_priority_formula() {
        let controlling = CandidatePair::new(0, 0, 100, 200, true);
        // G=100, D=200 => 2^32*100 + 2*200 + 0
        assert_eq!(controlling.priority(), (1u64 << 32) * 100 + 400);

        let controlled = CandidatePair::new(0, 0, 100, 200, false);
        // G=200, D=100 => 2^32*100 + 2*200 + 1
        assert_eq!(controlled.priority(), (1u64 << 32) * 100 + 401);
    }

    #[test]
    fn test_pair_priority_symmetric_across_roles() {
        // both agents must compute the same ordering for the same pair
        let a = CandidatePair::new(0, 0, 123, 456, true).priority();
        let b = CandidatePair::new(0, 0, 456, 123, false).priority();
        assert_eq!(a, b);
    }
}
