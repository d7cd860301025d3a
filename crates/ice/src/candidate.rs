//! Candidates and candidate pairs: gathering, RFC 8445 §5.1.2 priority, and
//! the states a pair moves through during connectivity checks.

use std::net::SocketAddr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum CandidateType {
    /// Highest type preference.
    Host,
    PeerReflexive,
    ServerReflexive,
    /// Lowest type preference.
    Relayed,
}

impl CandidateType {
    /// Recommended type preference values from RFC 8445 §5.1.2.1.
    fn type_preference(self) -> u32 {
        match self {
            CandidateType::Host => 126,
            CandidateType::PeerReflexive => 110,
            CandidateType::ServerReflexive => 100,
            CandidateType::Relayed => 0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Candidate {
    pub kind: CandidateType,
    pub address: SocketAddr,
    /// Opaque string grouping candidates gathered from the same base/STUN
    /// server, used to unfreeze whole foundation groups together.
    pub foundation: String,
    pub component_id: u8,
    /// 0 for a single interface; distinguishes candidates gathered from
    /// separate local interfaces, per RFC 8445 §5.1.2.1.
    pub local_preference: u16,
}

impl Candidate {
    /// `priority = (2^24 * type_pref) + (2^8 * local_pref) + (256 - component_id)`.
    pub fn priority(&self) -> u32 {
        (self.kind.type_preference() << 24)
            + ((self.local_preference as u32) << 8)
            + (256 - self.component_id as u32)
    }
}

/// Orders candidates by descending priority; ties broken by address family
/// (IPv4 before IPv6 when IPv6 is disabled) then by foundation string order,
/// per spec.
pub fn sort_candidates(candidates: &mut [Candidate], ipv6_enabled: bool) {
    candidates.sort_by(|a, b| {
        b.priority()
            .cmp(&a.priority())
            .then_with(|| {
                if ipv6_enabled {
                    std::cmp::Ordering::Equal
                } else {
                    family_rank(a.address).cmp(&family_rank(b.address))
                }
            })
            .then_with(|| a.foundation.cmp(&b.foundation))
    });
}

fn family_rank(addr: SocketAddr) -> u8 {
    if addr.is_ipv4() { 0 } else { 1 }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PairState {
    Frozen,
    Waiting,
    InProgress,
    Succeeded,
    Failed,
}

#[derive(Debug, Clone)]
pub struct CandidatePair {
    pub local: Candidate,
    pub remote: Candidate,
    pub state: PairState,
}

impl CandidatePair {
    pub fn new(local: Candidate, remote: Candidate) -> Self {
        Self {
            local,
            remote,
            state: PairState::Frozen,
        }
    }

    /// RFC 8445 §6.1.2.3: pair priority combines both candidates' priorities,
    /// favoring the controlling agent's candidate on ties.
    pub fn priority(&self, controlling_is_local: bool) -> u64 {
        let (g, d) = if controlling_is_local {
            (self.local.priority() as u64, self.remote.priority() as u64)
        } else {
            (self.remote.priority() as u64, self.local.priority() as u64)
        };

        (g.min(d) << 32) + (g.max(d) << 1) + if g > d { 1 } else { 0 }
    }
}

/// Pairs local and remote candidate lists (cross product, per RFC 8445
/// §6.1.2.2) and unfreezes the first pair of each distinct foundation.
pub fn pair_candidates(local: &[Candidate], remote: &[Candidate]) -> Vec<CandidatePair> {
    let mut pairs: Vec<CandidatePair> = local
        .iter()
        .flat_map(|l| remote.iter().map(move |r| CandidatePair::new(l.clone(), r.clone())))
        .collect();

    let mut seen_foundations = ahash::AHashSet::default();
    for pair in &mut pairs {
        let foundation = format!("{}:{}", pair.local.foundation, pair.remote.foundation);
        if seen_foundations.insert(foundation) {
            pair.state = PairState::Waiting;
        }
    }

    pairs
}

#[cfg(test)]
mod tests {
    use super::*;

    fn candidate(kind: CandidateType, port: u16) -> Candidate {
        Candidate {
            kind,
            address: format!("192.168.0.1:{port}").parse().unwrap(),
            foundation: format!("f{port}"),
            component_id: 1,
            local_preference: 0,
        }
    }

    #[test]
    fn host_outranks_relayed() {
        let host = candidate(CandidateType::Host, 1);
        let relayed = candidate(CandidateType::Relayed, 2);
        assert!(host.priority() > relayed.priority());
    }

    #[test]
    fn sort_orders_by_descending_priority() {
        let mut candidates = vec![
            candidate(CandidateType::Relayed, 1),
            candidate(CandidateType::Host, 2),
            candidate(CandidateType::ServerReflexive, 3),
        ];

        sort_candidates(&mut candidates, true);
        assert_eq!(candidates[0].kind, CandidateType::Host);
        assert_eq!(candidates[1].kind, CandidateType::ServerReflexive);
        assert_eq!(candidates[2].kind, CandidateType::Relayed);
    }

    #[test]
    fn pair_candidates_unfreezes_first_pair_per_foundation() {
        let local = vec![candidate(CandidateType::Host, 1)];
        let remote = vec![candidate(CandidateType::Host, 2)];

        let pairs = pair_candidates(&local, &remote);
        assert_eq!(pairs.len(), 1);
        assert_eq!(pairs[0].state, PairState::Waiting);
    }
}
