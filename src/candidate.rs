// src/candidate.rs
//! ICE candidate and candidate pair representation (RFC 5245 Sections 4.1, 5.7)

use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::SocketAddr;

use crate::priority;

/// ICE candidate type (RFC 5245 Section 4.1.1.1)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CandidateKind {
    /// Host candidate (local interface address)
    Host,
    /// Server reflexive (mapped address learned from a STUN server)
    ServerReflexive,
    /// Peer reflexive (discovered during connectivity checks)
    PeerReflexive,
    /// Relayed candidate (allocation on a TURN server)
    Relayed,
}

impl CandidateKind {
    pub fn to_str(&self) -> &'static str {
        match self {
            Self::Host => "host",
            Self::ServerReflexive => "srflx",
            Self::PeerReflexive => "prflx",
            Self::Relayed => "relay",
        }
    }
}

impl fmt::Display for CandidateKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_str())
    }
}

/// Transport protocol
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TransportProtocol {
    Udp,
    Tcp,
}

impl fmt::Display for TransportProtocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Udp => write!(f, "udp"),
            Self::Tcp => write!(f, "tcp"),
        }
    }
}

/// One ICE candidate.
///
/// The base address is the address checks are actually sent from: for host
/// and relayed candidates it equals `addr`, for reflexive candidates it is
/// the host address behind the mapping.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Candidate {
    /// Media stream this candidate belongs to
    pub stream_id: u32,

    /// Component ID (1 for RTP, 2 for RTCP)
    pub component_id: u32,

    /// Transport protocol
    pub transport: TransportProtocol,

    /// Candidate type
    pub kind: CandidateKind,

    /// Transport address
    pub addr: SocketAddr,

    /// Base address
    pub base: SocketAddr,

    /// Priority (RFC 5245 Section 4.1.2); zero means "not yet computed"
    pub priority: u32,

    /// Foundation (RFC 5245 Section 4.1.1.3); empty means "not yet assigned"
    pub foundation: String,

    /// STUN/TURN server the mapping or allocation came from, for
    /// reflexive/relayed candidates
    pub server: Option<SocketAddr>,

    /// Whether the base interface is VPN-sourced; forces local preference 0
    pub vpn: bool,
}

impl Candidate {
    /// Create a new host candidate
    pub fn new_host(
        stream_id: u32,
        component_id: u32,
        transport: TransportProtocol,
        addr: SocketAddr,
    ) -> Self {
        let mut candidate = Self {
            stream_id,
            component_id,
            transport,
            kind: CandidateKind::Host,
            addr,
            base: addr,
            priority: 0,
            foundation: String::new(),
            server: None,
            vpn: false,
        };
        candidate.compute_priority();
        candidate
    }

    /// Create a server reflexive candidate for a mapped address learned
    /// from `server` through the socket at `base`
    pub fn new_server_reflexive(
        stream_id: u32,
        component_id: u32,
        transport: TransportProtocol,
        mapped: SocketAddr,
        base: SocketAddr,
        server: SocketAddr,
    ) -> Self {
        let mut candidate = Self {
            stream_id,
            component_id,
            transport,
            kind: CandidateKind::ServerReflexive,
            addr: mapped,
            base,
            priority: 0,
            foundation: String::new(),
            server: Some(server),
            vpn: false,
        };
        candidate.compute_priority();
        candidate
    }

    /// Create a peer reflexive candidate discovered during connectivity
    /// checks
    pub fn new_peer_reflexive(
        stream_id: u32,
        component_id: u32,
        transport: TransportProtocol,
        addr: SocketAddr,
        base: SocketAddr,
    ) -> Self {
        let mut candidate = Self {
            stream_id,
            component_id,
            transport,
            kind: CandidateKind::PeerReflexive,
            addr,
            base,
            priority: 0,
            foundation: String::new(),
            server: None,
            vpn: false,
        };
        candidate.compute_priority();
        candidate
    }

    /// Create a relayed candidate for an allocation on `server`
    pub fn new_relayed(
        stream_id: u32,
        component_id: u32,
        transport: TransportProtocol,
        relay_addr: SocketAddr,
        server: SocketAddr,
    ) -> Self {
        let mut candidate = Self {
            stream_id,
            component_id,
            transport,
            kind: CandidateKind::Relayed,
            addr: relay_addr,
            base: relay_addr,
            priority: 0,
            foundation: String::new(),
            server: Some(server),
            vpn: false,
        };
        candidate.compute_priority();
        candidate
    }

    /// Compute and store this candidate's priority from its type, base
    /// address family, VPN flag, and component id. Idempotent; call again
    /// after changing `vpn`.
    pub fn compute_priority(&mut self) {
        let local_pref = priority::local_preference_for(&self.base.ip(), self.vpn);
        self.priority = priority::calculate_priority(self.kind, local_pref, self.component_id);
    }

    /// Identity key used by the store: (stream, component, address, base).
    /// Type is deliberately excluded so the same reflexive address
    /// discovered via two interfaces does not collide.
    pub fn key(&self) -> (u32, u32, SocketAddr, SocketAddr) {
        (self.stream_id, self.component_id, self.addr, self.base)
    }

    /// Whether `other` denotes the same candidate under store equality
    pub fn same_identity(&self, other: &Candidate) -> bool {
        self.key() == other.key()
    }

    /// Whether this candidate and `other` agree on the fields a foundation
    /// groups by: type, base IP address (ports may differ, RFC 5245
    /// Section 4.1.1.3), transport, and server
    pub fn same_foundation_basis(&self, other: &Candidate) -> bool {
        self.kind == other.kind
            && self.base.ip() == other.base.ip()
            && self.transport == other.transport
            && self.server == other.server
    }

    pub fn is_host(&self) -> bool {
        self.kind == CandidateKind::Host
    }

    pub fn is_ipv6(&self) -> bool {
        self.addr.is_ipv6()
    }

    /// Address families of transport address and base address match
    pub fn families_consistent(&self) -> bool {
        self.addr.is_ipv4() == self.base.is_ipv4()
    }
}

impl fmt::Display for Candidate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} prio {} (stream {} comp {})",
            self.kind, self.addr, self.priority, self.stream_id, self.component_id
        )?;
        if self.base != self.addr {
            write!(f, " base {}", self.base)?;
        }
        Ok(())
    }
}

/// Candidate pair state (RFC 5245 Section 5.7.4)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CandidatePairState {
    /// Will not be checked until unfrozen
    Frozen,
    /// Eligible for the next scheduled check
    Waiting,
    /// A check is in flight
    InProgress,
    /// Check succeeded and the mapped address matched
    Succeeded,
    /// Check failed or timed out
    Failed,
}

impl CandidatePairState {
    /// Succeeded or Failed
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed)
    }
}

impl fmt::Display for CandidatePairState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Frozen => "frozen",
            Self::Waiting => "waiting",
            Self::InProgress => "in-progress",
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
        };
        write!(f, "{}", s)
    }
}

/// Candidate pair for connectivity checks
#[derive(Debug, Clone)]
pub struct CandidatePair {
    /// Local candidate
    pub local: Candidate,

    /// Remote candidate
    pub remote: Candidate,

    /// Pair priority (RFC 5245 Section 5.7.2)
    pub priority: u64,

    /// Pair foundation, concatenated from both candidates
    pub foundation: String,

    /// Current state
    pub state: CandidatePairState,

    /// Selected for media by nomination
    pub nominated: bool,

    /// Next check for this pair carries USE-CANDIDATE
    pub use_candidate: bool,

    /// A connectivity check on this pair has succeeded
    pub valid: bool,

    /// Number of checks sent
    pub checks_sent: u32,
}

impl CandidatePair {
    /// Create a new pair in Frozen state
    pub fn new(local: Candidate, remote: Candidate, controlling: bool) -> Self {
        let priority =
            priority::calculate_pair_priority(controlling, local.priority, remote.priority);
        let foundation = format!("{}:{}", local.foundation, remote.foundation);

        Self {
            local,
            remote,
            priority,
            foundation,
            state: CandidatePairState::Frozen,
            nominated: false,
            use_candidate: false,
            valid: false,
            checks_sent: 0,
        }
    }

    /// Recompute pair priority after a role switch. States are untouched.
    pub fn recompute_priority(&mut self, controlling: bool) {
        self.priority =
            priority::calculate_pair_priority(controlling, self.local.priority, self.remote.priority);
    }

    /// Unique pair id for logs
    pub fn id(&self) -> String {
        format!(
            "{}:{}:{}",
            self.local.addr, self.remote.addr, self.local.component_id
        )
    }

    /// Whether the pair's transport addresses are exactly `local` and
    /// `remote`; checklist lookups route by this
    pub fn addresses_match(&self, local: SocketAddr, remote: SocketAddr) -> bool {
        self.local.addr == local && self.remote.addr == remote
    }
}

impl fmt::Display for CandidatePair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} -> {} [{}] prio {}{}",
            self.local.addr,
            self.remote.addr,
            self.state,
            self.priority,
            if self.nominated { " nominated" } else { "" }
        )
    }
}

/// Whether two candidates can form a pair: same component, same transport,
/// same address family.
pub fn can_form_pair(local: &Candidate, remote: &Candidate) -> bool {
    local.component_id == remote.component_id
        && local.transport == remote.transport
        && local.addr.is_ipv4() == remote.addr.is_ipv4()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn host(addr: &str) -> Candidate {
        Candidate::new_host(1, 1, TransportProtocol::Udp, addr.parse().unwrap())
    }

    #[test]
    fn test_host_base_is_self() {
        let c = host("192.168.1.100:54321");
        assert_eq!(c.base, c.addr);
        assert!(c.families_consistent());
        assert!(c.priority > 0);
    }

    #[test]
    fn test_reflexive_base_and_server() {
        let c = Candidate::new_server_reflexive(
            1,
            1,
            TransportProtocol::Udp,
            "203.0.113.5:61000".parse().unwrap(),
            "192.168.1.100:54321".parse().unwrap(),
            "198.51.100.1:3478".parse().unwrap(),
        );
        assert_ne!(c.base, c.addr);
        assert!(c.server.is_some());
        assert_eq!(c.kind, CandidateKind::ServerReflexive);
    }

    #[test]
    fn test_relayed_base_is_self() {
        let c = Candidate::new_relayed(
            1,
            1,
            TransportProtocol::Udp,
            "198.51.100.1:49152".parse().unwrap(),
            "198.51.100.1:3478".parse().unwrap(),
        );
        assert_eq!(c.base, c.addr);
    }

    #[test]
    fn test_identity_ignores_type() {
        let mut a = Candidate::new_server_reflexive(
            1,
            1,
            TransportProtocol::Udp,
            "203.0.113.5:61000".parse().unwrap(),
            "192.168.1.100:54321".parse().unwrap(),
            "198.51.100.1:3478".parse().unwrap(),
        );
        let mut b = a.clone();
        b.kind = CandidateKind::PeerReflexive;
        b.compute_priority();
        assert!(a.same_identity(&b));
        a.stream_id = 2;
        assert!(!a.same_identity(&b));
    }

    #[test]
    fn test_vpn_recompute_lowers_priority() {
        let mut c = host("192.168.1.100:54321");
        let before = c.priority;
        c.vpn = true;
        c.compute_priority();
        assert!(c.priority < before);
    }

    #[test]
    fn test_pair_priority_differs_by_role() {
        let mut local = host("192.168.1.100:54321");
        let mut remote = host("192.168.1.200:54321");
        local.foundation = "1".into();
        remote.foundation = "9".into();
        // Unequal candidate priorities so the tie bit shows up.
        remote.priority = local.priority - 7;

        let as_controlling = CandidatePair::new(local.clone(), remote.clone(), true);
        let as_controlled = CandidatePair::new(local, remote, false);
        assert_ne!(as_controlling.priority, as_controlled.priority);
        assert_eq!(as_controlling.foundation, "1:9");
        assert_eq!(as_controlling.state, CandidatePairState::Frozen);
    }

    #[test]
    fn test_recompute_priority_matches_fresh_pair() {
        let mut local = host("10.0.0.1:1000");
        let mut remote = host("10.0.0.2:2000");
        local.foundation = "1".into();
        remote.foundation = "2".into();
        remote.priority -= 3;

        let mut pair = CandidatePair::new(local.clone(), remote.clone(), true);
        pair.recompute_priority(false);
        let fresh = CandidatePair::new(local, remote, false);
        assert_eq!(pair.priority, fresh.priority);
    }

    #[test]
    fn test_can_form_pair_rules() {
        let local = host("192.168.1.100:54321");
        let mut remote = host("192.168.1.200:54321");
        assert!(can_form_pair(&local, &remote));

        remote.component_id = 2;
        assert!(!can_form_pair(&local, &remote));

        let v6 = Candidate::new_host(1, 1, TransportProtocol::Udp, "[2001:db8::1]:9000".parse().unwrap());
        assert!(!can_form_pair(&local, &v6));

        let mut tcp = host("192.168.1.200:54321");
        tcp.transport = TransportProtocol::Tcp;
        assert!(!can_form_pair(&local, &tcp));
    }

    #[test]
    fn test_candidate_serde_roundtrip() {
        let c = host("192.168.1.100:54321");
        let json = serde_json::to_string(&c).unwrap();
        let back: Candidate = serde_json::from_str(&json).unwrap();
        assert_eq!(back, c);
    }
}
