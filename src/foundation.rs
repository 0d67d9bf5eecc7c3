// src/foundation.rs
//! Foundation assignment (RFC 5245 Section 4.1.1.3)
//!
//! Two candidates share a foundation iff they have the same type, base IP
//! address (base ports may differ), transport protocol, and (for
//! reflexive/relayed candidates) the same STUN/TURN server. Assignment
//! scans previously added local candidates for a match and otherwise
//! allocates a fresh numeric id from a monotone generator, skipping ids
//! already in use.

use crate::candidate::Candidate;

/// Maximum foundation length per RFC 5245; foundations are 1 to 32 ice-chars
pub const MAX_FOUNDATION_LENGTH: usize = 32;

/// Allocates foundations for local candidates. One registry per agent, so
/// candidates in different streams with the same basis share a foundation
/// and cross-stream unfreezing can match them up.
#[derive(Debug)]
pub struct FoundationRegistry {
    next_id: u64,
}

impl FoundationRegistry {
    pub fn new() -> Self {
        Self { next_id: 1 }
    }

    /// Assign a foundation to `candidate`, reusing the foundation of any
    /// candidate in `existing` with the same basis. `existing` must span
    /// every local candidate the agent currently holds, across all streams.
    ///
    /// Already-assigned foundations are left alone.
    pub fn assign(&mut self, candidate: &mut Candidate, existing: &[&Candidate]) {
        if !candidate.foundation.is_empty() {
            return;
        }

        if let Some(matching) = existing
            .iter()
            .find(|c| !c.foundation.is_empty() && c.same_foundation_basis(candidate))
        {
            candidate.foundation = matching.foundation.clone();
            return;
        }

        candidate.foundation = self.fresh_id(existing);
    }

    /// Next numeric id not already used as a foundation by any existing
    /// candidate.
    fn fresh_id(&mut self, existing: &[&Candidate]) -> String {
        loop {
            let id = self.next_id.to_string();
            self.next_id += 1;
            if !existing.iter().any(|c| c.foundation == id) {
                return id;
            }
        }
    }
}

impl Default for FoundationRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Validate a foundation string: 1 to 32 chars from the ice-char set
/// (ALPHA / DIGIT / "+" / "/").
pub fn validate_foundation(foundation: &str) -> bool {
    !foundation.is_empty()
        && foundation.len() <= MAX_FOUNDATION_LENGTH
        && foundation
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '+' || c == '/')
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::candidate::TransportProtocol;

    fn host(stream: u32, addr: &str) -> Candidate {
        Candidate::new_host(stream, 1, TransportProtocol::Udp, addr.parse().unwrap())
    }

    #[test]
    fn test_same_basis_shares_foundation() {
        let mut registry = FoundationRegistry::new();

        let mut a = host(1, "192.168.1.10:1000");
        registry.assign(&mut a, &[]);

        // Same base, different component: same basis.
        let mut b = host(1, "192.168.1.10:1000");
        b.component_id = 2;
        registry.assign(&mut b, &[&a]);
        assert_eq!(a.foundation, b.foundation);

        // Different base: new foundation.
        let mut c = host(1, "192.168.1.11:1000");
        registry.assign(&mut c, &[&a, &b]);
        assert_ne!(c.foundation, a.foundation);
    }

    #[test]
    fn test_foundation_shared_across_streams() {
        let mut registry = FoundationRegistry::new();

        // Streams bind distinct ports on the same interface; the port does
        // not split the foundation.
        let mut s1 = host(1, "192.168.1.10:1000");
        registry.assign(&mut s1, &[]);
        let mut s2 = host(2, "192.168.1.10:1001");
        registry.assign(&mut s2, &[&s1]);

        assert_eq!(s1.foundation, s2.foundation);
    }

    #[test]
    fn test_server_distinguishes_reflexive_foundations() {
        let mut registry = FoundationRegistry::new();
        let base: std::net::SocketAddr = "192.168.1.10:1000".parse().unwrap();

        let mut a = Candidate::new_server_reflexive(
            1,
            1,
            TransportProtocol::Udp,
            "203.0.113.5:61000".parse().unwrap(),
            base,
            "198.51.100.1:3478".parse().unwrap(),
        );
        registry.assign(&mut a, &[]);

        let mut b = Candidate::new_server_reflexive(
            1,
            1,
            TransportProtocol::Udp,
            "203.0.113.5:61001".parse().unwrap(),
            base,
            "198.51.100.2:3478".parse().unwrap(),
        );
        registry.assign(&mut b, &[&a]);

        assert_ne!(a.foundation, b.foundation);
    }

    #[test]
    fn test_fresh_id_skips_taken_ids() {
        let mut registry = FoundationRegistry::new();

        // A remote-style candidate already using "1" as its foundation.
        let mut taken = host(1, "10.0.0.9:999");
        taken.foundation = "1".to_string();

        let mut c = host(1, "192.168.1.10:1000");
        registry.assign(&mut c, &[&taken]);
        assert_eq!(c.foundation, "2");
    }

    #[test]
    fn test_preassigned_foundation_kept() {
        let mut registry = FoundationRegistry::new();
        let mut c = host(1, "192.168.1.10:1000");
        c.foundation = "abc".to_string();
        registry.assign(&mut c, &[]);
        assert_eq!(c.foundation, "abc");
    }

    #[test]
    fn test_validate_foundation() {
        assert!(validate_foundation("1"));
        assert!(validate_foundation("aA9+/"));
        assert!(!validate_foundation(""));
        assert!(!validate_foundation(&"x".repeat(33)));
        assert!(!validate_foundation("bad space"));
    }
}
