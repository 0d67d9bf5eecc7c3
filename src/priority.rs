// src/priority.rs
//! ICE priority arithmetic (RFC 5245 Section 4.1.2)
//!
//! Candidate priority is a fixed-point composition of type preference,
//! local preference, and component id. Pair priority (Section 5.7.2) combines
//! the two agents' candidate priorities symmetrically so both sides order
//! their checklists identically.

use crate::candidate::CandidateKind;
use std::net::IpAddr;

/// Type preferences as recommended by RFC 5245
pub const TYPE_PREFERENCE_HOST: u32 = 126;
pub const TYPE_PREFERENCE_PRFLX: u32 = 110;
pub const TYPE_PREFERENCE_SRFLX: u32 = 100;
pub const TYPE_PREFERENCE_RELAY: u32 = 0;

/// Bounds for validation
pub const MAX_TYPE_PREFERENCE: u32 = 126;
pub const MAX_LOCAL_PREFERENCE: u32 = 65535;
pub const MIN_COMPONENT_ID: u32 = 1;
pub const MAX_COMPONENT_ID: u32 = 256;

/// Local preference bands. IPv6 paths are preferred over IPv4 and
/// VPN-sourced interfaces are demoted to the floor.
pub const LOCAL_PREFERENCE_IPV6: u32 = 65535;
pub const LOCAL_PREFERENCE_IPV4: u32 = 32767;
pub const LOCAL_PREFERENCE_VPN: u32 = 0;

/// Calculate candidate priority per RFC 5245 Section 4.1.2.1
///
/// priority = (2^24)*(type preference) +
///            (2^8)*(local preference) +
///            (2^0)*(256 - component ID)
pub fn calculate_priority(kind: CandidateKind, local_preference: u32, component_id: u32) -> u32 {
    let type_pref = get_type_preference(kind).min(MAX_TYPE_PREFERENCE);
    let local_pref = local_preference.min(MAX_LOCAL_PREFERENCE);
    let component = component_id.clamp(MIN_COMPONENT_ID, MAX_COMPONENT_ID);
    let component_preference = 256 - component;

    // Assemble in u64 so the shifts cannot overflow, then narrow.
    let priority = ((type_pref as u64) << 24) + ((local_pref as u64) << 8) + component_preference as u64;
    priority.min(u32::MAX as u64) as u32
}

/// Get type preference for a candidate type.
///
/// Relayed is the explicit floor; anything that cannot be classified better
/// belongs there.
pub fn get_type_preference(kind: CandidateKind) -> u32 {
    match kind {
        CandidateKind::Host => TYPE_PREFERENCE_HOST,
        CandidateKind::PeerReflexive => TYPE_PREFERENCE_PRFLX,
        CandidateKind::ServerReflexive => TYPE_PREFERENCE_SRFLX,
        CandidateKind::Relayed => TYPE_PREFERENCE_RELAY,
    }
}

/// Derive the local preference for a base address.
///
/// VPN-sourced interfaces always land at 0 regardless of family; otherwise
/// IPv6 outranks IPv4.
pub fn local_preference_for(base_ip: &IpAddr, vpn: bool) -> u32 {
    if vpn {
        return LOCAL_PREFERENCE_VPN;
    }
    match base_ip {
        IpAddr::V6(_) => LOCAL_PREFERENCE_IPV6,
        IpAddr::V4(_) => LOCAL_PREFERENCE_IPV4,
    }
}

/// Calculate pair priority per RFC 5245 Section 5.7.2
///
/// pair priority = 2^32*MIN(G,D) + 2*MAX(G,D) + (G>D ? 1 : 0)
/// where G is the controlling agent's candidate priority and D the
/// controlled agent's.
pub fn calculate_pair_priority(controlling: bool, local_priority: u32, remote_priority: u32) -> u64 {
    let (g, d) = if controlling {
        (local_priority as u64, remote_priority as u64)
    } else {
        (remote_priority as u64, local_priority as u64)
    };

    (g.min(d) << 32) + (g.max(d) << 1) + if g > d { 1 } else { 0 }
}

/// Priority for a peer-reflexive candidate synthesized during connectivity
/// checks when the inbound request carried no PRIORITY attribute.
pub fn calculate_prflx_priority(component_id: u32, family: &IpAddr) -> u32 {
    calculate_priority(
        CandidateKind::PeerReflexive,
        local_preference_for(family, false),
        component_id,
    )
}

/// Split a priority back into (type preference, local preference,
/// component preference). Used by diagnostics and tests.
pub fn decompose_priority(priority: u32) -> (u32, u32, u32) {
    let type_pref = priority >> 24;
    let local_pref = (priority >> 8) & 0xFFFF;
    let component_pref = priority & 0xFF;
    (type_pref, local_pref, component_pref)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::{Ipv4Addr, Ipv6Addr};

    #[test]
    fn test_host_priority_component_one() {
        let v4: IpAddr = Ipv4Addr::new(192, 168, 1, 10).into();
        let priority = calculate_priority(CandidateKind::Host, local_preference_for(&v4, false), 1);
        assert_eq!(priority, (126u32 << 24) + (LOCAL_PREFERENCE_IPV4 << 8) + 255);
    }

    #[test]
    fn test_ipv6_outranks_ipv4_same_type_and_component() {
        let v4: IpAddr = Ipv4Addr::new(10, 0, 0, 1).into();
        let v6: IpAddr = Ipv6Addr::new(0x2001, 0xdb8, 0, 0, 0, 0, 0, 1).into();
        for kind in [
            CandidateKind::Host,
            CandidateKind::ServerReflexive,
            CandidateKind::PeerReflexive,
            CandidateKind::Relayed,
        ] {
            let p4 = calculate_priority(kind, local_preference_for(&v4, false), 1);
            let p6 = calculate_priority(kind, local_preference_for(&v6, false), 1);
            assert!(p6 > p4, "{:?}: {} should outrank {}", kind, p6, p4);
        }
    }

    #[test]
    fn test_vpn_floor() {
        let v6: IpAddr = Ipv6Addr::LOCALHOST.into();
        assert_eq!(local_preference_for(&v6, true), 0);
        let priority = calculate_priority(CandidateKind::Host, local_preference_for(&v6, true), 1);
        let (_, local_pref, _) = decompose_priority(priority);
        assert_eq!(local_pref, 0);
    }

    #[test]
    fn test_type_preference_ordering() {
        assert!(TYPE_PREFERENCE_HOST > TYPE_PREFERENCE_PRFLX);
        assert!(TYPE_PREFERENCE_PRFLX > TYPE_PREFERENCE_SRFLX);
        assert!(TYPE_PREFERENCE_SRFLX > TYPE_PREFERENCE_RELAY);
        assert_eq!(get_type_preference(CandidateKind::Relayed), 0);
    }

    #[test]
    fn test_component_affects_priority() {
        let v4: IpAddr = Ipv4Addr::new(10, 0, 0, 1).into();
        let lp = local_preference_for(&v4, false);
        let c1 = calculate_priority(CandidateKind::Host, lp, 1);
        let c2 = calculate_priority(CandidateKind::Host, lp, 2);
        assert_eq!(c1 - c2, 1);
    }

    #[test]
    fn test_pair_priority_symmetric_between_roles() {
        // Both agents must compute the same pair priority from opposite
        // viewpoints.
        let g = 0x7E00_01FFu32;
        let d = 0x6400_01FFu32;
        let from_controlling = calculate_pair_priority(true, g, d);
        let from_controlled = calculate_pair_priority(false, d, g);
        assert_eq!(from_controlling, from_controlled);
    }

    #[test]
    fn test_pair_priority_tie_bit() {
        let with_g_larger = calculate_pair_priority(true, 200, 100);
        let with_d_larger = calculate_pair_priority(true, 100, 200);
        assert_eq!(with_g_larger & 1, 1);
        assert_eq!(with_d_larger & 1, 0);
        assert_eq!(with_g_larger >> 1, with_d_larger >> 1);
    }

    #[test]
    fn test_prflx_priority_uses_prflx_type() {
        let v4: IpAddr = Ipv4Addr::new(203, 0, 113, 7).into();
        let priority = calculate_prflx_priority(1, &v4);
        let (type_pref, _, component_pref) = decompose_priority(priority);
        assert_eq!(type_pref, TYPE_PREFERENCE_PRFLX);
        assert_eq!(component_pref, 255);
    }

    #[test]
    fn test_decompose_roundtrip() {
        let priority = calculate_priority(CandidateKind::ServerReflexive, 4242, 7);
        let (t, l, c) = decompose_priority(priority);
        assert_eq!(t, TYPE_PREFERENCE_SRFLX);
        assert_eq!(l, 4242);
        assert_eq!(c, 256 - 7);
    }
}
