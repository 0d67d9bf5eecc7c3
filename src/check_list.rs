// src/check_list.rs
//! Per-stream checklist: pair construction, the pair state machine, and the
//! triggered-check queue (RFC 5245 Sections 5.7, 7.2.1.4)
//!
//! Pairs live in owned per-component vectors and are addressed by
//! [`PairRef`]. Vectors only grow between rebuilds, so a `PairRef` stays
//! valid until `build` or `clear` bumps the generation.

use std::collections::{BTreeMap, VecDeque};
use std::net::SocketAddr;
use tracing::{debug, trace};

use crate::candidate::{
    can_form_pair, Candidate, CandidateKind, CandidatePair, CandidatePairState,
};
use crate::error::Rejected;
use crate::timer::TimerHandle;

/// Hard cap on pairs per component, bounding connectivity-check fan-out
pub const MAX_PAIRS_PER_COMPONENT: usize = 64;

/// Overall checklist status
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckListState {
    /// Built but not yet scheduled; all pairs Frozen
    Frozen,
    /// Checks are being scheduled
    Running,
    /// Every component has a succeeded pair and all pairs are terminal
    Completed,
    /// All pairs terminal and some component has no succeeded pair
    Failed,
}

impl CheckListState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

impl std::fmt::Display for CheckListState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Frozen => "frozen",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
        };
        write!(f, "{}", s)
    }
}

/// Stable address of one pair inside a checklist
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PairRef {
    pub component_id: u32,
    pub index: usize,
}

/// Entry on the triggered-check queue
#[derive(Debug, Clone, Copy)]
pub struct TriggeredCheck {
    pub pair: PairRef,
    /// Success of this check nominates the pair
    pub nominate: bool,
}

/// Checklist for one media stream
#[derive(Debug)]
pub struct CheckList {
    pub stream_id: u32,
    pub state: CheckListState,
    /// Bumped on every rebuild; in-flight transaction records carry the
    /// generation they were issued under and are dropped on mismatch
    pub generation: u64,
    /// Ta timer currently driving this checklist, if any
    pub timer_handle: Option<TimerHandle>,
    components: BTreeMap<u32, Vec<CandidatePair>>,
    triggered: VecDeque<TriggeredCheck>,
}

impl CheckList {
    pub fn new(stream_id: u32) -> Self {
        Self {
            stream_id,
            state: CheckListState::Frozen,
            generation: 0,
            timer_handle: None,
            components: BTreeMap::new(),
            triggered: VecDeque::new(),
        }
    }

    /// Build pairs from scratch (RFC 5245 Section 5.7.1).
    ///
    /// Only Host and Relayed locals pair; checks for reflexive locals go
    /// out from their base, which the host candidate already covers
    /// (Section 5.7.3). Existing pairs, the triggered queue, and the
    /// status are all reset; the generation advances so late callbacks
    /// against the old pairs are dropped.
    pub fn build(&mut self, locals: &[Candidate], remotes: &[Candidate], controlling: bool) {
        self.clear();

        for local in locals {
            if !matches!(local.kind, CandidateKind::Host | CandidateKind::Relayed) {
                continue;
            }
            for remote in remotes {
                if !can_form_pair(local, remote) {
                    continue;
                }
                let pair = CandidatePair::new(local.clone(), remote.clone(), controlling);
                self.components
                    .entry(local.component_id)
                    .or_default()
                    .push(pair);
            }
        }

        for (component_id, pairs) in &mut self.components {
            pairs.sort_by(|a, b| b.priority.cmp(&a.priority));
            if pairs.len() > MAX_PAIRS_PER_COMPONENT {
                debug!(
                    stream = self.stream_id,
                    component = component_id,
                    dropped = pairs.len() - MAX_PAIRS_PER_COMPONENT,
                    "pair cap reached, dropping lowest-priority pairs"
                );
                pairs.truncate(MAX_PAIRS_PER_COMPONENT);
            }
        }

        debug!(
            stream = self.stream_id,
            pairs = self.pair_count(),
            "checklist built"
        );
    }

    /// Drop all pairs and queued triggers, reset the status to Frozen, and
    /// advance the generation.
    pub fn clear(&mut self) {
        self.components.clear();
        self.triggered.clear();
        self.state = CheckListState::Frozen;
        self.generation += 1;
    }

    /// Seed initial Waiting pairs (RFC 5245 Section 5.7.4): group pairs by
    /// foundation; in each group the pair with the lowest component id
    /// (ties broken by highest local priority) becomes Waiting. Marks the
    /// list Running.
    pub fn init(&mut self) {
        let mut seeds: BTreeMap<String, PairRef> = BTreeMap::new();

        for (&component_id, pairs) in &self.components {
            for (index, pair) in pairs.iter().enumerate() {
                let candidate_ref = PairRef { component_id, index };
                match seeds.get(&pair.foundation) {
                    None => {
                        seeds.insert(pair.foundation.clone(), candidate_ref);
                    }
                    Some(&current) => {
                        let cur = &self[current];
                        let better = component_id < cur.local.component_id
                            || (component_id == cur.local.component_id
                                && pair.local.priority > cur.local.priority);
                        if better {
                            seeds.insert(pair.foundation.clone(), candidate_ref);
                        }
                    }
                }
            }
        }

        for pair_ref in seeds.values() {
            self.set_state(*pair_ref, CandidatePairState::Waiting);
        }
        self.state = CheckListState::Running;
    }

    /// Cross-stream unfreeze: every Frozen pair whose foundation equals
    /// `foundation` becomes Waiting. Returns how many pairs moved.
    pub fn unfreeze_foundation(&mut self, foundation: &str) -> usize {
        let mut moved = Vec::new();
        for (&component_id, pairs) in &self.components {
            for (index, pair) in pairs.iter().enumerate() {
                if pair.state == CandidatePairState::Frozen && pair.foundation == foundation {
                    moved.push(PairRef { component_id, index });
                }
            }
        }
        for pair_ref in &moved {
            self.set_state(*pair_ref, CandidatePairState::Waiting);
        }
        moved.len()
    }

    /// Transition one pair, logging the edge
    pub fn set_state(&mut self, pair_ref: PairRef, state: CandidatePairState) {
        let stream_id = self.stream_id;
        if let Some(pair) = self.pair_mut(pair_ref) {
            if pair.state == state {
                return;
            }
            debug!(
                stream = stream_id,
                pair = %pair.id(),
                from = %pair.state,
                to = %state,
                "pair transition"
            );
            pair.state = state;
            if state == CandidatePairState::Succeeded {
                pair.valid = true;
            }
        }
    }

    /// Append one pair outside a rebuild (trickled or peer-reflexive
    /// remotes). Keeps Frozen state; the scheduler or a triggered check
    /// picks it up.
    pub fn insert_pair(&mut self, pair: CandidatePair) -> Result<PairRef, Rejected> {
        let component_id = pair.local.component_id;
        let pairs = self.components.entry(component_id).or_default();
        if pairs.len() >= MAX_PAIRS_PER_COMPONENT {
            return Err(Rejected::PairCapacity);
        }
        trace!(stream = self.stream_id, pair = %pair.id(), "pair inserted");
        pairs.push(pair);
        Ok(PairRef {
            component_id,
            index: pairs.len() - 1,
        })
    }

    /// Queue a triggered check, deduplicating by pair. A repeat enqueue
    /// only upgrades the nominate flag.
    pub fn add_triggered(&mut self, pair: PairRef, nominate: bool) {
        if let Some(existing) = self.triggered.iter_mut().find(|t| t.pair == pair) {
            existing.nominate |= nominate;
            return;
        }
        trace!(stream = self.stream_id, ?pair, nominate, "triggered check queued");
        self.triggered.push_back(TriggeredCheck { pair, nominate });
    }

    pub fn pop_triggered(&mut self) -> Option<TriggeredCheck> {
        self.triggered.pop_front()
    }

    pub fn has_triggered(&self) -> bool {
        !self.triggered.is_empty()
    }

    /// Highest-pair-priority Waiting pair across all components
    pub fn next_waiting(&self) -> Option<PairRef> {
        self.best_in_state(CandidatePairState::Waiting)
    }

    /// Highest-pair-priority Frozen pair across all components
    pub fn next_frozen(&self) -> Option<PairRef> {
        self.best_in_state(CandidatePairState::Frozen)
    }

    fn best_in_state(&self, state: CandidatePairState) -> Option<PairRef> {
        let mut best: Option<(u64, PairRef)> = None;
        for (&component_id, pairs) in &self.components {
            for (index, pair) in pairs.iter().enumerate() {
                if pair.state != state {
                    continue;
                }
                if best.map_or(true, |(p, _)| pair.priority > p) {
                    best = Some((pair.priority, PairRef { component_id, index }));
                }
            }
        }
        best.map(|(_, r)| r)
    }

    /// Find the pair matching a (local, remote) address tuple in one
    /// component
    pub fn find_pair(
        &self,
        component_id: u32,
        local: SocketAddr,
        remote: SocketAddr,
    ) -> Option<PairRef> {
        let pairs = self.components.get(&component_id)?;
        pairs
            .iter()
            .position(|p| p.addresses_match(local, remote))
            .map(|index| PairRef { component_id, index })
    }

    pub fn pair(&self, pair_ref: PairRef) -> Option<&CandidatePair> {
        self.components
            .get(&pair_ref.component_id)
            .and_then(|pairs| pairs.get(pair_ref.index))
    }

    pub fn pair_mut(&mut self, pair_ref: PairRef) -> Option<&mut CandidatePair> {
        self.components
            .get_mut(&pair_ref.component_id)
            .and_then(|pairs| pairs.get_mut(pair_ref.index))
    }

    /// Iterate every pair with its reference
    pub fn pairs(&self) -> impl Iterator<Item = (PairRef, &CandidatePair)> {
        self.components.iter().flat_map(|(&component_id, pairs)| {
            pairs
                .iter()
                .enumerate()
                .map(move |(index, pair)| (PairRef { component_id, index }, pair))
        })
    }

    pub fn pair_count(&self) -> usize {
        self.components.values().map(|p| p.len()).sum()
    }

    pub fn component_pair_count(&self, component_id: u32) -> usize {
        self.components.get(&component_id).map_or(0, |p| p.len())
    }

    /// Recompute every pair priority after a role switch. Pair states are
    /// untouched.
    pub fn recompute_priorities(&mut self, controlling: bool) {
        for pairs in self.components.values_mut() {
            for pair in pairs {
                pair.recompute_priority(controlling);
            }
        }
    }

    /// Evaluate the completion rule: Completed once every pair in every
    /// component is terminal with at least one Succeeded pair per
    /// component; Failed when all terminal and some component has none.
    /// Returns None while checks remain or the list is empty.
    pub fn evaluate_completion(&self) -> Option<CheckListState> {
        if self.components.values().all(|p| p.is_empty()) {
            return None;
        }

        let mut all_succeeded = true;
        for pairs in self.components.values() {
            if pairs.is_empty() {
                continue;
            }
            if pairs.iter().any(|p| !p.state.is_terminal()) {
                return None;
            }
            if !pairs.iter().any(|p| p.state == CandidatePairState::Succeeded) {
                all_succeeded = false;
            }
        }

        Some(if all_succeeded {
            CheckListState::Completed
        } else {
            CheckListState::Failed
        })
    }

    /// Highest-priority Succeeded pair per component, for the nomination
    /// decision pass
    pub fn best_succeeded(&self, component_id: u32) -> Option<PairRef> {
        let pairs = self.components.get(&component_id)?;
        pairs
            .iter()
            .enumerate()
            .filter(|(_, p)| p.state == CandidatePairState::Succeeded)
            .max_by_key(|(_, p)| p.priority)
            .map(|(index, _)| PairRef { component_id, index })
    }

    /// Component ids that currently have pairs
    pub fn component_ids(&self) -> Vec<u32> {
        self.components
            .iter()
            .filter(|(_, p)| !p.is_empty())
            .map(|(&id, _)| id)
            .collect()
    }
}

impl std::ops::Index<PairRef> for CheckList {
    type Output = CandidatePair;

    fn index(&self, pair_ref: PairRef) -> &CandidatePair {
        &self.components[&pair_ref.component_id][pair_ref.index]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::candidate::TransportProtocol;

    fn local(component: u32, addr: &str, foundation: &str) -> Candidate {
        let mut c =
            Candidate::new_host(1, component, TransportProtocol::Udp, addr.parse().unwrap());
        c.foundation = foundation.to_string();
        c
    }

    fn remote(component: u32, addr: &str) -> Candidate {
        let mut c =
            Candidate::new_host(1, component, TransportProtocol::Udp, addr.parse().unwrap());
        c.foundation = "r".to_string();
        c
    }

    fn one_pair_list() -> CheckList {
        let mut list = CheckList::new(1);
        list.build(
            &[local(1, "192.168.1.10:1000", "1")],
            &[remote(1, "192.168.1.20:2000")],
            true,
        );
        list
    }

    #[test]
    fn test_build_prunes_server_reflexive_locals() {
        let host = local(1, "192.168.1.10:1000", "1");
        let mut srflx = Candidate::new_server_reflexive(
            1,
            1,
            TransportProtocol::Udp,
            "203.0.113.5:61000".parse().unwrap(),
            host.addr,
            "198.51.100.1:3478".parse().unwrap(),
        );
        srflx.foundation = "2".to_string();

        let mut list = CheckList::new(1);
        list.build(&[host, srflx], &[remote(1, "192.168.1.20:2000")], true);

        assert_eq!(list.pair_count(), 1);
        assert!(list
            .pairs()
            .all(|(_, p)| p.local.kind != CandidateKind::ServerReflexive));
    }

    #[test]
    fn test_build_respects_cap() {
        let locals: Vec<Candidate> = (0..10)
            .map(|i| local(1, &format!("192.168.1.10:{}", 1000 + i), "1"))
            .collect();
        let remotes: Vec<Candidate> = (0..10)
            .map(|i| remote(1, &format!("192.168.1.20:{}", 2000 + i)))
            .collect();

        let mut list = CheckList::new(1);
        list.build(&locals, &remotes, true);
        assert_eq!(list.component_pair_count(1), MAX_PAIRS_PER_COMPONENT);
    }

    #[test]
    fn test_build_sorts_by_pair_priority() {
        let mut list = CheckList::new(1);
        let mut relay = Candidate::new_relayed(
            1,
            1,
            TransportProtocol::Udp,
            "198.51.100.1:49152".parse().unwrap(),
            "198.51.100.1:3478".parse().unwrap(),
        );
        relay.foundation = "2".to_string();
        list.build(
            &[relay, local(1, "192.168.1.10:1000", "1")],
            &[remote(1, "192.168.1.20:2000")],
            true,
        );

        let priorities: Vec<u64> = list.pairs().map(|(_, p)| p.priority).collect();
        assert_eq!(priorities.len(), 2);
        assert!(priorities[0] >= priorities[1]);
    }

    #[test]
    fn test_init_partitions_foundation_groups() {
        // One foundation spanning two components plus a second foundation.
        let locals = vec![
            local(1, "192.168.1.10:1000", "1"),
            local(2, "192.168.1.10:1001", "1"),
            local(1, "10.0.0.10:1000", "2"),
        ];
        let remotes = vec![
            remote(1, "192.168.1.20:2000"),
            remote(2, "192.168.1.20:2001"),
        ];

        let mut list = CheckList::new(1);
        list.build(&locals, &remotes, true);
        list.init();

        assert_eq!(list.state, CheckListState::Running);

        let mut by_foundation: BTreeMap<String, Vec<&CandidatePair>> = BTreeMap::new();
        for (_, pair) in list.pairs() {
            by_foundation.entry(pair.foundation.clone()).or_default().push(pair);
        }
        for (foundation, pairs) in by_foundation {
            let waiting: Vec<_> = pairs
                .iter()
                .filter(|p| p.state == CandidatePairState::Waiting)
                .collect();
            assert_eq!(waiting.len(), 1, "foundation {}", foundation);
            let min_component = pairs.iter().map(|p| p.local.component_id).min().unwrap();
            assert_eq!(waiting[0].local.component_id, min_component);
        }
    }

    #[test]
    fn test_init_tie_breaks_by_local_priority() {
        // Same component and foundation, one local outranks the other by
        // type preference after both bases collapse to the host.
        let strong = local(1, "192.168.1.10:1000", "1");
        let mut weak = Candidate::new_relayed(
            1,
            1,
            TransportProtocol::Udp,
            "198.51.100.1:49152".parse().unwrap(),
            "198.51.100.1:3478".parse().unwrap(),
        );
        weak.foundation = "1".to_string();

        let mut list = CheckList::new(1);
        list.build(&[weak, strong.clone()], &[remote(1, "192.168.1.20:2000")], true);
        list.init();

        let waiting: Vec<_> = list
            .pairs()
            .filter(|(_, p)| p.state == CandidatePairState::Waiting)
            .collect();
        assert_eq!(waiting.len(), 1);
        assert_eq!(waiting[0].1.local.addr, strong.addr);
    }

    #[test]
    fn test_unfreeze_foundation() {
        let mut list = one_pair_list();
        assert_eq!(list.unfreeze_foundation("1:r"), 1);
        assert_eq!(list.unfreeze_foundation("1:r"), 0);
        assert_eq!(list.unfreeze_foundation("other"), 0);
        let (_, pair) = list.pairs().next().unwrap();
        assert_eq!(pair.state, CandidatePairState::Waiting);
    }

    #[test]
    fn test_selection_order_and_lookup() {
        let mut list = one_pair_list();
        assert!(list.next_waiting().is_none());
        let frozen = list.next_frozen().unwrap();
        list.set_state(frozen, CandidatePairState::Waiting);
        assert_eq!(list.next_waiting(), Some(frozen));

        let found = list
            .find_pair(
                1,
                "192.168.1.10:1000".parse().unwrap(),
                "192.168.1.20:2000".parse().unwrap(),
            )
            .unwrap();
        assert_eq!(found, frozen);
    }

    #[test]
    fn test_triggered_queue_fifo_and_dedup() {
        let mut list = one_pair_list();
        let pair_ref = list.pairs().next().unwrap().0;

        list.add_triggered(pair_ref, false);
        list.add_triggered(pair_ref, true);
        let first = list.pop_triggered().unwrap();
        assert!(first.nominate, "dedup should upgrade the nominate flag");
        assert!(list.pop_triggered().is_none());
    }

    #[test]
    fn test_completion_rules() {
        let mut list = CheckList::new(1);
        assert_eq!(list.evaluate_completion(), None);

        list.build(
            &[local(1, "192.168.1.10:1000", "1"), local(2, "192.168.1.10:1001", "1")],
            &[remote(1, "192.168.1.20:2000"), remote(2, "192.168.1.20:2001")],
            true,
        );
        assert_eq!(list.evaluate_completion(), None);

        let refs: Vec<PairRef> = list.pairs().map(|(r, _)| r).collect();
        list.set_state(refs[0], CandidatePairState::Succeeded);
        assert_eq!(list.evaluate_completion(), None);

        list.set_state(refs[1], CandidatePairState::Failed);
        assert_eq!(list.evaluate_completion(), Some(CheckListState::Failed));

        list.set_state(refs[1], CandidatePairState::Succeeded);
        assert_eq!(list.evaluate_completion(), Some(CheckListState::Completed));
    }

    #[test]
    fn test_rebuild_clears_and_bumps_generation(){
        let mut list = one_pair_list();
        let pair_ref = list.pairs().next().unwrap().0;
        list.add_triggered(pair_ref, false);
        let generation = list.generation;

        list.build(&[], &[], true);
        assert_eq!(list.pair_count(), 0);
        assert!(!list.has_triggered());
        assert_eq!(list.state, CheckListState::Frozen);
        assert_eq!(list.generation, generation + 1);
    }

    #[test]
    fn test_insert_pair_cap() {
        let mut list = CheckList::new(1);
        for i in 0..MAX_PAIRS_PER_COMPONENT {
            let l = local(1, &format!("192.168.1.10:{}", 1000 + i), "1");
            let r = remote(1, &format!("192.168.1.20:{}", 2000 + i));
            list.insert_pair(CandidatePair::new(l, r, true)).unwrap();
        }
        let l = local(1, "192.168.1.10:9999", "1");
        let r = remote(1, "192.168.1.20:9999");
        assert_eq!(
            list.insert_pair(CandidatePair::new(l, r, true)),
            Err(Rejected::PairCapacity)
        );
    }

    #[test]
    fn test_best_succeeded() {
        let mut list = one_pair_list();
        assert!(list.best_succeeded(1).is_none());
        let pair_ref = list.pairs().next().unwrap().0;
        list.set_state(pair_ref, CandidatePairState::Succeeded);
        assert_eq!(list.best_succeeded(1), Some(pair_ref));
    }
}
