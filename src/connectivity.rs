// src/connectivity.rs
//! Connectivity check engine (RFC 5245 Sections 7 and 8): the scheduler
//! tick, outbound check transactions, inbound check processing, nomination,
//! and checklist completion.
//!
//! Everything here runs synchronously inside an agent entry point. Ordering
//! discipline for a succeeded pair: conclude the pair's own checklist first,
//! then unfreeze siblings, then evaluate the overall connected callback.

use std::net::SocketAddr;

use tracing::{debug, info, trace, warn};

use crate::agent::{IceAgent, IceRole, NominationMode, PendingCheck, PendingGather, ValidPair};
use crate::candidate::{
    can_form_pair, Candidate, CandidateKind, CandidatePair, CandidatePairState, TransportProtocol,
};
use crate::check_list::{CheckListState, PairRef};
use crate::error::ConflictAction;
use crate::priority;
use crate::stun::{
    InboundCheck, OutboundCheck, OutboundResponse, RequestKind, RoleAttribute, StunCredentials,
    StunOutcome, TransactionId, ROLE_CONFLICT,
};
use crate::timer::{TimerFire, TimerKey};

impl IceAgent {
    /// Timer fire for one checklist. Fires from timers the agent has
    /// already stopped carry a stale handle and are dropped.
    pub fn handle_timeout(&mut self, fire: TimerFire) {
        let TimerKey::Checklist { stream_id } = fire.key;
        let current = self
            .streams
            .get(&stream_id)
            .and_then(|s| s.check_list.timer_handle);
        if current != Some(fire.handle) {
            trace!(stream = stream_id, handle = fire.handle, "stale timer fire dropped");
            return;
        }
        self.tick(stream_id);
    }

    /// One scheduler tick (RFC 5245 Section 5.8): triggered queue first,
    /// then the highest-priority Waiting pair, then the highest-priority
    /// Frozen pair. With nothing selectable the timer stops until an
    /// external event restarts it.
    pub(crate) fn tick(&mut self, stream_id: u32) {
        let (state, has_credentials) = match self.streams.get(&stream_id) {
            Some(s) => (s.check_list.state, s.remote_credentials.is_some()),
            None => return,
        };

        if !has_credentials {
            debug!(stream = stream_id, "no remote credentials, parking checklist");
            self.stop_checklist_timer(stream_id);
            return;
        }

        // A concluded checklist only serves nomination re-checks left on
        // the triggered queue; pair states must not change any more.
        if state.is_terminal() {
            loop {
                let entry = self
                    .streams
                    .get_mut(&stream_id)
                    .and_then(|s| s.check_list.pop_triggered());
                let Some(t) = entry else {
                    self.stop_checklist_timer(stream_id);
                    return;
                };
                let succeeded = self
                    .streams
                    .get(&stream_id)
                    .and_then(|s| s.check_list.pair(t.pair))
                    .map_or(false, |p| p.state == CandidatePairState::Succeeded);
                if succeeded && self.send_pair_check(stream_id, t.pair, t.nominate) {
                    self.stats.triggered_checks += 1;
                    return;
                }
                debug!(stream = stream_id, pair = ?t.pair, "triggered entry dropped on concluded checklist");
            }
        }

        // 1. Triggered queue front.
        if let Some(t) = self
            .streams
            .get_mut(&stream_id)
            .and_then(|s| s.check_list.pop_triggered())
        {
            if self.send_pair_check(stream_id, t.pair, t.nominate) {
                self.stats.triggered_checks += 1;
                return;
            }
        }

        // 2. Highest-priority Waiting pair, else 3. highest-priority Frozen
        // pair, which also advances the foundation grouping.
        let next = match self.streams.get(&stream_id) {
            Some(s) => s.check_list.next_waiting().or_else(|| s.check_list.next_frozen()),
            None => return,
        };
        match next {
            Some(pair_ref) => {
                let nominate = self.config.nomination == NominationMode::Aggressive
                    && self.role == IceRole::Controlling;
                self.send_pair_check(stream_id, pair_ref, nominate);
            }
            None => {
                // 4. Nothing checkable until an unfreeze or trigger.
                debug!(stream = stream_id, "no checkable pair, parking checklist");
                self.stop_checklist_timer(stream_id);
            }
        }
    }

    /// Issue one connectivity check for a pair. `nominate` marks the
    /// transaction so its success nominates the pair; on the controlling
    /// side it also attaches USE-CANDIDATE. Returns whether a check went
    /// out.
    fn send_pair_check(&mut self, stream_id: u32, pair_ref: PairRef, nominate: bool) -> bool {
        let controlling = self.role == IceRole::Controlling;
        let use_candidate = controlling && nominate;

        let built = {
            let Some(stream) = self.streams.get_mut(&stream_id) else {
                return false;
            };
            let Some(credentials) = stream.remote_credentials.clone() else {
                return false;
            };
            let generation = stream.check_list.generation;
            let Some(pair) = stream.check_list.pair_mut(pair_ref) else {
                return false;
            };

            pair.checks_sent += 1;
            if use_candidate {
                pair.use_candidate = true;
            }
            trace!(
                stream = stream_id,
                pair = %pair.id(),
                nominate,
                use_candidate,
                "sending connectivity check"
            );

            let check = OutboundCheck {
                local: pair.local.base,
                remote: pair.remote.addr,
                relay: if pair.local.kind == CandidateKind::Relayed {
                    pair.local.server
                } else {
                    None
                },
                credentials: StunCredentials::ShortTerm {
                    username: format!("{}:{}", credentials.ufrag, self.local_ufrag),
                    password: credentials.password,
                },
                priority: pair.local.priority,
                role: if controlling {
                    RoleAttribute::Controlling(self.tie_breaker)
                } else {
                    RoleAttribute::Controlled(self.tie_breaker)
                },
                use_candidate,
            };
            (check, generation, pair.state == CandidatePairState::Succeeded)
        };
        let (check, generation, was_succeeded) = built;

        match self.stun.send_check(check) {
            Ok(id) => {
                // A nomination re-check leaves Succeeded alone; everything
                // else is now in flight.
                if !was_succeeded {
                    if let Some(stream) = self.streams.get_mut(&stream_id) {
                        stream
                            .check_list
                            .set_state(pair_ref, CandidatePairState::InProgress);
                    }
                }
                self.pending_checks.insert(
                    id,
                    PendingCheck {
                        stream_id,
                        pair: pair_ref,
                        generation,
                        nominate,
                        claimed_controlling: controlling,
                    },
                );
                self.stats.checks_sent += 1;
                true
            }
            Err(e) => {
                warn!(stream = stream_id, error = %e, "stun subsystem refused check");
                if !was_succeeded {
                    if let Some(stream) = self.streams.get_mut(&stream_id) {
                        stream
                            .check_list
                            .set_state(pair_ref, CandidatePairState::Failed);
                    }
                    self.stats.checks_failed += 1;
                    self.conclude_check_list(stream_id);
                    self.check_connected();
                }
                false
            }
        }
    }

    /// Terminal outcome of an outbound transaction, delivered by the STUN
    /// subsystem. Unknown transaction ids are late callbacks and drop.
    pub fn handle_stun_outcome(&mut self, id: TransactionId, outcome: StunOutcome) {
        if let Some(pending) = self.pending_checks.remove(&id) {
            self.handle_check_outcome(pending, outcome);
        } else if let Some(pending) = self.pending_gathers.remove(&id) {
            self.handle_gather_outcome(pending, outcome);
        } else {
            debug!(%id, "outcome for unknown transaction dropped");
        }
    }

    fn handle_check_outcome(&mut self, pending: PendingCheck, outcome: StunOutcome) {
        let PendingCheck { stream_id, pair: pair_ref, generation, nominate, .. } = pending;

        let fresh = self
            .streams
            .get(&stream_id)
            .map_or(false, |s| s.check_list.generation == generation);
        if !fresh {
            debug!(stream = stream_id, "check outcome against stale generation dropped");
            return;
        }

        if !outcome.timed_out {
            self.stats.responses_received += 1;
        }

        if outcome.code == ROLE_CONFLICT {
            self.handle_role_conflict_response(pending);
            return;
        }

        let Some((list_state, pair_state, local_addr, foundation)) =
            self.streams.get(&stream_id).and_then(|s| {
                let list_state = s.check_list.state;
                s.check_list.pair(pair_ref).map(|p| {
                    (list_state, p.state, p.local.addr, p.foundation.clone())
                })
            })
        else {
            return;
        };

        // After a checklist concludes only nomination re-checks on
        // Succeeded pairs remain interesting.
        if list_state.is_terminal() && pair_state != CandidatePairState::Succeeded {
            debug!(stream = stream_id, "check outcome after checklist conclusion dropped");
            return;
        }

        let mapped_ok = outcome.mapped == Some(local_addr);
        if outcome.is_success() && mapped_ok {
            if pair_state == CandidatePairState::Succeeded {
                // Redundant validation of an already-valid pair.
                if nominate {
                    self.nominate_pair(stream_id, pair_ref);
                }
                return;
            }

            if let Some(stream) = self.streams.get_mut(&stream_id) {
                stream
                    .check_list
                    .set_state(pair_ref, CandidatePairState::Succeeded);
            }
            self.record_valid_pair(stream_id, pair_ref);
            if nominate {
                self.nominate_pair(stream_id, pair_ref);
            }

            self.conclude_check_list(stream_id);
            self.unfreeze_siblings(stream_id, &foundation);
            self.check_connected();
        } else {
            if pair_state == CandidatePairState::Succeeded {
                debug!(stream = stream_id, "nomination re-check failed, pair stays succeeded");
                return;
            }
            if outcome.is_success() && !mapped_ok {
                debug!(
                    stream = stream_id,
                    mapped = ?outcome.mapped,
                    expected = %local_addr,
                    "mapped address mismatch, failing pair"
                );
            } else {
                debug!(
                    stream = stream_id,
                    code = outcome.code,
                    timed_out = outcome.timed_out,
                    "connectivity check failed"
                );
            }
            if let Some(stream) = self.streams.get_mut(&stream_id) {
                stream
                    .check_list
                    .set_state(pair_ref, CandidatePairState::Failed);
            }
            self.stats.checks_failed += 1;
            self.conclude_check_list(stream_id);
            self.check_connected();
        }
    }

    /// 487 error response: the peer won the tie-break and kept the role we
    /// claimed. Adopt the opposite role (unless a conflict already switched
    /// it) and repeat the check through the triggered queue
    /// (RFC 5245 Section 7.1.3.1).
    fn handle_role_conflict_response(&mut self, pending: PendingCheck) {
        let PendingCheck { stream_id, pair: pair_ref, nominate, claimed_controlling, .. } = pending;
        self.stats.role_conflicts += 1;

        let currently_controlling = self.role == IceRole::Controlling;
        if currently_controlling == claimed_controlling {
            self.switch_role(self.role.opposite());
        } else {
            debug!(stream = stream_id, "role already switched, conflict response is stale");
        }

        let in_progress = self
            .streams
            .get(&stream_id)
            .and_then(|s| s.check_list.pair(pair_ref))
            .map_or(false, |p| p.state == CandidatePairState::InProgress);
        if in_progress {
            if let Some(stream) = self.streams.get_mut(&stream_id) {
                stream
                    .check_list
                    .set_state(pair_ref, CandidatePairState::Waiting);
                stream.check_list.add_triggered(pair_ref, nominate);
            }
            self.ensure_timer(stream_id);
        }
    }

    fn handle_gather_outcome(&mut self, pending: PendingGather, outcome: StunOutcome) {
        if outcome.is_success() {
            match pending.kind {
                RequestKind::Binding => {
                    self.adopt_reflexive(&pending, outcome.mapped);
                }
                RequestKind::Allocate => {
                    if let Some(relay) = outcome.relay {
                        let candidate = Candidate::new_relayed(
                            pending.stream_id,
                            pending.component_id,
                            pending.transport,
                            relay,
                            pending.server,
                        );
                        if let Err(e) = self.add_local_candidate(candidate) {
                            debug!(
                                stream = pending.stream_id,
                                error = %e,
                                "gathered relayed candidate rejected"
                            );
                        }
                    }
                    // Allocate responses reflect the mapped address too.
                    self.adopt_reflexive(&pending, outcome.mapped);
                }
                RequestKind::Refresh => {}
            }
        }

        let Some(batch) = self.gather_batch.as_mut() else {
            return;
        };
        if !outcome.is_success() {
            let code = if outcome.timed_out { 408 } else { outcome.code };
            debug!(
                stream = pending.stream_id,
                base = %pending.base,
                code,
                "gather request failed"
            );
            batch.first_error.get_or_insert(code);
        }
        batch.outstanding = batch.outstanding.saturating_sub(1);
        if batch.outstanding > 0 {
            return;
        }
        if let Some(mut batch) = self.gather_batch.take() {
            let code = batch.first_error.unwrap_or(0);
            info!(code, "gathering complete");
            if let Some(on_done) = batch.on_done.take() {
                on_done(code);
            }
        }
    }

    /// Store a server-reflexive candidate for a gathered mapping, unless
    /// the mapping equals the base (no NAT in the path).
    fn adopt_reflexive(&mut self, pending: &PendingGather, mapped: Option<SocketAddr>) {
        let Some(mapped) = mapped else { return };
        if mapped == pending.base {
            trace!(base = %pending.base, "mapped address equals base, no reflexive candidate");
            return;
        }
        let candidate = Candidate::new_server_reflexive(
            pending.stream_id,
            pending.component_id,
            pending.transport,
            mapped,
            pending.base,
            pending.server,
        );
        if let Err(e) = self.add_local_candidate(candidate) {
            debug!(
                stream = pending.stream_id,
                error = %e,
                "gathered reflexive candidate rejected"
            );
        }
    }

    /// Inbound connectivity check, already authenticated and decoded by the
    /// STUN subsystem (RFC 5245 Section 7.2).
    pub fn handle_inbound_check(&mut self, check: InboundCheck) {
        if check.controlling.is_some() && check.controlled.is_some() {
            debug!(source = %check.source, "inbound check claims both roles, dropped");
            return;
        }

        match self.resolve_role_claim(check.controlling, check.controlled) {
            ConflictAction::None => {}
            ConflictAction::Reply487 => {
                self.stats.role_conflicts += 1;
                debug!(source = %check.source, "role conflict lost by peer, answering 487");
                self.send_binding_response(
                    check.transaction_id,
                    check.local,
                    check.source,
                    ROLE_CONFLICT,
                    "Role Conflict",
                    None,
                );
                return;
            }
            ConflictAction::SwitchRole => {
                self.stats.role_conflicts += 1;
                debug!(source = %check.source, "role conflict won by peer, switching role");
                self.switch_role(self.role.opposite());
            }
        }

        // Locate the local candidate the check landed on by base address.
        let located = self.streams.iter().find_map(|(&stream_id, stream)| {
            stream
                .store
                .find_local_by_base(check.local)
                .map(|c| (stream_id, c.component_id, c.transport))
        });
        let Some((stream_id, component_id, transport)) = located else {
            debug!(destination = %check.local, "inbound check for unknown base, dropped");
            return;
        };
        trace!(
            stream = stream_id,
            component = component_id,
            source = %check.source,
            use_candidate = check.use_candidate,
            "inbound connectivity check"
        );

        self.discover_peer_reflexive(stream_id, component_id, transport, &check);

        if check.use_candidate {
            let pair_ref =
                self.streams[&stream_id]
                    .check_list
                    .find_pair(component_id, check.local, check.source);
            if let Some(pair_ref) = pair_ref {
                if let Some(stream) = self.streams.get_mut(&stream_id) {
                    if stream.check_list.state == CheckListState::Frozen {
                        stream.check_list.state = CheckListState::Running;
                    }
                    stream.check_list.add_triggered(pair_ref, true);
                }
                self.ensure_timer(stream_id);
            }
        }

        self.send_binding_response(
            check.transaction_id,
            check.local,
            check.source,
            0,
            "",
            Some(check.source),
        );
    }

    /// RFC 5245 Section 7.2.1.1: compare the local tie-breaker against the
    /// received attribute value. ICE-CONTROLLING is examined when the peer
    /// claims controlling, ICE-CONTROLLED when it claims controlled; a
    /// larger-or-equal local value keeps the current role.
    pub(crate) fn resolve_role_claim(
        &self,
        controlling_attr: Option<u64>,
        controlled_attr: Option<u64>,
    ) -> ConflictAction {
        match self.role {
            IceRole::Controlling => match controlling_attr {
                Some(theirs) if self.tie_breaker >= theirs => ConflictAction::Reply487,
                Some(_) => ConflictAction::SwitchRole,
                None => ConflictAction::None,
            },
            IceRole::Controlled => match controlled_attr {
                Some(theirs) if self.tie_breaker >= theirs => ConflictAction::SwitchRole,
                Some(_) => ConflictAction::Reply487,
                None => ConflictAction::None,
            },
        }
    }

    /// Synthesize a peer-reflexive remote candidate for an unknown check
    /// source (RFC 5245 Section 7.2.1.3) and fold it into the checklist.
    fn discover_peer_reflexive(
        &mut self,
        stream_id: u32,
        component_id: u32,
        transport: TransportProtocol,
        check: &InboundCheck,
    ) {
        let known = self.streams[&stream_id]
            .store
            .find_remote_by_address(check.source, component_id)
            .is_some();
        if known {
            return;
        }

        let mut candidate = Candidate::new_peer_reflexive(
            stream_id,
            component_id,
            transport,
            check.source,
            check.source,
        );
        candidate.priority = check
            .priority
            .unwrap_or_else(|| priority::calculate_prflx_priority(component_id, &check.source.ip()));

        info!(
            stream = stream_id,
            component = component_id,
            source = %check.source,
            priority = candidate.priority,
            "peer-reflexive remote discovered"
        );

        let stored = match self.streams.get_mut(&stream_id) {
            Some(stream) => stream.store.add_remote(candidate.clone()),
            None => return,
        };
        match stored {
            Ok(true) => {
                self.stats.prflx_discovered += 1;
                if self.started {
                    self.integrate_remote(stream_id, &candidate);
                }
            }
            Ok(false) => {}
            Err(reason) => {
                debug!(stream = stream_id, %reason, "peer-reflexive candidate rejected");
            }
        }
    }

    /// Fold a local candidate added after `start` into the checklist: pair
    /// it with every compatible stored remote. New pairs enter Frozen and
    /// wait for the scheduler.
    pub(crate) fn integrate_local(&mut self, stream_id: u32, candidate: &Candidate) {
        let controlling = self.role == IceRole::Controlling;
        let mut inserted = 0usize;
        {
            let Some(stream) = self.streams.get_mut(&stream_id) else {
                return;
            };
            let partners: Vec<Candidate> = stream
                .store
                .remotes()
                .iter()
                .filter(|remote| can_form_pair(candidate, remote))
                .cloned()
                .collect();
            for remote in partners {
                let pair = CandidatePair::new(candidate.clone(), remote, controlling);
                match stream.check_list.insert_pair(pair) {
                    Ok(_) => inserted += 1,
                    Err(reason) => {
                        debug!(stream = stream_id, %reason, "pair not added");
                        break;
                    }
                }
            }
        }
        if inserted > 0 {
            self.resume_running_checklist(stream_id);
        }
    }

    /// Fold a remote candidate (signaled late or peer-reflexive) into the
    /// checklist: pair it with every stored pairable local.
    pub(crate) fn integrate_remote(&mut self, stream_id: u32, candidate: &Candidate) {
        let controlling = self.role == IceRole::Controlling;
        let mut inserted = 0usize;
        {
            let Some(stream) = self.streams.get_mut(&stream_id) else {
                return;
            };
            let partners: Vec<Candidate> = stream
                .store
                .locals()
                .iter()
                .filter(|local| {
                    matches!(local.kind, CandidateKind::Host | CandidateKind::Relayed)
                        && can_form_pair(local, candidate)
                })
                .cloned()
                .collect();
            for local in partners {
                let pair = CandidatePair::new(local, candidate.clone(), controlling);
                match stream.check_list.insert_pair(pair) {
                    Ok(_) => inserted += 1,
                    Err(reason) => {
                        debug!(stream = stream_id, %reason, "pair not added");
                        break;
                    }
                }
            }
        }
        if inserted > 0 {
            self.resume_running_checklist(stream_id);
        }
    }

    /// Non-STUN payload received on a candidate socket: demultiplex by base
    /// address and hand it up.
    pub fn handle_data(&mut self, local: SocketAddr, source: SocketAddr, data: &[u8]) {
        let located = self.streams.iter().find_map(|(&stream_id, stream)| {
            stream
                .store
                .find_local_by_base(local)
                .map(|c| (stream_id, c.component_id))
        });
        match located {
            Some((stream_id, component_id)) => {
                trace!(
                    stream = stream_id,
                    component = component_id,
                    source = %source,
                    len = data.len(),
                    "data demultiplexed"
                );
                self.handler.on_data(stream_id, component_id, source, data);
            }
            None => {
                debug!(destination = %local, "data for unknown base dropped");
            }
        }
    }

    /// Append the pair to the cross-stream valid set, deduplicated by
    /// addresses.
    fn record_valid_pair(&mut self, stream_id: u32, pair_ref: PairRef) {
        let Some(pair) = self
            .streams
            .get(&stream_id)
            .and_then(|s| s.check_list.pair(pair_ref))
        else {
            return;
        };
        info!(stream = stream_id, pair = %pair.id(), "pair validated");

        let entry = ValidPair {
            stream_id,
            component_id: pair.local.component_id,
            foundation: pair.foundation.clone(),
            local: pair.local.addr,
            remote: pair.remote.addr,
            priority: pair.priority,
            nominated: pair.nominated,
        };
        if let Some(existing) = self.valid_pairs.iter_mut().find(|v| {
            v.stream_id == stream_id
                && v.component_id == entry.component_id
                && v.local == entry.local
                && v.remote == entry.remote
        }) {
            existing.nominated |= entry.nominated;
            return;
        }
        self.valid_pairs.push(entry);
    }

    /// Mark a Succeeded pair as the nominated pair for its component.
    fn nominate_pair(&mut self, stream_id: u32, pair_ref: PairRef) {
        let Some(stream) = self.streams.get_mut(&stream_id) else {
            return;
        };
        let nominated = {
            let Some(pair) = stream.check_list.pair_mut(pair_ref) else {
                return;
            };
            if pair.state != CandidatePairState::Succeeded {
                return;
            }
            let newly = !pair.nominated;
            pair.nominated = true;
            (pair.local.component_id, pair.local.addr, pair.remote.addr, pair.id(), newly)
        };
        let (component_id, local, remote, pair_id, newly) = nominated;
        stream.nominated.insert(component_id, pair_ref);
        if newly {
            info!(
                stream = stream_id,
                component = component_id,
                pair = %pair_id,
                "pair nominated"
            );
        }
        if let Some(valid) = self
            .valid_pairs
            .iter_mut()
            .find(|v| v.stream_id == stream_id && v.local == local && v.remote == remote)
        {
            valid.nominated = true;
        }
    }

    /// Evaluate checklist completion and apply the result. On Completed,
    /// the controlling side under regular nomination queues the nomination
    /// decision pass: a USE-CANDIDATE re-check of the best Succeeded pair
    /// per component.
    fn conclude_check_list(&mut self, stream_id: u32) {
        let controlling = self.role == IceRole::Controlling;
        let regular = self.config.nomination == NominationMode::Regular;

        let mut needs_timer = false;
        {
            let Some(stream) = self.streams.get_mut(&stream_id) else {
                return;
            };
            if stream.check_list.state.is_terminal() {
                return;
            }
            let Some(outcome) = stream.check_list.evaluate_completion() else {
                return;
            };
            stream.check_list.state = outcome;
            info!(stream = stream_id, state = %outcome, "checklist concluded");

            if outcome == CheckListState::Completed && controlling && regular {
                for component_id in stream.check_list.component_ids() {
                    if stream.nominated.contains_key(&component_id) {
                        continue;
                    }
                    if let Some(best) = stream.check_list.best_succeeded(component_id) {
                        trace!(
                            stream = stream_id,
                            component = component_id,
                            "queueing nomination re-check"
                        );
                        stream.check_list.add_triggered(best, true);
                        needs_timer = true;
                    }
                }
            }
        }
        if needs_timer {
            self.ensure_timer(stream_id);
        }
    }

    /// Cross-stream unfreeze (RFC 5245 Section 7.1.3.2.3): move Frozen
    /// pairs with a matching foundation to Waiting in every sibling
    /// checklist, waking parked schedulers.
    fn unfreeze_siblings(&mut self, origin_stream: u32, foundation: &str) {
        let mut resumed = Vec::new();
        for (&stream_id, stream) in self.streams.iter_mut() {
            if stream_id == origin_stream {
                continue;
            }
            let moved = stream.check_list.unfreeze_foundation(foundation);
            if moved == 0 {
                continue;
            }
            debug!(stream = stream_id, foundation, moved, "cross-stream unfreeze");
            if stream.check_list.state == CheckListState::Frozen {
                stream.check_list.state = CheckListState::Running;
            }
            resumed.push(stream_id);
        }
        for stream_id in resumed {
            self.ensure_timer(stream_id);
        }
    }

    /// Restart a Running checklist's timer after new pairs appeared.
    /// Frozen checklists wait for an unfreeze; concluded ones stay
    /// concluded.
    fn resume_running_checklist(&mut self, stream_id: u32) {
        let state = self.streams.get(&stream_id).map(|s| s.check_list.state);
        if state == Some(CheckListState::Running) {
            self.ensure_timer(stream_id);
        }
    }

    fn send_binding_response(
        &mut self,
        transaction_id: TransactionId,
        local: SocketAddr,
        remote: SocketAddr,
        code: u16,
        reason: &str,
        mapped: Option<SocketAddr>,
    ) {
        let response = OutboundResponse {
            transaction_id,
            local,
            remote,
            code,
            reason: reason.to_string(),
            mapped,
        };
        if let Err(e) = self.stun.send_response(response) {
            warn!(%remote, error = %e, "failed to send binding response");
        }
    }
}
