// src/store.rs
//! Per-stream candidate collections with validation (RFC 5245 Section 5.7.1)
//!
//! Candidates are unique by (stream, component, address, base), never by
//! type. Duplicates are a silent no-op, reported as such to the caller, so
//! re-signaled candidates neither error nor pair twice. Each side is capped
//! per component to bound connectivity-check fan-out.

use std::net::SocketAddr;
use tracing::{debug, trace};

use crate::candidate::Candidate;
use crate::check_list::MAX_PAIRS_PER_COMPONENT;
use crate::error::Rejected;
use crate::priority::{MAX_COMPONENT_ID, MIN_COMPONENT_ID};

/// Which side of the stream a candidate belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Side {
    Local,
    Remote,
}

/// Local and remote candidates for one media stream
#[derive(Debug, Default)]
pub struct CandidateStore {
    locals: Vec<Candidate>,
    remotes: Vec<Candidate>,
}

impl CandidateStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a local candidate. The candidate must carry a non-zero priority
    /// and a foundation; the agent computes both before insertion. Returns
    /// whether the candidate was newly stored; a duplicate reports `false`.
    pub fn add_local(&mut self, candidate: Candidate) -> Result<bool, Rejected> {
        Self::validate(&candidate, true)?;
        self.insert(candidate, Side::Local)
    }

    /// Add a remote candidate. Priority is required; foundation may be
    /// absent (legacy signaling). Returns whether the candidate was newly
    /// stored; a duplicate reports `false`.
    pub fn add_remote(&mut self, candidate: Candidate) -> Result<bool, Rejected> {
        Self::validate(&candidate, false)?;
        self.insert(candidate, Side::Remote)
    }

    fn validate(candidate: &Candidate, require_foundation: bool) -> Result<(), Rejected> {
        if !candidate.families_consistent() {
            return Err(Rejected::AddressFamilyMismatch);
        }
        if candidate.component_id < MIN_COMPONENT_ID || candidate.component_id > MAX_COMPONENT_ID {
            return Err(Rejected::ComponentOutOfRange);
        }
        if candidate.priority == 0 {
            return Err(Rejected::MissingPriority);
        }
        if require_foundation && candidate.foundation.is_empty() {
            return Err(Rejected::MissingFoundation);
        }
        Ok(())
    }

    fn insert(&mut self, candidate: Candidate, side: Side) -> Result<bool, Rejected> {
        let list = match side {
            Side::Local => &mut self.locals,
            Side::Remote => &mut self.remotes,
        };

        if list.iter().any(|c| c.same_identity(&candidate)) {
            trace!(candidate = %candidate, ?side, "duplicate candidate ignored");
            return Ok(false);
        }

        let in_component = list
            .iter()
            .filter(|c| c.component_id == candidate.component_id)
            .count();
        if in_component >= MAX_PAIRS_PER_COMPONENT {
            return Err(Rejected::PairCapacity);
        }

        debug!(candidate = %candidate, ?side, "candidate stored");
        list.push(candidate);
        Ok(true)
    }

    pub fn locals(&self) -> &[Candidate] {
        &self.locals
    }

    pub fn remotes(&self) -> &[Candidate] {
        &self.remotes
    }

    /// Whether a local candidate with the same identity is already stored
    pub fn has_local(&self, candidate: &Candidate) -> bool {
        self.locals.iter().any(|c| c.same_identity(candidate))
    }

    /// Whether a remote candidate with the same identity is already stored
    pub fn has_remote(&self, candidate: &Candidate) -> bool {
        self.remotes.iter().any(|c| c.same_identity(candidate))
    }

    /// Local candidate whose base address is `base`. Inbound checks are
    /// routed by this lookup (the check destination is always a base).
    pub fn find_local_by_base(&self, base: SocketAddr) -> Option<&Candidate> {
        self.locals.iter().find(|c| c.base == base)
    }

    /// Local candidate by transport address
    pub fn find_local_by_address(&self, addr: SocketAddr) -> Option<&Candidate> {
        self.locals.iter().find(|c| c.addr == addr)
    }

    /// Remote candidate by transport address and component
    pub fn find_remote_by_address(
        &self,
        addr: SocketAddr,
        component_id: u32,
    ) -> Option<&Candidate> {
        self.remotes
            .iter()
            .find(|c| c.addr == addr && c.component_id == component_id)
    }

    /// Highest-priority local candidate for a component
    pub fn best_local(&self, component_id: u32) -> Option<&Candidate> {
        self.locals
            .iter()
            .filter(|c| c.component_id == component_id)
            .max_by_key(|c| c.priority)
    }

    /// Highest-priority remote candidate for a component
    pub fn best_remote(&self, component_id: u32) -> Option<&Candidate> {
        self.remotes
            .iter()
            .filter(|c| c.component_id == component_id)
            .max_by_key(|c| c.priority)
    }

    /// Component ids present on either side, ascending and deduplicated
    pub fn component_ids(&self) -> Vec<u32> {
        let mut ids: Vec<u32> = self
            .locals
            .iter()
            .chain(self.remotes.iter())
            .map(|c| c.component_id)
            .collect();
        ids.sort_unstable();
        ids.dedup();
        ids
    }
}
