// src/agent.rs
//! ICE agent: stream ownership, role handling, credentials, and the public
//! API (RFC 5245 Sections 5, 8)
//!
//! The agent is a synchronous state machine. Everything it does happens
//! inside one of its entry points (`start`, `handle_timeout`,
//! `handle_stun_outcome`, `handle_inbound_check`, ...), which the embedding
//! event loop must call serialized. STUN transactions and timers are
//! injected collaborators; the agent never blocks.

use std::collections::{BTreeMap, HashMap};
use std::net::SocketAddr;
use std::time::Duration;

use rand::Rng;
use tracing::{debug, info, warn};

use crate::candidate::{Candidate, CandidateKind, TransportProtocol};
use crate::check_list::{CheckListState, PairRef, MAX_PAIRS_PER_COMPONENT};
use crate::error::{IceError, IceResult, Rejected};
use crate::foundation::FoundationRegistry;
use crate::stream::{RemoteCredentials, Stream};
use crate::stun::{
    GatherRequest, RequestKind, StunCredentials, StunSubsystem, TransactionId,
};
use crate::timer::{Timer, TimerHandle, TimerKey};

/// Streams per agent; the success mask is a u64
pub const MAX_STREAMS: usize = 64;

/// Nomination procedure (RFC 5245 Section 8.1.1)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NominationMode {
    /// Nominate after validation, in a separate decision pass
    Regular,
    /// Attach USE-CANDIDATE to every check
    Aggressive,
}

/// ICE role
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IceRole {
    Controlling,
    Controlled,
}

impl IceRole {
    pub fn opposite(&self) -> Self {
        match self {
            Self::Controlling => Self::Controlled,
            Self::Controlled => Self::Controlling,
        }
    }
}

impl std::fmt::Display for IceRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Controlling => write!(f, "controlling"),
            Self::Controlled => write!(f, "controlled"),
        }
    }
}

/// ICE agent configuration
#[derive(Debug, Clone)]
pub struct IceConfig {
    /// Pacing interval between connectivity checks (Ta, RFC 5245
    /// Appendix B.1)
    pub ta: Duration,

    /// Nomination mode
    pub nomination: NominationMode,

    /// Default per-transaction deadline for gathering requests
    pub gather_timeout: Duration,
}

impl Default for IceConfig {
    fn default() -> Self {
        Self {
            ta: Duration::from_millis(50),
            nomination: NominationMode::Regular,
            gather_timeout: Duration::from_secs(10),
        }
    }
}

impl IceConfig {
    fn validate(&self) -> IceResult<()> {
        if self.ta.is_zero() {
            return Err(IceError::InvalidState("ta interval must be non-zero".into()));
        }
        if self.gather_timeout.is_zero() {
            return Err(IceError::InvalidState("gather timeout must be non-zero".into()));
        }
        Ok(())
    }
}

/// Callbacks supplied by the embedding application
pub trait IceHandler: Send {
    /// Transmit `data` on the wire from `local` to `remote`. The agent
    /// calls this for application sends; STUN traffic goes through the
    /// subsystem instead.
    fn send(
        &mut self,
        transport: TransportProtocol,
        local: SocketAddr,
        remote: SocketAddr,
        data: &[u8],
    ) -> IceResult<()>;

    /// Resolve a short-term password for a USERNAME the agent does not
    /// recognize (legacy or out-of-band credentials)
    fn auth(&mut self, username: &str) -> Option<String>;

    /// Non-STUN payload received on a candidate socket, demultiplexed by
    /// `IceAgent::handle_data`
    fn on_data(&mut self, stream_id: u32, component_id: u32, source: SocketAddr, data: &[u8]);

    /// Fires exactly once, when every stream's checklist is terminal.
    /// Bit i of each mask refers to the i-th stream in ascending
    /// stream-id order.
    fn on_connected(&mut self, success_mask: u64, all_mask: u64);
}

/// One validated pair, aggregated across streams
#[derive(Debug, Clone)]
pub struct ValidPair {
    pub stream_id: u32,
    pub component_id: u32,
    pub foundation: String,
    pub local: SocketAddr,
    pub remote: SocketAddr,
    pub priority: u64,
    pub nominated: bool,
}

/// Plain diagnostic counters
#[derive(Debug, Clone, Copy, Default)]
pub struct AgentStats {
    pub checks_sent: u64,
    pub responses_received: u64,
    pub checks_failed: u64,
    pub triggered_checks: u64,
    pub role_conflicts: u64,
    pub prflx_discovered: u64,
}

/// In-flight connectivity check
#[derive(Debug, Clone, Copy)]
pub(crate) struct PendingCheck {
    pub stream_id: u32,
    pub pair: PairRef,
    /// Checklist generation the check was issued under; outcomes against a
    /// newer generation are dropped
    pub generation: u64,
    /// Success nominates the pair
    pub nominate: bool,
    /// Role the check claimed; a 487 only flips the role if it still holds
    pub claimed_controlling: bool,
}

/// In-flight gathering request
#[derive(Debug, Clone, Copy)]
pub(crate) struct PendingGather {
    pub stream_id: u32,
    pub component_id: u32,
    pub base: SocketAddr,
    pub transport: TransportProtocol,
    pub server: SocketAddr,
    pub kind: RequestKind,
}

/// One `gather()` invocation: counts outstanding requests and holds the
/// completion callback
pub(crate) struct GatherBatch {
    pub outstanding: usize,
    pub first_error: Option<u16>,
    pub on_done: Option<Box<dyn FnOnce(u16) + Send>>,
}

/// The ICE agent
pub struct IceAgent {
    pub(crate) config: IceConfig,
    pub(crate) role: IceRole,
    pub(crate) tie_breaker: u64,
    pub(crate) local_ufrag: String,
    pub(crate) local_password: String,
    pub(crate) streams: BTreeMap<u32, Stream>,
    pub(crate) foundations: FoundationRegistry,
    pub(crate) valid_pairs: Vec<ValidPair>,
    pub(crate) stun: Box<dyn StunSubsystem>,
    pub(crate) timer: Box<dyn Timer>,
    pub(crate) handler: Box<dyn IceHandler>,
    pub(crate) pending_checks: HashMap<TransactionId, PendingCheck>,
    pub(crate) pending_gathers: HashMap<TransactionId, PendingGather>,
    pub(crate) gather_batch: Option<GatherBatch>,
    pub(crate) started: bool,
    pub(crate) connected_fired: bool,
    pub(crate) stats: AgentStats,
}

impl IceAgent {
    /// Create an agent. `controlling` fixes the initial role; a role
    /// conflict during checks may still flip it.
    pub fn new(
        controlling: bool,
        config: IceConfig,
        stun: Box<dyn StunSubsystem>,
        timer: Box<dyn Timer>,
        handler: Box<dyn IceHandler>,
    ) -> IceResult<Self> {
        config.validate()?;

        let role = if controlling {
            IceRole::Controlling
        } else {
            IceRole::Controlled
        };
        let tie_breaker: u64 = rand::thread_rng().gen();

        info!(%role, tie_breaker, "agent created");
        Ok(Self {
            config,
            role,
            tie_breaker,
            local_ufrag: generate_ufrag(),
            local_password: generate_password(),
            streams: BTreeMap::new(),
            foundations: FoundationRegistry::new(),
            valid_pairs: Vec::new(),
            stun,
            timer,
            handler,
            pending_checks: HashMap::new(),
            pending_gathers: HashMap::new(),
            gather_batch: None,
            started: false,
            connected_fired: false,
            stats: AgentStats::default(),
        })
    }

    /// Override the generated local credentials
    pub fn set_local_auth(&mut self, ufrag: &str, password: &str) {
        self.local_ufrag = ufrag.to_string();
        self.local_password = password.to_string();
    }

    /// Set the peer's credentials for one stream. Checks for a stream
    /// cannot be sent before this; setting credentials restarts the
    /// stream's timer if the scheduler had parked it.
    pub fn set_remote_auth(&mut self, stream_id: u32, ufrag: &str, password: &str) -> IceResult<()> {
        let stream = self.ensure_stream(stream_id)?;
        stream.remote_credentials = Some(RemoteCredentials {
            ufrag: ufrag.to_string(),
            password: password.to_string(),
        });
        if self.started {
            self.ensure_timer(stream_id);
        }
        Ok(())
    }

    /// Local (ufrag, password)
    pub fn local_credentials(&self) -> (&str, &str) {
        (&self.local_ufrag, &self.local_password)
    }

    /// Resolve the short-term password for an inbound USERNAME
    /// (`local_ufrag:remote_ufrag`). Unknown usernames fall through to the
    /// handler's credential lookup.
    pub fn auth_password(&mut self, username: &str) -> Option<String> {
        match username.split_once(':') {
            Some((local, _)) if local == self.local_ufrag => Some(self.local_password.clone()),
            _ => self.handler.auth(username),
        }
    }

    /// Add a local candidate. Priority is computed if unset and a
    /// foundation is assigned by scanning existing locals across all
    /// streams; then the candidate is validated and stored. When the agent
    /// is running, new pairs are folded into the checklist immediately.
    /// Re-adding a stored candidate is a no-op success.
    pub fn add_local_candidate(&mut self, mut candidate: Candidate) -> IceResult<()> {
        let stream_id = candidate.stream_id;
        self.ensure_stream(stream_id)?;

        if candidate.priority == 0 {
            candidate.compute_priority();
        }
        let existing: Vec<&Candidate> = self
            .streams
            .values()
            .flat_map(|s| s.store.locals().iter())
            .collect();
        self.foundations.assign(&mut candidate, &existing);

        let pairable = matches!(candidate.kind, CandidateKind::Host | CandidateKind::Relayed);
        let stream = self.streams.get_mut(&stream_id).ok_or(IceError::UnknownStream(stream_id))?;
        if self.started
            && pairable
            && !stream.store.has_local(&candidate)
            && stream.check_list.component_pair_count(candidate.component_id)
                >= MAX_PAIRS_PER_COMPONENT
        {
            return Err(Rejected::PairCapacity.into());
        }

        let inserted = stream.store.add_local(candidate.clone())?;
        if self.started && pairable && inserted {
            self.integrate_local(stream_id, &candidate);
        }
        Ok(())
    }

    /// Add a remote candidate signaled by the peer. Remote priorities come
    /// from signaling and are required; foundations may be absent.
    /// Re-signaled duplicates are a no-op success.
    pub fn add_remote_candidate(&mut self, candidate: Candidate) -> IceResult<()> {
        let stream_id = candidate.stream_id;
        self.ensure_stream(stream_id)?;

        let stream = self.streams.get_mut(&stream_id).ok_or(IceError::UnknownStream(stream_id))?;
        if self.started
            && !stream.store.has_remote(&candidate)
            && stream.check_list.component_pair_count(candidate.component_id)
                >= MAX_PAIRS_PER_COMPONENT
        {
            return Err(Rejected::PairCapacity.into());
        }

        let inserted = stream.store.add_remote(candidate.clone())?;
        if self.started && inserted {
            self.integrate_remote(stream_id, &candidate);
        }
        Ok(())
    }

    /// Drive reflexive/relayed discovery: one Binding (or Allocate, with
    /// `use_turn`) request per host candidate base, all toward `server`.
    /// `on_done` fires once every request resolved, with 0 on full success
    /// or the first failure code.
    pub fn gather(
        &mut self,
        server: SocketAddr,
        use_turn: bool,
        timeout: Option<Duration>,
        credentials: StunCredentials,
        on_done: Box<dyn FnOnce(u16) + Send>,
    ) -> IceResult<()> {
        if self.gather_batch.is_some() {
            return Err(IceError::InvalidState("gather already in progress".into()));
        }

        let kind = if use_turn { RequestKind::Allocate } else { RequestKind::Binding };
        let timeout = timeout.unwrap_or(self.config.gather_timeout);

        let targets: Vec<PendingGather> = self
            .streams
            .values()
            .flat_map(|stream| {
                stream.store.locals().iter().filter(|c| c.is_host()).map(move |c| PendingGather {
                    stream_id: stream.id,
                    component_id: c.component_id,
                    base: c.base,
                    transport: c.transport,
                    server,
                    kind,
                })
            })
            .collect();

        if targets.is_empty() {
            debug!("gather with no host candidates, completing immediately");
            on_done(0);
            return Ok(());
        }

        let mut outstanding = 0;
        let mut first_error = None;
        for target in targets {
            let request = GatherRequest {
                kind,
                local: target.base,
                server,
                credentials: credentials.clone(),
                timeout,
            };
            match self.stun.send_gather(request) {
                Ok(id) => {
                    self.pending_gathers.insert(id, target);
                    outstanding += 1;
                }
                Err(e) => {
                    warn!(base = %target.base, error = %e, "gather request refused");
                    first_error.get_or_insert(500);
                }
            }
        }

        if outstanding == 0 {
            on_done(first_error.unwrap_or(0));
            return Ok(());
        }

        debug!(outstanding, %server, ?kind, "gathering started");
        self.gather_batch = Some(GatherBatch {
            outstanding,
            first_error,
            on_done: Some(on_done),
        });
        Ok(())
    }

    /// Build every stream's checklist and start the first one. Remaining
    /// checklists stay Frozen and unfreeze through cross-stream
    /// propagation as valid pairs appear.
    pub fn start(&mut self) -> IceResult<()> {
        if self.started {
            return Err(IceError::InvalidState("agent already started".into()));
        }
        if self.streams.is_empty() {
            return Err(IceError::InvalidState("no streams to start".into()));
        }

        self.started = true;
        let controlling = self.role == IceRole::Controlling;
        for stream in self.streams.values_mut() {
            stream.nominated.clear();
            stream
                .check_list
                .build(stream.store.locals(), stream.store.remotes(), controlling);
        }

        let first = *self.streams.keys().next().ok_or_else(|| {
            IceError::InvalidState("no streams to start".into())
        })?;
        if let Some(stream) = self.streams.get_mut(&first) {
            stream.check_list.init();
        }
        self.ensure_timer(first);

        info!(streams = self.streams.len(), first_stream = first, "agent started");
        Ok(())
    }

    /// Cancel every checklist timer. Pair and checklist states are left as
    /// they are; this is teardown, not failure.
    pub fn stop(&mut self) -> IceResult<()> {
        let handles: Vec<(u32, TimerHandle)> = self
            .streams
            .values_mut()
            .filter_map(|s| s.check_list.timer_handle.take().map(|h| (s.id, h)))
            .collect();
        for (stream_id, handle) in handles {
            self.timer.stop(handle);
            debug!(stream = stream_id, "checklist timer cancelled");
        }
        Ok(())
    }

    /// Send application data for one component: over the nominated pair,
    /// or the default (highest-priority) candidate tuple while nomination
    /// has not concluded.
    pub fn send(&mut self, stream_id: u32, component_id: u32, data: &[u8]) -> IceResult<()> {
        if !self.started {
            return Err(IceError::InvalidState("send before start".into()));
        }
        let stream = self
            .streams
            .get(&stream_id)
            .ok_or(IceError::UnknownStream(stream_id))?;

        if let Some(pair_ref) = stream.nominated_pair(component_id) {
            if let Some(pair) = stream.check_list.pair(pair_ref) {
                let (transport, local, remote) =
                    (pair.local.transport, pair.local.base, pair.remote.addr);
                return self.handler.send(transport, local, remote, data);
            }
        }

        if !stream.store.component_ids().contains(&component_id) {
            return Err(IceError::UnknownComponent { stream: stream_id, component: component_id });
        }
        let local = stream.store.best_local(component_id);
        let remote = stream.store.best_remote(component_id);
        match (local, remote) {
            (Some(l), Some(r)) => {
                let (transport, local, remote) = (l.transport, l.base, r.addr);
                self.handler.send(transport, local, remote, data)
            }
            _ => Err(IceError::NoUsablePair { stream: stream_id, component: component_id }),
        }
    }

    pub fn role(&self) -> IceRole {
        self.role
    }

    /// Tie-breaker value used in role conflict resolution
    pub fn tie_breaker(&self) -> u64 {
        self.tie_breaker
    }

    pub fn stats(&self) -> AgentStats {
        self.stats
    }

    pub fn valid_pairs(&self) -> &[ValidPair] {
        &self.valid_pairs
    }

    /// Local candidates currently stored for a stream, in insertion order
    pub fn local_candidates(&self, stream_id: u32) -> Option<&[Candidate]> {
        self.streams.get(&stream_id).map(|s| s.store.locals())
    }

    /// Remote candidates currently stored for a stream, in insertion order
    pub fn remote_candidates(&self, stream_id: u32) -> Option<&[Candidate]> {
        self.streams.get(&stream_id).map(|s| s.store.remotes())
    }

    /// Checklist status for a stream
    pub fn check_list_state(&self, stream_id: u32) -> Option<CheckListState> {
        self.streams.get(&stream_id).map(|s| s.check_list.state)
    }

    pub(crate) fn ensure_stream(&mut self, stream_id: u32) -> Result<&mut Stream, Rejected> {
        if self.streams.len() >= MAX_STREAMS && !self.streams.contains_key(&stream_id) {
            return Err(Rejected::StreamLimit);
        }
        Ok(self.streams.entry(stream_id).or_insert_with(|| {
            debug!(stream = stream_id, "stream created");
            Stream::new(stream_id)
        }))
    }

    /// Adopt `new_role` and propagate it to every checklist by recomputing
    /// pair priorities. Pair states are untouched.
    pub(crate) fn switch_role(&mut self, new_role: IceRole) {
        if self.role == new_role {
            return;
        }
        info!(from = %self.role, to = %new_role, "role switch");
        self.role = new_role;
        let controlling = new_role == IceRole::Controlling;
        for stream in self.streams.values_mut() {
            stream.check_list.recompute_priorities(controlling);
        }
    }

    /// Fire `on_connected` once every known stream is terminal. Bit i of
    /// the masks is the i-th stream in ascending stream-id order.
    pub(crate) fn check_connected(&mut self) {
        if self.connected_fired || self.streams.is_empty() {
            return;
        }
        if !self
            .streams
            .values()
            .all(|s| s.check_list.state.is_terminal())
        {
            return;
        }

        let mut success_mask = 0u64;
        let mut all_mask = 0u64;
        for (bit, stream) in self.streams.values().enumerate() {
            all_mask |= 1 << bit;
            if stream.check_list.state == CheckListState::Completed {
                success_mask |= 1 << bit;
            }
        }

        self.connected_fired = true;
        info!(success_mask, all_mask, "connectivity concluded");
        self.handler.on_connected(success_mask, all_mask);
    }

    /// Make sure a schedulable checklist has a running Ta timer
    pub(crate) fn ensure_timer(&mut self, stream_id: u32) {
        if !self.started {
            return;
        }
        let ta = self.config.ta;
        let Some(stream) = self.streams.get_mut(&stream_id) else {
            return;
        };
        match stream.check_list.state {
            CheckListState::Running | CheckListState::Completed => {}
            CheckListState::Frozen | CheckListState::Failed => return,
        }
        if stream.check_list.timer_handle.is_none() {
            let handle = self.timer.start(ta, TimerKey::Checklist { stream_id });
            stream.check_list.timer_handle = Some(handle);
        }
    }

    pub(crate) fn stop_checklist_timer(&mut self, stream_id: u32) {
        if let Some(stream) = self.streams.get_mut(&stream_id) {
            if let Some(handle) = stream.check_list.timer_handle.take() {
                self.timer.stop(handle);
            }
        }
    }
}

impl Drop for IceAgent {
    fn drop(&mut self) {
        for id in self.pending_checks.keys().copied().collect::<Vec<_>>() {
            self.stun.cancel(id);
        }
        for id in self.pending_gathers.keys().copied().collect::<Vec<_>>() {
            self.stun.cancel(id);
        }
        self.timer.shutdown();
    }
}

/// Generate an ICE ufrag (4 ice-chars)
fn generate_ufrag() -> String {
    random_ice_chars(4)
}

/// Generate an ICE password (22 ice-chars)
fn generate_password() -> String {
    random_ice_chars(22)
}

fn random_ice_chars(len: usize) -> String {
    const CHARS: &[u8] = b"abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789+/";
    let mut rng = rand::thread_rng();
    (0..len)
        .map(|_| CHARS[rng.gen_range(0..CHARS.len())] as char)
        .collect()
}
