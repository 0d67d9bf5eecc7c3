// src/stun.rs
//! Boundary contract with the STUN transaction subsystem.
//!
//! Message encoding, retransmission, timeout, and integrity checking all
//! live behind [`StunSubsystem`]. The agent hands it fully described
//! requests and receives outcomes back through its own entry points
//! (`IceAgent::handle_stun_outcome`, `IceAgent::handle_inbound_check`),
//! already authenticated and decoded into the types below.

use rand::RngCore;
use std::fmt;
use std::net::SocketAddr;
use std::time::Duration;

use crate::error::IceResult;

/// STUN error code for a lost role-conflict tie-break
/// (RFC 5245 Section 7.2.1.1)
pub const ROLE_CONFLICT: u16 = 487;

/// STUN transaction ID (96 bits)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TransactionId([u8; 12]);

impl TransactionId {
    /// Generate a new random transaction ID
    pub fn new() -> Self {
        let mut id = [0u8; 12];
        rand::thread_rng().fill_bytes(&mut id);
        Self(id)
    }

    /// Create from bytes
    pub fn from_bytes(bytes: [u8; 12]) -> Self {
        Self(bytes)
    }

    /// Get as bytes
    pub fn as_bytes(&self) -> &[u8; 12] {
        &self.0
    }
}

impl Default for TransactionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for TransactionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for b in &self.0 {
            write!(f, "{:02x}", b)?;
        }
        Ok(())
    }
}

/// Request method the subsystem should issue
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestKind {
    /// STUN Binding request
    Binding,
    /// TURN Allocate request
    Allocate,
    /// TURN Refresh request
    Refresh,
}

/// Credentials attached to a request
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StunCredentials {
    /// No MESSAGE-INTEGRITY
    None,
    /// Short-term credentials (connectivity checks)
    ShortTerm { username: String, password: String },
    /// Long-term credentials (TURN allocations)
    LongTerm {
        username: String,
        password: String,
        realm: Option<String>,
    },
}

/// The role attribute carried on an outbound check, with the agent's
/// tie-breaker value
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoleAttribute {
    Controlling(u64),
    Controlled(u64),
}

/// One outbound connectivity check, fully described for the subsystem
#[derive(Debug, Clone)]
pub struct OutboundCheck {
    /// Source: the local candidate's base address
    pub local: SocketAddr,
    /// Destination: the remote candidate's transport address
    pub remote: SocketAddr,
    /// Relay the check is sent through, for relayed local candidates
    pub relay: Option<SocketAddr>,
    /// Short-term credentials (USERNAME is remote_ufrag:local_ufrag,
    /// password is the remote password)
    pub credentials: StunCredentials,
    /// PRIORITY attribute: the local candidate's priority, not the pair's
    pub priority: u32,
    /// ICE-CONTROLLING or ICE-CONTROLLED with the tie-breaker
    pub role: RoleAttribute,
    /// Attach USE-CANDIDATE
    pub use_candidate: bool,
}

/// One gathering request (Binding toward a STUN server or Allocate toward a
/// TURN server)
#[derive(Debug, Clone)]
pub struct GatherRequest {
    pub kind: RequestKind,
    /// Local base the request leaves from
    pub local: SocketAddr,
    /// STUN or TURN server address
    pub server: SocketAddr,
    pub credentials: StunCredentials,
    /// Overall deadline for the transaction, retransmissions included
    pub timeout: Duration,
}

/// Response to an inbound check, sent back through the subsystem
#[derive(Debug, Clone)]
pub struct OutboundResponse {
    /// Transaction id echoed from the request
    pub transaction_id: TransactionId,
    /// Local address the request arrived on
    pub local: SocketAddr,
    /// Where to send the response
    pub remote: SocketAddr,
    /// 0 for success, or an error code such as [`ROLE_CONFLICT`]
    pub code: u16,
    pub reason: String,
    /// XOR-MAPPED-ADDRESS: the source the request was seen from
    pub mapped: Option<SocketAddr>,
}

/// An inbound connectivity check, decoded and authenticated by the
/// subsystem before it reaches the agent
#[derive(Debug, Clone)]
pub struct InboundCheck {
    pub transaction_id: TransactionId,
    /// Local address the request arrived on (the check destination)
    pub local: SocketAddr,
    /// Source address of the request
    pub source: SocketAddr,
    /// PRIORITY attribute value, if present
    pub priority: Option<u32>,
    /// ICE-CONTROLLING attribute value, if present
    pub controlling: Option<u64>,
    /// ICE-CONTROLLED attribute value, if present
    pub controlled: Option<u64>,
    /// USE-CANDIDATE attribute present
    pub use_candidate: bool,
}

/// Terminal outcome of an outbound transaction, delivered by the subsystem
/// once its own retransmission/timeout logic concludes
#[derive(Debug, Clone)]
pub struct StunOutcome {
    /// 0 for success, an error code for an error response
    pub code: u16,
    pub reason: String,
    /// XOR-MAPPED-ADDRESS from a Binding success
    pub mapped: Option<SocketAddr>,
    /// XOR-RELAYED-ADDRESS from an Allocate success
    pub relay: Option<SocketAddr>,
    /// True when the transaction ran out of retransmissions
    pub timed_out: bool,
}

impl StunOutcome {
    pub fn is_success(&self) -> bool {
        self.code == 0 && !self.timed_out
    }

    /// A plain success outcome with a mapped address
    pub fn success(mapped: SocketAddr) -> Self {
        Self {
            code: 0,
            reason: String::new(),
            mapped: Some(mapped),
            relay: None,
            timed_out: false,
        }
    }

    /// An error-response outcome
    pub fn error(code: u16, reason: &str) -> Self {
        Self {
            code,
            reason: reason.to_string(),
            mapped: None,
            relay: None,
            timed_out: false,
        }
    }

    /// A retransmission-timeout outcome
    pub fn timeout() -> Self {
        Self {
            code: 0,
            reason: "transaction timed out".to_string(),
            mapped: None,
            relay: None,
            timed_out: true,
        }
    }
}

/// The STUN transaction subsystem the agent drives.
///
/// Implementations own sockets, encoding, retransmission, and
/// authentication. Every send returns the transaction id the eventual
/// outcome will be keyed by.
pub trait StunSubsystem: Send {
    /// Issue a connectivity check. The outcome arrives later through
    /// `IceAgent::handle_stun_outcome`.
    fn send_check(&mut self, check: OutboundCheck) -> IceResult<TransactionId>;

    /// Issue a gathering request (Binding or Allocate).
    fn send_gather(&mut self, request: GatherRequest) -> IceResult<TransactionId>;

    /// Send a response to an inbound check.
    fn send_response(&mut self, response: OutboundResponse) -> IceResult<()>;

    /// Drop interest in an in-flight transaction. Outcomes delivered after
    /// this are ignored by the agent anyway; this lets the subsystem stop
    /// retransmitting early.
    fn cancel(&mut self, id: TransactionId);
}
