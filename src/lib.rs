//! ICE agent library (lib.rs)
//!
//! Interactive Connectivity Establishment (RFC 5245) for UDP media paths:
//! candidate gathering and prioritization, connectivity checklists, role
//! negotiation, and nomination. The agent is transport-agnostic; STUN
//! encoding and sockets live behind injected subsystem traits.

#![warn(missing_docs)]
#![warn(clippy::all)]

// Core agent modules
pub mod agent;
pub mod candidate;
pub mod check_list;
pub mod connectivity;
pub mod error;
pub mod foundation;
pub mod priority;
pub mod store;
pub mod stream;

// Injected collaborator contracts
pub mod stun;
pub mod timer;

#[cfg(test)]
mod testkit;

// Re-export main types
pub use agent::{
    AgentStats, IceAgent, IceConfig, IceHandler, IceRole, NominationMode, ValidPair, MAX_STREAMS,
};
pub use candidate::{
    can_form_pair, Candidate, CandidateKind, CandidatePair, CandidatePairState, TransportProtocol,
};
pub use check_list::{CheckListState, PairRef, MAX_PAIRS_PER_COMPONENT};
pub use error::{ConflictAction, IceError, IceResult, Rejected};
pub use stream::RemoteCredentials;

// Re-export the subsystem contracts and their wire-facing types
pub use stun::{
    GatherRequest, InboundCheck, OutboundCheck, OutboundResponse, RequestKind, RoleAttribute,
    StunCredentials, StunOutcome, StunSubsystem, TransactionId, ROLE_CONFLICT,
};
pub use timer::{Timer, TimerFire, TimerHandle, TimerKey, TokioTimer};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Initialize logging system with custom configuration
///
/// # Arguments
/// * `level` - Log level (trace/debug/info/warn/error)
///
/// # Example
/// ```
/// icelink::init_logging("info");
/// ```
///
pub fn init_logging(level: &str) {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(level))
        .unwrap_or_else(|_| EnvFilter::new("info"))
        // Reduce verbosity of some dependencies
        .add_directive("tokio=warn".parse().unwrap())
        .add_directive("runtime=warn".parse().unwrap());

    tracing_subscriber::registry()
        .with(
            fmt::layer()
                .with_target(true)
                .with_thread_ids(true)
                .with_file(true)
                .with_line_number(true)
                .with_ansi(true),
        )
        .with(filter)
        .init();
}
