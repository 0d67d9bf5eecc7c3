use std::fmt;
use thiserror::Error;

/// Errors surfaced synchronously by agent operations.
///
/// Connectivity-check failures never appear here: a STUN timeout or error
/// response is local to one candidate pair and flows through pair state and
/// the completion mask instead (RFC 5245 Section 7.1.3).
#[derive(Debug, Error)]
pub enum IceError {
    /// A candidate failed validation and was not stored
    #[error("candidate rejected: {0}")]
    Rejected(#[from] Rejected),

    /// Operation called in a state that cannot serve it
    #[error("invalid state: {0}")]
    InvalidState(String),

    /// Operation referenced a stream the agent does not own
    #[error("unknown stream {0}")]
    UnknownStream(u32),

    /// Operation referenced a component with no candidates or pairs
    #[error("unknown component {component} on stream {stream}")]
    UnknownComponent { stream: u32, component: u32 },

    /// Send had neither a nominated pair nor a default candidate tuple
    #[error("no usable pair for stream {stream} component {component}")]
    NoUsablePair { stream: u32, component: u32 },

    /// The STUN subsystem refused a request before it went on the wire
    #[error("stun subsystem: {0}")]
    Subsystem(String),

    /// The wire-transmission callback reported a failure
    #[error("transport: {0}")]
    Transport(String),
}

/// Reasons a candidate is refused by `add_local_candidate` /
/// `add_remote_candidate`. Returned synchronously; no agent state is
/// mutated on rejection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum Rejected {
    /// Transport address and base address are of different IP families
    #[error("address family of transport and base address differ")]
    AddressFamilyMismatch,

    /// Local candidate arrived with priority zero
    #[error("missing or zero priority")]
    MissingPriority,

    /// Local candidate arrived with an empty foundation
    #[error("missing foundation")]
    MissingFoundation,

    /// Component id outside [1, 256]
    #[error("component id outside [1, 256]")]
    ComponentOutOfRange,

    /// The pair group for this component is already at capacity
    #[error("component pair cap reached")]
    PairCapacity,

    /// The agent already tracks the maximum number of streams
    #[error("stream limit reached")]
    StreamLimit,
}

/// How an inbound or outbound check interacts with the role claimed by the
/// peer. Not an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConflictAction {
    /// No conflict, process the request normally
    None,
    /// Keep the current role and answer 487 Role Conflict
    Reply487,
    /// Adopt the opposite role, then process the request normally
    SwitchRole,
}

impl fmt::Display for ConflictAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::None => write!(f, "none"),
            Self::Reply487 => write!(f, "reply-487"),
            Self::SwitchRole => write!(f, "switch-role"),
        }
    }
}

/// Result type for agent operations
pub type IceResult<T> = Result<T, IceError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejected_converts_into_ice_error() {
        fn reject() -> IceResult<()> {
            Err(Rejected::ComponentOutOfRange)?
        }
        match reject() {
            Err(IceError::Rejected(Rejected::ComponentOutOfRange)) => {}
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn error_messages_are_stable() {
        let e = IceError::NoUsablePair { stream: 1, component: 2 };
        assert_eq!(e.to_string(), "no usable pair for stream 1 component 2");
        assert_eq!(
            Rejected::AddressFamilyMismatch.to_string(),
            "address family of transport and base address differ"
        );
    }
}
