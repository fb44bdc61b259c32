//! Error types for offer/answer negotiation

use thiserror::Error;

use crate::call::CallState;
use crate::types::{DescriptionKind, DescriptionSlot, Phase, SessionId};

/// Result type for negotiation operations
pub type Result<T> = std::result::Result<T, NegotiationError>;

/// Errors that can occur while negotiating a session
#[derive(Debug, Error)]
pub enum NegotiationError {
    /// Operation is not valid in the session's current phase
    #[error("Invalid state for {operation}: session is {phase}")]
    InvalidState {
        operation: &'static str,
        phase: Phase,
    },

    /// Call controller operation is not valid in its current state
    #[error("Invalid call state for {operation}: call is {state}")]
    InvalidCallState {
        operation: &'static str,
        state: CallState,
    },

    /// A description of the wrong kind was applied
    #[error("Unexpected {received} description while session is {phase}")]
    UnexpectedKind {
        received: DescriptionKind,
        phase: Phase,
    },

    /// A superseded description was written to a slot
    #[error("Stale {slot} description: sequence {received} is not newer than {current}")]
    StaleDescription {
        slot: DescriptionSlot,
        current: u64,
        received: u64,
    },

    /// Candidate queue bound exceeded
    #[error("Candidate queue overflow: more than {limit} candidates buffered")]
    CandidateOverflow { limit: usize },

    /// Candidate queue drained more than once
    #[error("Candidate queue already drained")]
    AlreadyDrained,

    /// Coordinator-level failure wrapping the first step error
    #[error("Negotiation failed: {cause}")]
    NegotiationFailed {
        #[source]
        cause: Box<NegotiationError>,
    },

    /// Operation on a torn-down session
    #[error("Session {session_id} is closed")]
    SessionClosed { session_id: SessionId },

    /// Local media could not be acquired
    #[error("Media acquisition failed: {reason}")]
    MediaAcquisition { reason: String },

    /// Underlying transport reported an error
    #[error("Transport error: {message}")]
    Transport { message: String },

    /// Asynchronous operation did not complete in time
    #[error("{operation} timed out after {after_ms} ms")]
    Timeout {
        operation: &'static str,
        after_ms: u64,
    },

    /// Session is not registered with the coordinator
    #[error("Session not found: {session_id}")]
    SessionNotFound { session_id: SessionId },

    /// Signaling message could not be encoded or decoded
    #[error("Signaling error: {message}")]
    Signaling { message: String },

    /// Configuration error
    #[error("Configuration error: {message}")]
    Configuration { message: String },
}

impl NegotiationError {
    /// Create an invalid state error
    pub fn invalid_state(operation: &'static str, phase: Phase) -> Self {
        Self::InvalidState { operation, phase }
    }

    /// Create an invalid call state error
    pub fn invalid_call_state(operation: &'static str, state: CallState) -> Self {
        Self::InvalidCallState { operation, state }
    }

    /// Create a session closed error
    pub fn session_closed(session_id: &SessionId) -> Self {
        Self::SessionClosed {
            session_id: session_id.clone(),
        }
    }

    /// Wrap a step error into a coordinator-level failure
    pub fn negotiation_failed(cause: NegotiationError) -> Self {
        Self::NegotiationFailed {
            cause: Box::new(cause),
        }
    }

    /// Create a media acquisition error
    pub fn media_acquisition(reason: impl Into<String>) -> Self {
        Self::MediaAcquisition {
            reason: reason.into(),
        }
    }

    /// Create a transport error
    pub fn transport(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
        }
    }

    /// Create a signaling error
    pub fn signaling(message: impl Into<String>) -> Self {
        Self::Signaling {
            message: message.into(),
        }
    }

    /// Create a configuration error
    pub fn config(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    /// Errors after which the session closes itself
    pub fn is_fatal_to_session(&self) -> bool {
        matches!(
            self,
            Self::UnexpectedKind { .. } | Self::CandidateOverflow { .. }
        )
    }

    /// Errors that are logged and dropped rather than surfaced
    pub fn is_ignorable(&self) -> bool {
        matches!(
            self,
            Self::StaleDescription { .. } | Self::SessionClosed { .. }
        )
    }

    /// The innermost cause, unwrapping `NegotiationFailed`
    pub fn root_cause(&self) -> &NegotiationError {
        match self {
            Self::NegotiationFailed { cause } => cause.root_cause(),
            other => other,
        }
    }
}

impl From<serde_json::Error> for NegotiationError {
    fn from(err: serde_json::Error) -> Self {
        Self::signaling(err.to_string())
    }
}

impl From<toml::de::Error> for NegotiationError {
    fn from(err: toml::de::Error) -> Self {
        Self::config(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classification() {
        let overflow = NegotiationError::CandidateOverflow { limit: 4 };
        assert!(overflow.is_fatal_to_session());
        assert!(!overflow.is_ignorable());

        let stale = NegotiationError::StaleDescription {
            slot: DescriptionSlot::Remote,
            current: 5,
            received: 3,
        };
        assert!(stale.is_ignorable());
        assert!(!stale.is_fatal_to_session());
    }

    #[test]
    fn root_cause_unwraps_nested_failures() {
        let inner = NegotiationError::transport("offer generation failed");
        let wrapped = NegotiationError::negotiation_failed(NegotiationError::negotiation_failed(inner));
        assert!(matches!(wrapped.root_cause(), NegotiationError::Transport { .. }));
        assert_eq!(
            wrapped.to_string(),
            "Negotiation failed: Negotiation failed: Transport error: offer generation failed"
        );
    }
}
