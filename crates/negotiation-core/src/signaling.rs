//! Signaling relay contract
//!
//! Everything one session produces for its peer travels as a
//! [`SignalingMessage`]. The in-process coordinator routes these directly;
//! an external relay carries the same messages as JSON.

use serde::{Deserialize, Serialize};

use crate::errors::{NegotiationError, Result};
use crate::types::{Candidate, Description, SessionId};

/// Message relayed between two peer sessions
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SignalingMessage {
    /// Offer or answer to apply as the destination's remote description
    Description {
        from: SessionId,
        to: SessionId,
        description: Description,
    },

    /// Trickled candidate for the destination
    Candidate {
        from: SessionId,
        to: SessionId,
        candidate: Candidate,
    },

    /// The sender hung up
    Bye { from: SessionId, to: SessionId },
}

impl SignalingMessage {
    pub fn description(from: SessionId, to: SessionId, description: Description) -> Self {
        Self::Description { from, to, description }
    }

    pub fn candidate(from: SessionId, to: SessionId, candidate: Candidate) -> Self {
        Self::Candidate { from, to, candidate }
    }

    pub fn bye(from: SessionId, to: SessionId) -> Self {
        Self::Bye { from, to }
    }

    pub fn from(&self) -> &SessionId {
        match self {
            Self::Description { from, .. } | Self::Candidate { from, .. } | Self::Bye { from, .. } => from,
        }
    }

    pub fn to(&self) -> &SessionId {
        match self {
            Self::Description { to, .. } | Self::Candidate { to, .. } | Self::Bye { to, .. } => to,
        }
    }

    /// Short label for logs
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Description { .. } => "description",
            Self::Candidate { .. } => "candidate",
            Self::Bye { .. } => "bye",
        }
    }

    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string(self).map_err(|e| NegotiationError::signaling(format!("encode {}: {}", self.kind(), e)))
    }

    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json).map_err(|e| NegotiationError::signaling(format!("decode: {}", e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::DescriptionKind;

    #[test]
    fn description_message_wire_shape() {
        let msg = SignalingMessage::description(
            SessionId::from("session-a"),
            SessionId::from("session-b"),
            Description::offer("v=0", 1),
        );
        let json = msg.to_json().unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value["type"], "description");
        assert_eq!(value["from"], "session-a");
        assert_eq!(value["to"], "session-b");

        let decoded = SignalingMessage::from_json(&json).unwrap();
        match decoded {
            SignalingMessage::Description { description, .. } => {
                assert_eq!(description.kind, DescriptionKind::Offer);
                assert_eq!(description.sequence, 1);
            }
            other => panic!("unexpected message {:?}", other),
        }
    }

    #[test]
    fn candidate_message_keeps_media_line() {
        let candidate = Candidate::new(SessionId::from("session-a"), "candidate:1 1 udp 2130706431 127.0.0.1 50000 typ host", 7)
            .with_media_line("0", 0);
        let msg = SignalingMessage::candidate(SessionId::from("session-a"), SessionId::from("session-b"), candidate.clone());
        let decoded = SignalingMessage::from_json(&msg.to_json().unwrap()).unwrap();
        assert_eq!(decoded, msg);
        assert_eq!(decoded.to().as_str(), "session-b");
        assert_eq!(decoded.kind(), "candidate");
    }

    #[test]
    fn malformed_json_is_a_signaling_error() {
        let err = SignalingMessage::from_json("{\"type\":\"offer\"}").unwrap_err();
        assert!(matches!(err, NegotiationError::Signaling { .. }));
    }
}
