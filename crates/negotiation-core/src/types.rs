//! Core types for negotiation-core
//!
//! Identifiers, negotiation roles and phases, and the two artifacts exchanged
//! over signaling: session descriptions and connectivity candidates.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Session ID type
#[derive(Debug, Clone, Hash, Eq, PartialEq, Serialize, Deserialize)]
pub struct SessionId(pub String);

impl SessionId {
    pub fn new() -> Self {
        Self(format!("session-{}", uuid::Uuid::new_v4()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for SessionId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

/// Negotiation role of a session
#[derive(Debug, Clone, Copy, Hash, Eq, PartialEq, Serialize, Deserialize)]
pub enum Role {
    /// No description exchanged yet
    Idle,
    /// Produced the first offer
    Offerer,
    /// Applied the first remote offer
    Answerer,
}

/// Position in the offer/answer state machine
#[derive(Debug, Clone, Copy, Hash, Eq, PartialEq, Serialize, Deserialize)]
pub enum Phase {
    Idle,
    HaveLocalOffer,
    HaveRemoteOffer,
    Stable,
    /// Terminal; reached by teardown or a fatal error
    Closed,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Idle => write!(f, "idle"),
            Self::HaveLocalOffer => write!(f, "have-local-offer"),
            Self::HaveRemoteOffer => write!(f, "have-remote-offer"),
            Self::Stable => write!(f, "stable"),
            Self::Closed => write!(f, "closed"),
        }
    }
}

/// Semantic type of a session description
#[derive(Debug, Clone, Copy, Hash, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DescriptionKind {
    Offer,
    Answer,
}

impl fmt::Display for DescriptionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Offer => write!(f, "offer"),
            Self::Answer => write!(f, "answer"),
        }
    }
}

/// Which description slot of a session is being written
#[derive(Debug, Clone, Copy, Hash, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DescriptionSlot {
    Local,
    Remote,
}

impl fmt::Display for DescriptionSlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Local => write!(f, "local"),
            Self::Remote => write!(f, "remote"),
        }
    }
}

/// Negotiated parameter payload exchanged during offer/answer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Description {
    /// Offer or answer
    pub kind: DescriptionKind,

    /// Opaque negotiation payload (SDP text for WebRTC-style transports)
    pub payload: String,

    /// Monotonically increasing per producing session, starting at 1
    pub sequence: u64,
}

impl Description {
    pub fn new(kind: DescriptionKind, payload: impl Into<String>, sequence: u64) -> Self {
        Self {
            kind,
            payload: payload.into(),
            sequence,
        }
    }

    pub fn offer(payload: impl Into<String>, sequence: u64) -> Self {
        Self::new(DescriptionKind::Offer, payload, sequence)
    }

    pub fn answer(payload: impl Into<String>, sequence: u64) -> Self {
        Self::new(DescriptionKind::Answer, payload, sequence)
    }
}

/// Discovered potential network path endpoint
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Candidate {
    /// Session whose transport discovered this candidate
    pub session_id: SessionId,

    /// Opaque transport-address payload (`candidate:` line for ICE)
    pub payload: String,

    /// Media stream identification tag, when the transport provides one
    pub sdp_mid: Option<String>,

    /// Index of the media description the candidate belongs to
    pub sdp_mline_index: Option<u16>,

    /// Arrival order at the routing layer
    pub sequence: u64,
}

impl Candidate {
    pub fn new(session_id: SessionId, payload: impl Into<String>, sequence: u64) -> Self {
        Self {
            session_id,
            payload: payload.into(),
            sdp_mid: None,
            sdp_mline_index: None,
            sequence,
        }
    }

    /// Attach media line tagging
    pub fn with_media_line(mut self, sdp_mid: impl Into<String>, sdp_mline_index: u16) -> Self {
        self.sdp_mid = Some(sdp_mid.into());
        self.sdp_mline_index = Some(sdp_mline_index);
        self
    }
}
