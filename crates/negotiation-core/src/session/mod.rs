//! Per-endpoint negotiation state

pub mod peer;
pub mod phase;

pub use peer::{PeerSession, SessionSnapshot};
pub use phase::{next_phase, PhaseEvent, PhaseHistory, TransitionRecord};
