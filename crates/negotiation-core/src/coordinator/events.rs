//! Coordinator events and counters

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use tokio_stream::wrappers::BroadcastStream;

use crate::types::SessionId;

/// Lifecycle notifications published by the coordinator
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CoordinatorEvent {
    /// Offer/answer exchange began for a pair
    NegotiationStarted {
        offerer: SessionId,
        answerer: SessionId,
    },

    /// Both sessions reached `Stable`
    NegotiationCompleted {
        offerer: SessionId,
        answerer: SessionId,
    },

    /// A step failed and the pair was torn down
    NegotiationFailed {
        offerer: SessionId,
        answerer: SessionId,
        reason: String,
    },

    /// A candidate reached its destination session
    CandidateRouted {
        from: SessionId,
        to: SessionId,
        sequence: u64,
    },

    /// A registered session was closed
    SessionClosed { session_id: SessionId },
}

/// Stream of coordinator events; lagging subscribers see `Err(Lagged)`
pub type EventStream = BroadcastStream<CoordinatorEvent>;

/// Snapshot of coordinator counters
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CoordinatorStats {
    pub negotiations_started: u64,
    pub negotiations_completed: u64,
    pub negotiations_failed: u64,
    pub candidates_routed: u64,
    pub messages_relayed: u64,
    pub active_sessions: usize,
}

#[derive(Debug, Default)]
pub(crate) struct StatsCounters {
    pub started: AtomicU64,
    pub completed: AtomicU64,
    pub failed: AtomicU64,
    pub candidates_routed: AtomicU64,
    pub messages_relayed: AtomicU64,
}

impl StatsCounters {
    pub fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self, active_sessions: usize) -> CoordinatorStats {
        CoordinatorStats {
            negotiations_started: self.started.load(Ordering::Relaxed),
            negotiations_completed: self.completed.load(Ordering::Relaxed),
            negotiations_failed: self.failed.load(Ordering::Relaxed),
            candidates_routed: self.candidates_routed.load(Ordering::Relaxed),
            messages_relayed: self.messages_relayed.load(Ordering::Relaxed),
            active_sessions,
        }
    }
}
