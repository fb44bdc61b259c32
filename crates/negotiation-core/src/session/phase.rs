//! Offer/answer phase machine
//!
//! The transition table is a pure function of the current phase and the
//! requested operation, kept apart from `PeerSession` so every edge can be
//! tested without a transport.

use std::collections::VecDeque;
use std::time::Instant;

use crate::errors::{NegotiationError, Result};
use crate::types::{DescriptionKind, Phase};

/// Operations that move a session through its phases
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PhaseEvent {
    CreateOffer,
    CreateAnswer,
    ApplyRemote(DescriptionKind),
    Close,
}

impl PhaseEvent {
    pub fn operation(&self) -> &'static str {
        match self {
            Self::CreateOffer => "create_offer",
            Self::CreateAnswer => "create_answer",
            Self::ApplyRemote(_) => "apply_remote",
            Self::Close => "close",
        }
    }
}

/// Phase reached by applying `event` in `current`.
///
/// `Closed` is terminal: every event other than `Close` is rejected there.
/// Callers are expected to turn that case into `SessionClosed` beforehand.
pub fn next_phase(current: Phase, event: PhaseEvent) -> Result<Phase> {
    use DescriptionKind::{Answer, Offer};
    use Phase::*;

    let next = match (current, event) {
        (_, PhaseEvent::Close) => Closed,
        (Closed, _) => return Err(NegotiationError::invalid_state(event.operation(), current)),

        (Idle | Stable, PhaseEvent::CreateOffer) => HaveLocalOffer,
        (HaveRemoteOffer, PhaseEvent::CreateAnswer) => Stable,

        (HaveLocalOffer, PhaseEvent::ApplyRemote(Answer)) => Stable,
        // Both sides offering at once (glare) is not resolved here
        (HaveLocalOffer, PhaseEvent::ApplyRemote(Offer)) => {
            return Err(NegotiationError::UnexpectedKind {
                received: Offer,
                phase: current,
            })
        }
        (Idle | Stable, PhaseEvent::ApplyRemote(Offer)) => HaveRemoteOffer,

        _ => return Err(NegotiationError::invalid_state(event.operation(), current)),
    };
    Ok(next)
}

/// One recorded phase change
#[derive(Debug, Clone)]
pub struct TransitionRecord {
    pub from: Phase,
    pub to: Phase,
    pub trigger: &'static str,
    /// Position in the session's lifetime, starting at 1
    pub sequence: u64,
    pub at: Instant,
}

/// Ring of the most recent transitions of a session
#[derive(Debug, Clone)]
pub struct PhaseHistory {
    records: VecDeque<TransitionRecord>,
    limit: usize,
    total: u64,
}

impl PhaseHistory {
    pub fn new(limit: usize) -> Self {
        Self {
            records: VecDeque::with_capacity(limit.min(64)),
            limit,
            total: 0,
        }
    }

    pub fn record(&mut self, from: Phase, to: Phase, trigger: &'static str) {
        self.total += 1;
        if self.limit == 0 {
            return;
        }
        if self.records.len() == self.limit {
            self.records.pop_front();
        }
        self.records.push_back(TransitionRecord {
            from,
            to,
            trigger,
            sequence: self.total,
            at: Instant::now(),
        });
    }

    /// Retained records, oldest first
    pub fn records(&self) -> Vec<TransitionRecord> {
        self.records.iter().cloned().collect()
    }

    /// Transitions recorded over the session's lifetime, including evicted ones
    pub fn total(&self) -> u64 {
        self.total
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use DescriptionKind::{Answer, Offer};

    #[test]
    fn offerer_path() {
        let p = next_phase(Phase::Idle, PhaseEvent::CreateOffer).unwrap();
        assert_eq!(p, Phase::HaveLocalOffer);
        assert_eq!(next_phase(p, PhaseEvent::ApplyRemote(Answer)).unwrap(), Phase::Stable);
    }

    #[test]
    fn answerer_path() {
        let p = next_phase(Phase::Idle, PhaseEvent::ApplyRemote(Offer)).unwrap();
        assert_eq!(p, Phase::HaveRemoteOffer);
        assert_eq!(next_phase(p, PhaseEvent::CreateAnswer).unwrap(), Phase::Stable);
    }

    #[test]
    fn renegotiation_from_stable() {
        assert_eq!(
            next_phase(Phase::Stable, PhaseEvent::CreateOffer).unwrap(),
            Phase::HaveLocalOffer
        );
        assert_eq!(
            next_phase(Phase::Stable, PhaseEvent::ApplyRemote(Offer)).unwrap(),
            Phase::HaveRemoteOffer
        );
    }

    #[test]
    fn answer_before_offer_is_invalid() {
        let err = next_phase(Phase::Idle, PhaseEvent::ApplyRemote(Answer)).unwrap_err();
        assert!(matches!(err, NegotiationError::InvalidState { phase: Phase::Idle, .. }));
        assert!(next_phase(Phase::Idle, PhaseEvent::CreateAnswer).is_err());
        assert!(next_phase(Phase::Stable, PhaseEvent::CreateAnswer).is_err());
    }

    #[test]
    fn offer_while_offering_is_unexpected_kind() {
        let err = next_phase(Phase::HaveLocalOffer, PhaseEvent::ApplyRemote(Offer)).unwrap_err();
        assert!(err.is_fatal_to_session());
    }

    #[test]
    fn no_remote_while_answer_pending() {
        for kind in [Offer, Answer] {
            let err = next_phase(Phase::HaveRemoteOffer, PhaseEvent::ApplyRemote(kind)).unwrap_err();
            assert!(matches!(err, NegotiationError::InvalidState { .. }));
        }
        assert!(next_phase(Phase::HaveLocalOffer, PhaseEvent::CreateOffer).is_err());
    }

    #[test]
    fn closed_is_terminal() {
        for phase in [Phase::Idle, Phase::HaveLocalOffer, Phase::HaveRemoteOffer, Phase::Stable, Phase::Closed] {
            assert_eq!(next_phase(phase, PhaseEvent::Close).unwrap(), Phase::Closed);
        }
        assert!(next_phase(Phase::Closed, PhaseEvent::CreateOffer).is_err());
    }

    #[test]
    fn history_keeps_latest_records() {
        let mut history = PhaseHistory::new(2);
        history.record(Phase::Idle, Phase::HaveLocalOffer, "create_offer");
        history.record(Phase::HaveLocalOffer, Phase::Stable, "apply_remote");
        history.record(Phase::Stable, Phase::Closed, "close");

        let records = history.records();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].trigger, "apply_remote");
        assert_eq!(records[1].sequence, 3);
        assert_eq!(history.total(), 3);
    }
}
