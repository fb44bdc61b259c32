//! Negotiation Coordinator
//!
//! Mediator between two peer sessions. Sessions never reference each other;
//! the coordinator owns the pairing, runs the offer/answer sequence and
//! relays every description and candidate as a [`SignalingMessage`].
//!
//! ```text
//!   offerer                 coordinator                 answerer
//!      | create_offer            |                          |
//!      |------------------------>| Description ------------>| apply_remote
//!      |                         |<------------------------ | create_answer
//!      | apply_remote <----------| Description              |
//!      | CandidateDiscovered --->| Candidate -------------->| add_candidate
//!      | add_candidate <---------| Candidate <------------- | CandidateDiscovered
//! ```

mod events;
mod routing;

pub use events::{CoordinatorEvent, CoordinatorStats, EventStream};

use dashmap::DashMap;
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::NegotiationConfig;
use crate::errors::{NegotiationError, Result};
use crate::session::PeerSession;
use crate::signaling::SignalingMessage;
use crate::types::{Candidate, SessionId};
use events::StatsCounters;

/// An offerer/answerer pairing
#[derive(Debug, Clone, PartialEq, Eq)]
struct Pair {
    offerer: SessionId,
    answerer: SessionId,
}

impl Pair {
    fn peer_of(&self, id: &SessionId) -> &SessionId {
        if *id == self.offerer {
            &self.answerer
        } else {
            &self.offerer
        }
    }
}

pub(crate) struct CoordinatorInner {
    sessions: DashMap<SessionId, Arc<PeerSession>>,
    routes: DashMap<SessionId, Pair>,
    routers: Mutex<Vec<(SessionId, JoinHandle<()>)>>,
    events: broadcast::Sender<CoordinatorEvent>,
    stats: StatsCounters,
}

impl CoordinatorInner {
    pub(crate) fn session(&self, id: &SessionId) -> Option<Arc<PeerSession>> {
        self.sessions.get(id).map(|s| s.value().clone())
    }

    fn pair_of(&self, id: &SessionId) -> Option<Pair> {
        self.routes.get(id).map(|p| p.value().clone())
    }

    fn emit(&self, event: CoordinatorEvent) {
        // No subscribers is not an error
        let _ = self.events.send(event);
    }

    /// Address a candidate discovered by `source` to its peer
    pub(crate) async fn route_candidate(&self, source: &SessionId, candidate: Candidate) -> Result<()> {
        let pair = self.pair_of(source).ok_or_else(|| NegotiationError::SessionNotFound {
            session_id: source.clone(),
        })?;
        let dest = pair.peer_of(source).clone();
        self.deliver(SignalingMessage::candidate(source.clone(), dest, candidate))
            .await
    }

    /// Apply one relayed message to its destination session
    pub(crate) async fn deliver(&self, message: SignalingMessage) -> Result<()> {
        StatsCounters::bump(&self.stats.messages_relayed);
        debug!(
            "Relaying {} from {} to {}",
            message.kind(),
            message.from(),
            message.to()
        );

        let session = self
            .session(message.to())
            .ok_or_else(|| NegotiationError::SessionNotFound {
                session_id: message.to().clone(),
            })?;

        match message {
            SignalingMessage::Description { from, to, description } => {
                let kind = description.kind;
                match session.apply_remote(description).await {
                    Err(e) if e.is_fatal_to_session() => {
                        warn!("{} from {} failed {}: {}", kind, from, to, e);
                        self.fail_pair(&to, &e).await;
                        Err(e)
                    }
                    other => other,
                }
            }
            SignalingMessage::Candidate { from, to, candidate } => {
                let sequence = candidate.sequence;
                match session.add_candidate(candidate).await {
                    Ok(_) => {
                        StatsCounters::bump(&self.stats.candidates_routed);
                        self.emit(CoordinatorEvent::CandidateRouted { from, to, sequence });
                        Ok(())
                    }
                    Err(NegotiationError::SessionClosed { .. }) => {
                        debug!("Dropping candidate #{} for closed session {}", sequence, to);
                        Ok(())
                    }
                    Err(e) if e.is_fatal_to_session() => {
                        warn!("Candidate #{} from {} failed {}: {}", sequence, from, to, e);
                        self.fail_pair(&to, &e).await;
                        Err(e)
                    }
                    Err(e) => Err(e),
                }
            }
            SignalingMessage::Bye { from, to } => {
                info!("Session {} hung up on {}", from, to);
                if session.close().await {
                    self.emit(CoordinatorEvent::SessionClosed { session_id: to });
                }
                Ok(())
            }
        }
    }

    /// Tear down the pair of `id` after a fatal error and report the failure
    /// once. Returns `false` if the pair was already gone.
    async fn fail_pair(&self, id: &SessionId, cause: &NegotiationError) -> bool {
        let Some(pair) = self.pair_of(id) else {
            return false;
        };
        if !self.teardown_pair(id).await {
            return false;
        }
        StatsCounters::bump(&self.stats.failed);
        self.emit(CoordinatorEvent::NegotiationFailed {
            offerer: pair.offerer,
            answerer: pair.answerer,
            reason: cause.to_string(),
        });
        true
    }

    /// Close both ends of the pair containing `id`, drop its routes and stop
    /// its routers. Returns `false` if no such pair is registered.
    async fn teardown_pair(&self, id: &SessionId) -> bool {
        let Some(pair) = self.pair_of(id) else {
            return false;
        };
        let ids = [pair.offerer.clone(), pair.answerer.clone()];
        let mut removed = false;
        for session_id in &ids {
            removed |= self.routes.remove(session_id).is_some();
        }
        if !removed {
            return false;
        }

        for session_id in &ids {
            if let Some((_, session)) = self.sessions.remove(session_id) {
                if session.close().await {
                    self.emit(CoordinatorEvent::SessionClosed {
                        session_id: session_id.clone(),
                    });
                }
            }
        }
        self.abort_routers(|owner| ids.contains(owner));
        info!("Tore down pair {} <-> {}", pair.offerer, pair.answerer);
        true
    }

    fn abort_routers(&self, mut matches: impl FnMut(&SessionId) -> bool) {
        let mut routers = self.routers.lock();
        routers.retain(|(owner, handle)| {
            if matches(owner) {
                handle.abort();
                false
            } else {
                true
            }
        });
    }
}

/// Routes offer/answer and trickled candidates between paired sessions
#[derive(Clone)]
pub struct NegotiationCoordinator {
    inner: Arc<CoordinatorInner>,
}

impl NegotiationCoordinator {
    pub fn new(config: NegotiationConfig) -> Self {
        let (events, _) = broadcast::channel(config.event_capacity.max(1));
        Self {
            inner: Arc::new(CoordinatorInner {
                sessions: DashMap::new(),
                routes: DashMap::new(),
                routers: Mutex::new(Vec::new()),
                events,
                stats: StatsCounters::default(),
            }),
        }
    }

    /// Pair `offerer` with `answerer` and run the offer/answer exchange.
    ///
    /// Candidate routing starts before the offer is created and keeps running
    /// after this returns. The first failing step tears down both sessions and
    /// is reported as `NegotiationFailed`.
    pub async fn start(&self, offerer: Arc<PeerSession>, answerer: Arc<PeerSession>) -> Result<()> {
        let offerer_id = offerer.id().clone();
        let answerer_id = answerer.id().clone();
        info!("Starting negotiation {} -> {}", offerer_id, answerer_id);

        StatsCounters::bump(&self.inner.stats.started);
        self.inner.emit(CoordinatorEvent::NegotiationStarted {
            offerer: offerer_id.clone(),
            answerer: answerer_id.clone(),
        });

        let outcome = match self.register(&offerer, &answerer) {
            Ok(()) => self.exchange(&offerer, &answerer).await.map_err(|e| (e, true)),
            Err(e) => Err((e, false)),
        };

        match outcome {
            Ok(()) => {
                StatsCounters::bump(&self.inner.stats.completed);
                info!("Negotiation {} -> {} completed", offerer_id, answerer_id);
                self.inner.emit(CoordinatorEvent::NegotiationCompleted {
                    offerer: offerer_id,
                    answerer: answerer_id,
                });
                Ok(())
            }
            Err((cause, registered)) => {
                warn!("Negotiation {} -> {} failed: {}", offerer_id, answerer_id, cause);
                if registered {
                    // A fatal relay error has already torn down and reported the pair
                    if !self.inner.fail_pair(&offerer_id, &cause).await && !cause.is_fatal_to_session() {
                        self.report_failure(&offerer_id, &answerer_id, &cause);
                    }
                    for session in [&offerer, &answerer] {
                        session.close().await;
                    }
                } else {
                    // Sessions owned by another pair are left alone
                    for session in [&offerer, &answerer] {
                        if self.inner.sessions.contains_key(session.id()) {
                            continue;
                        }
                        if session.close().await {
                            self.inner.emit(CoordinatorEvent::SessionClosed {
                                session_id: session.id().clone(),
                            });
                        }
                    }
                    self.report_failure(&offerer_id, &answerer_id, &cause);
                }
                Err(NegotiationError::negotiation_failed(cause))
            }
        }
    }

    fn report_failure(&self, offerer: &SessionId, answerer: &SessionId, cause: &NegotiationError) {
        StatsCounters::bump(&self.inner.stats.failed);
        self.inner.emit(CoordinatorEvent::NegotiationFailed {
            offerer: offerer.clone(),
            answerer: answerer.clone(),
            reason: cause.to_string(),
        });
    }

    fn register(&self, offerer: &Arc<PeerSession>, answerer: &Arc<PeerSession>) -> Result<()> {
        let (a, b) = (offerer.id(), answerer.id());
        if a == b {
            return Err(NegotiationError::config(format!("session {} cannot negotiate with itself", a)));
        }
        for id in [a, b] {
            if self.inner.sessions.contains_key(id) {
                return Err(NegotiationError::config(format!("session {} is already registered", id)));
            }
        }
        let offerer_events = offerer
            .take_events()
            .ok_or_else(|| NegotiationError::config(format!("transport events of {} already taken", a)))?;
        let answerer_events = answerer
            .take_events()
            .ok_or_else(|| NegotiationError::config(format!("transport events of {} already taken", b)))?;

        let pair = Pair {
            offerer: a.clone(),
            answerer: b.clone(),
        };
        self.inner.sessions.insert(a.clone(), offerer.clone());
        self.inner.sessions.insert(b.clone(), answerer.clone());
        self.inner.routes.insert(a.clone(), pair.clone());
        self.inner.routes.insert(b.clone(), pair);

        let mut routers = self.inner.routers.lock();
        for (id, events) in [(a, offerer_events), (b, answerer_events)] {
            let handle = tokio::spawn(routing::run_router(self.inner.clone(), id.clone(), events));
            routers.push((id.clone(), handle));
        }
        debug!("Registered pair {} <-> {}", a, b);
        Ok(())
    }

    async fn exchange(&self, offerer: &PeerSession, answerer: &PeerSession) -> Result<()> {
        let offer = offerer.create_offer().await?;
        self.deliver(SignalingMessage::description(
            offerer.id().clone(),
            answerer.id().clone(),
            offer,
        ))
        .await?;

        let answer = answerer.create_answer().await?;
        self.deliver(SignalingMessage::description(
            answerer.id().clone(),
            offerer.id().clone(),
            answer,
        ))
        .await
    }

    /// Apply a relayed message to its destination session
    pub async fn deliver(&self, message: SignalingMessage) -> Result<()> {
        self.inner.deliver(message).await
    }

    /// Tear down the pair containing `session_id`. Returns `false` if it is
    /// not registered.
    pub async fn hang_up_pair(&self, session_id: &SessionId) -> bool {
        self.inner.teardown_pair(session_id).await
    }

    /// Close every registered session and stop all routing. Safe to call
    /// repeatedly; returns the number of sessions this call closed.
    pub async fn hang_up(&self) -> usize {
        self.inner.routes.clear();
        let ids: Vec<SessionId> = self.inner.sessions.iter().map(|s| s.key().clone()).collect();

        let mut closed = 0;
        for id in ids {
            let Some((_, session)) = self.inner.sessions.remove(&id) else {
                continue;
            };
            if session.close().await {
                closed += 1;
                self.inner.emit(CoordinatorEvent::SessionClosed { session_id: id });
            }
        }
        self.inner.abort_routers(|_| true);

        if closed > 0 {
            info!("Hung up {} sessions", closed);
        }
        closed
    }

    pub fn subscribe(&self) -> broadcast::Receiver<CoordinatorEvent> {
        self.inner.events.subscribe()
    }

    /// Events as a `Stream`
    pub fn event_stream(&self) -> EventStream {
        EventStream::new(self.subscribe())
    }

    pub fn stats(&self) -> CoordinatorStats {
        self.inner.stats.snapshot(self.inner.sessions.len())
    }

    pub fn session(&self, session_id: &SessionId) -> Option<Arc<PeerSession>> {
        self.inner.session(session_id)
    }

    /// Session paired with `session_id`
    pub fn peer_of(&self, session_id: &SessionId) -> Option<SessionId> {
        self.inner
            .pair_of(session_id)
            .map(|pair| pair.peer_of(session_id).clone())
    }

    pub fn session_count(&self) -> usize {
        self.inner.sessions.len()
    }
}

impl Default for NegotiationCoordinator {
    fn default() -> Self {
        Self::new(NegotiationConfig::default())
    }
}

impl std::fmt::Debug for NegotiationCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NegotiationCoordinator")
            .field("sessions", &self.inner.sessions.len())
            .field("routers", &self.inner.routers.lock().len())
            .finish()
    }
}
