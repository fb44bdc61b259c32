//! Peer Session
//!
//! One endpoint's negotiation state machine. A `PeerSession` owns its
//! description store, its candidate queue and its transport, and knows
//! nothing about the session on the other side of the call: descriptions and
//! candidates reach it only through [`PeerSession::apply_remote`] and
//! [`PeerSession::add_candidate`], which the coordinator invokes.
//!
//! Every entry point runs inside the session's ordering guard. Offer and
//! answer creation release the guard while the transport works, then
//! re-validate on completion so that a teardown or a competing transition in
//! the meantime turns the completion into a no-op.

use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::{Arc, Weak};
use tracing::{debug, info, warn};

use super::phase::{next_phase, PhaseEvent, PhaseHistory, TransitionRecord};
use crate::candidate_queue::{CandidateQueue, Enqueued};
use crate::config::NegotiationConfig;
use crate::description_store::DescriptionStore;
use crate::errors::{NegotiationError, Result};
use crate::media::{MediaSink, MediaStream};
use crate::ordering::OrderingGuard;
use crate::transport::{SessionTransport, TransportEvents};
use crate::types::{Candidate, Description, DescriptionKind, DescriptionSlot, Phase, Role, SessionId};

/// Offer or answer creation currently awaiting the transport.
///
/// The creating call holds the only strong reference to `ticket`; if that
/// call is dropped mid-await the marker is dead and no longer blocks.
#[derive(Debug, Clone)]
struct PendingCreation {
    operation: &'static str,
    epoch: u64,
    ticket: Weak<()>,
}

impl PendingCreation {
    fn is_live(&self, epoch: u64) -> bool {
        self.epoch == epoch && self.ticket.strong_count() > 0
    }
}

/// Mutable state guarded per session
#[derive(Debug)]
struct SessionState {
    phase: Phase,
    role: Role,
    store: DescriptionStore,
    queue: CandidateQueue,
    history: PhaseHistory,
    /// Bumped by every phase change; completions compare against it
    epoch: u64,
    pending: Option<PendingCreation>,
    local_stream: Option<MediaStream>,
    remote_streams: Vec<MediaStream>,
    attached_streams: HashSet<String>,
}

/// Point-in-time view of a session
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionSnapshot {
    pub session_id: SessionId,
    pub phase: Phase,
    pub role: Role,
    pub local_sequence: u64,
    pub remote_sequence: u64,
    pub queued_candidates: usize,
    pub draining: bool,
    pub local_stream: Option<String>,
}

/// One endpoint's offer/answer state machine
pub struct PeerSession {
    id: SessionId,
    config: NegotiationConfig,
    transport: Arc<dyn SessionTransport>,
    media_sink: Option<Arc<dyn MediaSink>>,
    state: OrderingGuard<SessionState>,
    events: Mutex<Option<TransportEvents>>,
}

impl PeerSession {
    /// Create a session over `transport`, taking ownership of its event stream
    pub fn new(
        id: SessionId,
        transport: Arc<dyn SessionTransport>,
        events: TransportEvents,
        config: NegotiationConfig,
    ) -> Self {
        let state = SessionState {
            phase: Phase::Idle,
            role: Role::Idle,
            store: DescriptionStore::new(),
            queue: CandidateQueue::new(config.max_queued_candidates),
            history: PhaseHistory::new(config.history_limit),
            epoch: 0,
            pending: None,
            local_stream: None,
            remote_streams: Vec::new(),
            attached_streams: HashSet::new(),
        };
        debug!("Created peer session {}", id);
        Self {
            state: OrderingGuard::new(id.clone(), state),
            id,
            config,
            transport,
            media_sink: None,
            events: Mutex::new(Some(events)),
        }
    }

    /// Deliver remote media to `sink` once negotiation is stable
    pub fn with_media_sink(mut self, sink: Arc<dyn MediaSink>) -> Self {
        self.media_sink = Some(sink);
        self
    }

    pub fn id(&self) -> &SessionId {
        &self.id
    }

    /// Hand the transport event stream to whoever routes it. Yields once.
    pub fn take_events(&self) -> Option<TransportEvents> {
        self.events.lock().take()
    }

    /// Create an offer, store it as the local description and move to
    /// `HaveLocalOffer`.
    pub async fn create_offer(&self) -> Result<Description> {
        self.create_local(DescriptionKind::Offer).await
    }

    /// Create an answer to the applied remote offer, store it as the local
    /// description and move to `Stable`.
    pub async fn create_answer(&self) -> Result<Description> {
        self.create_local(DescriptionKind::Answer).await
    }

    async fn create_local(&self, kind: DescriptionKind) -> Result<Description> {
        let event = match kind {
            DescriptionKind::Offer => PhaseEvent::CreateOffer,
            DescriptionKind::Answer => PhaseEvent::CreateAnswer,
        };
        let operation = event.operation();

        let ticket = Arc::new(());
        let (epoch, remote_offer) = {
            let mut state = self.state.enter(operation).await;
            self.ensure_open(&state)?;
            next_phase(state.phase, event)?;
            // Superseded or abandoned creations do not block
            if let Some(pending) = state.pending.as_ref().filter(|p| p.is_live(state.epoch)) {
                debug!(
                    "Session {} rejected {}: {} already in flight",
                    self.id, operation, pending.operation
                );
                return Err(NegotiationError::invalid_state(operation, state.phase));
            }
            let remote_offer = match kind {
                DescriptionKind::Offer => None,
                DescriptionKind::Answer => Some(
                    state
                        .store
                        .remote()
                        .cloned()
                        .ok_or_else(|| NegotiationError::invalid_state(operation, state.phase))?,
                ),
            };
            state.pending = Some(PendingCreation {
                operation,
                epoch: state.epoch,
                ticket: Arc::downgrade(&ticket),
            });
            (state.epoch, remote_offer)
        };

        let timeout = self.config.operation_timeout();
        let produced = tokio::time::timeout(timeout, async {
            match &remote_offer {
                None => self.transport.create_offer().await,
                Some(offer) => self.transport.create_answer(offer).await,
            }
        })
        .await;

        let mut state = self.state.enter(operation).await;
        if state.phase == Phase::Closed {
            debug!("Session {} closed while {} was outstanding", self.id, operation);
            return Err(NegotiationError::session_closed(&self.id));
        }
        if matches!(&state.pending, Some(p) if p.ticket.ptr_eq(&Arc::downgrade(&ticket))) {
            state.pending = None;
        }

        let payload = match produced {
            Ok(Ok(payload)) => payload,
            Ok(Err(e)) => {
                warn!("Session {} {} failed: {}", self.id, operation, e);
                return Err(e);
            }
            Err(_) => {
                warn!("Session {} {} timed out", self.id, operation);
                return Err(NegotiationError::Timeout {
                    operation,
                    after_ms: self.config.operation_timeout_ms,
                });
            }
        };

        if state.epoch != epoch {
            info!(
                "Session {} discarding superseded {} result (now {})",
                self.id, kind, state.phase
            );
            return Err(NegotiationError::invalid_state(operation, state.phase));
        }
        let next = next_phase(state.phase, event)?;

        let sequence = state.store.sequence(DescriptionSlot::Local) + 1;
        let description = Description::new(kind, payload, sequence);
        self.transport
            .apply_description(DescriptionSlot::Local, &description)
            .await?;
        state.store.set_local(description.clone())?;

        if state.role == Role::Idle && kind == DescriptionKind::Offer {
            state.role = Role::Offerer;
        }
        self.transition(&mut state, next, operation);
        if next == Phase::Stable {
            self.flush_remote_streams(&mut state);
        }
        Ok(description)
    }

    /// Apply a description produced by the other side.
    ///
    /// Checks run in order: closed, stale sequence, phase/kind. A stale
    /// description leaves the session untouched; an offer received while
    /// offering closes the session.
    pub async fn apply_remote(&self, description: Description) -> Result<()> {
        let mut state = self.state.enter("apply_remote").await;
        self.ensure_open(&state)?;

        if let Err(e) = state.store.check_fresh(DescriptionSlot::Remote, &description) {
            warn!("Session {} dropping stale remote {}: {}", self.id, description.kind, e);
            return Err(e);
        }

        let next = match next_phase(state.phase, PhaseEvent::ApplyRemote(description.kind)) {
            Ok(next) => next,
            Err(e) if e.is_fatal_to_session() => {
                warn!("Session {} closing on fatal error: {}", self.id, e);
                self.close_locked(&mut state, "apply_remote").await;
                return Err(e);
            }
            Err(e) => return Err(e),
        };

        self.transport
            .apply_description(DescriptionSlot::Remote, &description)
            .await?;
        let kind = description.kind;
        let first_remote = state.store.set_remote(description)?;

        if first_remote {
            let transport = self.transport.clone();
            let session_id = self.id.clone();
            let replayed = state.queue.drain_into(move |candidate: Candidate| {
                if let Err(e) = transport.add_remote_candidate(&candidate) {
                    warn!(
                        "Session {} transport rejected candidate #{}: {}",
                        session_id, candidate.sequence, e
                    );
                }
            })?;
            debug!("Session {} replayed {} queued candidates", self.id, replayed);
        }

        if state.role == Role::Idle && kind == DescriptionKind::Offer {
            state.role = Role::Answerer;
        }
        self.transition(&mut state, next, "apply_remote");
        if next == Phase::Stable {
            self.flush_remote_streams(&mut state);
        }
        Ok(())
    }

    /// Accept a candidate from the other side; buffered until the first
    /// remote description, forwarded to the transport afterwards.
    pub async fn add_candidate(&self, candidate: Candidate) -> Result<Enqueued> {
        let mut state = self.state.enter("add_candidate").await;
        self.ensure_open(&state)?;

        match state.queue.enqueue(candidate) {
            Ok(outcome) => Ok(outcome),
            Err(e) => {
                if e.is_fatal_to_session() {
                    warn!("Session {} closing on fatal error: {}", self.id, e);
                    self.close_locked(&mut state, "add_candidate").await;
                }
                Err(e)
            }
        }
    }

    /// Attach the outgoing local stream
    pub async fn attach_local_stream(&self, stream: MediaStream) -> Result<()> {
        let mut state = self.state.enter("attach_local_stream").await;
        self.ensure_open(&state)?;
        self.transport.attach_local_stream(&stream)?;
        debug!("Session {} sending local stream {}", self.id, stream.id);
        state.local_stream = Some(stream);
        Ok(())
    }

    /// The transport reported remote media; it reaches the sink once stable
    pub async fn remote_stream_available(&self, stream: MediaStream) -> Result<()> {
        let mut state = self.state.enter("remote_stream_available").await;
        self.ensure_open(&state)?;
        if state.attached_streams.contains(&stream.id)
            || state.remote_streams.iter().any(|s| s.id == stream.id)
        {
            return Ok(());
        }
        state.remote_streams.push(stream);
        if state.phase == Phase::Stable {
            self.flush_remote_streams(&mut state);
        }
        Ok(())
    }

    /// Tear the session down. Returns `false` if it was already closed.
    pub async fn close(&self) -> bool {
        let mut state = self.state.enter("close").await;
        if state.phase == Phase::Closed {
            return false;
        }
        self.close_locked(&mut state, "close").await;
        true
    }

    pub async fn phase(&self) -> Phase {
        self.state.enter("phase").await.phase
    }

    pub async fn role(&self) -> Role {
        self.state.enter("role").await.role
    }

    pub async fn is_closed(&self) -> bool {
        self.phase().await == Phase::Closed
    }

    pub async fn local_description(&self) -> Option<Description> {
        self.state.enter("local_description").await.store.local().cloned()
    }

    pub async fn remote_description(&self) -> Option<Description> {
        self.state.enter("remote_description").await.store.remote().cloned()
    }

    /// Candidates waiting for the first remote description
    pub async fn queued_candidates(&self) -> usize {
        self.state.enter("queued_candidates").await.queue.len()
    }

    /// Recorded phase transitions, oldest first
    pub async fn history(&self) -> Vec<TransitionRecord> {
        self.state.enter("history").await.history.records()
    }

    pub async fn snapshot(&self) -> SessionSnapshot {
        let state = self.state.enter("snapshot").await;
        SessionSnapshot {
            session_id: self.id.clone(),
            phase: state.phase,
            role: state.role,
            local_sequence: state.store.sequence(DescriptionSlot::Local),
            remote_sequence: state.store.sequence(DescriptionSlot::Remote),
            queued_candidates: state.queue.len(),
            draining: state.queue.is_draining(),
            local_stream: state.local_stream.as_ref().map(|s| s.id.clone()),
        }
    }

    fn ensure_open(&self, state: &SessionState) -> Result<()> {
        if state.phase == Phase::Closed {
            return Err(NegotiationError::session_closed(&self.id));
        }
        Ok(())
    }

    fn transition(&self, state: &mut SessionState, to: Phase, trigger: &'static str) {
        let from = state.phase;
        state.phase = to;
        state.epoch += 1;
        state.history.record(from, to, trigger);
        debug!("Session {} phase: {} -> {} ({})", self.id, from, to, trigger);
    }

    async fn close_locked(&self, state: &mut SessionState, trigger: &'static str) {
        self.transition(state, Phase::Closed, trigger);
        state.pending = None;
        state.queue.clear();
        state.remote_streams.clear();
        state.local_stream = None;
        self.transport.close().await;
        info!("Session {} closed", self.id);
    }

    fn flush_remote_streams(&self, state: &mut SessionState) {
        for stream in std::mem::take(&mut state.remote_streams) {
            if !state.attached_streams.insert(stream.id.clone()) {
                continue;
            }
            match &self.media_sink {
                Some(sink) => {
                    info!("Session {} attaching remote stream {}", self.id, stream.id);
                    sink.attach_remote_stream(stream);
                }
                None => debug!(
                    "Session {} has no media sink for remote stream {}",
                    self.id, stream.id
                ),
            }
        }
    }
}

impl std::fmt::Debug for PeerSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PeerSession")
            .field("id", &self.id)
            .field("has_media_sink", &self.media_sink.is_some())
            .finish()
    }
}
