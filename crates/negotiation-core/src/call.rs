//! Call control surface
//!
//! `CallController` drives a one-to-one call between two in-process
//! endpoints: `start` captures local media, `call` creates both peer
//! sessions and negotiates them, `hang_up` tears everything down.
//!
//! ```text
//!   Idle --start--> MediaReady --call--> InCall
//!    ^                  |                  |
//!    +-----hang_up------+------hang_up-----+
//! ```

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::config::{CallConfig, NegotiationConfig};
use crate::coordinator::NegotiationCoordinator;
use crate::errors::{NegotiationError, Result};
use crate::media::{MediaSink, MediaSource, MediaStream};
use crate::session::PeerSession;
use crate::transport::{LoopbackFactory, TransportFactory};
use crate::types::SessionId;

/// Where the controller is in the call lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CallState {
    /// Nothing acquired
    Idle,
    /// Local media captured, no sessions yet
    MediaReady,
    /// Both sessions negotiated
    InCall,
}

impl std::fmt::Display for CallState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CallState::Idle => write!(f, "idle"),
            CallState::MediaReady => write!(f, "media-ready"),
            CallState::InCall => write!(f, "in-call"),
        }
    }
}

#[derive(Debug)]
struct CallInner {
    state: CallState,
    local_stream: Option<MediaStream>,
    caller: Option<Arc<PeerSession>>,
    callee: Option<Arc<PeerSession>>,
}

/// Start / call / hang-up controller for a loopback call
pub struct CallController {
    config: NegotiationConfig,
    factory: Arc<dyn TransportFactory>,
    media_source: Arc<dyn MediaSource>,
    media_sink: Arc<dyn MediaSink>,
    coordinator: NegotiationCoordinator,
    inner: Mutex<CallInner>,
}

impl CallController {
    pub fn new(
        config: NegotiationConfig,
        factory: Arc<dyn TransportFactory>,
        media_source: Arc<dyn MediaSource>,
        media_sink: Arc<dyn MediaSink>,
    ) -> Self {
        Self {
            coordinator: NegotiationCoordinator::new(config.clone()),
            config,
            factory,
            media_source,
            media_sink,
            inner: Mutex::new(CallInner {
                state: CallState::Idle,
                local_stream: None,
                caller: None,
                callee: None,
            }),
        }
    }

    /// Controller over loopback transports built from `config`
    pub fn loopback(
        config: &CallConfig,
        media_source: Arc<dyn MediaSource>,
        media_sink: Arc<dyn MediaSink>,
    ) -> Result<(Self, Arc<LoopbackFactory>)> {
        config.validate()?;
        let factory = Arc::new(LoopbackFactory::new(config.loopback()));
        let controller = Self::new(config.negotiation.clone(), factory.clone(), media_source, media_sink);
        Ok((controller, factory))
    }

    /// Acquire local media. On failure the controller stays idle.
    pub async fn start(&self) -> Result<MediaStream> {
        let mut inner = self.inner.lock().await;
        if inner.state != CallState::Idle {
            return Err(NegotiationError::invalid_call_state("start", inner.state));
        }

        let stream = match self.media_source.acquire_local_media().await {
            Ok(stream) => stream,
            Err(e) => {
                warn!("Local media unavailable: {}", e);
                return Err(e);
            }
        };
        info!("Call media ready with stream {}", stream.id);
        inner.local_stream = Some(stream.clone());
        inner.state = CallState::MediaReady;
        Ok(stream)
    }

    /// Create the caller and callee sessions and negotiate them.
    ///
    /// The caller sends the local stream; the callee renders what it
    /// receives. A failed call closes both sessions, releases their
    /// transports and returns to `MediaReady`.
    pub async fn call(&self) -> Result<()> {
        let mut inner = self.inner.lock().await;
        let stream = match (inner.state, &inner.local_stream) {
            (CallState::MediaReady, Some(stream)) => stream.clone(),
            (state, _) => return Err(NegotiationError::invalid_call_state("call", state)),
        };

        let caller = Arc::new(self.create_session()?);
        let callee = match self.create_session() {
            Ok(session) => Arc::new(session.with_media_sink(self.media_sink.clone())),
            Err(e) => {
                self.discard(&[caller]).await;
                return Err(e);
            }
        };

        info!("Calling {} -> {}", caller.id(), callee.id());
        let negotiated = match caller.attach_local_stream(stream).await {
            Ok(()) => self.coordinator.start(caller.clone(), callee.clone()).await,
            Err(e) => Err(e),
        };
        if let Err(e) = negotiated {
            warn!("Call {} -> {} failed: {}", caller.id(), callee.id(), e);
            self.discard(&[caller, callee]).await;
            return Err(e);
        }

        inner.caller = Some(caller);
        inner.callee = Some(callee);
        inner.state = CallState::InCall;
        Ok(())
    }

    /// Tear down sessions and release media. A no-op when idle.
    pub async fn hang_up(&self) -> Result<()> {
        let mut inner = self.inner.lock().await;
        if inner.state == CallState::Idle {
            return Ok(());
        }

        if let Some(caller) = inner.caller.take() {
            if !self.coordinator.hang_up_pair(caller.id()).await {
                caller.close().await;
            }
            self.factory.release(caller.id());
        }
        if let Some(callee) = inner.callee.take() {
            callee.close().await;
            self.factory.release(callee.id());
        }
        if let Some(stream) = inner.local_stream.take() {
            self.media_source.release(&stream).await;
        }
        inner.state = CallState::Idle;
        info!("Call hung up");
        Ok(())
    }

    pub async fn state(&self) -> CallState {
        self.inner.lock().await.state
    }

    pub async fn caller(&self) -> Option<Arc<PeerSession>> {
        self.inner.lock().await.caller.clone()
    }

    pub async fn callee(&self) -> Option<Arc<PeerSession>> {
        self.inner.lock().await.callee.clone()
    }

    pub fn coordinator(&self) -> &NegotiationCoordinator {
        &self.coordinator
    }

    fn create_session(&self) -> Result<PeerSession> {
        let id = SessionId::new();
        let (transport, events) = self.factory.create(&id)?;
        Ok(PeerSession::new(id, transport, events, self.config.clone()))
    }

    /// Close sessions that never made it into a call
    async fn discard(&self, sessions: &[Arc<PeerSession>]) {
        for session in sessions {
            session.close().await;
            self.factory.release(session.id());
        }
    }
}

impl std::fmt::Debug for CallController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CallController")
            .field("coordinator", &self.coordinator)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::media::{CollectingMediaSink, SyntheticMediaSource};

    fn controller(source: SyntheticMediaSource) -> (CallController, Arc<SyntheticMediaSource>) {
        let source = Arc::new(source);
        let (controller, _) = CallController::loopback(
            &CallConfig::default(),
            source.clone(),
            Arc::new(CollectingMediaSink::new()),
        )
        .unwrap();
        (controller, source)
    }

    #[tokio::test]
    async fn call_without_media_is_invalid() {
        let (controller, _) = controller(SyntheticMediaSource::new());
        let err = controller.call().await.unwrap_err();
        assert!(matches!(
            err,
            NegotiationError::InvalidCallState { operation: "call", state: CallState::Idle }
        ));
        assert_eq!(err.to_string(), "Invalid call state for call: call is idle");
        assert_eq!(controller.state().await, CallState::Idle);
    }

    #[tokio::test]
    async fn media_failure_stays_idle() {
        let (controller, _) = controller(SyntheticMediaSource::failing("no camera"));
        let err = controller.start().await.unwrap_err();
        assert!(matches!(err, NegotiationError::MediaAcquisition { .. }));
        assert_eq!(controller.state().await, CallState::Idle);
    }

    #[tokio::test]
    async fn start_twice_is_invalid() {
        let (controller, _) = controller(SyntheticMediaSource::new());
        controller.start().await.unwrap();
        let err = controller.start().await.unwrap_err();
        assert!(matches!(
            err,
            NegotiationError::InvalidCallState { operation: "start", state: CallState::MediaReady }
        ));
        assert_eq!(controller.state().await, CallState::MediaReady);
    }

    #[tokio::test]
    async fn hang_up_from_media_ready_releases_stream() {
        let (controller, source) = controller(SyntheticMediaSource::new());
        controller.start().await.unwrap();
        assert_eq!(source.outstanding(), 1);

        controller.hang_up().await.unwrap();
        controller.hang_up().await.unwrap();
        assert_eq!(source.outstanding(), 0);
        assert_eq!(controller.state().await, CallState::Idle);
    }
}
