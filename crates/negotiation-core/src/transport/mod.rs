//! Transport-path collaborator
//!
//! The transport layer performs the actual path discovery and media delivery.
//! The negotiation core treats it as a black box: it asks it to produce
//! offer/answer payloads, hands it the descriptions and remote candidates the
//! session accepted, and listens to the events it emits.

pub mod loopback;

use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::mpsc;

use crate::errors::Result;
use crate::media::MediaStream;
use crate::types::{Candidate, Description, DescriptionSlot, SessionId};

pub use loopback::{LoopbackConfig, LoopbackFactory, LoopbackTransport};

/// Events emitted by a transport for its owning session
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// New local candidate found (trickle)
    CandidateDiscovered {
        payload: String,
        sdp_mid: Option<String>,
        sdp_mline_index: Option<u16>,
    },

    /// No more local candidates will be emitted for the current description
    GatheringComplete,

    /// The remote side's media became available
    RemoteStreamAvailable(MediaStream),
}

/// Sending half of a transport's event channel
pub type TransportEventSender = mpsc::UnboundedSender<TransportEvent>;

/// Receiving half of a transport's event channel, owned by the session
pub type TransportEvents = mpsc::UnboundedReceiver<TransportEvent>;

/// Create the event channel a transport emits on.
///
/// Unbounded so a transport may emit from inside a guarded session section
/// without waiting on the router that drains it.
pub fn event_channel() -> (TransportEventSender, TransportEvents) {
    mpsc::unbounded_channel()
}

/// One session's view of the transport layer
#[async_trait]
pub trait SessionTransport: Send + Sync {
    /// Produce an offer payload
    async fn create_offer(&self) -> Result<String>;

    /// Produce an answer payload for `offer`
    async fn create_answer(&self, offer: &Description) -> Result<String>;

    /// A description was accepted into `slot`
    async fn apply_description(&self, slot: DescriptionSlot, description: &Description) -> Result<()>;

    /// Ingest a remote candidate; must not block
    fn add_remote_candidate(&self, candidate: &Candidate) -> Result<()>;

    /// Attach outgoing local media
    fn attach_local_stream(&self, stream: &MediaStream) -> Result<()>;

    /// Release transport resources
    async fn close(&self);
}

/// Builds a transport per session
pub trait TransportFactory: Send + Sync {
    fn create(&self, session_id: &SessionId) -> Result<(Arc<dyn SessionTransport>, TransportEvents)>;

    /// Forget the transport created for `session_id` once its session is done
    fn release(&self, _session_id: &SessionId) {}
}
