//! # RVoIP Negotiation Core
//!
//! Offer/answer negotiation and trickle-candidate coordination between two
//! peer sessions.
//!
//! - **Peer Session**: one endpoint's phase machine over its description
//!   store and candidate queue
//! - **Negotiation Coordinator**: mediator that relays descriptions and
//!   candidates between paired sessions
//! - **Event Ordering Guard**: per-session serialization of asynchronous
//!   completions and callbacks
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use rvoip_negotiation_core::prelude::*;
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let sink = Arc::new(CollectingMediaSink::new());
//!     let (call, _transports) = CallController::loopback(
//!         &CallConfig::default(),
//!         Arc::new(SyntheticMediaSource::new()),
//!         sink.clone(),
//!     )?;
//!
//!     call.start().await?;
//!     call.call().await?;
//!     call.hang_up().await?;
//!     Ok(())
//! }
//! ```
//!
//! ## Candidate buffering
//!
//! Candidates can arrive before the description they belong to. Each session
//! buffers them until its first remote description is applied, replays them
//! to the transport in arrival order, and forwards later ones immediately.
//! The transport is never assumed to buffer on the session's behalf.

pub mod call;
pub mod candidate_queue;
pub mod config;
pub mod coordinator;
pub mod description_store;
pub mod errors;
pub mod logging;
pub mod media;
pub mod ordering;
pub mod session;
pub mod signaling;
pub mod transport;
pub mod types;

pub use call::{CallController, CallState};
pub use candidate_queue::{CandidateQueue, Enqueued};
pub use config::{CallConfig, NegotiationConfig};
pub use coordinator::{CoordinatorEvent, CoordinatorStats, EventStream, NegotiationCoordinator};
pub use description_store::DescriptionStore;
pub use errors::{NegotiationError, Result};
pub use logging::{parse_log_level, setup_logging, LogFormat, LoggingConfig};
pub use media::{CollectingMediaSink, MediaSink, MediaSource, MediaStream, SyntheticMediaSource};
pub use ordering::OrderingGuard;
pub use session::{PeerSession, SessionSnapshot};
pub use signaling::SignalingMessage;
pub use transport::{
    LoopbackConfig, LoopbackFactory, LoopbackTransport, SessionTransport, TransportEvent, TransportFactory,
};
pub use types::{Candidate, Description, DescriptionKind, DescriptionSlot, Phase, Role, SessionId};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Commonly used types
pub mod prelude {
    pub use crate::call::{CallController, CallState};
    pub use crate::config::{CallConfig, NegotiationConfig};
    pub use crate::coordinator::{CoordinatorEvent, NegotiationCoordinator};
    pub use crate::errors::{NegotiationError, Result};
    pub use crate::media::{CollectingMediaSink, MediaSink, MediaSource, MediaStream, SyntheticMediaSource};
    pub use crate::session::PeerSession;
    pub use crate::signaling::SignalingMessage;
    pub use crate::transport::{LoopbackConfig, LoopbackTransport, SessionTransport, TransportFactory};
    pub use crate::types::{Candidate, Description, DescriptionKind, Phase, Role, SessionId};
}
