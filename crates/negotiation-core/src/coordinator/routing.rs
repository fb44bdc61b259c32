//! Per-session router tasks
//!
//! One router consumes each session's transport events. Discovered
//! candidates follow the single symmetric rule: whatever a session finds is
//! addressed to its paired peer and relayed through
//! [`CoordinatorInner::deliver`]. Routers never hold a session guard.

use std::sync::Arc;
use tracing::{debug, trace, warn};

use super::CoordinatorInner;
use crate::errors::NegotiationError;
use crate::transport::{TransportEvent, TransportEvents};
use crate::types::{Candidate, SessionId};

pub(crate) async fn run_router(inner: Arc<CoordinatorInner>, source: SessionId, mut events: TransportEvents) {
    debug!("Router for {} started", source);
    let mut arrivals: u64 = 0;

    while let Some(event) = events.recv().await {
        match event {
            TransportEvent::CandidateDiscovered {
                payload,
                sdp_mid,
                sdp_mline_index,
            } => {
                arrivals += 1;
                let mut candidate = Candidate::new(source.clone(), payload, arrivals);
                candidate.sdp_mid = sdp_mid;
                candidate.sdp_mline_index = sdp_mline_index;

                if let Err(e) = inner.route_candidate(&source, candidate).await {
                    warn!("Router for {} failed to route candidate #{}: {}", source, arrivals, e);
                }
            }
            TransportEvent::GatheringComplete => {
                trace!("Router for {}: gathering complete after {} candidates", source, arrivals);
            }
            TransportEvent::RemoteStreamAvailable(stream) => {
                let Some(session) = inner.session(&source) else {
                    debug!("Router for {}: session gone, dropping stream {}", source, stream.id);
                    continue;
                };
                match session.remote_stream_available(stream).await {
                    Ok(()) | Err(NegotiationError::SessionClosed { .. }) => {}
                    Err(e) => warn!("Router for {}: remote stream rejected: {}", source, e),
                }
            }
        }
    }

    debug!("Router for {} stopped", source);
}
