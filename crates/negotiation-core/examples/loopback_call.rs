//! Loopback call demo
//!
//! Captures a synthetic stream, negotiates a caller and a callee living in
//! the same process, lets candidates trickle, then hangs up.
//!
//! ```text
//! cargo run -p rvoip-negotiation-core --example loopback_call [config.toml]
//! RUST_LOG=debug cargo run -p rvoip-negotiation-core --example loopback_call
//! ```

use std::sync::Arc;
use std::time::Duration;

use rvoip_negotiation_core::prelude::*;
use rvoip_negotiation_core::{setup_logging, LoggingConfig};
use tokio_stream::StreamExt;
use tracing::{info, warn};

#[tokio::main]
async fn main() -> Result<()> {
    let config = match std::env::args().nth(1) {
        Some(path) => CallConfig::from_file(path)?,
        None => CallConfig::default()
            .with_creation_delay(Duration::from_millis(50))
            .with_logging(LoggingConfig::default().with_file_info()),
    };
    setup_logging(&config.logging)?;

    let sink = Arc::new(CollectingMediaSink::new());
    let (call, _transports) = CallController::loopback(&config, Arc::new(SyntheticMediaSource::new()), sink.clone())?;

    let mut events = call.coordinator().event_stream();
    let watcher = tokio::spawn(async move {
        while let Some(event) = events.next().await {
            match event {
                Ok(event) => info!("coordinator: {:?}", event),
                Err(e) => warn!("coordinator events lagged: {}", e),
            }
        }
    });

    // Start
    let stream = call.start().await?;
    info!("Local stream {} (audio: {}, video: {})", stream.id, stream.has_audio, stream.has_video);

    // Call
    call.call().await?;
    tokio::time::sleep(Duration::from_millis(200)).await;

    if let (Some(caller), Some(callee)) = (call.caller().await, call.callee().await) {
        for session in [caller, callee] {
            let snapshot = session.snapshot().await;
            info!(
                "{}: {} as {:?}, local #{} remote #{}",
                snapshot.session_id, snapshot.phase, snapshot.role, snapshot.local_sequence, snapshot.remote_sequence
            );
        }
    }
    for remote in sink.attached() {
        info!("Rendering remote stream {}", remote.id);
    }
    info!("Stats: {:?}", call.coordinator().stats());

    // Hang up
    call.hang_up().await?;
    watcher.abort();
    Ok(())
}
