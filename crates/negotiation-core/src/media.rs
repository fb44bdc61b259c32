//! Media collaborators
//!
//! The core never inspects media. It acquires an opaque local stream handle
//! from a [`MediaSource`], hands it to the offering session, and passes the
//! remote stream to a [`MediaSink`] once negotiation is stable.

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicUsize, Ordering};
use tracing::{debug, info};

use crate::errors::{NegotiationError, Result};

/// Opaque handle to a captured or received media stream
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MediaStream {
    /// Stream identifier, carried in descriptions as `a=msid`
    pub id: String,
    pub has_audio: bool,
    pub has_video: bool,
}

impl MediaStream {
    pub fn new(id: impl Into<String>, has_audio: bool, has_video: bool) -> Self {
        Self {
            id: id.into(),
            has_audio,
            has_video,
        }
    }

    /// Audio and video stream with a fresh id
    pub fn audio_video() -> Self {
        Self::new(format!("stream-{}", uuid::Uuid::new_v4()), true, true)
    }
}

/// Platform capture layer
#[async_trait]
pub trait MediaSource: Send + Sync {
    /// Acquire the local stream, failing with `MediaAcquisition`
    async fn acquire_local_media(&self) -> Result<MediaStream>;

    /// Release a stream previously acquired
    async fn release(&self, stream: &MediaStream);
}

/// Rendering collaborator for received media
pub trait MediaSink: Send + Sync {
    fn attach_remote_stream(&self, stream: MediaStream);
}

/// In-memory capture source producing synthetic audio/video handles
#[derive(Debug, Default)]
pub struct SyntheticMediaSource {
    failure: Option<String>,
    acquired: AtomicUsize,
    released: AtomicUsize,
}

impl SyntheticMediaSource {
    pub fn new() -> Self {
        Self::default()
    }

    /// A source whose every acquisition fails with `reason`
    pub fn failing(reason: impl Into<String>) -> Self {
        Self {
            failure: Some(reason.into()),
            ..Default::default()
        }
    }

    /// Streams currently held by callers
    pub fn outstanding(&self) -> usize {
        self.acquired
            .load(Ordering::SeqCst)
            .saturating_sub(self.released.load(Ordering::SeqCst))
    }
}

#[async_trait]
impl MediaSource for SyntheticMediaSource {
    async fn acquire_local_media(&self) -> Result<MediaStream> {
        if let Some(reason) = &self.failure {
            return Err(NegotiationError::media_acquisition(reason.clone()));
        }
        let stream = MediaStream::audio_video();
        self.acquired.fetch_add(1, Ordering::SeqCst);
        info!("Acquired local media stream {}", stream.id);
        Ok(stream)
    }

    async fn release(&self, stream: &MediaStream) {
        self.released.fetch_add(1, Ordering::SeqCst);
        debug!("Released local media stream {}", stream.id);
    }
}

/// Sink that records every attached stream
#[derive(Debug, Default)]
pub struct CollectingMediaSink {
    streams: Mutex<Vec<MediaStream>>,
}

impl CollectingMediaSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn attached(&self) -> Vec<MediaStream> {
        self.streams.lock().clone()
    }
}

impl MediaSink for CollectingMediaSink {
    fn attach_remote_stream(&self, stream: MediaStream) {
        info!("Remote stream {} attached", stream.id);
        self.streams.lock().push(stream);
    }
}
