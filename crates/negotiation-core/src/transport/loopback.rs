//! In-process loopback transport
//!
//! Both endpoints of a call live in the same process, the way a single-page
//! WebRTC demo wires a local and a remote peer connection together. Payloads
//! are SDP-shaped text, candidates are host candidates on 127.0.0.1, and the
//! remote stream is announced from the `a=msid` line of the remote
//! description. Offer and answer creation can be delayed or made to fail to
//! exercise the negotiation paths that depend on asynchronous completion.

use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, trace};

use super::{event_channel, SessionTransport, TransportEvent, TransportEventSender, TransportEvents, TransportFactory};
use crate::errors::{NegotiationError, Result};
use crate::media::MediaStream;
use crate::types::{Candidate, Description, DescriptionSlot, SessionId};

/// Highest host candidate priority (type preference 126, local preference 65535)
const HOST_PRIORITY: u32 = 2_130_706_431;

/// Loopback behaviour knobs
#[derive(Debug, Clone)]
pub struct LoopbackConfig {
    /// Host candidates emitted after each local description
    pub host_candidates: usize,
    /// First port used for host candidates
    pub base_port: u16,
    /// Artificial latency of offer/answer creation
    pub creation_delay: Duration,
    /// Make `create_offer` fail with this message
    pub offer_failure: Option<String>,
    /// Make `create_answer` fail with this message
    pub answer_failure: Option<String>,
    /// Make `attach_local_stream` fail with this message
    pub attach_failure: Option<String>,
}

impl Default for LoopbackConfig {
    fn default() -> Self {
        Self {
            host_candidates: 2,
            base_port: 50_000,
            creation_delay: Duration::ZERO,
            offer_failure: None,
            answer_failure: None,
            attach_failure: None,
        }
    }
}

impl LoopbackConfig {
    pub fn with_host_candidates(mut self, count: usize) -> Self {
        self.host_candidates = count;
        self
    }

    pub fn with_creation_delay(mut self, delay: Duration) -> Self {
        self.creation_delay = delay;
        self
    }

    pub fn with_offer_failure(mut self, message: impl Into<String>) -> Self {
        self.offer_failure = Some(message.into());
        self
    }

    pub fn with_answer_failure(mut self, message: impl Into<String>) -> Self {
        self.answer_failure = Some(message.into());
        self
    }

    pub fn with_attach_failure(mut self, message: impl Into<String>) -> Self {
        self.attach_failure = Some(message.into());
        self
    }
}

#[derive(Debug, Default)]
struct LoopbackState {
    local_stream: Option<MediaStream>,
    local: Option<Description>,
    remote: Option<Description>,
    remote_candidates: Vec<Candidate>,
    announced: HashSet<String>,
    gathering_rounds: u32,
    closed: bool,
}

/// Transport endpoint living entirely in memory
#[derive(Debug)]
pub struct LoopbackTransport {
    session_id: SessionId,
    config: LoopbackConfig,
    origin: u64,
    version: AtomicU64,
    events: TransportEventSender,
    state: Mutex<LoopbackState>,
}

impl LoopbackTransport {
    /// Create a transport and the event receiver its session should own
    pub fn new(session_id: SessionId, config: LoopbackConfig) -> (Arc<Self>, TransportEvents) {
        let (events, rx) = event_channel();
        let transport = Arc::new(Self {
            session_id,
            config,
            origin: uuid::Uuid::new_v4().as_u64_pair().0 >> 1,
            version: AtomicU64::new(0),
            events,
            state: Mutex::new(LoopbackState::default()),
        });
        (transport, rx)
    }

    /// Remote candidates ingested so far, in ingestion order
    pub fn remote_candidates(&self) -> Vec<Candidate> {
        self.state.lock().remote_candidates.clone()
    }

    pub fn local_description(&self) -> Option<Description> {
        self.state.lock().local.clone()
    }

    pub fn remote_description(&self) -> Option<Description> {
        self.state.lock().remote.clone()
    }

    pub fn local_stream(&self) -> Option<MediaStream> {
        self.state.lock().local_stream.clone()
    }

    pub fn is_closed(&self) -> bool {
        self.state.lock().closed
    }

    fn emit(&self, event: TransportEvent) {
        trace!("Loopback {} emitting {:?}", self.session_id, event);
        if self.events.send(event).is_err() {
            debug!("Loopback {} event receiver dropped", self.session_id);
        }
    }

    fn ensure_open(&self) -> Result<()> {
        if self.state.lock().closed {
            return Err(NegotiationError::transport(format!(
                "loopback transport for {} is closed",
                self.session_id
            )));
        }
        Ok(())
    }

    async fn simulate_latency(&self) {
        if !self.config.creation_delay.is_zero() {
            tokio::time::sleep(self.config.creation_delay).await;
        }
    }

    /// Render an SDP-shaped payload for the given media lines
    fn render(&self, media: &[MediaLine], stream: Option<&MediaStream>) -> String {
        let version = self.version.fetch_add(1, Ordering::SeqCst);
        let mut sdp = format!(
            "v=0\r\no=- {} {} IN IP4 127.0.0.1\r\ns=-\r\nt=0 0\r\n",
            self.origin, version
        );
        for (index, line) in media.iter().enumerate() {
            sdp.push_str(&format!("m={} 9 UDP/TLS/RTP/SAVPF {}\r\n", line.kind, line.payload_type()));
            sdp.push_str(&format!("a=mid:{}\r\n", index));
            match stream {
                Some(stream) => sdp.push_str(&format!("a=msid:{} {}\r\n", stream.id, line.kind)),
                None => sdp.push_str("a=recvonly\r\n"),
            }
        }
        sdp
    }

    fn gather(&self) {
        let round = {
            let mut state = self.state.lock();
            state.gathering_rounds += 1;
            state.gathering_rounds
        };
        for index in 0..self.config.host_candidates {
            let port = host_port(self.config.base_port, round, index);
            self.emit(TransportEvent::CandidateDiscovered {
                payload: format!(
                    "candidate:{} 1 udp {} 127.0.0.1 {} typ host",
                    index + 1,
                    HOST_PRIORITY - index as u32,
                    port
                ),
                sdp_mid: Some("0".to_string()),
                sdp_mline_index: Some(0),
            });
        }
        self.emit(TransportEvent::GatheringComplete);
    }

    fn announce_remote_stream(&self, description: &Description) {
        let Some(stream) = remote_stream(&description.payload) else {
            return;
        };
        let fresh = self.state.lock().announced.insert(stream.id.clone());
        if fresh {
            self.emit(TransportEvent::RemoteStreamAvailable(stream));
        }
    }
}

/// Port of host candidate `index` in gathering `round` (from 1). Each round
/// takes a block of 100 ports, wrapping within `base_port..=u16::MAX`.
fn host_port(base_port: u16, round: u32, index: usize) -> u16 {
    let span = u64::from(u16::MAX - base_port) + 1;
    let offset = u64::from(round.saturating_sub(1)) * 100 + index as u64;
    base_port + (offset % span) as u16
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct MediaLine {
    kind: &'static str,
}

impl MediaLine {
    const AUDIO: MediaLine = MediaLine { kind: "audio" };
    const VIDEO: MediaLine = MediaLine { kind: "video" };

    fn payload_type(&self) -> u8 {
        if self.kind == "audio" {
            111
        } else {
            96
        }
    }
}

/// Media lines named by the `m=` lines of a payload
fn media_lines(payload: &str) -> Vec<MediaLine> {
    payload
        .lines()
        .filter_map(|line| line.strip_prefix("m="))
        .filter_map(|rest| match rest.split_whitespace().next() {
            Some("audio") => Some(MediaLine::AUDIO),
            Some("video") => Some(MediaLine::VIDEO),
            _ => None,
        })
        .collect()
}

/// Stream announced by the `a=msid` lines of a payload
fn remote_stream(payload: &str) -> Option<MediaStream> {
    let mut id = None;
    let mut has_audio = false;
    let mut has_video = false;
    for line in payload.lines() {
        let Some(rest) = line.strip_prefix("a=msid:") else {
            continue;
        };
        let mut parts = rest.split_whitespace();
        let stream_id = parts.next()?;
        match parts.next() {
            Some("audio") => has_audio = true,
            Some("video") => has_video = true,
            _ => {}
        }
        id.get_or_insert_with(|| stream_id.to_string());
    }
    id.map(|id| MediaStream::new(id, has_audio, has_video))
}

#[async_trait]
impl SessionTransport for LoopbackTransport {
    async fn create_offer(&self) -> Result<String> {
        self.simulate_latency().await;
        self.ensure_open()?;
        if let Some(message) = &self.config.offer_failure {
            return Err(NegotiationError::transport(message.clone()));
        }

        let stream = self.local_stream();
        let media = match &stream {
            Some(s) => {
                let mut lines = Vec::new();
                if s.has_audio {
                    lines.push(MediaLine::AUDIO);
                }
                if s.has_video {
                    lines.push(MediaLine::VIDEO);
                }
                lines
            }
            None => vec![MediaLine::AUDIO, MediaLine::VIDEO],
        };
        Ok(self.render(&media, stream.as_ref()))
    }

    async fn create_answer(&self, offer: &Description) -> Result<String> {
        self.simulate_latency().await;
        self.ensure_open()?;
        if let Some(message) = &self.config.answer_failure {
            return Err(NegotiationError::transport(message.clone()));
        }

        let media = media_lines(&offer.payload);
        if media.is_empty() {
            return Err(NegotiationError::transport("offer carries no media lines"));
        }
        let stream = self.local_stream();
        Ok(self.render(&media, stream.as_ref()))
    }

    async fn apply_description(&self, slot: DescriptionSlot, description: &Description) -> Result<()> {
        self.ensure_open()?;
        match slot {
            DescriptionSlot::Local => {
                self.state.lock().local = Some(description.clone());
                self.gather();
            }
            DescriptionSlot::Remote => {
                self.state.lock().remote = Some(description.clone());
                self.announce_remote_stream(description);
            }
        }
        Ok(())
    }

    fn add_remote_candidate(&self, candidate: &Candidate) -> Result<()> {
        let mut state = self.state.lock();
        if state.closed {
            return Err(NegotiationError::transport("loopback transport is closed"));
        }
        trace!("Loopback {} ingesting candidate #{}", self.session_id, candidate.sequence);
        state.remote_candidates.push(candidate.clone());
        Ok(())
    }

    fn attach_local_stream(&self, stream: &MediaStream) -> Result<()> {
        self.ensure_open()?;
        if let Some(message) = &self.config.attach_failure {
            return Err(NegotiationError::transport(message.clone()));
        }
        self.state.lock().local_stream = Some(stream.clone());
        Ok(())
    }

    async fn close(&self) {
        self.state.lock().closed = true;
        debug!("Loopback transport for {} closed", self.session_id);
    }
}

/// Factory handing out loopback transports and keeping them inspectable
#[derive(Debug, Default)]
pub struct LoopbackFactory {
    config: LoopbackConfig,
    transports: DashMap<SessionId, Arc<LoopbackTransport>>,
}

impl LoopbackFactory {
    pub fn new(config: LoopbackConfig) -> Self {
        Self {
            config,
            transports: DashMap::new(),
        }
    }

    /// Transport created for `session_id`, if any
    pub fn transport(&self, session_id: &SessionId) -> Option<Arc<LoopbackTransport>> {
        self.transports.get(session_id).map(|t| t.value().clone())
    }

    /// Transports handed out and not yet released
    pub fn len(&self) -> usize {
        self.transports.len()
    }

    pub fn is_empty(&self) -> bool {
        self.transports.is_empty()
    }
}

impl TransportFactory for LoopbackFactory {
    fn create(&self, session_id: &SessionId) -> Result<(Arc<dyn SessionTransport>, TransportEvents)> {
        let (transport, events) = LoopbackTransport::new(session_id.clone(), self.config.clone());
        self.transports.insert(session_id.clone(), transport.clone());
        Ok((transport, events))
    }

    fn release(&self, session_id: &SessionId) {
        if self.transports.remove(session_id).is_some() {
            debug!("Released loopback transport for {}", session_id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn offer_without_stream_is_recvonly() {
        let (transport, _events) = LoopbackTransport::new(SessionId::new(), LoopbackConfig::default());
        let offer = transport.create_offer().await.unwrap();
        assert!(offer.starts_with("v=0\r\n"));
        assert_eq!(media_lines(&offer).len(), 2);
        assert!(offer.contains("a=recvonly"));
        assert!(remote_stream(&offer).is_none());
    }

    #[tokio::test]
    async fn answer_mirrors_offer_media() {
        let (offerer, _a) = LoopbackTransport::new(SessionId::new(), LoopbackConfig::default());
        offerer
            .attach_local_stream(&MediaStream::new("cam", true, false))
            .unwrap();
        let offer = Description::offer(offerer.create_offer().await.unwrap(), 1);
        assert_eq!(media_lines(&offer.payload), vec![MediaLine::AUDIO]);

        let (answerer, _b) = LoopbackTransport::new(SessionId::new(), LoopbackConfig::default());
        let answer = answerer.create_answer(&offer).await.unwrap();
        assert_eq!(media_lines(&answer), vec![MediaLine::AUDIO]);
    }

    #[tokio::test]
    async fn local_description_triggers_gathering() {
        let config = LoopbackConfig::default().with_host_candidates(3);
        let (transport, mut events) = LoopbackTransport::new(SessionId::new(), config);
        let offer = Description::offer(transport.create_offer().await.unwrap(), 1);
        transport.apply_description(DescriptionSlot::Local, &offer).await.unwrap();

        let mut candidates = Vec::new();
        loop {
            match events.recv().await.unwrap() {
                TransportEvent::CandidateDiscovered { payload, .. } => candidates.push(payload),
                TransportEvent::GatheringComplete => break,
                other => panic!("unexpected event {:?}", other),
            }
        }
        assert_eq!(candidates.len(), 3);
        assert!(candidates[0].ends_with("127.0.0.1 50000 typ host"));
    }

    #[test]
    fn host_ports_stay_within_range() {
        assert_eq!(host_port(50_000, 1, 0), 50_000);
        assert_eq!(host_port(50_000, 2, 1), 50_101);
        assert!(host_port(50_000, 700, 1) >= 50_000);
        assert!(host_port(50_000, u32::MAX, usize::MAX) >= 50_000);
        assert_eq!(host_port(u16::MAX, 9, 3), u16::MAX);
        assert_eq!(host_port(0, 657, 0), 64);
    }

    #[tokio::test]
    async fn repeated_gathering_near_top_of_port_range() {
        let config = LoopbackConfig {
            base_port: 65_530,
            ..LoopbackConfig::default().with_host_candidates(4)
        };
        let (transport, mut events) = LoopbackTransport::new(SessionId::new(), config);
        let offer = Description::offer(transport.create_offer().await.unwrap(), 1);
        for _ in 0..700 {
            transport.apply_description(DescriptionSlot::Local, &offer).await.unwrap();
        }

        let mut ports = Vec::new();
        while let Ok(event) = events.try_recv() {
            if let TransportEvent::CandidateDiscovered { payload, .. } = event {
                let port: u16 = payload.split_whitespace().nth(5).unwrap().parse().unwrap();
                ports.push(port);
            }
        }
        assert_eq!(ports.len(), 2_800);
        assert!(ports.iter().all(|port| *port >= 65_530));
    }

    #[tokio::test]
    async fn remote_stream_announced_once() {
        let (transport, mut events) = LoopbackTransport::new(SessionId::new(), LoopbackConfig::default());
        let payload = "v=0\r\nm=audio 9 UDP/TLS/RTP/SAVPF 111\r\na=msid:mic audio\r\n";
        transport
            .apply_description(DescriptionSlot::Remote, &Description::offer(payload, 1))
            .await
            .unwrap();
        transport
            .apply_description(DescriptionSlot::Remote, &Description::offer(payload, 2))
            .await
            .unwrap();

        assert_eq!(
            events.recv().await.unwrap(),
            TransportEvent::RemoteStreamAvailable(MediaStream::new("mic", true, false))
        );
        assert!(events.try_recv().is_err());
    }

    #[tokio::test]
    async fn injected_offer_failure() {
        let config = LoopbackConfig::default().with_offer_failure("no ICE servers");
        let (transport, _events) = LoopbackTransport::new(SessionId::new(), config);
        let err = transport.create_offer().await.unwrap_err();
        assert!(matches!(err, NegotiationError::Transport { .. }));
    }

    #[tokio::test]
    async fn closed_transport_rejects_candidates() {
        let (transport, _events) = LoopbackTransport::new(SessionId::new(), LoopbackConfig::default());
        transport.close().await;
        let candidate = Candidate::new(SessionId::new(), "candidate:1", 1);
        assert!(transport.add_remote_candidate(&candidate).is_err());
        assert!(transport.is_closed());
    }
}
