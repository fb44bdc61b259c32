//! Candidate Queue
//!
//! Buffers connectivity candidates that arrive before a session has a remote
//! description, then replays them exactly once, in arrival order, when the
//! first remote description is applied. After that single drain the queue is
//! pass-through: every new candidate goes straight to the sink.

use std::collections::VecDeque;
use std::fmt;

use crate::errors::{NegotiationError, Result};
use crate::types::Candidate;

/// Destination for drained and forwarded candidates
pub type CandidateSink = Box<dyn FnMut(Candidate) + Send>;

/// Outcome of [`CandidateQueue::enqueue`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Enqueued {
    /// Held until the first remote description; `position` is 1-based
    Buffered { position: usize },
    /// Handed to the sink immediately
    Forwarded,
}

/// FIFO buffer with a one-shot switch to pass-through
pub struct CandidateQueue {
    pending: VecDeque<Candidate>,
    limit: usize,
    sink: Option<CandidateSink>,
    forwarded: u64,
}

impl CandidateQueue {
    /// Create a queue that buffers at most `limit` candidates
    pub fn new(limit: usize) -> Self {
        Self {
            pending: VecDeque::new(),
            limit,
            sink: None,
            forwarded: 0,
        }
    }

    /// Append a candidate, or forward it if the queue already drained.
    pub fn enqueue(&mut self, candidate: Candidate) -> Result<Enqueued> {
        if let Some(sink) = self.sink.as_mut() {
            sink(candidate);
            self.forwarded += 1;
            return Ok(Enqueued::Forwarded);
        }

        if self.pending.len() >= self.limit {
            return Err(NegotiationError::CandidateOverflow { limit: self.limit });
        }

        self.pending.push_back(candidate);
        Ok(Enqueued::Buffered {
            position: self.pending.len(),
        })
    }

    /// Replay buffered candidates into `sink` and switch to pass-through.
    ///
    /// Returns the number of candidates replayed. May only be called once.
    pub fn drain_into<F>(&mut self, sink: F) -> Result<usize>
    where
        F: FnMut(Candidate) + Send + 'static,
    {
        if self.sink.is_some() {
            return Err(NegotiationError::AlreadyDrained);
        }

        let mut sink: CandidateSink = Box::new(sink);
        let mut replayed = 0;
        while let Some(candidate) = self.pending.pop_front() {
            sink(candidate);
            replayed += 1;
        }
        self.forwarded += replayed as u64;
        self.sink = Some(sink);
        Ok(replayed)
    }

    /// True once the queue has drained and forwards directly
    pub fn is_draining(&self) -> bool {
        self.sink.is_some()
    }

    /// Candidates currently buffered
    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// Total candidates handed to the sink, replayed or forwarded
    pub fn forwarded(&self) -> u64 {
        self.forwarded
    }

    /// Drop buffered candidates and the sink; used on teardown
    pub fn clear(&mut self) {
        self.pending.clear();
        self.sink = None;
    }
}

impl fmt::Debug for CandidateQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CandidateQueue")
            .field("pending", &self.pending.len())
            .field("limit", &self.limit)
            .field("draining", &self.is_draining())
            .field("forwarded", &self.forwarded)
            .finish()
    }
}
