//! Event Ordering Guard
//!
//! Serializes every mutation of one session. Candidate-discovery callbacks,
//! remote descriptions and offer/answer completions all arrive from
//! independent tasks; each enters the guard before touching session state, so
//! no transition is ever observed half-applied.
//!
//! The guard is per session, never global. A section must not be held while
//! calling into another session: two sessions routing to each other would
//! otherwise each wait on the other's guard.

use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use tokio::sync::{Mutex, MutexGuard};
use tracing::trace;

use crate::types::SessionId;

/// Per-session async lock with traced sections
#[derive(Debug)]
pub struct OrderingGuard<T> {
    session_id: SessionId,
    inner: Mutex<T>,
    sections: AtomicU64,
}

impl<T> OrderingGuard<T> {
    pub fn new(session_id: SessionId, value: T) -> Self {
        Self {
            session_id,
            inner: Mutex::new(value),
            sections: AtomicU64::new(0),
        }
    }

    /// Wait for exclusive access and open a section named `operation`
    pub async fn enter(&self, operation: &'static str) -> Section<'_, T> {
        let guard = self.inner.lock().await;
        self.open(guard, operation)
    }

    /// Open a section only if no other section is active
    pub fn try_enter(&self, operation: &'static str) -> Option<Section<'_, T>> {
        self.inner
            .try_lock()
            .ok()
            .map(|guard| self.open(guard, operation))
    }

    /// Total sections opened so far
    pub fn sections(&self) -> u64 {
        self.sections.load(Ordering::Relaxed)
    }

    pub fn session_id(&self) -> &SessionId {
        &self.session_id
    }

    fn open<'a>(&'a self, guard: MutexGuard<'a, T>, operation: &'static str) -> Section<'a, T> {
        let number = self.sections.fetch_add(1, Ordering::Relaxed) + 1;
        trace!(session_id = %self.session_id, operation, number, "entered section");
        Section {
            guard,
            operation,
            session_id: &self.session_id,
            number,
            entered: Instant::now(),
        }
    }
}

/// Exclusive access to guarded session state; released on drop
pub struct Section<'a, T> {
    guard: MutexGuard<'a, T>,
    operation: &'static str,
    session_id: &'a SessionId,
    number: u64,
    entered: Instant,
}

impl<T> Section<'_, T> {
    pub fn operation(&self) -> &'static str {
        self.operation
    }
}

impl<T> Deref for Section<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.guard
    }
}

impl<T> DerefMut for Section<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        &mut self.guard
    }
}

impl<T> Drop for Section<'_, T> {
    fn drop(&mut self) {
        trace!(
            session_id = %self.session_id,
            operation = self.operation,
            number = self.number,
            held_us = self.entered.elapsed().as_micros() as u64,
            "left section"
        );
    }
}
