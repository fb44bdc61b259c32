//! Negotiation configuration
//!
//! `NegotiationConfig` can be built in code with the `with_*` helpers or
//! loaded from TOML:
//!
//! ```toml
//! max_queued_candidates = 128
//! operation_timeout_ms = 5000
//! history_limit = 32
//! event_capacity = 64
//! ```
//!
//! `CallConfig` wraps it for the loopback call controller, with the
//! negotiation settings in a `[negotiation]` table and subscriber settings
//! in a `[logging]` table.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::errors::{NegotiationError, Result};
use crate::logging::LoggingConfig;
use crate::transport::LoopbackConfig;

/// Default bound on candidates buffered before a remote description exists
pub const DEFAULT_MAX_QUEUED_CANDIDATES: usize = 256;

/// Default bound on a single offer/answer creation
pub const DEFAULT_OPERATION_TIMEOUT_MS: u64 = 10_000;

/// Default number of phase transitions kept per session
pub const DEFAULT_HISTORY_LIMIT: usize = 64;

/// Default capacity of the coordinator event broadcast channel
pub const DEFAULT_EVENT_CAPACITY: usize = 256;

/// Configuration shared by peer sessions and the coordinator
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NegotiationConfig {
    /// Maximum candidates a session buffers before failing with overflow
    pub max_queued_candidates: usize,

    /// Upper bound for `create_offer` / `create_answer`, in milliseconds
    pub operation_timeout_ms: u64,

    /// Phase transitions retained per session
    pub history_limit: usize,

    /// Capacity of the coordinator event channel
    pub event_capacity: usize,
}

impl Default for NegotiationConfig {
    fn default() -> Self {
        Self {
            max_queued_candidates: DEFAULT_MAX_QUEUED_CANDIDATES,
            operation_timeout_ms: DEFAULT_OPERATION_TIMEOUT_MS,
            history_limit: DEFAULT_HISTORY_LIMIT,
            event_capacity: DEFAULT_EVENT_CAPACITY,
        }
    }
}

impl NegotiationConfig {
    /// Create a configuration with default values
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the candidate queue bound
    pub fn with_max_queued_candidates(mut self, limit: usize) -> Self {
        self.max_queued_candidates = limit;
        self
    }

    /// Set the offer/answer creation timeout
    pub fn with_operation_timeout(mut self, timeout: Duration) -> Self {
        self.operation_timeout_ms = timeout.as_millis() as u64;
        self
    }

    /// Set the per-session transition history size
    pub fn with_history_limit(mut self, limit: usize) -> Self {
        self.history_limit = limit;
        self
    }

    /// Set the coordinator event channel capacity
    pub fn with_event_capacity(mut self, capacity: usize) -> Self {
        self.event_capacity = capacity;
        self
    }

    /// Offer/answer creation timeout as a `Duration`
    pub fn operation_timeout(&self) -> Duration {
        Duration::from_millis(self.operation_timeout_ms)
    }

    /// Check that all values are usable
    pub fn validate(&self) -> Result<()> {
        if self.max_queued_candidates == 0 {
            return Err(NegotiationError::config(
                "max_queued_candidates must be greater than zero",
            ));
        }
        if self.operation_timeout_ms == 0 {
            return Err(NegotiationError::config(
                "operation_timeout_ms must be greater than zero",
            ));
        }
        if self.event_capacity == 0 {
            return Err(NegotiationError::config(
                "event_capacity must be greater than zero",
            ));
        }
        Ok(())
    }

    /// Parse and validate a TOML document
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Load and validate a TOML file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            NegotiationError::config(format!("Failed to read {}: {}", path.display(), e))
        })?;
        Self::from_toml_str(&content)
    }
}

/// Settings for a loopback call
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CallConfig {
    pub negotiation: NegotiationConfig,

    pub logging: LoggingConfig,

    /// Host candidates each loopback endpoint trickles
    pub host_candidates: usize,

    /// First host candidate port
    pub base_port: u16,

    /// Simulated offer/answer creation latency, in milliseconds
    pub creation_delay_ms: u64,
}

impl Default for CallConfig {
    fn default() -> Self {
        let loopback = LoopbackConfig::default();
        Self {
            negotiation: NegotiationConfig::default(),
            logging: LoggingConfig::default(),
            host_candidates: loopback.host_candidates,
            base_port: loopback.base_port,
            creation_delay_ms: 0,
        }
    }
}

impl CallConfig {
    pub fn with_negotiation(mut self, negotiation: NegotiationConfig) -> Self {
        self.negotiation = negotiation;
        self
    }

    pub fn with_logging(mut self, logging: LoggingConfig) -> Self {
        self.logging = logging;
        self
    }

    pub fn with_host_candidates(mut self, count: usize) -> Self {
        self.host_candidates = count;
        self
    }

    pub fn with_creation_delay(mut self, delay: Duration) -> Self {
        self.creation_delay_ms = delay.as_millis() as u64;
        self
    }

    /// Loopback transport settings derived from this configuration
    pub fn loopback(&self) -> LoopbackConfig {
        LoopbackConfig {
            host_candidates: self.host_candidates,
            base_port: self.base_port,
            creation_delay: Duration::from_millis(self.creation_delay_ms),
            ..LoopbackConfig::default()
        }
    }

    pub fn validate(&self) -> Result<()> {
        self.negotiation.validate()?;
        self.logging.validate()?;
        if self.host_candidates > self.negotiation.max_queued_candidates {
            return Err(NegotiationError::config(format!(
                "host_candidates ({}) exceeds max_queued_candidates ({})",
                self.host_candidates, self.negotiation.max_queued_candidates
            )));
        }
        Ok(())
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            NegotiationError::config(format!("Failed to read {}: {}", path.display(), e))
        })?;
        Self::from_toml_str(&content)
    }
}
