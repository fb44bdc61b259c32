//! Tracing subscriber setup
//!
//! The library itself only emits `tracing` events; binaries and tests call
//! [`setup_logging`] once to install a formatter. Settings normally come from
//! the `[logging]` table of a call configuration:
//!
//! ```toml
//! [logging]
//! level = "debug"
//! format = "json"
//! file_info = true
//! ```

use serde::{Deserialize, Serialize};
use std::str::FromStr;
use tracing::Level;
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::{fmt, EnvFilter};

use crate::errors::{NegotiationError, Result};

/// Output format of the installed subscriber
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Plain,
    Json,
}

/// `[logging]` settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Minimum level, e.g. `"info"`; `RUST_LOG` directives are added on top
    pub level: String,

    pub format: LogFormat,

    /// Include source file and line in each event
    pub file_info: bool,

    /// Log span enter/exit
    pub spans: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Plain,
            file_info: false,
            spans: false,
        }
    }
}

impl LoggingConfig {
    pub fn with_level(mut self, level: impl Into<String>) -> Self {
        self.level = level.into();
        self
    }

    pub fn with_format(mut self, format: LogFormat) -> Self {
        self.format = format;
        self
    }

    pub fn with_file_info(mut self) -> Self {
        self.file_info = true;
        self
    }

    /// Parsed minimum level
    pub fn level(&self) -> Result<Level> {
        parse_log_level(&self.level)
    }

    pub fn validate(&self) -> Result<()> {
        self.level().map(|_| ())
    }
}

/// Install a global subscriber. Fails if one is already installed or the
/// level does not parse.
pub fn setup_logging(config: &LoggingConfig) -> Result<()> {
    let level = config.level()?;
    let filter = EnvFilter::from_default_env().add_directive(level.into());
    let span_events = if config.spans { FmtSpan::ACTIVE } else { FmtSpan::NONE };

    let builder = fmt::Subscriber::builder()
        .with_env_filter(filter)
        .with_span_events(span_events)
        .with_file(config.file_info)
        .with_line_number(config.file_info);

    let installed = match config.format {
        LogFormat::Json => builder.json().try_init(),
        LogFormat::Plain => builder.try_init(),
    };
    installed.map_err(|e| NegotiationError::config(format!("Failed to install subscriber: {}", e)))?;

    tracing::debug!("Logging at {} ({:?})", level, config.format);
    Ok(())
}

/// Parse a log level, ignoring case
pub fn parse_log_level(level: &str) -> Result<Level> {
    Level::from_str(level.trim())
        .map_err(|_| NegotiationError::config(format!("Invalid log level: {}", level)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_levels_case_insensitively() {
        assert_eq!(parse_log_level("debug").unwrap(), Level::DEBUG);
        assert_eq!(parse_log_level("WARN").unwrap(), Level::WARN);
        assert!(parse_log_level("chatty").is_err());
    }

    #[test]
    fn unknown_level_fails_validation_and_setup() {
        let config = LoggingConfig::default().with_level("chatty");
        assert!(matches!(config.validate(), Err(NegotiationError::Configuration { .. })));
        assert!(matches!(setup_logging(&config), Err(NegotiationError::Configuration { .. })));
    }

    #[test]
    fn second_install_is_reported() {
        let _ = setup_logging(&LoggingConfig::default().with_level("debug"));
        let second = setup_logging(&LoggingConfig::default());
        assert!(matches!(second, Err(NegotiationError::Configuration { .. })));
    }
}
