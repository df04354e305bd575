//! Event bus configuration.
//!
//! Configuration can be built in code with the `with_*` builders or loaded
//! from a TOML document:
//!
//! ```toml
//! default_timeout_ms = 5000
//! consumer_context = "inherit_sender"
//! pending_degraded_threshold = 1000
//! ```

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

/// Default reply timeout for `request` (30 seconds).
pub const DEFAULT_TIMEOUT_MS: u64 = 30_000;

/// Default number of in-flight requests above which the bus reports itself
/// degraded.
pub const DEFAULT_PENDING_DEGRADED_THRESHOLD: usize = 10_000;

/// Errors from loading or validating configuration.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// The configuration file could not be read
    #[error("Failed to read config file '{path}': {source}")]
    Io {
        /// Path that was read
        path: String,
        /// Underlying I/O error
        #[source]
        source: std::io::Error,
    },

    /// The document is not valid TOML for this configuration
    #[error("Failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    /// A value is out of range
    #[error("Invalid config: {0}")]
    Validation(String),
}

/// Which context a consumer invocation starts from.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConsumerContext {
    /// Start from a fork of the sender's context, captured after the outbound
    /// chain ran.
    #[default]
    InheritSender,

    /// Start from an empty context. Only what the inbound chain restores from
    /// headers is visible to the consumer.
    Fresh,
}

/// Settings for a [`LocalEventBus`](crate::bus::LocalEventBus).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct BusConfig {
    /// Reply timeout applied when a request does not set its own
    pub default_timeout_ms: u64,

    /// Context a consumer invocation starts from
    pub consumer_context: ConsumerContext,

    /// In-flight request count at which health turns degraded
    pub pending_degraded_threshold: usize,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            default_timeout_ms: DEFAULT_TIMEOUT_MS,
            consumer_context: ConsumerContext::default(),
            pending_degraded_threshold: DEFAULT_PENDING_DEGRADED_THRESHOLD,
        }
    }
}

impl BusConfig {
    /// Default configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the default reply timeout.
    #[must_use]
    pub fn with_default_timeout(mut self, timeout: Duration) -> Self {
        self.default_timeout_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX);
        self
    }

    /// Set the consumer context mode.
    #[must_use]
    pub const fn with_consumer_context(mut self, mode: ConsumerContext) -> Self {
        self.consumer_context = mode;
        self
    }

    /// Set the degraded-health threshold for in-flight requests.
    #[must_use]
    pub const fn with_pending_degraded_threshold(mut self, threshold: usize) -> Self {
        self.pending_degraded_threshold = threshold;
        self
    }

    /// Default reply timeout as a [`Duration`].
    #[must_use]
    pub const fn default_timeout(&self) -> Duration {
        Duration::from_millis(self.default_timeout_ms)
    }

    /// Check that every value is usable.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Validation`] for a zero timeout or a zero
    /// degraded threshold.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.default_timeout_ms == 0 {
            return Err(ConfigError::Validation(
                "default_timeout_ms must be greater than zero".to_string(),
            ));
        }
        if self.pending_degraded_threshold == 0 {
            return Err(ConfigError::Validation(
                "pending_degraded_threshold must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }

    /// Parse and validate a TOML document. Missing fields take their defaults.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Parse`] for malformed TOML or unknown fields and
    /// [`ConfigError::Validation`] for out-of-range values.
    pub fn from_toml_str(source: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(source)?;
        config.validate()?;
        Ok(config)
    }

    /// Read, parse, and validate a TOML file.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Io`] if the file cannot be read, otherwise the
    /// errors of [`BusConfig::from_toml_str`].
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let source = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_toml_str(&source)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)] // Test code can use unwrap/expect
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = BusConfig::default();
        assert_eq!(config.default_timeout(), Duration::from_secs(30));
        assert_eq!(config.consumer_context, ConsumerContext::InheritSender);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_builders() {
        let config = BusConfig::new()
            .with_default_timeout(Duration::from_millis(250))
            .with_consumer_context(ConsumerContext::Fresh)
            .with_pending_degraded_threshold(8);

        assert_eq!(config.default_timeout_ms, 250);
        assert_eq!(config.consumer_context, ConsumerContext::Fresh);
        assert_eq!(config.pending_degraded_threshold, 8);
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config = BusConfig::from_toml_str("consumer_context = \"fresh\"").unwrap();
        assert_eq!(config.consumer_context, ConsumerContext::Fresh);
        assert_eq!(config.default_timeout_ms, DEFAULT_TIMEOUT_MS);
    }

    #[test]
    fn test_zero_timeout_rejected() {
        let err = BusConfig::from_toml_str("default_timeout_ms = 0").unwrap_err();
        assert!(matches!(err, ConfigError::Validation(_)));
    }

    #[test]
    fn test_unknown_field_rejected() {
        let err = BusConfig::from_toml_str("timeout = 5").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn test_missing_file() {
        let err = BusConfig::load("/definitely/not/here.toml").unwrap_err();
        assert!(err.to_string().contains("/definitely/not/here.toml"));
    }
}
