//! Configuration structures for shardscroll
//!
//! This module provides the coordinator configuration, including parameter
//! validation, builder pattern setters and JSON persistence.

use crate::error::ScrollError;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Twenty four hours, the largest keep-alive accepted by default
pub const DEFAULT_MAX_KEEP_ALIVE_MS: u64 = 24 * 60 * 60 * 1000;

/// Configuration for a scroll coordinator
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScrollConfig {
    /// Keep-alive applied to shard requests when the scroll request carries none
    pub default_keep_alive_ms: Option<u64>,
    /// Largest keep-alive a scroll request may ask for
    pub max_keep_alive_ms: u64,
    /// Largest number of shard contexts a single request may reference
    pub max_shard_contexts: usize,
    /// Emit a debug event for every shard reply
    pub enable_detailed_logging: bool,
}

impl Default for ScrollConfig {
    fn default() -> Self {
        Self {
            default_keep_alive_ms: Some(60_000),
            max_keep_alive_ms: DEFAULT_MAX_KEEP_ALIVE_MS,
            max_shard_contexts: 8192,
            enable_detailed_logging: false,
        }
    }
}

impl ScrollConfig {
    /// Create a new configuration with default values
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the keep-alive used when a request carries none
    pub fn default_keep_alive_ms(mut self, keep_alive_ms: Option<u64>) -> Self {
        self.default_keep_alive_ms = keep_alive_ms;
        self
    }

    /// Set the largest accepted keep-alive
    pub fn max_keep_alive_ms(mut self, keep_alive_ms: u64) -> Self {
        self.max_keep_alive_ms = keep_alive_ms;
        self
    }

    /// Set the largest number of shard contexts per request
    pub fn max_shard_contexts(mut self, count: usize) -> Self {
        self.max_shard_contexts = count;
        self
    }

    /// Enable or disable per-shard debug events
    pub fn enable_detailed_logging(mut self, enabled: bool) -> Self {
        self.enable_detailed_logging = enabled;
        self
    }

    /// Default keep-alive as a duration
    pub fn default_keep_alive(&self) -> Option<Duration> {
        self.default_keep_alive_ms.map(Duration::from_millis)
    }

    /// Largest accepted keep-alive as a duration
    pub fn max_keep_alive(&self) -> Duration {
        Duration::from_millis(self.max_keep_alive_ms)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ScrollError> {
        if self.max_shard_contexts == 0 {
            return Err(ScrollError::config_error(
                "max_shard_contexts",
                "must be greater than 0",
                "Set max_shard_contexts to the largest shard count a scroll may span (default: 8192)",
            ));
        }

        if self.max_keep_alive_ms == 0 {
            return Err(ScrollError::config_error(
                "max_keep_alive_ms",
                "must be greater than 0",
                "Set max_keep_alive_ms to a positive value in milliseconds (default: 24 hours)",
            ));
        }

        if let Some(keep_alive_ms) = self.default_keep_alive_ms {
            if keep_alive_ms == 0 {
                return Err(ScrollError::config_error(
                    "default_keep_alive_ms",
                    "must be greater than 0 when set",
                    "Use None to disable the default keep-alive, or a positive value such as 60000",
                ));
            }

            if keep_alive_ms > self.max_keep_alive_ms {
                return Err(ScrollError::config_error(
                    "default_keep_alive_ms",
                    format!(
                        "value {} exceeds max_keep_alive_ms ({})",
                        keep_alive_ms, self.max_keep_alive_ms
                    ),
                    "Ensure default_keep_alive_ms <= max_keep_alive_ms",
                ));
            }
        }

        Ok(())
    }

    /// Build the configuration after validation
    pub fn build(self) -> Result<Self, ScrollError> {
        self.validate()?;
        Ok(self)
    }

    /// Serialize the configuration as pretty-printed JSON
    pub fn to_json(&self) -> Result<String, ScrollError> {
        serde_json::to_string_pretty(self)
            .map_err(|e| ScrollError::Config(format!("Failed to serialize configuration: {}", e)))
    }

    /// Parse and validate a configuration from JSON
    ///
    /// Missing fields take their default values.
    pub fn from_json(json: &str) -> Result<Self, ScrollError> {
        let config: Self = serde_json::from_str(json)
            .map_err(|e| ScrollError::Config(format!("Failed to parse configuration: {}", e)))?;
        config.build()
    }

    /// Check a request keep-alive against the configured maximum
    pub(crate) fn check_keep_alive(&self, keep_alive: Duration) -> Result<(), ScrollError> {
        if keep_alive > self.max_keep_alive() {
            return Err(ScrollError::invalid_input(
                "keep_alive",
                format!(
                    "Keep alive for scroll ({}ms) is too large. It must be less than ({}ms)",
                    keep_alive.as_millis(),
                    self.max_keep_alive_ms
                ),
                "Request a shorter keep-alive or raise max_keep_alive_ms",
            ));
        }
        Ok(())
    }

    /// Check a request's shard context count against the configured maximum
    pub(crate) fn check_shard_count(&self, count: usize) -> Result<(), ScrollError> {
        if count > self.max_shard_contexts {
            return Err(ScrollError::invalid_input(
                "context",
                format!(
                    "request references {} shard contexts, more than the allowed {}",
                    count, self.max_shard_contexts
                ),
                "Split the request or raise max_shard_contexts",
            ));
        }
        Ok(())
    }
}
