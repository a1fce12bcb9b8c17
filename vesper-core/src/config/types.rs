//! Configuration data structures for Vesper core.
//!
//! These structs are populated by deserializing a TOML configuration file.
//! Fields not present in the source fall back to values from
//! [`super::defaults`], and unknown fields are rejected via
//! `#[serde(deny_unknown_fields)]`.

use super::defaults;
use serde::Deserialize;
use std::path::PathBuf;

/// Configuration settings for the logging subsystem.
///
/// ```
/// use vesper_core::config::LoggingConfig;
///
/// let config: LoggingConfig = toml::from_str(
///     r#"
///     level = "debug"
///     format = "json"
///     "#,
/// )
/// .unwrap();
/// assert_eq!(config.level, "debug");
/// assert_eq!(config.file_path, None);
/// ```
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LoggingConfig {
    /// The minimum log level to record.
    /// Valid values (case-insensitive): "trace", "debug", "info", "warn", "error".
    #[serde(default = "defaults::default_log_level")]
    pub level: String,
    /// Optional path to a file where logs should be written.
    /// If `None`, file logging is disabled.
    #[serde(default = "defaults::default_log_file_path")]
    pub file_path: Option<PathBuf>,
    /// The format for log messages written to a file: "text" or "json".
    #[serde(default = "defaults::default_log_format")]
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        defaults::default_logging_config()
    }
}

/// Policy knobs for the per-surface presentation bookkeeping queue.
///
/// The queue is a bounded FIFO of in-flight submission/presentation records;
/// when it overflows, the oldest records are force-failed and evicted in
/// batches. Only the shape of that policy is fixed — the bounds are tuned
/// here.
#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PresentationConfig {
    /// Maximum number of in-flight records per surface.
    #[serde(default = "defaults::default_max_in_flight")]
    pub max_in_flight: usize,
    /// How many of the oldest records are evicted when the queue overflows.
    #[serde(default = "defaults::default_eviction_batch")]
    pub eviction_batch: usize,
}

impl Default for PresentationConfig {
    fn default() -> Self {
        defaults::default_presentation_config()
    }
}

/// Root configuration structure for the Vesper core system.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CoreConfig {
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub presentation: PresentationConfig,
}

impl CoreConfig {
    /// Validates the configuration after parsing.
    ///
    /// Invalid values are rejected rather than silently normalized, so a
    /// typo in a config file fails loudly at startup instead of producing a
    /// half-working runtime.
    pub fn validate(&self) -> Result<(), crate::error::ConfigError> {
        use crate::error::ConfigError;

        let level = self.logging.level.to_lowercase();
        if !["trace", "debug", "info", "warn", "error"].contains(&level.as_str()) {
            return Err(ConfigError::ValidationError(format!(
                "unknown log level '{}'",
                self.logging.level
            )));
        }
        let format = self.logging.format.to_lowercase();
        if !["text", "json"].contains(&format.as_str()) {
            return Err(ConfigError::ValidationError(format!(
                "unknown log format '{}'",
                self.logging.format
            )));
        }
        if self.presentation.max_in_flight < 2 {
            return Err(ConfigError::ValidationError(format!(
                "presentation.max_in_flight must be at least 2, got {}",
                self.presentation.max_in_flight
            )));
        }
        if self.presentation.eviction_batch == 0
            || self.presentation.eviction_batch > self.presentation.max_in_flight
        {
            return Err(ConfigError::ValidationError(format!(
                "presentation.eviction_batch must be in 1..={}, got {}",
                self.presentation.max_in_flight, self.presentation.eviction_batch
            )));
        }
        Ok(())
    }
}
