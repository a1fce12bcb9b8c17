//! Default configuration values for Vesper core.
//!
//! These functions back `serde`'s `default` attributes in the configuration
//! structures, providing sensible values when a field is absent from the
//! configuration file.

use super::types::{LoggingConfig, PresentationConfig};
use std::path::PathBuf;

pub(super) fn default_logging_config() -> LoggingConfig {
    LoggingConfig {
        level: default_log_level(),
        file_path: default_log_file_path(),
        format: default_log_format(),
    }
}

pub(super) fn default_log_level() -> String {
    "info".to_string()
}

pub(super) fn default_log_file_path() -> Option<PathBuf> {
    None
}

pub(super) fn default_log_format() -> String {
    "text".to_string()
}

pub(super) fn default_presentation_config() -> PresentationConfig {
    PresentationConfig {
        max_in_flight: default_max_in_flight(),
        eviction_batch: default_eviction_batch(),
    }
}

pub(super) fn default_max_in_flight() -> usize {
    20
}

pub(super) fn default_eviction_batch() -> usize {
    4
}
