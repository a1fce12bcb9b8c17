//! Error handling for the Vesper core layer.
//!
//! Error types are defined with the `thiserror` crate. The main error type
//! for this crate is [`CoreError`], which encapsulates the more specific
//! [`ConfigError`] and [`LoggingError`].

use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Core error type for the Vesper infrastructure layer.
///
/// This enum represents all failures that can occur in the core layer and is
/// the common error type returned from its public entry points, usually by
/// wrapping one of the more specific error types below.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Errors related to configuration loading, parsing, or validation.
    #[error("Configuration Error: {0}")]
    Config(#[from] ConfigError),

    /// Errors that occur during the initialization of the logging system.
    #[error("Logging Initialization Failed: {0}")]
    LoggingInitialization(String),

    /// General I/O errors not covered by other variants.
    #[error("I/O Error: {0}")]
    Io(#[from] io::Error),

    /// Errors due to invalid input provided to a function or method.
    #[error("Invalid Input: {0}")]
    InvalidInput(String),

    /// Catch-all for unexpected internal errors within the core library.
    #[error("An unexpected internal error occurred: {0}")]
    Internal(String),
}

/// Error type for configuration-related operations.
///
/// Typically wrapped by [`CoreError::Config`].
#[derive(Debug, Error)]
pub enum ConfigError {
    /// An error occurred while attempting to read a configuration file.
    #[error("Failed to read configuration file from {path:?}")]
    ReadError {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// An error occurred while parsing a configuration file.
    #[error("Failed to parse configuration file: {0}")]
    ParseError(#[from] toml::de::Error),

    /// A configuration value failed validation after successful parsing.
    #[error("Configuration validation failed: {0}")]
    ValidationError(String),
}

/// Error type for logging-related operations.
#[derive(Debug, Error)]
pub enum LoggingError {
    /// Failed to initialize the logging system.
    #[error("Failed to initialize logging: {0}")]
    InitializationError(String),

    /// Failed to set or parse a log filter.
    #[error("Failed to set log filter: {0}")]
    FilterError(String),

    /// An I/O error occurred during logging setup.
    #[error("Logging I/O error: {0}")]
    IoError(#[from] io::Error),
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error;
    use std::io::{Error as IoError, ErrorKind};

    #[test]
    fn test_core_error_config_variant() {
        let original = ConfigError::ValidationError("Test validation".to_string());
        let core_err = CoreError::Config(original);

        assert_eq!(
            format!("{}", core_err),
            "Configuration Error: Configuration validation failed: Test validation"
        );
        assert!(core_err.source().is_some());
        match core_err.source().unwrap().downcast_ref::<ConfigError>() {
            Some(ConfigError::ValidationError(msg)) => assert_eq!(msg, "Test validation"),
            _ => panic!("Incorrect source for CoreError::Config"),
        }
    }

    #[test]
    fn test_core_error_io_variant() {
        let io_err = IoError::new(ErrorKind::NotFound, "file not found");
        let core_err = CoreError::Io(io_err);

        assert_eq!(format!("{}", core_err), "I/O Error: file not found");
        assert_eq!(
            core_err
                .source()
                .unwrap()
                .downcast_ref::<IoError>()
                .unwrap()
                .kind(),
            ErrorKind::NotFound
        );
    }

    #[test]
    fn test_config_error_read_error_variant() {
        let path = PathBuf::from("/config/read_test.toml");
        let io_err = IoError::new(ErrorKind::PermissionDenied, "denied");
        let config_err = ConfigError::ReadError {
            path: path.clone(),
            source: io_err,
        };

        assert_eq!(
            format!("{}", config_err),
            format!("Failed to read configuration file from {:?}", path)
        );
        assert!(config_err.source().is_some());
    }

    #[test]
    fn test_config_error_parse_error_variant() {
        let toml_err: toml::de::Error = toml::from_str::<toml::Value>("not = = toml").unwrap_err();
        let display = format!("{}", toml_err);

        let config_err = ConfigError::ParseError(toml_err);
        assert_eq!(
            format!("{}", config_err),
            format!("Failed to parse configuration file: {}", display)
        );
        assert!(config_err.source().unwrap().is::<toml::de::Error>());
    }

    #[test]
    fn test_logging_error_filter_variant() {
        let log_err = LoggingError::FilterError("bad directive".to_string());
        assert_eq!(
            format!("{}", log_err),
            "Failed to set log filter: bad directive"
        );
        assert!(log_err.source().is_none());
    }
}
