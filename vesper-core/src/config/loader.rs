//! Loading and validation of the Vesper core configuration.

use super::types::CoreConfig;
use crate::error::{ConfigError, CoreError};
use std::path::Path;
use tracing::debug;

/// Loads [`CoreConfig`] from TOML, falling back to defaults when no file is
/// given or present.
pub struct ConfigLoader;

impl ConfigLoader {
    /// Parses and validates a configuration from a TOML string.
    pub fn load_from_str(content: &str) -> Result<CoreConfig, CoreError> {
        let config: CoreConfig = toml::from_str(content).map_err(ConfigError::ParseError)?;
        config.validate()?;
        Ok(config)
    }

    /// Reads, parses, and validates the configuration file at `path`.
    pub fn load_from_path(path: &Path) -> Result<CoreConfig, CoreError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::ReadError {
            path: path.to_path_buf(),
            source,
        })?;
        let config = Self::load_from_str(&content)?;
        debug!(path = %path.display(), "loaded configuration");
        Ok(config)
    }

    /// Loads from `path` if given and existing, otherwise returns the
    /// validated defaults. A present-but-broken file is an error; silently
    /// ignoring it would mask typos.
    pub fn load_or_default(path: Option<&Path>) -> Result<CoreConfig, CoreError> {
        match path {
            Some(p) if p.exists() => Self::load_from_path(p),
            _ => {
                let config = CoreConfig::default();
                config.validate()?;
                Ok(config)
            }
        }
    }
}
