//! Configuration management for Vesper core.
//!
//! Configuration is structured as serde-deserializable TOML with defaults
//! applied field by field, so a missing file or a partial file both produce
//! a usable [`CoreConfig`]. Loading and validation go through
//! [`ConfigLoader`]; the schema lives in [`types`], the fallback values in
//! [`defaults`].

pub mod defaults;
pub mod loader;
pub mod types;

pub use loader::ConfigLoader;
pub use types::{CoreConfig, LoggingConfig, PresentationConfig};
