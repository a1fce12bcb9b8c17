//! # Vesper Core Library (`vesper-core`)
//!
//! `vesper-core` is the foundational library for the Vesper compositor
//! project. It provides the infrastructure the higher layers build on:
//!
//! - **Error Handling**: a unified error system through the [`CoreError`]
//!   enum and its associated specific error types [`ConfigError`] and
//!   [`LoggingError`].
//! - **Core Data Types**: geometry primitives ([`Rect`], [`RectInt`],
//!   [`Size`]) and color representation ([`Color`]) shared by the wire
//!   protocol and the host-side state tracking.
//! - **Configuration Management**: TOML-based configuration loading with
//!   default fallbacks and validation through [`ConfigLoader`] and
//!   [`CoreConfig`].
//! - **Logging**: a configurable logging framework built on the `tracing`
//!   crate, supporting console and file output.
//!
//! Key components are re-exported at the crate root for ease of use.
//!
//! ```rust,ignore
//! use vesper_core::config::ConfigLoader;
//! use vesper_core::logging::initialize_logging;
//!
//! fn main() -> Result<(), vesper_core::CoreError> {
//!     let config = ConfigLoader::load_or_default(None)?;
//!     initialize_logging(&config.logging)?;
//!     tracing::info!("vesper core initialized");
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod error;
pub mod logging;
pub mod types;

pub use config::{ConfigLoader, CoreConfig, LoggingConfig, PresentationConfig};
pub use error::{ConfigError, CoreError, LoggingError};
pub use logging::{init_minimal_logging, initialize_logging};
pub use types::{Color, Rect, RectInt, Size};
