//! Logging setup for Vesper core, built on the `tracing` ecosystem.
//!
//! Console output is always enabled; file output is added when the
//! configuration names a log file. The worker guard of the non-blocking
//! file writer must outlive the process's logging activity, so it is parked
//! in a process-wide static.

use crate::config::LoggingConfig;
use crate::error::CoreError;

use once_cell::sync::Lazy;
use std::path::Path;
use std::sync::Mutex;
use tracing::Level;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{
    fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer, Registry,
};

static FILE_GUARD: Lazy<Mutex<Option<WorkerGuard>>> = Lazy::new(|| Mutex::new(None));

/// Initializes a minimal logging setup, directing messages to `stderr`.
///
/// Intended for tests and early startup before the configuration is loaded.
/// Filters via `RUST_LOG`, defaulting to "info". Errors (e.g. a global
/// subscriber already being set) are ignored.
pub fn init_minimal_logging() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(Level::INFO.to_string()));

    let _ = fmt::Subscriber::builder()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_ansi(atty::is(atty::Stream::Stderr))
        .try_init();
}

fn create_file_layer(
    log_path: &Path,
    format: &str,
) -> Result<(Box<dyn Layer<Registry> + Send + Sync + 'static>, WorkerGuard), CoreError> {
    if let Some(parent) = log_path.parent() {
        if !parent.as_os_str().is_empty() && !parent.exists() {
            std::fs::create_dir_all(parent)?;
        }
    }

    let file_appender = tracing_appender::rolling::daily(
        log_path.parent().unwrap_or_else(|| Path::new(".")),
        log_path
            .file_name()
            .unwrap_or_else(|| std::ffi::OsStr::new("vesper.log")),
    );
    let (writer, guard) = tracing_appender::non_blocking(file_appender);

    let layer: Box<dyn Layer<Registry> + Send + Sync + 'static> =
        if format.eq_ignore_ascii_case("json") {
            Box::new(fmt::layer().json().with_writer(writer).with_ansi(false))
        } else {
            Box::new(fmt::layer().with_writer(writer).with_ansi(false))
        };
    Ok((layer, guard))
}

/// Initializes the global logging subscriber from the given configuration.
///
/// Returns [`CoreError::LoggingInitialization`] if a global subscriber is
/// already installed or the filter/file setup fails.
pub fn initialize_logging(config: &LoggingConfig) -> Result<(), CoreError> {
    let filter = EnvFilter::try_new(config.level.to_lowercase()).map_err(|e| {
        CoreError::LoggingInitialization(format!("invalid log level '{}': {}", config.level, e))
    })?;

    let mut layers: Vec<Box<dyn Layer<Registry> + Send + Sync + 'static>> = Vec::new();
    layers.push(Box::new(filter));
    layers.push(Box::new(
        fmt::layer()
            .with_writer(std::io::stdout)
            .with_ansi(atty::is(atty::Stream::Stdout)),
    ));
    if let Some(path) = &config.file_path {
        let (file_layer, guard) = create_file_layer(path, &config.format)?;
        *FILE_GUARD.lock().expect("file guard mutex poisoned") = Some(guard);
        layers.push(file_layer);
    }

    tracing_subscriber::registry()
        .with(layers)
        .try_init()
        .map_err(|e| {
            CoreError::LoggingInitialization(format!("subscriber init failed: {}", e))
        })?;

    tracing::debug!(
        level = %config.level,
        file = ?config.file_path,
        "logging initialized"
    );
    Ok(())
}
