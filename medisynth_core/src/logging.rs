//! Logging infrastructure for MediSynth.
//!
//! Provides centralized tracing setup for the CLI and tests.

use once_cell::sync::OnceCell;
use tracing_subscriber::{fmt, prelude::*, reload, EnvFilter, Registry};

static FILTER: OnceCell<reload::Handle<EnvFilter, Registry>> = OnceCell::new();

/// Initialize logging at INFO, overridable with RUST_LOG
pub fn init() {
    init_with_level("info")
}

/// Initialize logging with a specific default level
///
/// # Arguments
/// * `default_level` - Default log level (debug, info, warn, error)
///
/// This can still be overridden by RUST_LOG environment variable. Logs go to
/// stderr so command output on stdout stays machine-readable.
pub fn init_with_level(default_level: &str) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    let (filter, handle) = reload::Layer::new(filter);

    let installed = tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().compact().with_writer(std::io::stderr))
        .try_init();
    if installed.is_ok() {
        let _ = FILTER.set(handle);
    }
}

/// Switch to the configured level once config is loaded. RUST_LOG still wins.
pub fn set_level(level: &str) {
    if std::env::var_os(EnvFilter::DEFAULT_ENV).is_some() {
        return;
    }
    let Some(handle) = FILTER.get() else {
        return;
    };
    match EnvFilter::try_new(level) {
        Ok(filter) => {
            if let Err(e) = handle.reload(filter) {
                tracing::warn!("Failed to apply log level {}: {}", level, e);
            }
        }
        Err(e) => tracing::warn!("Invalid log level {}: {}", level, e),
    }
}

/// Initialize logging for testing (captures logs for test output)
#[cfg(test)]
pub fn init_test() {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_env_filter(EnvFilter::new("debug"))
        .try_init();
}
