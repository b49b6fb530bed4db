//! Tracing subscriber setup

use tracing_subscriber::EnvFilter;

use crate::config::LoggingConfig;

/// Builds the event filter: `RUST_LOG` when set, otherwise the configured level.
pub fn env_filter(config: &LoggingConfig) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.level))
}

/// Installs the global `fmt` subscriber described by `config`.
///
/// Safe to call more than once: if a global subscriber is already set, the
/// call does nothing and returns `false`.
pub fn init_tracing(config: &LoggingConfig) -> bool {
    let builder = tracing_subscriber::fmt()
        .with_env_filter(env_filter(config))
        .with_target(config.with_target);

    let installed = if config.format == "json" {
        builder.json().try_init().is_ok()
    } else {
        builder.try_init().is_ok()
    };

    if installed {
        tracing::debug!(level = %config.level, format = %config.format, "Tracing initialized");
    }
    installed
}
