//! Tracing setup
//!
//! Library-side helper so embedding binaries get consistent log output.

use tracing_subscriber::EnvFilter;

use crate::config::ObservabilityConfig;

/// Initialize the global tracing subscriber.
///
/// Respects `RUST_LOG` when set, otherwise falls back to the configured
/// level. Safe to call once per process; returns quietly if a subscriber
/// is already installed (tests install their own).
pub fn init_tracing(config: &ObservabilityConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.log_level.clone()));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true);

    let result = if config.json_logging {
        builder.json().try_init()
    } else {
        builder.try_init()
    };

    if result.is_err() {
        tracing::debug!("tracing subscriber already installed");
    }
}
