//! Tracing and logging setup
//!
//! Configures the `tracing` subscriber with environment-based filtering.
//! `RUST_LOG` takes precedence; `LOG_LEVEL` is the documented knob.

use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Build the filter from `RUST_LOG`, falling back to `LOG_LEVEL`, falling
/// back to `info`.
fn env_filter() -> EnvFilter {
    EnvFilter::try_from_default_env()
        .or_else(|_| {
            let level = std::env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string());
            EnvFilter::try_new(level)
        })
        .unwrap_or_else(|_| EnvFilter::new("info"))
}

/// Initialize the tracing subscriber.
///
/// # Errors
/// Returns an error if a global subscriber is already installed (e.g. in
/// tests that initialize more than once).
pub fn try_init_tracing() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    tracing_subscriber::registry()
        .with(env_filter())
        .with(fmt::layer().with_target(true))
        .try_init()?;
    Ok(())
}

/// Initialize the tracing subscriber, panicking on double initialization.
///
/// # Panics
/// Panics if the subscriber cannot be installed.
pub fn init_tracing() {
    try_init_tracing().expect("tracing subscriber already installed");
}
