//! Tracing subscriber setup
//!
//! Call once at startup. The filter comes from `RUST_LOG`, defaulting to
//! `info` when unset or malformed.

use tracing_subscriber::EnvFilter;

pub fn init_telemetry() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    // Ignore the error if a subscriber is already installed (tests)
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .try_init();
}
