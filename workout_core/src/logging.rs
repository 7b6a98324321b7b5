//! Logging setup for Lift.
//!
//! One place that installs the tracing subscriber, shared by the CLI and
//! unit tests.

use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Initialize logging at `info`.
///
/// `RUST_LOG` overrides the default level.
pub fn init() {
    init_with_level("info")
}

/// Initialize logging with a specific default level
///
/// # Arguments
/// * `default_level` - Filter used when `RUST_LOG` is unset (e.g. "warn",
///   "workout_core=debug")
pub fn init_with_level(default_level: &str) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().compact().with_writer(std::io::stderr))
        .init();
}

/// Route logs through the test harness; safe to call from every test
#[cfg(test)]
pub fn init_test() {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_env_filter(EnvFilter::new("debug"))
        .try_init();
}
