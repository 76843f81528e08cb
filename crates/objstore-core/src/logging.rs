//! Logging setup with objstore segment prefixes.
//!
//! The library only emits `tracing` events; binaries and tests pick the
//! subscriber. In the browser, `objstore-wasm` installs `tracing-wasm` instead.

use tracing_subscriber::{fmt, prelude::*, util::TryInitError, EnvFilter};

/// Initialize tracing with objstore defaults.
///
/// Sets up tracing-subscriber with:
/// - Environment filter (RUST_LOG)
/// - Compact format suitable for terminal output
pub fn init() {
    init_with_filter("info");
}

/// Initialize tracing with a custom default filter.
pub fn init_with_filter(default_filter: &str) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().compact())
        .init();
}

/// Like [`init_with_filter`], but returns an error instead of panicking when
/// a global subscriber is already set. Output goes through the test writer.
pub fn try_init_with_filter(default_filter: &str) -> Result<(), TryInitError> {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().compact().with_test_writer())
        .try_init()
}

/// Segment prefixes for log messages.
pub mod prefix {
    /// Database open, including any version upgrade it ran
    pub const OPEN: &str = "▲";
    /// Database closed
    pub const CLOSE: &str = "▼";
    /// Database lifecycle: schema creation, deletion, parameter checks
    pub const DB: &str = "⊔";
    /// Record operations on an object store (set, put, delete, cursors)
    pub const STORE: &str = "▤";
}
