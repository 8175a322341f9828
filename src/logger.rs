//! Centralized logging configuration for apex-calib drivers and tests
//!
//! Graph operations emit `tracing` events: insertions, renewals and window moves at
//! `debug`, accepted optimisations and snapshots at `info`, fallbacks at `warn`.
//! This module installs a subscriber with a consistent format for them.

use tracing::Level;

/// Initialize the tracing subscriber with apex-calib's standard configuration
///
/// Default log level: INFO (overrideable via RUST_LOG environment variable)
///
/// # Example
/// ```no_run
/// use apex_calib::init_logger;
///
/// init_logger();
/// tracing::info!("Calibration run started");
/// ```
///
/// # Environment Variables
/// Override the default log level using `RUST_LOG`:
/// ```bash
/// RUST_LOG=apex_calib=debug cargo test
/// ```
pub fn init_logger() {
    init_logger_with_level(Level::INFO)
}

/// Initialize the tracing subscriber with a custom default level
///
/// Calling this more than once is harmless; later calls leave the first
/// subscriber in place.
///
/// # Example
/// ```no_run
/// use apex_calib::init_logger_with_level;
/// use tracing::Level;
///
/// init_logger_with_level(Level::DEBUG);
/// tracing::debug!("Debug logging enabled");
/// ```
pub fn init_logger_with_level(default_level: Level) {
    use tracing_subscriber::fmt::time::SystemTime;

    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::builder()
                .with_default_directive(default_level.into())
                .from_env_lossy(),
        )
        .with_timer(SystemTime)
        .with_target(true)
        .with_level(true)
        .with_file(false)
        .with_line_number(false)
        .with_thread_ids(false)
        .with_thread_names(false)
        .try_init();
}
