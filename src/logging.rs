// src/logging.rs

//! Logging setup for `lanedag` using `tracing` + `tracing-subscriber`.
//!
//! The library itself only emits `tracing` events; embedding applications
//! that do not install their own subscriber can call [`init_logging`].
//!
//! Priority for determining the log level:
//! 1. the `level` argument (if provided)
//! 2. `LANEDAG_LOG` environment variable (e.g. "info", "debug")
//! 3. default to `info`
//!
//! Logs are sent to STDERR.

use tracing_subscriber::fmt;

use crate::errors::{LanedagError, Result};

/// Initialise the global logging subscriber.
///
/// Returns an error if another global subscriber is already installed.
pub fn init_logging(level: Option<tracing::Level>) -> Result<()> {
    let level = match level {
        Some(lvl) => lvl,
        None => std::env::var("LANEDAG_LOG")
            .ok()
            .and_then(|s| parse_level_str(&s))
            .unwrap_or(tracing::Level::INFO),
    };

    fmt()
        .with_max_level(level)
        .with_target(true)
        .with_thread_ids(false)
        .with_thread_names(true)
        .with_writer(std::io::stderr)
        .try_init()
        .map_err(|e| LanedagError::Other(anyhow::anyhow!(e)))?;

    Ok(())
}

/// Parse a textual log level as accepted in `LANEDAG_LOG`.
pub fn parse_level_str(s: &str) -> Option<tracing::Level> {
    match s.trim().to_lowercase().as_str() {
        "error" => Some(tracing::Level::ERROR),
        "warn" | "warning" => Some(tracing::Level::WARN),
        "info" => Some(tracing::Level::INFO),
        "debug" => Some(tracing::Level::DEBUG),
        "trace" => Some(tracing::Level::TRACE),
        _ => None,
    }
}
