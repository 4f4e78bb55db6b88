//! File logging
//!
//! All diagnostics go to an append-only log file. Each line carries the
//! timestamp, level and source location of the event.

use anyhow::{Context, Result};
use std::fs::{File, OpenOptions};
use std::path::Path;
use std::sync::Mutex;
use tracing::Level as TraceLevel;
use tracing_subscriber::FmtSubscriber;

/// Parse log level from the `LOG_LEVEL` environment variable
pub fn level_from_env() -> TraceLevel {
    parse_level(&std::env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()))
}

fn parse_level(raw: &str) -> TraceLevel {
    match raw.trim().to_lowercase().as_str() {
        "trace" => TraceLevel::TRACE,
        "debug" => TraceLevel::DEBUG,
        "warn" => TraceLevel::WARN,
        "error" => TraceLevel::ERROR,
        _ => TraceLevel::INFO,
    }
}

/// Open `path` for appending, creating it if needed
pub fn open_log_file(path: &Path) -> Result<File> {
    OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .with_context(|| format!("Failed to open log file {}", path.display()))
}

/// Install the global subscriber writing to `path`
pub fn init(path: &Path, level: TraceLevel) -> Result<()> {
    let file = open_log_file(path)?;

    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_writer(Mutex::new(file))
        .with_ansi(false)
        .with_target(false)
        .with_file(true)
        .with_line_number(true)
        .finish();

    tracing::subscriber::set_global_default(subscriber)
        .context("Failed to install log subscriber")?;
    Ok(())
}
