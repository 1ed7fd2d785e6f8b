//! Log setup: one line per event to stdout and to a role-specific file.

use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt;
use tracing_subscriber::prelude::*;

/// Path of the log file for `role` under `log_dir`.
pub fn log_file_path(log_dir: &Path, role: &str) -> PathBuf {
    log_dir.join(format!("routegrid-{role}.log"))
}

/// Create `log_dir` if needed and open the role's log file for appending.
pub fn open_log_file(log_dir: &Path, role: &str) -> anyhow::Result<File> {
    std::fs::create_dir_all(log_dir)
        .with_context(|| format!("create log directory {}", log_dir.display()))?;

    let path = log_file_path(log_dir, role);
    OpenOptions::new()
        .create(true)
        .append(true)
        .open(&path)
        .with_context(|| format!("open log file {}", path.display()))
}

/// Map level names people commonly pass to the names `EnvFilter` accepts.
fn normalize_level(level: &str) -> String {
    match level.trim().to_ascii_lowercase().as_str() {
        "warning" => "warn".to_string(),
        "critical" | "fatal" => "error".to_string(),
        other => other.to_string(),
    }
}

fn build_filter(level: &str) -> anyhow::Result<EnvFilter> {
    if let Ok(filter) = EnvFilter::try_from_default_env() {
        return Ok(filter);
    }
    EnvFilter::try_new(normalize_level(level)).with_context(|| format!("invalid log level {level:?}"))
}

/// Install the global subscriber.
///
/// Fails if the log directory is not writable or the level is invalid.
pub fn init(log_dir: &Path, role: &str, level: &str) -> anyhow::Result<()> {
    let file = open_log_file(log_dir, role)?;
    let filter = build_filter(level)?;

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer())
        .with(fmt::layer().with_ansi(false).with_writer(Arc::new(file)))
        .try_init()
        .context("install log subscriber")?;
    Ok(())
}
