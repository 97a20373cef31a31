//! Tracing subscriber setup.

use std::fs::OpenOptions;
use std::io;
use std::sync::OnceLock;

use anyhow::{Context, Result};
use tracing_subscriber::fmt::time::UtcTime;
use tracing_subscriber::EnvFilter;

use crate::config::MonitorConfig;

static TRACING_INIT: OnceLock<()> = OnceLock::new();

/// Installs the global subscriber: compact lines on stderr, or JSON lines in
/// `--log-file` when one is given. Later calls are no-ops.
pub fn init_tracing(config: &MonitorConfig) -> Result<()> {
    if TRACING_INIT.get().is_some() {
        return Ok(());
    }

    let filter = EnvFilter::try_new(&config.log_level)
        .with_context(|| format!("invalid log filter '{}'", config.log_level))?;

    let installed = match &config.log_file {
        Some(path) => {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("could not open log file {}", path.display()))?;
            let subscriber = tracing_subscriber::fmt()
                .json()
                .with_env_filter(filter)
                .with_timer(UtcTime::rfc_3339())
                .with_writer(file)
                .with_current_span(false)
                .with_span_list(false)
                .finish();
            tracing::subscriber::set_global_default(subscriber)
        }
        None => {
            let subscriber = tracing_subscriber::fmt()
                .compact()
                .with_env_filter(filter)
                .with_target(false)
                .with_writer(io::stderr)
                .finish();
            tracing::subscriber::set_global_default(subscriber)
        }
    };
    installed.context("a tracing subscriber is already installed")?;

    let _ = TRACING_INIT.set(());
    Ok(())
}
