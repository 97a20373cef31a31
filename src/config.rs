//! Command-line parsing and validation.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{bail, Result};
use clap::Parser;
use tracing_subscriber::EnvFilter;

use crate::transport::DEFAULT_BAUD;

pub const DEFAULT_READ_TIMEOUT_MS: u64 = 1000;
const MIN_READ_TIMEOUT_MS: u64 = 10;
const MAX_READ_TIMEOUT_MS: u64 = 10_000;

/// CLI options for the monitor.
#[derive(Debug, Parser, Clone)]
#[command(
    name = "monitor_cli",
    about = "Serial monitor for the touch reaction-time experiment",
    author,
    version
)]
pub struct MonitorConfig {
    /// Serial device to open instead of choosing from a list
    #[arg(long)]
    pub port: Option<String>,

    /// Baud rate of the serial link
    #[arg(long, default_value_t = DEFAULT_BAUD)]
    pub baud: u32,

    /// Longest a single serial read may block (milliseconds)
    #[arg(long = "read-timeout-ms", default_value_t = DEFAULT_READ_TIMEOUT_MS)]
    pub read_timeout_ms: u64,

    /// Directory containing countdown.wav, final_result.wav, wrong.wav and success.wav
    #[arg(long = "sounds-dir", default_value = ".")]
    pub sounds_dir: PathBuf,

    /// Directory the result CSV files are written to
    #[arg(long = "output-dir", default_value = ".")]
    pub output_dir: PathBuf,

    /// Print the available serial ports and exit
    #[arg(long = "list-ports", default_value_t = false)]
    pub list_ports: bool,

    /// Log filter directive (for example "info" or "rt_monitor=debug")
    #[arg(long = "log-level", env = "RUST_LOG", default_value = "warn")]
    pub log_level: String,

    /// Write JSON logs to this file instead of stderr
    #[arg(long = "log-file")]
    pub log_file: Option<PathBuf>,

    /// Disable colored console output
    #[arg(long = "no-color", default_value_t = false)]
    pub no_color: bool,
}

impl MonitorConfig {
    /// Parse CLI arguments and validate them right away.
    pub fn parse_args() -> Result<Self> {
        let config = Self::parse();
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.baud == 0 {
            bail!("--baud must be greater than zero");
        }
        if !(MIN_READ_TIMEOUT_MS..=MAX_READ_TIMEOUT_MS).contains(&self.read_timeout_ms) {
            bail!(
                "--read-timeout-ms must be between {MIN_READ_TIMEOUT_MS} and {MAX_READ_TIMEOUT_MS}, got {}",
                self.read_timeout_ms
            );
        }
        if matches!(self.port.as_deref(), Some(p) if p.trim().is_empty()) {
            bail!("--port cannot be empty");
        }
        // Listing ports touches neither the sounds nor the output directory.
        if !self.list_ports {
            if !self.sounds_dir.is_dir() {
                bail!(
                    "--sounds-dir '{}' is not a directory",
                    self.sounds_dir.display()
                );
            }
            if !self.output_dir.is_dir() {
                bail!(
                    "--output-dir '{}' is not a directory",
                    self.output_dir.display()
                );
            }
        }
        if let Err(err) = EnvFilter::try_new(&self.log_level) {
            bail!("--log-level '{}' is not a valid filter: {err}", self.log_level);
        }
        Ok(())
    }

    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms)
    }
}
