//! Tracing setup for the batch binaries and run lifecycle events.
//!
//! Every event emitted by the library carries `component` and a dotted
//! `event` name. The binaries wrap a run in [`run_span`] so those events
//! also carry the command that produced them.

use std::error::Error as StdError;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use thiserror::Error;
use tracing::{error, info, info_span, Span};
use tracing_subscriber::EnvFilter;

use crate::config::env_lookup;

pub const LOG_LEVEL_VAR: &str = "SOLD_POWER_LOG_LEVEL";
pub const LOG_FORMAT_VAR: &str = "SOLD_POWER_LOG_FORMAT";
pub const LOG_TARGET_VAR: &str = "SOLD_POWER_LOG_TARGET";

const DEFAULT_FILTER: &str = "info";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    /// One JSON object per line, for batch schedulers that collect logs.
    Json,
    Pretty,
}

impl FromStr for LogFormat {
    type Err = String;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "json" => Ok(Self::Json),
            "pretty" => Ok(Self::Pretty),
            other => Err(format!("unknown log format '{other}'")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoggingConfig {
    /// `EnvFilter` directives, e.g. `info` or `sold_power=debug`.
    pub filter: String,
    pub format: LogFormat,
    pub include_target: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: DEFAULT_FILTER.to_string(),
            format: LogFormat::Pretty,
            include_target: false,
        }
    }
}

impl LoggingConfig {
    /// Builds the config from `SOLD_POWER_LOG_*` values served by `lookup`.
    /// Blank or unrecognized values keep the default.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();

        if let Some(filter) = lookup(LOG_LEVEL_VAR) {
            let filter = filter.trim();
            if !filter.is_empty() {
                config.filter = filter.to_string();
            }
        }
        if let Some(format) = lookup(LOG_FORMAT_VAR).and_then(|raw| raw.parse().ok()) {
            config.format = format;
        }
        if let Some(include_target) = lookup(LOG_TARGET_VAR).and_then(|raw| parse_switch(&raw)) {
            config.include_target = include_target;
        }

        config
    }

    fn env_filter(&self) -> EnvFilter {
        EnvFilter::try_new(&self.filter).unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER))
    }
}

#[derive(Debug, Error)]
pub enum LoggingInitError {
    #[error("logging already initialized: {0}")]
    AlreadyInitialized(#[from] tracing::subscriber::SetGlobalDefaultError),
}

pub fn logging_config_from_env() -> LoggingConfig {
    LoggingConfig::from_lookup(env_lookup)
}

pub fn init_logging(config: &LoggingConfig) -> Result<(), LoggingInitError> {
    let builder = tracing_subscriber::fmt()
        .with_env_filter(config.env_filter())
        .with_target(config.include_target)
        .with_ansi(config.format == LogFormat::Pretty);

    match config.format {
        LogFormat::Json => tracing::subscriber::set_global_default(builder.json().finish())?,
        LogFormat::Pretty => tracing::subscriber::set_global_default(builder.pretty().finish())?,
    }
    Ok(())
}

/// Span covering one batch run; enter it for the whole run.
pub fn run_span(command: &str) -> Span {
    info_span!("run", command)
}

pub fn log_run_start(command: &str, config: &LoggingConfig) {
    info!(
        component = "run",
        event = "run.start",
        command,
        log_filter = %config.filter,
        log_format = ?config.format
    );
}

pub fn log_run_finish(command: &str, output_dir: &Path, files: &[PathBuf], elapsed: Duration) {
    info!(
        component = "run",
        event = "run.finish",
        command,
        output_dir = %output_dir.display(),
        files_written = files.len(),
        elapsed_ms = elapsed.as_millis() as u64
    );
}

pub fn log_run_failed(command: &str, err: &dyn StdError, elapsed: Duration) {
    error!(
        component = "run",
        event = "run.failed",
        command,
        error = %err,
        elapsed_ms = elapsed.as_millis() as u64
    );
}

fn parse_switch(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}
