//! Run configuration: defaults, environment overrides, value parsing.

use std::collections::BTreeSet;
use std::env;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::impute::DEFAULT_MAX_GAP_HOURS;
use crate::normalize::TrainingWindow;
use crate::pipeline::wide_file_name;

pub const DEFAULT_YEARS: [i32; 4] = [2020, 2021, 2022, 2023];
pub const DEFAULT_SOURCE_PREFIX: &str = "Demanda_Comercial_Por_Comercializador_SEME";
pub const DEFAULT_OUTPUT_DIR: &str = "out_all";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum PeriodSelection {
    Years(Vec<i32>),
    /// Every calendar year with at least one observation.
    All,
}

impl PeriodSelection {
    /// Accepts `all` or a comma-separated list of years.
    pub fn parse(raw: &str) -> Result<Self, ConfigError> {
        let trimmed = raw.trim();
        if trimmed.eq_ignore_ascii_case("all") {
            return Ok(Self::All);
        }
        let mut years = Vec::new();
        for part in trimmed.split(',') {
            let part = part.trim();
            let year = part
                .parse::<i32>()
                .map_err(|_| ConfigError::InvalidYear(part.to_string()))?;
            years.push(year);
        }
        years.sort_unstable();
        years.dedup();
        Ok(Self::Years(years))
    }

    pub fn resolve(&self, observed: &BTreeSet<i32>) -> Vec<i32> {
        match self {
            Self::Years(years) => years.clone(),
            Self::All => observed.iter().copied().collect(),
        }
    }

    /// Default training window for this selection, when it names years.
    pub fn default_training_window(&self) -> Option<TrainingWindow> {
        match self {
            Self::Years(years) => TrainingWindow::leading_years(years),
            Self::All => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineConfig {
    pub input_dir: PathBuf,
    pub output_dir: PathBuf,
    pub source_prefix: String,
    pub periods: PeriodSelection,
    pub max_gap_hours: usize,
    pub write_combined: bool,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            input_dir: PathBuf::from("."),
            output_dir: PathBuf::from(DEFAULT_OUTPUT_DIR),
            source_prefix: DEFAULT_SOURCE_PREFIX.to_string(),
            periods: PeriodSelection::Years(DEFAULT_YEARS.to_vec()),
            max_gap_hours: DEFAULT_MAX_GAP_HOURS,
            write_combined: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NormalizeConfig {
    /// Explicit input table; `None` reads the combined table for
    /// `combined_years` from `output_dir`.
    pub input_path: Option<PathBuf>,
    pub output_dir: PathBuf,
    /// First and last year of the combined table written by the build run.
    pub combined_years: (i32, i32),
    /// `None` fits on the first three calendar years present in the input.
    pub training: Option<TrainingWindow>,
}

impl NormalizeConfig {
    /// Input table, resolved against the final `output_dir`.
    pub fn input_path(&self) -> PathBuf {
        match &self.input_path {
            Some(path) => path.clone(),
            None => {
                let (first, last) = self.combined_years;
                self.output_dir.join(wide_file_name(first, Some(last)))
            }
        }
    }
}

impl Default for NormalizeConfig {
    fn default() -> Self {
        let years = PeriodSelection::Years(DEFAULT_YEARS.to_vec());
        Self {
            input_path: None,
            output_dir: PathBuf::from(DEFAULT_OUTPUT_DIR),
            combined_years: (DEFAULT_YEARS[0], DEFAULT_YEARS[DEFAULT_YEARS.len() - 1]),
            training: years.default_training_window(),
        }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("invalid year '{0}'")]
    InvalidYear(String),
    #[error("invalid training window '{0}' (expected YYYY or YYYY-YYYY)")]
    InvalidTrainingWindow(String),
    #[error("invalid gap threshold '{0}' (expected a non-negative integer)")]
    InvalidGapHours(String),
}

/// `YYYY` or `YYYY-YYYY`, inclusive.
pub fn parse_training_window(raw: &str) -> Result<TrainingWindow, ConfigError> {
    let invalid = || ConfigError::InvalidTrainingWindow(raw.to_string());
    let trimmed = raw.trim();
    let (first, last) = match trimmed.split_once('-') {
        Some((first, last)) => (first.trim(), last.trim()),
        None => (trimmed, trimmed),
    };
    let first = first.parse::<i32>().map_err(|_| invalid())?;
    let last = last.parse::<i32>().map_err(|_| invalid())?;
    TrainingWindow::new(first, last).map_err(|_| invalid())
}

pub fn parse_gap_hours(raw: &str) -> Result<usize, ConfigError> {
    raw.trim()
        .parse::<usize>()
        .map_err(|_| ConfigError::InvalidGapHours(raw.to_string()))
}

pub fn pipeline_config_from_env() -> Result<PipelineConfig, ConfigError> {
    pipeline_config_from_lookup(env_lookup)
}

/// Same as [`pipeline_config_from_env`] over an arbitrary variable source.
pub fn pipeline_config_from_lookup(
    lookup: impl Fn(&str) -> Option<String>,
) -> Result<PipelineConfig, ConfigError> {
    let var = |name: &str| non_empty(lookup(name));
    let mut config = PipelineConfig::default();

    if let Some(dir) = var("SOLD_POWER_INPUT_DIR") {
        config.input_dir = PathBuf::from(dir);
    }
    if let Some(dir) = var("SOLD_POWER_OUTPUT_DIR") {
        config.output_dir = PathBuf::from(dir);
    }
    if let Some(years) = var("SOLD_POWER_YEARS") {
        config.periods = PeriodSelection::parse(&years)?;
    }
    if let Some(hours) = var("SOLD_POWER_MAX_GAP_HOURS") {
        config.max_gap_hours = parse_gap_hours(&hours)?;
    }

    Ok(config)
}

pub fn normalize_config_from_env() -> Result<NormalizeConfig, ConfigError> {
    normalize_config_from_lookup(env_lookup)
}

/// Same as [`normalize_config_from_env`] over an arbitrary variable source.
pub fn normalize_config_from_lookup(
    lookup: impl Fn(&str) -> Option<String>,
) -> Result<NormalizeConfig, ConfigError> {
    let var = |name: &str| non_empty(lookup(name));
    let mut config = NormalizeConfig::default();

    if let Some(dir) = var("SOLD_POWER_OUTPUT_DIR") {
        config.output_dir = PathBuf::from(dir);
    }
    if let Some(years) = var("SOLD_POWER_YEARS") {
        let selection = PeriodSelection::parse(&years)?;
        config.training = selection.default_training_window();
        if let PeriodSelection::Years(years) = &selection {
            if let (Some(first), Some(last)) = (years.first(), years.last()) {
                config.combined_years = (*first, *last);
            }
        }
    }
    if let Some(path) = var("SOLD_POWER_NORMALIZE_INPUT") {
        config.input_path = Some(PathBuf::from(path));
    }
    if let Some(window) = var("SOLD_POWER_TRAIN_YEARS") {
        config.training = Some(parse_training_window(&window)?);
    }

    Ok(config)
}

pub(crate) fn env_lookup(name: &str) -> Option<String> {
    env::var(name).ok()
}

fn non_empty(raw: Option<String>) -> Option<String> {
    raw.map(|raw| raw.trim().to_string())
        .filter(|raw| !raw.is_empty())
}
