//! Batch runs: exports → per-period wide tables, and wide table →
//! normalized table + parameters.

use std::fs;
use std::path::{Path, PathBuf};

use chrono::Datelike;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{info, warn};

use crate::calendar::{reindex_period, CalendarError, Period};
use crate::config::{NormalizeConfig, PipelineConfig};
use crate::extract::{extract_source_file, ExtractError, ExtractReport};
use crate::impute::{impute_short_gaps, ImputeReport};
use crate::long_table::{aggregate, LongTable};
use crate::normalize::{normalize, NormalizationSummary, NormalizeError, TrainingWindow};
use crate::table_io::{read_wide_table, write_json, write_params, write_wide_table, TableIoError};
use crate::wide_table::WideTable;

pub const PARAMS_FILE_NAME: &str = "sold_power_wide_normalization_params.csv";
pub const MANIFEST_FILE_NAME: &str = "sold_power_wide_normalization_manifest.json";

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("no CSV exports found in {0}")]
    NoSources(PathBuf),
    #[error("cannot find normalization input {0}")]
    MissingInput(PathBuf),
    #[error("input has no calendar year to train on")]
    NoTrainingYears,
    #[error(transparent)]
    Extract(#[from] ExtractError),
    #[error(transparent)]
    Calendar(#[from] CalendarError),
    #[error(transparent)]
    Normalize(#[from] NormalizeError),
    #[error(transparent)]
    TableIo(#[from] TableIoError),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PeriodOutcome {
    pub period: Period,
    pub path: PathBuf,
    pub rows: usize,
    pub columns: usize,
    pub impute: ImputeReport,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BuildReport {
    pub sources: Vec<ExtractReport>,
    pub long_rows: usize,
    pub periods: Vec<PeriodOutcome>,
    pub skipped_years: Vec<i32>,
    pub combined: Option<PeriodOutcome>,
}

impl BuildReport {
    pub fn files_written(&self) -> Vec<PathBuf> {
        self.periods
            .iter()
            .chain(self.combined.iter())
            .map(|outcome| outcome.path.clone())
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NormalizationManifest {
    pub input: PathBuf,
    pub window: TrainingWindow,
    pub training_rows: usize,
    pub rows: usize,
    pub columns: usize,
    pub zero_std_keys: Vec<String>,
    pub summary: NormalizationSummary,
    pub params_fingerprint: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NormalizeReport {
    pub normalized_path: PathBuf,
    pub params_path: PathBuf,
    pub manifest_path: PathBuf,
    pub manifest: NormalizationManifest,
}

impl NormalizeReport {
    pub fn files_written(&self) -> Vec<PathBuf> {
        vec![
            self.normalized_path.clone(),
            self.params_path.clone(),
            self.manifest_path.clone(),
        ]
    }
}

/// Export files in `dir` whose name starts with `prefix`, or every `.csv`
/// when none does. Sorted by file name.
pub fn discover_sources(dir: &Path, prefix: &str) -> Result<Vec<PathBuf>, PipelineError> {
    let mut csv_files = Vec::new();
    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        let is_csv = path
            .extension()
            .map(|ext| ext.eq_ignore_ascii_case("csv"))
            .unwrap_or(false);
        if path.is_file() && is_csv {
            csv_files.push(path);
        }
    }
    csv_files.sort();

    let prefixed: Vec<PathBuf> = csv_files
        .iter()
        .filter(|path| {
            path.file_name()
                .map(|name| name.to_string_lossy().starts_with(prefix))
                .unwrap_or(false)
        })
        .cloned()
        .collect();

    let selected = if prefixed.is_empty() { csv_files } else { prefixed };
    if selected.is_empty() {
        return Err(PipelineError::NoSources(dir.to_path_buf()));
    }
    Ok(selected)
}

pub fn wide_file_name(first_year: i32, last_year: Option<i32>) -> String {
    match last_year {
        Some(last_year) => format!("sold_power_wide_{first_year}_{last_year}.csv"),
        None => format!("sold_power_wide_{first_year}.csv"),
    }
}

pub fn normalized_file_name(input: &Path) -> String {
    let stem = input
        .file_stem()
        .map(|stem| stem.to_string_lossy().to_string())
        .unwrap_or_else(|| "sold_power_wide".to_string());
    format!("{stem}_normalized.csv")
}

/// Reindex + impute for one period; `None` when the period has no rows.
pub fn build_period_table(
    long: &LongTable,
    period: Period,
    max_gap_hours: usize,
) -> Result<Option<(WideTable, ImputeReport)>, PipelineError> {
    let Some(wide) = reindex_period(long, period)? else {
        return Ok(None);
    };
    let (wide, report) = impute_short_gaps(wide, max_gap_hours);

    info!(
        component = "pipeline",
        event = "impute.period.finish",
        period = %period,
        max_gap_hours,
        missing_before = report.missing_before,
        filled_cells = report.filled_cells,
        filled_runs = report.filled_runs,
        open_runs = report.open_runs,
        missing_after = report.missing_after
    );

    Ok(Some((wide, report)))
}

/// Builds every requested table in memory, then writes them. When a write
/// fails, files already written by this call are removed again.
pub fn build_from_long(
    long: LongTable,
    cfg: &PipelineConfig,
) -> Result<BuildReport, PipelineError> {
    let years = cfg.periods.resolve(&long.years());
    let mut report = BuildReport {
        long_rows: long.len(),
        ..BuildReport::default()
    };

    let mut pending: Vec<(Period, PathBuf, WideTable, ImputeReport)> = Vec::new();
    for year in years {
        let period = Period::Year(year);
        match build_period_table(&long, period, cfg.max_gap_hours)? {
            Some((table, impute)) => {
                let path = cfg.output_dir.join(wide_file_name(year, None));
                pending.push((period, path, table, impute));
            }
            None => {
                info!(
                    component = "pipeline",
                    event = "calendar.period.skipped",
                    year,
                    reason = "no rows"
                );
                report.skipped_years.push(year);
            }
        }
    }

    let mut combined = None;
    if cfg.write_combined {
        if let Some((first, last)) = long.timestamp_range() {
            let built = build_period_table(&long, Period::All, cfg.max_gap_hours)?;
            if let Some((table, impute)) = built {
                let path = cfg
                    .output_dir
                    .join(wide_file_name(first.year(), Some(last.year())));
                combined = Some((path, table, impute));
            }
        }
    }

    if pending.is_empty() && combined.is_none() {
        warn!(
            component = "pipeline",
            event = "pipeline.build.empty",
            long_rows = report.long_rows
        );
    }

    let mut written = Vec::new();
    for (period, path, table, impute) in pending {
        write_or_roll_back(&path, &mut written, |path| write_wide_table(path, &table))?;
        report.periods.push(PeriodOutcome {
            period,
            path,
            rows: table.row_count(),
            columns: table.column_count(),
            impute,
        });
    }
    if let Some((path, table, impute)) = combined {
        write_or_roll_back(&path, &mut written, |path| write_wide_table(path, &table))?;
        report.combined = Some(PeriodOutcome {
            period: Period::All,
            path,
            rows: table.row_count(),
            columns: table.column_count(),
            impute,
        });
    }

    Ok(report)
}

/// Full build run: discover, extract, aggregate, then [`build_from_long`].
pub fn build_wide_tables(cfg: &PipelineConfig) -> Result<BuildReport, PipelineError> {
    let sources = discover_sources(&cfg.input_dir, &cfg.source_prefix)?;
    info!(
        component = "pipeline",
        event = "pipeline.sources.found",
        input_dir = %cfg.input_dir.display(),
        source_count = sources.len()
    );

    let mut batches = Vec::with_capacity(sources.len());
    let mut extract_reports = Vec::with_capacity(sources.len());
    for path in &sources {
        let (batch, extract_report) = extract_source_file(path)?;
        batches.push(batch);
        extract_reports.push(extract_report);
    }

    let long = aggregate(batches);
    let mut report = build_from_long(long, cfg)?;
    report.sources = extract_reports;
    Ok(report)
}

/// Normalizes an already-loaded wide table and writes the three outputs.
pub fn normalize_table(
    table: WideTable,
    input: &Path,
    training: Option<TrainingWindow>,
    output_dir: &Path,
) -> Result<NormalizeReport, PipelineError> {
    let window = match training {
        Some(window) => window,
        None => {
            let years: Vec<i32> = table.index().iter().map(|ts| ts.year()).collect();
            TrainingWindow::leading_years(&years).ok_or(PipelineError::NoTrainingYears)?
        }
    };

    let output = normalize(table, window)?;
    let manifest = NormalizationManifest {
        input: input.to_path_buf(),
        window,
        training_rows: output.params.training_rows,
        rows: output.table.row_count(),
        columns: output.table.column_count(),
        zero_std_keys: output
            .params
            .zero_std_keys()
            .iter()
            .map(|key| key.to_string())
            .collect(),
        summary: output.summary.clone(),
        params_fingerprint: output.params.fingerprint(),
    };

    let normalized_path = output_dir.join(normalized_file_name(input));
    let params_path = output_dir.join(PARAMS_FILE_NAME);
    let manifest_path = output_dir.join(MANIFEST_FILE_NAME);

    let mut written = Vec::new();
    write_or_roll_back(&normalized_path, &mut written, |path| {
        write_wide_table(path, &output.table)
    })?;
    write_or_roll_back(&params_path, &mut written, |path| {
        write_params(path, &output.params)
    })?;
    write_or_roll_back(&manifest_path, &mut written, |path| write_json(path, &manifest))?;

    info!(
        component = "pipeline",
        event = "pipeline.normalize.finish",
        normalized_path = %normalized_path.display(),
        params_path = %params_path.display(),
        fingerprint = %manifest.params_fingerprint
    );

    Ok(NormalizeReport {
        normalized_path,
        params_path,
        manifest_path,
        manifest,
    })
}

pub fn run_normalization(cfg: &NormalizeConfig) -> Result<NormalizeReport, PipelineError> {
    let input = cfg.input_path();
    if !input.is_file() {
        return Err(PipelineError::MissingInput(input));
    }
    let table = read_wide_table(&input)?;
    info!(
        component = "pipeline",
        event = "pipeline.normalize.loaded",
        path = %input.display(),
        rows = table.row_count(),
        columns = table.column_count()
    );
    normalize_table(table, &input, cfg.training, &cfg.output_dir)
}

/// Runs `write` for `path`. On failure every path in `written` is removed
/// before the error is returned; on success `path` joins `written`.
fn write_or_roll_back(
    path: &Path,
    written: &mut Vec<PathBuf>,
    write: impl FnOnce(&Path) -> Result<(), TableIoError>,
) -> Result<(), PipelineError> {
    if let Err(err) = write(path) {
        for done in written.drain(..) {
            if let Err(remove_err) = fs::remove_file(&done) {
                warn!(
                    component = "pipeline",
                    event = "pipeline.rollback.failed",
                    path = %done.display(),
                    error = %remove_err
                );
            }
        }
        warn!(
            component = "pipeline",
            event = "pipeline.write.rolled_back",
            path = %path.display(),
            error = %err
        );
        return Err(err.into());
    }
    written.push(path.to_path_buf());
    Ok(())
}
