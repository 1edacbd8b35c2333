//! Leak-free Z-score normalization.
//!
//! Two phases: [`fit`] reads training-window rows only and freezes per-series
//! (mean, std); [`transform`] is a pure function of those parameters and
//! each cell. Zero-std series are written as exactly 0 everywhere.

use chrono::{Datelike, NaiveDateTime};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;
use tracing::{info, warn};

use crate::series_key::SeriesKey;
use crate::wide_table::{WideTable, WideTableError};

pub const TRAINING_YEAR_COUNT: usize = 3;

/// Inclusive range of calendar years used for fitting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrainingWindow {
    pub first_year: i32,
    pub last_year: i32,
}

impl TrainingWindow {
    pub fn new(first_year: i32, last_year: i32) -> Result<Self, NormalizeError> {
        if last_year < first_year {
            return Err(NormalizeError::InvalidWindow {
                first_year,
                last_year,
            });
        }
        Ok(Self {
            first_year,
            last_year,
        })
    }

    /// First [`TRAINING_YEAR_COUNT`] years of `years` after sorting.
    pub fn leading_years(years: &[i32]) -> Option<Self> {
        let mut sorted = years.to_vec();
        sorted.sort_unstable();
        sorted.dedup();
        let first = *sorted.first()?;
        let last = *sorted.iter().take(TRAINING_YEAR_COUNT).last()?;
        Some(Self {
            first_year: first,
            last_year: last,
        })
    }

    pub fn contains(&self, ts: NaiveDateTime) -> bool {
        (self.first_year..=self.last_year).contains(&ts.year())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SeriesParams {
    pub series_key: SeriesKey,
    /// `None` when the series has no present value in the training window.
    pub mean: Option<f64>,
    pub std: Option<f64>,
}

impl SeriesParams {
    pub fn is_zero_std(&self) -> bool {
        self.std == Some(0.0)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NormalizationParams {
    pub window: TrainingWindow,
    pub training_rows: usize,
    pub series: Vec<SeriesParams>,
}

impl NormalizationParams {
    pub fn get(&self, key: &SeriesKey) -> Option<&SeriesParams> {
        self.series.iter().find(|p| &p.series_key == key)
    }

    pub fn zero_std_keys(&self) -> Vec<SeriesKey> {
        self.series
            .iter()
            .filter(|p| p.is_zero_std())
            .map(|p| p.series_key.clone())
            .collect()
    }

    /// SHA-256 over the window and every (key, mean, std) triple.
    pub fn fingerprint(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(format!(
            "window:{}-{};",
            self.window.first_year, self.window.last_year
        ));
        for p in &self.series {
            hasher.update(format!(
                "{}:{}:{};",
                p.series_key,
                fmt_opt(p.mean),
                fmt_opt(p.std)
            ));
        }
        hex::encode(hasher.finalize())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NormalizationSummary {
    pub avg_column_mean: Option<f64>,
    pub avg_column_std: Option<f64>,
    pub holdout_rows: usize,
    pub holdout_avg_column_mean: Option<f64>,
    pub holdout_avg_column_std: Option<f64>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NormalizedOutput {
    pub table: WideTable,
    pub params: NormalizationParams,
    pub summary: NormalizationSummary,
}

#[derive(Debug, Error)]
pub enum NormalizeError {
    #[error("invalid training window {first_year}-{last_year}")]
    InvalidWindow { first_year: i32, last_year: i32 },
    #[error("no rows found in years {first_year}-{last_year} for training statistics")]
    EmptyTrainingWindow { first_year: i32, last_year: i32 },
    #[error("no normalization parameters for column {0}")]
    UnknownColumn(String),
    #[error("normalized table is invalid: {0}")]
    Table(#[from] WideTableError),
}

/// Per-column mean and population std over training rows only.
pub fn fit(
    table: &WideTable,
    window: TrainingWindow,
) -> Result<NormalizationParams, NormalizeError> {
    let training_rows: Vec<usize> = table
        .index()
        .iter()
        .enumerate()
        .filter(|(_, ts)| window.contains(**ts))
        .map(|(row, _)| row)
        .collect();

    if training_rows.is_empty() {
        return Err(NormalizeError::EmptyTrainingWindow {
            first_year: window.first_year,
            last_year: window.last_year,
        });
    }

    let mut series = Vec::with_capacity(table.column_count());
    for (key, cells) in table.columns().iter().zip(table.values()) {
        let present: Vec<f64> = training_rows.iter().filter_map(|&row| cells[row]).collect();
        let (mean, std) = match population_stats(&present) {
            Some((mean, std)) => (Some(mean), Some(std)),
            None => {
                warn!(
                    component = "normalize",
                    event = "normalize.fit.no_training_values",
                    series_key = %key
                );
                (None, None)
            }
        };
        series.push(SeriesParams {
            series_key: key.clone(),
            mean,
            std,
        });
    }

    let params = NormalizationParams {
        window,
        training_rows: training_rows.len(),
        series,
    };

    info!(
        component = "normalize",
        event = "normalize.fit.finish",
        first_year = window.first_year,
        last_year = window.last_year,
        training_rows = params.training_rows,
        columns = params.series.len()
    );

    let zero_std = params.zero_std_keys();
    if !zero_std.is_empty() {
        let keys: Vec<&str> = zero_std.iter().map(SeriesKey::as_str).collect();
        info!(
            component = "normalize",
            event = "normalize.zero_std",
            count = zero_std.len(),
            series_keys = ?keys,
            "zero std in training window; these columns are set to 0"
        );
    }

    Ok(params)
}

/// Applies `(x - mean) / std` with frozen parameters to every row.
pub fn transform(
    table: WideTable,
    params: &NormalizationParams,
) -> Result<WideTable, NormalizeError> {
    let (index, columns, values) = table.into_parts();
    let mut out = Vec::with_capacity(values.len());

    for (key, cells) in columns.iter().zip(values) {
        let p = params
            .get(key)
            .ok_or_else(|| NormalizeError::UnknownColumn(key.to_string()))?;
        out.push(transform_column(cells, p));
    }

    Ok(WideTable::new(index, columns, out)?)
}

/// `fit` on the training window, then `transform` the whole table.
pub fn normalize(
    table: WideTable,
    window: TrainingWindow,
) -> Result<NormalizedOutput, NormalizeError> {
    let params = fit(&table, window)?;
    let table = transform(table, &params)?;
    let summary = summarize(&table, window);

    info!(
        component = "normalize",
        event = "normalize.summary",
        avg_column_mean = summary.avg_column_mean,
        avg_column_std = summary.avg_column_std,
        holdout_rows = summary.holdout_rows,
        holdout_avg_column_mean = summary.holdout_avg_column_mean,
        holdout_avg_column_std = summary.holdout_avg_column_std
    );

    Ok(NormalizedOutput {
        table,
        params,
        summary,
    })
}

/// Average of per-column means and population stds, over all rows and over
/// rows outside the training window.
pub fn summarize(normalized: &WideTable, window: TrainingWindow) -> NormalizationSummary {
    let (avg_column_mean, avg_column_std) = averaged_column_stats(normalized);
    let holdout = normalized.filter_rows(|ts| !window.contains(ts));
    let (holdout_avg_column_mean, holdout_avg_column_std) = if holdout.row_count() == 0 {
        (None, None)
    } else {
        averaged_column_stats(&holdout)
    };

    NormalizationSummary {
        avg_column_mean,
        avg_column_std,
        holdout_rows: holdout.row_count(),
        holdout_avg_column_mean,
        holdout_avg_column_std,
    }
}

fn transform_column(cells: Vec<Option<f64>>, p: &SeriesParams) -> Vec<Option<f64>> {
    let (Some(mean), Some(std)) = (p.mean, p.std) else {
        return vec![None; cells.len()];
    };
    if p.is_zero_std() {
        return vec![Some(0.0); cells.len()];
    }
    cells
        .into_iter()
        .map(|cell| cell.map(|x| (x - mean) / std))
        .collect()
}

/// Mean and population std (divisor = n). A constant input yields an exact
/// std of 0 and a mean equal to that constant.
fn population_stats(values: &[f64]) -> Option<(f64, f64)> {
    let first = *values.first()?;
    if values.iter().all(|v| *v == first) {
        return Some((first, 0.0));
    }
    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    let variance = values
        .iter()
        .map(|v| {
            let d = *v - mean;
            d * d
        })
        .sum::<f64>()
        / n;
    Some((mean, variance.sqrt()))
}

fn averaged_column_stats(table: &WideTable) -> (Option<f64>, Option<f64>) {
    let stats: Vec<(f64, f64)> = table
        .values()
        .iter()
        .filter_map(|cells| {
            let present: Vec<f64> = cells.iter().filter_map(|c| *c).collect();
            population_stats(&present)
        })
        .collect();
    if stats.is_empty() {
        return (None, None);
    }
    let n = stats.len() as f64;
    let mean = stats.iter().map(|(m, _)| m).sum::<f64>() / n;
    let std = stats.iter().map(|(_, s)| s).sum::<f64>() / n;
    (Some(mean), Some(std))
}

fn fmt_opt(value: Option<f64>) -> String {
    value.map(|v| v.to_string()).unwrap_or_else(|| "none".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn ts(year: i32, hour: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(year, 1, 1)
            .unwrap()
            .and_hms_opt(hour, 0, 0)
            .unwrap()
    }

    #[test]
    fn population_std_uses_count_divisor() {
        let (mean, std) = population_stats(&[1.0, 2.0, 3.0, 4.0]).unwrap();
        assert_eq!(mean, 2.5);
        assert!((std - 1.25_f64.sqrt()).abs() < 1e-12);
        assert_eq!(population_stats(&[]), None);
    }

    #[test]
    fn constant_series_has_exact_zero_std() {
        assert_eq!(population_stats(&[0.1, 0.1, 0.1]), Some((0.1, 0.0)));
    }

    #[test]
    fn leading_years_takes_first_three_sorted() {
        let w = TrainingWindow::leading_years(&[2023, 2020, 2022, 2021]).unwrap();
        assert_eq!(w, TrainingWindow::new(2020, 2022).unwrap());
        let w = TrainingWindow::leading_years(&[2024]).unwrap();
        assert_eq!((w.first_year, w.last_year), (2024, 2024));
        assert!(TrainingWindow::leading_years(&[]).is_none());
        assert!(TrainingWindow::new(2022, 2020).is_err());
    }

    #[test]
    fn missing_cells_stay_missing_and_unfit_columns_are_missing() {
        let table = WideTable::new(
            vec![ts(2020, 0), ts(2020, 1), ts(2023, 0)],
            vec![SeriesKey::parse("A X").unwrap(), SeriesKey::parse("B Y").unwrap()],
            vec![
                vec![Some(1.0), Some(3.0), None],
                vec![None, None, Some(5.0)],
            ],
        )
        .unwrap();
        let window = TrainingWindow::new(2020, 2022).unwrap();

        let out = normalize(table, window).unwrap();
        assert_eq!(out.params.series[0].mean, Some(2.0));
        assert_eq!(out.params.series[0].std, Some(1.0));
        assert_eq!(out.table.values()[0], vec![Some(-1.0), Some(1.0), None]);
        assert_eq!(out.params.series[1].mean, None);
        assert_eq!(out.table.values()[1], vec![None, None, None]);
    }

    #[test]
    fn fingerprint_tracks_parameter_values() {
        let key = SeriesKey::parse("A X").unwrap();
        let a = NormalizationParams {
            window: TrainingWindow::new(2020, 2022).unwrap(),
            training_rows: 3,
            series: vec![SeriesParams {
                series_key: key.clone(),
                mean: Some(1.0),
                std: Some(2.0),
            }],
        };
        let mut b = a.clone();
        assert_eq!(a.fingerprint(), b.fingerprint());
        b.series[0].std = Some(2.5);
        assert_ne!(a.fingerprint(), b.fingerprint());
        assert_eq!(a.fingerprint().len(), 64);
    }
}
