//! Source adapters: raw CSV exports → observation batches.
//!
//! Two layouts are accepted:
//! - daily exports: a header row (found within the first rows of the file)
//!   with `Fecha`, `Codigo Comercializador`, `Mercado` and hour columns
//!   `0`..`23`, one row per date/seller/market
//! - melted observations: `timestamp,series_key,value`

use std::fs;
use std::io::Read;
use std::path::Path;

use chrono::{Duration, NaiveDate, NaiveDateTime};
use csv::StringRecord;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{info, warn};

use crate::long_table::{is_hour_aligned, LongTable, Observation, ObservationError};
use crate::series_key::SeriesKey;
use crate::table_io::TIMESTAMP_FORMAT;

pub const DATE_COLUMN: &str = "Fecha";
pub const SELLER_COLUMN: &str = "Codigo Comercializador";
pub const MARKET_COLUMN: &str = "Mercado";
pub const REQUIRED_COLUMNS: [&str; 3] = [DATE_COLUMN, SELLER_COLUMN, MARKET_COLUMN];

const MELTED_COLUMNS: [&str; 3] = ["timestamp", "series_key", "value"];
const HEADER_SCAN_ROWS: usize = 10;
const HOURS_PER_DAY: u32 = 24;
const DATETIME_FORMATS: [&str; 2] = ["%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S"];
const DATE_FORMATS: [&str; 3] = ["%Y-%m-%d", "%d/%m/%Y", "%Y/%m/%d"];

#[derive(Debug, Error)]
pub enum ExtractError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
    #[error("{source_name}: header row not found (need 'Fecha' & 'Codigo Comercializador')")]
    HeaderNotFound { source_name: String },
    #[error("{source_name} missing columns: {missing:?}")]
    MissingColumns {
        source_name: String,
        missing: Vec<String>,
    },
    #[error("{source_name} has no hour columns 0..23")]
    NoHourColumns { source_name: String },
    #[error("{source_name} line {line}: {message}")]
    InvalidRecord {
        source_name: String,
        line: u64,
        message: String,
    },
    #[error("{source_name}: {source}")]
    Observation {
        source_name: String,
        #[source]
        source: ObservationError,
    },
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtractReport {
    pub source_name: String,
    pub data_rows: u64,
    pub observations: u64,
    pub hour_columns: u64,
    pub skipped_bad_date: u64,
    pub skipped_missing_identity: u64,
    pub absent_values: u64,
}

/// Melts one daily export into hourly observations.
pub fn extract_daily_export<R: Read>(
    reader: R,
    source_name: &str,
) -> Result<(LongTable, ExtractReport), ExtractError> {
    let mut csv_reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .from_reader(reader);

    let mut records = Vec::new();
    for record in csv_reader.records() {
        records.push(record?);
    }

    let header_row = find_header_row(&records).ok_or_else(|| ExtractError::HeaderNotFound {
        source_name: source_name.to_string(),
    })?;
    let header: Vec<String> = records[header_row]
        .iter()
        .map(|cell| cell.trim().to_string())
        .collect();

    let missing: Vec<String> = REQUIRED_COLUMNS
        .iter()
        .filter(|required| !header.iter().any(|h| h.as_str() == **required))
        .map(|required| required.to_string())
        .collect();
    if !missing.is_empty() {
        return Err(ExtractError::MissingColumns {
            source_name: source_name.to_string(),
            missing,
        });
    }

    let position = |name: &str| header.iter().position(|h| h == name).unwrap_or_default();
    let date_idx = position(DATE_COLUMN);
    let seller_idx = position(SELLER_COLUMN);
    let market_idx = position(MARKET_COLUMN);

    let hour_columns: Vec<(u32, usize)> = (0..HOURS_PER_DAY)
        .filter_map(|hour| {
            let label = hour.to_string();
            header.iter().position(|h| *h == label).map(|idx| (hour, idx))
        })
        .collect();
    if hour_columns.is_empty() {
        return Err(ExtractError::NoHourColumns {
            source_name: source_name.to_string(),
        });
    }

    let mut report = ExtractReport {
        source_name: source_name.to_string(),
        hour_columns: hour_columns.len() as u64,
        ..ExtractReport::default()
    };
    let mut rows = Vec::new();

    for record in &records[header_row + 1..] {
        report.data_rows += 1;
        let base = parse_base_datetime(record.get(date_idx).unwrap_or_default())
            .filter(|base| is_hour_aligned(*base));
        let Some(base) = base else {
            report.skipped_bad_date += 1;
            continue;
        };
        let Some(stamps) = hour_columns
            .iter()
            .map(|(hour, _)| base.checked_add_signed(Duration::hours(i64::from(*hour))))
            .collect::<Option<Vec<NaiveDateTime>>>()
        else {
            report.skipped_bad_date += 1;
            continue;
        };
        let Ok(key) = SeriesKey::from_parts(
            record.get(seller_idx).unwrap_or_default(),
            record.get(market_idx).unwrap_or_default(),
        ) else {
            report.skipped_missing_identity += 1;
            continue;
        };

        for ((_, idx), timestamp) in hour_columns.iter().zip(stamps) {
            let value = parse_value(record.get(*idx).unwrap_or_default());
            if value.is_none() {
                report.absent_values += 1;
            }
            let observation = Observation::new(timestamp, key.clone(), value).map_err(|source| {
                ExtractError::Observation {
                    source_name: source_name.to_string(),
                    source,
                }
            })?;
            rows.push(observation);
        }
    }
    report.observations = rows.len() as u64;

    if report.skipped_bad_date > 0 || report.skipped_missing_identity > 0 {
        warn!(
            component = "extract",
            event = "extract.rows.skipped",
            source_name,
            skipped_bad_date = report.skipped_bad_date,
            skipped_missing_identity = report.skipped_missing_identity
        );
    }
    info!(
        component = "extract",
        event = "extract.source.finish",
        source_name,
        header_row,
        data_rows = report.data_rows,
        hour_columns = report.hour_columns,
        observations = report.observations,
        absent_values = report.absent_values
    );

    Ok((LongTable::from_rows(rows), report))
}

#[derive(Debug, Deserialize)]
struct MeltedRecord {
    timestamp: String,
    series_key: String,
    value: Option<String>,
}

/// Reads already-melted `timestamp,series_key,value` observations.
pub fn read_observations<R: Read>(
    reader: R,
    source_name: &str,
) -> Result<(LongTable, ExtractReport), ExtractError> {
    let mut csv_reader = csv::ReaderBuilder::new().trim(csv::Trim::All).from_reader(reader);
    let headers = csv_reader.headers()?.clone();
    let missing: Vec<String> = MELTED_COLUMNS
        .iter()
        .filter(|required| !headers.iter().any(|h| h == **required))
        .map(|required| required.to_string())
        .collect();
    if !missing.is_empty() {
        return Err(ExtractError::MissingColumns {
            source_name: source_name.to_string(),
            missing,
        });
    }

    let mut report = ExtractReport {
        source_name: source_name.to_string(),
        ..ExtractReport::default()
    };
    let mut rows = Vec::new();
    for record in csv_reader.deserialize::<MeltedRecord>() {
        let record = record?;
        report.data_rows += 1;
        let line = report.data_rows + 1;
        let invalid = |message: String| ExtractError::InvalidRecord {
            source_name: source_name.to_string(),
            line,
            message,
        };

        let timestamp = NaiveDateTime::parse_from_str(&record.timestamp, TIMESTAMP_FORMAT)
            .map_err(|_| invalid(format!("invalid timestamp '{}'", record.timestamp)))?;
        let key = SeriesKey::parse(&record.series_key).map_err(|err| invalid(err.to_string()))?;
        let value = record.value.as_deref().and_then(parse_value);
        if value.is_none() {
            report.absent_values += 1;
        }
        let observation =
            Observation::new(timestamp, key, value).map_err(|err| invalid(err.to_string()))?;
        rows.push(observation);
    }
    report.observations = rows.len() as u64;

    info!(
        component = "extract",
        event = "extract.melted.finish",
        source_name,
        data_rows = report.data_rows,
        observations = report.observations,
        absent_values = report.absent_values
    );

    Ok((LongTable::from_rows(rows), report))
}

/// Layout of a source file, decided from its first line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SourceLayout {
    DailyExport,
    Melted,
}

pub fn detect_layout(first_line: &str) -> SourceLayout {
    let fields: Vec<&str> = first_line
        .trim_start_matches('\u{feff}')
        .split(',')
        .map(|field| field.trim().trim_matches('"'))
        .collect();
    if MELTED_COLUMNS.iter().all(|column| fields.contains(column)) {
        SourceLayout::Melted
    } else {
        SourceLayout::DailyExport
    }
}

/// Loads one source file with the reader matching its layout.
pub fn extract_source_file(path: &Path) -> Result<(LongTable, ExtractReport), ExtractError> {
    let text = fs::read_to_string(path)?;
    let layout = detect_layout(text.lines().next().unwrap_or_default());
    let source_name = source_name(path);
    info!(
        component = "extract",
        event = "extract.source.start",
        path = %path.display(),
        layout = ?layout
    );
    match layout {
        SourceLayout::DailyExport => extract_daily_export(text.as_bytes(), &source_name),
        SourceLayout::Melted => read_observations(text.as_bytes(), &source_name),
    }
}

fn find_header_row(records: &[StringRecord]) -> Option<usize> {
    records.iter().take(HEADER_SCAN_ROWS).position(|record| {
        let has = |name: &str| record.iter().any(|cell| cell.trim() == name);
        has(DATE_COLUMN) && has(SELLER_COLUMN)
    })
}

fn parse_base_datetime(raw: &str) -> Option<NaiveDateTime> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }
    for format in DATETIME_FORMATS {
        if let Ok(dt) = NaiveDateTime::parse_from_str(raw, format) {
            return Some(dt);
        }
    }
    for format in DATE_FORMATS {
        if let Ok(date) = NaiveDate::parse_from_str(raw, format) {
            return date.and_hms_opt(0, 0, 0);
        }
    }
    None
}

/// Lenient numeric cell: anything that does not parse is absent.
fn parse_value(raw: &str) -> Option<f64> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }
    raw.parse::<f64>().ok().filter(|v| !v.is_nan())
}

fn source_name(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().to_string())
        .unwrap_or_else(|| path.display().to_string())
}
