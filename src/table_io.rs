//! Flat CSV persistence for wide tables and normalization parameters.

use std::fs;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

use chrono::NaiveDateTime;
use serde::Serialize;
use thiserror::Error;
use tracing::info;

use crate::normalize::NormalizationParams;
use crate::series_key::SeriesKey;
use crate::wide_table::{WideTable, WideTableError};

pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";
pub const TIMESTAMP_COLUMN: &str = "timestamp";
pub const PARAMS_KEY_COLUMN: &str = "series_key";

#[derive(Debug, Error)]
pub enum TableIoError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("CSV must contain a 'timestamp' column")]
    MissingTimestampColumn,
    #[error("line {line}: invalid timestamp '{value}'")]
    InvalidTimestamp { line: u64, value: String },
    #[error("line {line}: invalid value '{value}' in column {column}")]
    InvalidValue {
        line: u64,
        column: String,
        value: String,
    },
    #[error("invalid column header '{0}'")]
    InvalidColumn(String),
    #[error("invalid output path: {0}")]
    InvalidPath(PathBuf),
    #[error(transparent)]
    Table(#[from] WideTableError),
}

pub fn format_timestamp(ts: NaiveDateTime) -> String {
    ts.format(TIMESTAMP_FORMAT).to_string()
}

/// `timestamp` + one column per key; missing cells are empty fields.
pub fn write_wide_table_to<W: Write>(writer: W, table: &WideTable) -> Result<(), TableIoError> {
    let mut csv_writer = csv::Writer::from_writer(writer);

    let mut header = Vec::with_capacity(table.column_count() + 1);
    header.push(TIMESTAMP_COLUMN.to_string());
    header.extend(table.columns().iter().map(|key| key.to_string()));
    csv_writer.write_record(&header)?;

    let mut record = Vec::with_capacity(header.len());
    for (row, ts) in table.index().iter().enumerate() {
        record.clear();
        record.push(format_timestamp(*ts));
        for cells in table.values() {
            record.push(format_cell(cells[row]));
        }
        csv_writer.write_record(&record)?;
    }

    csv_writer.flush()?;
    Ok(())
}

pub fn write_wide_table(path: &Path, table: &WideTable) -> Result<(), TableIoError> {
    let mut buf = Vec::new();
    write_wide_table_to(&mut buf, table)?;
    write_atomic(path, &buf)?;
    info!(
        component = "table_io",
        event = "table_io.wide.saved",
        path = %path.display(),
        rows = table.row_count(),
        columns = table.column_count()
    );
    Ok(())
}

pub fn read_wide_table_from<R: Read>(reader: R) -> Result<WideTable, TableIoError> {
    let mut csv_reader = csv::ReaderBuilder::new().from_reader(reader);
    let headers = csv_reader.headers()?.clone();

    let ts_idx = headers
        .iter()
        .position(|h| h.trim() == TIMESTAMP_COLUMN)
        .ok_or(TableIoError::MissingTimestampColumn)?;

    let mut columns = Vec::new();
    let mut column_idx = Vec::new();
    for (idx, raw) in headers.iter().enumerate() {
        if idx == ts_idx {
            continue;
        }
        let key = SeriesKey::from_header(raw).map_err(|_| TableIoError::InvalidColumn(raw.to_string()))?;
        columns.push(key);
        column_idx.push(idx);
    }

    let mut index = Vec::new();
    let mut values: Vec<Vec<Option<f64>>> = vec![Vec::new(); columns.len()];
    for (offset, record) in csv_reader.records().enumerate() {
        let record = record?;
        let line = offset as u64 + 2;
        let raw_ts = record.get(ts_idx).unwrap_or_default().trim();
        let ts = NaiveDateTime::parse_from_str(raw_ts, TIMESTAMP_FORMAT).map_err(|_| {
            TableIoError::InvalidTimestamp {
                line,
                value: raw_ts.to_string(),
            }
        })?;
        index.push(ts);

        for (column, (&idx, cells)) in column_idx.iter().zip(values.iter_mut()).enumerate() {
            let raw = record.get(idx).unwrap_or_default().trim();
            let cell = parse_cell(raw).ok_or_else(|| TableIoError::InvalidValue {
                line,
                column: columns[column].to_string(),
                value: raw.to_string(),
            })?;
            cells.push(cell);
        }
    }

    Ok(WideTable::new(index, columns, values)?)
}

pub fn read_wide_table(path: &Path) -> Result<WideTable, TableIoError> {
    let file = fs::File::open(path)?;
    read_wide_table_from(file)
}

/// One row per key: `series_key,mean,std`.
pub fn write_params_to<W: Write>(
    writer: W,
    params: &NormalizationParams,
) -> Result<(), TableIoError> {
    let mut csv_writer = csv::Writer::from_writer(writer);
    csv_writer.write_record([PARAMS_KEY_COLUMN, "mean", "std"])?;
    for p in &params.series {
        csv_writer.write_record([
            p.series_key.to_string(),
            format_cell(p.mean),
            format_cell(p.std),
        ])?;
    }
    csv_writer.flush()?;
    Ok(())
}

pub fn write_params(path: &Path, params: &NormalizationParams) -> Result<(), TableIoError> {
    let mut buf = Vec::new();
    write_params_to(&mut buf, params)?;
    write_atomic(path, &buf)?;
    info!(
        component = "table_io",
        event = "table_io.params.saved",
        path = %path.display(),
        series = params.series.len()
    );
    Ok(())
}

pub fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<(), TableIoError> {
    let bytes = serde_json::to_vec_pretty(value)?;
    write_atomic(path, &bytes)
}

fn format_cell(cell: Option<f64>) -> String {
    cell.map(|v| v.to_string()).unwrap_or_default()
}

/// Empty → missing; unparseable → `None` (the caller reports it).
fn parse_cell(raw: &str) -> Option<Option<f64>> {
    if raw.is_empty() {
        return Some(None);
    }
    let value = raw.parse::<f64>().ok()?;
    Some(if value.is_nan() { None } else { Some(value) })
}

fn write_atomic(path: &Path, bytes: &[u8]) -> Result<(), TableIoError> {
    let file_name = path
        .file_name()
        .map(|name| name.to_string_lossy().to_string())
        .ok_or_else(|| TableIoError::InvalidPath(path.to_path_buf()))?;
    let tmp_path = path.with_file_name(format!("{file_name}.tmp"));

    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }

    {
        let mut file = fs::File::create(&tmp_path)?;
        file.write_all(bytes)?;
        file.sync_all()?;
    }

    if let Err(err) = fs::rename(&tmp_path, path) {
        let _ = fs::remove_file(&tmp_path);
        return Err(err.into());
    }
    Ok(())
}
