//! Timestamp-indexed wide table: one column per series key.

use std::collections::{HashMap, HashSet};

use chrono::{Duration, NaiveDateTime};
use thiserror::Error;

use crate::series_key::SeriesKey;

/// Column-major table. `values[c][r]` is the cell of `columns[c]` at
/// `index[r]`; `None` is an explicit missing cell.
#[derive(Debug, Clone, PartialEq)]
pub struct WideTable {
    index: Vec<NaiveDateTime>,
    columns: Vec<SeriesKey>,
    values: Vec<Vec<Option<f64>>>,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum WideTableError {
    #[error("expected {expected} value columns, got {actual}")]
    ColumnCountMismatch { expected: usize, actual: usize },
    #[error("column {column} has {actual} cells, index has {expected} rows")]
    RowCountMismatch {
        column: String,
        expected: usize,
        actual: usize,
    },
    #[error("index is not strictly increasing at row {row} ({timestamp})")]
    NonIncreasingIndex { row: usize, timestamp: NaiveDateTime },
    #[error("duplicate column {0}")]
    DuplicateColumn(String),
}

impl WideTable {
    pub fn new(
        index: Vec<NaiveDateTime>,
        columns: Vec<SeriesKey>,
        values: Vec<Vec<Option<f64>>>,
    ) -> Result<Self, WideTableError> {
        if values.len() != columns.len() {
            return Err(WideTableError::ColumnCountMismatch {
                expected: columns.len(),
                actual: values.len(),
            });
        }
        for (column, cells) in columns.iter().zip(&values) {
            if cells.len() != index.len() {
                return Err(WideTableError::RowCountMismatch {
                    column: column.to_string(),
                    expected: index.len(),
                    actual: cells.len(),
                });
            }
        }
        for (row, pair) in index.windows(2).enumerate() {
            if pair[1] <= pair[0] {
                return Err(WideTableError::NonIncreasingIndex {
                    row: row + 1,
                    timestamp: pair[1],
                });
            }
        }
        let mut seen = HashSet::new();
        for column in &columns {
            if !seen.insert(column) {
                return Err(WideTableError::DuplicateColumn(column.to_string()));
            }
        }

        Ok(Self {
            index,
            columns,
            values,
        })
    }

    pub fn index(&self) -> &[NaiveDateTime] {
        &self.index
    }

    pub fn columns(&self) -> &[SeriesKey] {
        &self.columns
    }

    pub fn values(&self) -> &[Vec<Option<f64>>] {
        &self.values
    }

    pub fn row_count(&self) -> usize {
        self.index.len()
    }

    pub fn column_count(&self) -> usize {
        self.columns.len()
    }

    pub fn column(&self, key: &SeriesKey) -> Option<&[Option<f64>]> {
        let position = self.columns.iter().position(|c| c == key)?;
        Some(&self.values[position])
    }

    /// Cell at `ts` for `key`; outer `None` when the key or the timestamp is
    /// not part of the table.
    pub fn cell(&self, ts: NaiveDateTime, key: &SeriesKey) -> Option<Option<f64>> {
        let row = self.index.binary_search(&ts).ok()?;
        self.column(key).map(|cells| cells[row])
    }

    pub fn missing_cells(&self) -> usize {
        self.values
            .iter()
            .map(|cells| cells.iter().filter(|cell| cell.is_none()).count())
            .sum()
    }

    /// True when consecutive index entries are exactly one hour apart.
    pub fn is_contiguous_hourly(&self) -> bool {
        self.index
            .windows(2)
            .all(|pair| pair[1] - pair[0] == Duration::hours(1))
    }

    pub fn into_parts(
        self,
    ) -> (
        Vec<NaiveDateTime>,
        Vec<SeriesKey>,
        Vec<Vec<Option<f64>>>,
    ) {
        (self.index, self.columns, self.values)
    }

    /// Rows whose timestamp satisfies `keep`, all columns preserved.
    pub fn filter_rows(&self, keep: impl Fn(NaiveDateTime) -> bool) -> WideTable {
        let rows: Vec<usize> = (0..self.index.len())
            .filter(|&row| keep(self.index[row]))
            .collect();
        WideTable {
            index: rows.iter().map(|&row| self.index[row]).collect(),
            columns: self.columns.clone(),
            values: self
                .values
                .iter()
                .map(|cells| rows.iter().map(|&row| cells[row]).collect())
                .collect(),
        }
    }

    /// Conforms the table to `target`. Timestamps absent from the current
    /// index become missing in every column; rows outside `target` are
    /// dropped.
    pub fn reindex(self, target: &[NaiveDateTime]) -> WideTable {
        let positions: HashMap<NaiveDateTime, usize> = self
            .index
            .iter()
            .enumerate()
            .map(|(row, ts)| (*ts, row))
            .collect();
        let lookup: Vec<Option<usize>> = target.iter().map(|ts| positions.get(ts).copied()).collect();

        let values = self
            .values
            .iter()
            .map(|cells| {
                lookup
                    .iter()
                    .map(|row| row.and_then(|row| cells[row]))
                    .collect()
            })
            .collect();

        WideTable {
            index: target.to_vec(),
            columns: self.columns,
            values,
        }
    }
}
