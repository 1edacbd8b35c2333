//! Observation rows and the multi-source long table.

use std::collections::BTreeSet;

use chrono::{Datelike, NaiveDateTime, Timelike};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::info;

use crate::series_key::SeriesKey;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Observation {
    pub timestamp: NaiveDateTime,
    pub series_key: SeriesKey,
    pub value: Option<f64>,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ObservationError {
    #[error("timestamp {0} is not aligned to a whole hour")]
    OffHourTimestamp(NaiveDateTime),
}

impl Observation {
    pub fn new(
        timestamp: NaiveDateTime,
        series_key: SeriesKey,
        value: Option<f64>,
    ) -> Result<Self, ObservationError> {
        if !is_hour_aligned(timestamp) {
            return Err(ObservationError::OffHourTimestamp(timestamp));
        }
        // NaN in a source cell means "no reading", same as an empty cell.
        let value = value.filter(|v| !v.is_nan());
        Ok(Self {
            timestamp,
            series_key,
            value,
        })
    }
}

pub fn is_hour_aligned(ts: NaiveDateTime) -> bool {
    ts.minute() == 0 && ts.second() == 0 && ts.nanosecond() == 0
}

/// Unordered multiset of observations. Duplicate (timestamp, key) pairs are
/// legal here; the pivot sums them.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LongTable {
    rows: Vec<Observation>,
}

impl LongTable {
    pub fn from_rows(rows: Vec<Observation>) -> Self {
        Self { rows }
    }

    pub fn rows(&self) -> &[Observation] {
        &self.rows
    }

    pub fn into_rows(self) -> Vec<Observation> {
        self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Calendar years with at least one observation, ascending.
    pub fn years(&self) -> BTreeSet<i32> {
        self.rows.iter().map(|row| row.timestamp.year()).collect()
    }

    pub fn timestamp_range(&self) -> Option<(NaiveDateTime, NaiveDateTime)> {
        let min = self.rows.iter().map(|row| row.timestamp).min()?;
        let max = self.rows.iter().map(|row| row.timestamp).max()?;
        Some((min, max))
    }
}

/// Concatenates source batches. Every source row is kept; duplicates are
/// resolved later by the sum reducer of the pivot.
pub fn aggregate(batches: impl IntoIterator<Item = LongTable>) -> LongTable {
    let mut rows = Vec::new();
    let mut batch_count = 0usize;
    for batch in batches {
        batch_count += 1;
        rows.extend(batch.into_rows());
    }

    info!(
        component = "long_table",
        event = "long_table.aggregate.finish",
        batch_count,
        row_count = rows.len()
    );

    LongTable { rows }
}
