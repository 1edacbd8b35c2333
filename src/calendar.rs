//! Calendar reindexing: long table → complete hourly wide table per period.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;

use chrono::{Datelike, Duration, NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info};

use crate::long_table::{is_hour_aligned, LongTable};
use crate::series_key::SeriesKey;
use crate::wide_table::{WideTable, WideTableError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Period {
    /// One calendar year, Jan 1 00:00 through Dec 31 23:00.
    Year(i32),
    /// Every observation, first to last observed hour.
    All,
}

impl Period {
    pub fn contains(self, ts: NaiveDateTime) -> bool {
        match self {
            Self::Year(year) => ts.year() == year,
            Self::All => true,
        }
    }
}

impl fmt::Display for Period {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Year(year) => write!(f, "{year}"),
            Self::All => f.write_str("all"),
        }
    }
}

#[derive(Debug, Error)]
pub enum CalendarError {
    #[error("year {0} is outside the supported calendar range")]
    InvalidYear(i32),
    #[error("observation for {series_key} at {timestamp} is not on the hourly grid")]
    OffGridTimestamp {
        series_key: String,
        timestamp: NaiveDateTime,
    },
    #[error("pivot produced an invalid table: {0}")]
    Table(#[from] WideTableError),
}

pub fn year_bounds(year: i32) -> Result<(NaiveDateTime, NaiveDateTime), CalendarError> {
    let start = NaiveDate::from_ymd_opt(year, 1, 1)
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .ok_or(CalendarError::InvalidYear(year))?;
    let end = NaiveDate::from_ymd_opt(year, 12, 31)
        .and_then(|d| d.and_hms_opt(23, 0, 0))
        .ok_or(CalendarError::InvalidYear(year))?;
    Ok((start, end))
}

pub fn hours_in_year(year: i32) -> Result<usize, CalendarError> {
    let (start, end) = year_bounds(year)?;
    Ok((end - start).num_hours() as usize + 1)
}

/// Inclusive hourly sequence from `start` to `end`; empty when `end < start`.
pub fn hourly_index(start: NaiveDateTime, end: NaiveDateTime) -> Vec<NaiveDateTime> {
    if end < start {
        return Vec::new();
    }
    let len = (end - start).num_hours() as usize + 1;
    let mut out = Vec::with_capacity(len);
    let mut cursor = start;
    while cursor <= end {
        out.push(cursor);
        cursor += Duration::hours(1);
    }
    out
}

/// Groups the in-period rows by (timestamp, key) with a sum reducer.
///
/// The result is indexed by observed timestamps only, ascending, with one
/// column per distinct key (sorted). `Ok(None)` when no row falls in the
/// period. Absent values add nothing to a sum; a cell whose observations are
/// all absent stays missing.
pub fn pivot_sum(long: &LongTable, period: Period) -> Result<Option<WideTable>, CalendarError> {
    let mut sums: BTreeMap<SeriesKey, HashMap<NaiveDateTime, Option<f64>>> = BTreeMap::new();
    let mut observed: BTreeSet<NaiveDateTime> = BTreeSet::new();

    for row in long.rows().iter().filter(|row| period.contains(row.timestamp)) {
        if !is_hour_aligned(row.timestamp) {
            return Err(CalendarError::OffGridTimestamp {
                series_key: row.series_key.to_string(),
                timestamp: row.timestamp,
            });
        }
        observed.insert(row.timestamp);
        let cell = sums
            .entry(row.series_key.clone())
            .or_default()
            .entry(row.timestamp)
            .or_insert(None);
        if let Some(value) = row.value {
            *cell = Some(cell.unwrap_or(0.0) + value);
        }
    }

    if observed.is_empty() {
        return Ok(None);
    }

    let index: Vec<NaiveDateTime> = observed.into_iter().collect();
    let mut columns = Vec::with_capacity(sums.len());
    let mut values = Vec::with_capacity(sums.len());
    for (key, cells) in sums {
        values.push(
            index
                .iter()
                .map(|ts| cells.get(ts).copied().flatten())
                .collect(),
        );
        columns.push(key);
    }

    Ok(Some(WideTable::new(index, columns, values)?))
}

/// Full hourly grid for `period`. A year is fixed by the calendar; `All`
/// needs the observed span and is `None` for an empty table.
pub fn period_index(
    long: &LongTable,
    period: Period,
) -> Result<Option<Vec<NaiveDateTime>>, CalendarError> {
    match period {
        Period::Year(year) => {
            let (start, end) = year_bounds(year)?;
            Ok(Some(hourly_index(start, end)))
        }
        Period::All => Ok(long
            .timestamp_range()
            .map(|(start, end)| hourly_index(start, end))),
    }
}

/// Canonical wide table for `period`, or `None` when the period has no rows.
pub fn reindex_period(
    long: &LongTable,
    period: Period,
) -> Result<Option<WideTable>, CalendarError> {
    let Some(sparse) = pivot_sum(long, period)? else {
        debug!(
            component = "calendar",
            event = "calendar.period.empty",
            period = %period
        );
        return Ok(None);
    };

    let Some(full_index) = period_index(long, period)? else {
        return Ok(None);
    };

    let observed_rows = sparse.row_count();
    let wide = sparse.reindex(&full_index);

    info!(
        component = "calendar",
        event = "calendar.period.reindexed",
        period = %period,
        observed_rows,
        rows = wide.row_count(),
        columns = wide.column_count(),
        missing_cells = wide.missing_cells()
    );

    Ok(Some(wide))
}
