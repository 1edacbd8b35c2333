//! Bounded short-gap imputation.
//!
//! A missing run is forward-filled from the value right before it only when
//! its length is at most `max_gap_hours`. Longer runs, and leading runs with
//! nothing before them, stay missing. `max_gap_hours == 0` disables filling.

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::wide_table::WideTable;

pub const DEFAULT_MAX_GAP_HOURS: usize = 2;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImputeReport {
    pub missing_before: u64,
    pub filled_cells: u64,
    pub filled_runs: u64,
    pub open_runs: u64,
    pub missing_after: u64,
}

impl ImputeReport {
    fn absorb(&mut self, other: ImputeReport) {
        self.missing_before += other.missing_before;
        self.filled_cells += other.filled_cells;
        self.filled_runs += other.filled_runs;
        self.open_runs += other.open_runs;
        self.missing_after += other.missing_after;
    }
}

/// Fills one column in place and reports what changed.
pub fn fill_short_gaps(cells: &mut [Option<f64>], max_gap_hours: usize) -> ImputeReport {
    let mut report = ImputeReport::default();
    let mut last_value: Option<f64> = None;
    let mut row = 0;

    while row < cells.len() {
        if let Some(value) = cells[row] {
            last_value = Some(value);
            row += 1;
            continue;
        }

        let run_start = row;
        while row < cells.len() && cells[row].is_none() {
            row += 1;
        }
        let run_len = row - run_start;
        report.missing_before += run_len as u64;

        match last_value {
            Some(fill) if run_len <= max_gap_hours => {
                for cell in &mut cells[run_start..row] {
                    *cell = Some(fill);
                }
                report.filled_cells += run_len as u64;
                report.filled_runs += 1;
            }
            _ => {
                report.open_runs += 1;
                report.missing_after += run_len as u64;
            }
        }
    }

    report
}

/// Applies [`fill_short_gaps`] to every column independently.
pub fn impute_short_gaps(table: WideTable, max_gap_hours: usize) -> (WideTable, ImputeReport) {
    let (index, columns, mut values) = table.into_parts();
    let mut report = ImputeReport::default();

    for (key, cells) in columns.iter().zip(values.iter_mut()) {
        let column_report = fill_short_gaps(cells, max_gap_hours);
        if column_report.filled_cells > 0 {
            debug!(
                component = "impute",
                event = "impute.column.filled",
                series_key = %key,
                filled_cells = column_report.filled_cells,
                open_runs = column_report.open_runs
            );
        }
        report.absorb(column_report);
    }

    let table = WideTable::new(index, columns, values)
        .expect("imputation preserves the table shape");
    (table, report)
}
