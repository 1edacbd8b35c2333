//! Sold-power core crate.
//!
//! Current implemented scope:
//! - daily-export and melted CSV extraction into (timestamp, series key,
//!   value) observations
//! - long-table aggregation and per-period calendar reindexing
//! - bounded short-gap imputation
//! - leak-free Z-score normalization with persisted parameters

mod calendar;
mod config;
mod extract;
mod impute;
mod long_table;
mod normalize;
mod observability;
mod pipeline;
mod series_key;
mod table_io;
#[cfg(test)]
mod test_support;
mod wide_table;

pub use calendar::{
    hourly_index, hours_in_year, period_index, pivot_sum, reindex_period, year_bounds,
    CalendarError, Period,
};
pub use config::{
    normalize_config_from_env, normalize_config_from_lookup, parse_gap_hours,
    parse_training_window, pipeline_config_from_env, pipeline_config_from_lookup, ConfigError,
    NormalizeConfig, PeriodSelection, PipelineConfig, DEFAULT_OUTPUT_DIR, DEFAULT_SOURCE_PREFIX,
    DEFAULT_YEARS,
};
pub use extract::{
    detect_layout, extract_daily_export, extract_source_file, read_observations, ExtractError,
    ExtractReport, SourceLayout, REQUIRED_COLUMNS,
};
pub use impute::{fill_short_gaps, impute_short_gaps, ImputeReport, DEFAULT_MAX_GAP_HOURS};
pub use long_table::{aggregate, is_hour_aligned, LongTable, Observation, ObservationError};
pub use normalize::{
    fit, normalize, summarize, transform, NormalizationParams, NormalizationSummary,
    NormalizeError, NormalizedOutput, SeriesParams, TrainingWindow, TRAINING_YEAR_COUNT,
};
pub use observability::{
    init_logging, log_run_failed, log_run_finish, log_run_start, logging_config_from_env,
    run_span, LogFormat, LoggingConfig, LoggingInitError, LOG_FORMAT_VAR, LOG_LEVEL_VAR,
    LOG_TARGET_VAR,
};
pub use pipeline::{
    build_from_long, build_period_table, build_wide_tables, discover_sources, normalize_table,
    normalized_file_name, run_normalization, wide_file_name, BuildReport, NormalizationManifest,
    NormalizeReport, PeriodOutcome, PipelineError, MANIFEST_FILE_NAME, PARAMS_FILE_NAME,
};
pub use series_key::{SeriesKey, SeriesKeyError};
pub use table_io::{
    format_timestamp, read_wide_table, read_wide_table_from, write_params, write_params_to,
    write_wide_table, write_wide_table_to, TableIoError, TIMESTAMP_COLUMN, TIMESTAMP_FORMAT,
};
pub use wide_table::{WideTable, WideTableError};
