use std::error::Error;
use std::path::PathBuf;
use std::time::Instant;

use clap::Parser;
use sold_power::{
    build_wide_tables, init_logging, log_run_failed, log_run_finish, log_run_start,
    logging_config_from_env, pipeline_config_from_env, run_span, PeriodSelection,
};

const COMMAND: &str = "build_wide_tables";

/// Reshape hourly demand exports into one gap-repaired wide table per year,
/// plus a combined table spanning every observation.
#[derive(Parser)]
#[command(name = "build_wide_tables")]
struct Args {
    /// Folder holding the CSV exports. Overrides SOLD_POWER_INPUT_DIR.
    #[arg(long)]
    input_dir: Option<PathBuf>,

    /// Output folder. Overrides SOLD_POWER_OUTPUT_DIR.
    #[arg(long)]
    output_dir: Option<PathBuf>,

    /// Comma-separated years, or `all`. Overrides SOLD_POWER_YEARS.
    #[arg(long)]
    years: Option<String>,

    /// Longest missing run, in hours, to forward-fill (0 disables).
    #[arg(long)]
    max_gap_hours: Option<usize>,

    /// Do not write the combined multi-year table.
    #[arg(long, default_value_t = false)]
    no_combined: bool,
}

fn main() -> Result<(), Box<dyn Error>> {
    let args = Args::parse();
    let logging_cfg = logging_config_from_env();
    init_logging(&logging_cfg)?;

    let span = run_span(COMMAND);
    let _entered = span.enter();
    let started = Instant::now();
    log_run_start(COMMAND, &logging_cfg);

    if let Err(err) = run(args, started) {
        log_run_failed(COMMAND, &*err, started.elapsed());
        return Err(err);
    }
    Ok(())
}

fn run(args: Args, started: Instant) -> Result<(), Box<dyn Error>> {
    let mut cfg = pipeline_config_from_env()?;
    if let Some(dir) = args.input_dir {
        cfg.input_dir = dir;
    }
    if let Some(dir) = args.output_dir {
        cfg.output_dir = dir;
    }
    if let Some(years) = args.years {
        cfg.periods = PeriodSelection::parse(&years)?;
    }
    if let Some(hours) = args.max_gap_hours {
        cfg.max_gap_hours = hours;
    }
    cfg.write_combined = !args.no_combined;

    let report = build_wide_tables(&cfg)?;

    println!("Total long rows: {}", report.long_rows);
    for year in &report.skipped_years {
        println!("  (no rows for {year}, skipping)");
    }
    for outcome in report.periods.iter().chain(report.combined.iter()) {
        println!(
            "SAVED: {}  shape=({}, {})  filled={} still_missing={}",
            outcome.path.display(),
            outcome.rows,
            outcome.columns,
            outcome.impute.filled_cells,
            outcome.impute.missing_after
        );
    }

    log_run_finish(
        COMMAND,
        &cfg.output_dir,
        &report.files_written(),
        started.elapsed(),
    );
    Ok(())
}
