use std::error::Error;
use std::path::PathBuf;
use std::time::Instant;

use clap::Parser;
use sold_power::{
    init_logging, log_run_failed, log_run_finish, log_run_start, logging_config_from_env,
    normalize_config_from_env, parse_training_window, run_normalization, run_span,
};

const COMMAND: &str = "normalize_power";

/// Z-score the combined wide table with statistics fitted on the training
/// years only.
#[derive(Parser)]
#[command(name = "normalize_power")]
struct Args {
    /// Combined wide table to normalize. Overrides SOLD_POWER_NORMALIZE_INPUT;
    /// by default the combined table inside the output folder is read.
    #[arg(long)]
    input: Option<PathBuf>,

    /// Output folder. Overrides SOLD_POWER_OUTPUT_DIR.
    #[arg(long)]
    output_dir: Option<PathBuf>,

    /// Training years, `YYYY-YYYY` inclusive. Overrides SOLD_POWER_TRAIN_YEARS.
    #[arg(long)]
    train_years: Option<String>,
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
    let mut cfg = normalize_config_from_env()?;
    if let Some(input) = args.input {
        cfg.input_path = Some(input);
    }
    if let Some(dir) = args.output_dir {
        cfg.output_dir = dir;
    }
    if let Some(window) = args.train_years {
        cfg.training = Some(parse_training_window(&window)?);
    }

    let report = run_normalization(&cfg)?;
    let manifest = &report.manifest;

    println!("=== Normalization complete ===");
    println!("Created: {}", report.normalized_path.display());
    println!("Created: {}", report.params_path.display());
    println!(
        "Training window: {}-{} ({} rows)",
        manifest.window.first_year, manifest.window.last_year, manifest.training_rows
    );
    if !manifest.zero_std_keys.is_empty() {
        println!(
            "NOTE: {} column(s) have zero std in the training window and are set to 0.",
            manifest.zero_std_keys.len()
        );
    }
    if let (Some(mean), Some(std)) = (
        manifest.summary.avg_column_mean,
        manifest.summary.avg_column_std,
    ) {
        println!("Avg of column means (all rows, normalized): {mean:.4}");
        println!("Avg of column stds  (all rows, normalized): {std:.4}");
    }
    if let (Some(mean), Some(std)) = (
        manifest.summary.holdout_avg_column_mean,
        manifest.summary.holdout_avg_column_std,
    ) {
        println!("Held-out avg mean across columns (z): {mean:.4}");
        println!("Held-out avg std  across columns (z): {std:.4}");
    }

    log_run_finish(
        COMMAND,
        &cfg.output_dir,
        &report.files_written(),
        started.elapsed(),
    );
    Ok(())
}
