use std::fs;
use std::io;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::NaiveDate;
use sold_power::{
    build_wide_tables, impute_short_gaps, log_run_failed, log_run_finish, log_run_start,
    normalize, reindex_period, run_normalization, run_span, LoggingConfig, LongTable,
    NormalizeConfig, Observation, Period, PeriodSelection, PipelineConfig, SeriesKey,
    TrainingWindow, WideTable,
};
use tempfile::tempdir;
use tracing::dispatcher::with_default;
use tracing::Level;
use tracing_subscriber::fmt::writer::MakeWriter;

#[derive(Clone, Default)]
struct SharedWriter {
    inner: Arc<Mutex<Vec<u8>>>,
}

impl SharedWriter {
    fn output_string(&self) -> String {
        let bytes = self
            .inner
            .lock()
            .expect("writer lock should not be poisoned");
        String::from_utf8_lossy(&bytes).to_string()
    }
}

struct SharedWriterGuard {
    inner: Arc<Mutex<Vec<u8>>>,
}

impl<'a> MakeWriter<'a> for SharedWriter {
    type Writer = SharedWriterGuard;

    fn make_writer(&'a self) -> Self::Writer {
        SharedWriterGuard {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl Write for SharedWriterGuard {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let mut out = self
            .inner
            .lock()
            .expect("writer lock should not be poisoned");
        out.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

fn capture_logs(max_level: Level, f: impl FnOnce()) -> String {
    let writer = SharedWriter::default();
    let subscriber = tracing_subscriber::fmt()
        .json()
        .with_ansi(false)
        .with_max_level(max_level)
        .with_writer(writer.clone())
        .finish();
    let dispatch = tracing::Dispatch::new(subscriber);

    with_default(&dispatch, f);
    writer.output_string()
}

fn hour(y: i32, h: u32) -> chrono::NaiveDateTime {
    NaiveDate::from_ymd_opt(y, 1, 1)
        .unwrap()
        .and_hms_opt(h, 0, 0)
        .unwrap()
}

#[test]
fn reindex_and_impute_emit_period_events() {
    let key = SeriesKey::parse("ACME SPOT").unwrap();
    let long = LongTable::from_rows(vec![
        Observation::new(hour(2021, 0), key.clone(), Some(1.0)).unwrap(),
        Observation::new(hour(2021, 2), key, Some(3.0)).unwrap(),
    ]);

    let logs = capture_logs(Level::DEBUG, || {
        let wide = reindex_period(&long, Period::Year(2021))
            .expect("reindex should succeed")
            .expect("2021 has rows");
        let (_, report) = impute_short_gaps(wide, 2);
        assert_eq!(report.filled_cells, 1);
    });

    assert!(logs.contains("\"event\":\"calendar.period.reindexed\""));
    assert!(logs.contains("\"event\":\"impute.column.filled\""));
}

#[test]
fn zero_std_columns_are_reported_by_name() {
    let table = WideTable::new(
        vec![hour(2020, 0), hour(2021, 0), hour(2022, 0)],
        vec![
            SeriesKey::parse("FLAT SPOT").unwrap(),
            SeriesKey::parse("LIVE SPOT").unwrap(),
        ],
        vec![
            vec![Some(10.0), Some(10.0), Some(10.0)],
            vec![Some(1.0), Some(2.0), Some(3.0)],
        ],
    )
    .expect("table should be valid");

    let logs = capture_logs(Level::INFO, || {
        let window = TrainingWindow::new(2020, 2021).expect("window should be valid");
        normalize(table, window).expect("normalization should succeed");
    });

    assert!(logs.contains("\"event\":\"normalize.fit.finish\""));
    assert!(logs.contains("\"event\":\"normalize.zero_std\""));
    assert!(logs.contains("FLAT SPOT"));
    assert!(logs.contains("\"event\":\"normalize.summary\""));
}

#[test]
fn build_run_logs_sources_and_skipped_years() {
    let input = tempdir().expect("tempdir should be created");
    let output = tempdir().expect("tempdir should be created");
    fs::write(
        input.path().join("export.csv"),
        "Fecha,Codigo Comercializador,Mercado,0,1\n2021-01-01,ACME,SPOT,1,2\n",
    )
    .expect("export should be written");

    let logs = capture_logs(Level::INFO, || {
        let cfg = PipelineConfig {
            input_dir: input.path().to_path_buf(),
            output_dir: output.path().to_path_buf(),
            periods: PeriodSelection::Years(vec![2021, 2022]),
            ..PipelineConfig::default()
        };
        build_wide_tables(&cfg).expect("build should succeed");
    });

    assert!(logs.contains("\"event\":\"pipeline.sources.found\""));
    assert!(logs.contains("\"event\":\"extract.source.finish\""));
    assert!(logs.contains("\"event\":\"calendar.period.skipped\""));
    assert!(logs.contains("\"event\":\"impute.period.finish\""));
    assert!(logs.contains("\"event\":\"table_io.wide.saved\""));
}

#[test]
fn run_lifecycle_helpers_emit_baseline_events() {
    let logs = capture_logs(Level::INFO, || {
        let span = run_span("build_wide_tables");
        let _entered = span.enter();
        let cfg = LoggingConfig::default();
        log_run_start("build_wide_tables", &cfg);
        log_run_finish(
            "build_wide_tables",
            Path::new("out_all"),
            &[PathBuf::from("out_all/sold_power_wide_2021.csv")],
            Duration::from_millis(5),
        );
    });

    assert!(logs.contains("\"event\":\"run.start\""));
    assert!(logs.contains("\"event\":\"run.finish\""));
    assert!(logs.contains("\"files_written\":1"));
    assert!(logs.contains("\"command\":\"build_wide_tables\""));
    assert!(logs.contains("\"name\":\"run\""));
}

#[test]
fn failed_runs_are_logged_with_the_error() {
    let logs = capture_logs(Level::INFO, || {
        let err = run_normalization(&NormalizeConfig {
            input_path: Some(PathBuf::from("definitely/not/here.csv")),
            ..NormalizeConfig::default()
        })
        .expect_err("missing input should fail");
        log_run_failed("normalize_power", &err, Duration::from_millis(1));
    });

    assert!(logs.contains("\"event\":\"run.failed\""));
    assert!(logs.contains("definitely/not/here.csv"));
}
