use std::fs;
use std::path::Path;

use chrono::{NaiveDate, NaiveDateTime};
use regex::Regex;
use sold_power::{
    build_wide_tables, period_index, read_wide_table, reindex_period, wide_file_name,
    ExtractError, LongTable, Observation, Period, PeriodSelection, PipelineConfig, PipelineError,
    SeriesKey,
};
use tempfile::tempdir;

const HOUR_HEADER: &str = "Fecha,Codigo Comercializador,Mercado,0,1,2,3";

fn ts(y: i32, m: u32, d: u32, h: u32) -> NaiveDateTime {
    NaiveDate::from_ymd_opt(y, m, d)
        .unwrap()
        .and_hms_opt(h, 0, 0)
        .unwrap()
}

fn write_export(dir: &Path, name: &str, rows: &[&str]) {
    let mut body = String::from("Demanda Comercial por Comercializador,,,,,,\n");
    body.push_str(HOUR_HEADER);
    body.push('\n');
    for row in rows {
        body.push_str(row);
        body.push('\n');
    }
    fs::write(dir.join(name), body).unwrap();
}

fn config(input: &Path, output: &Path, years: &[i32], max_gap_hours: usize) -> PipelineConfig {
    PipelineConfig {
        input_dir: input.to_path_buf(),
        output_dir: output.to_path_buf(),
        periods: PeriodSelection::Years(years.to_vec()),
        max_gap_hours,
        ..PipelineConfig::default()
    }
}

#[test]
fn single_hour_gap_is_carried_forward_at_default_threshold() {
    let input = tempdir().unwrap();
    let output = tempdir().unwrap();
    write_export(
        input.path(),
        "Demanda_Comercial_Por_Comercializador_SEME_2021.csv",
        &["2021-01-01,acme,spot,10,12,,15"],
    );

    let report = build_wide_tables(&config(input.path(), output.path(), &[2021], 2)).unwrap();
    assert_eq!(report.long_rows, 4);
    assert_eq!(report.periods.len(), 1);

    let table = read_wide_table(&output.path().join(wide_file_name(2021, None))).unwrap();
    let key = SeriesKey::parse("ACME SPOT").unwrap();
    assert_eq!(table.row_count(), 8760);
    assert_eq!(table.cell(ts(2021, 1, 1, 0), &key), Some(Some(10.0)));
    assert_eq!(table.cell(ts(2021, 1, 1, 2), &key), Some(Some(12.0)));
    assert_eq!(table.cell(ts(2021, 1, 1, 3), &key), Some(Some(15.0)));
    // the trailing run after 03:00 is far longer than the threshold
    assert_eq!(table.cell(ts(2021, 1, 1, 4), &key), Some(None));
    assert_eq!(table.cell(ts(2021, 12, 31, 23), &key), Some(None));

    let combined = report.combined.expect("combined table should be written");
    assert!(combined.path.ends_with("sold_power_wide_2021_2021.csv"));
    assert_eq!(combined.rows, 4);
    assert_eq!(combined.impute.filled_cells, 1);
}

#[test]
fn zero_threshold_leaves_every_gap_missing() {
    let input = tempdir().unwrap();
    let output = tempdir().unwrap();
    write_export(
        input.path(),
        "Demanda_Comercial_Por_Comercializador_SEME_2021.csv",
        &["2021-01-01,ACME,SPOT,10,12,,15"],
    );

    let report = build_wide_tables(&config(input.path(), output.path(), &[2021], 0)).unwrap();
    assert_eq!(report.periods[0].impute.filled_cells, 0);

    let table = read_wide_table(&report.periods[0].path).unwrap();
    let key = SeriesKey::parse("ACME SPOT").unwrap();
    assert_eq!(table.cell(ts(2021, 1, 1, 2), &key), Some(None));
}

#[test]
fn year_tables_cover_the_full_calendar() {
    let input = tempdir().unwrap();
    let output = tempdir().unwrap();
    write_export(
        input.path(),
        "Demanda_Comercial_Por_Comercializador_SEME_2020.csv",
        &["2020-06-01,ACME,SPOT,1,2,3,4", "2021-03-02,BETA,MD,5,6,7,8"],
    );

    let report =
        build_wide_tables(&config(input.path(), output.path(), &[2020, 2021, 2022], 2)).unwrap();
    assert_eq!(report.skipped_years, vec![2022]);
    assert_eq!(report.files_written().len(), 3);
    assert!(!output.path().join(wide_file_name(2022, None)).exists());

    let line = Regex::new(r"^\d{4}-\d{2}-\d{2} \d{2}:00:00,").unwrap();
    for (year, expected_rows) in [(2020, 8784), (2021, 8760)] {
        let path = output.path().join(wide_file_name(year, None));
        let text = fs::read_to_string(&path).unwrap();
        let mut lines = text.lines();
        let header = lines.next().unwrap();
        assert!(header.starts_with("timestamp,"));

        let data: Vec<&str> = lines.collect();
        assert_eq!(data.len(), expected_rows, "rows for {year}");
        assert!(data.iter().all(|l| line.is_match(l)));
        assert!(data[0].starts_with(&format!("{year}-01-01 00:00:00")));
        assert!(data[data.len() - 1].starts_with(&format!("{year}-12-31 23:00:00")));

        let table = read_wide_table(&path).unwrap();
        assert!(table.is_contiguous_hourly());
    }

    let year_2020 = read_wide_table(&output.path().join(wide_file_name(2020, None))).unwrap();
    let names: Vec<&str> = year_2020.columns().iter().map(SeriesKey::as_str).collect();
    assert_eq!(names, vec!["ACME SPOT"]);
}

#[test]
fn duplicates_across_sources_are_summed() {
    let input = tempdir().unwrap();
    let output = tempdir().unwrap();
    write_export(
        input.path(),
        "Demanda_Comercial_Por_Comercializador_SEME_a.csv",
        &["2021-01-01,ACME,SPOT,1,1,1,1"],
    );
    write_export(
        input.path(),
        "Demanda_Comercial_Por_Comercializador_SEME_b.csv",
        &["2021-01-01,ACME,SPOT,2,,2,2"],
    );

    let report = build_wide_tables(&config(input.path(), output.path(), &[2021], 2)).unwrap();
    assert_eq!(report.sources.len(), 2);

    let table = read_wide_table(&report.periods[0].path).unwrap();
    let key = SeriesKey::parse("ACME SPOT").unwrap();
    assert_eq!(table.cell(ts(2021, 1, 1, 0), &key), Some(Some(3.0)));
    assert_eq!(table.cell(ts(2021, 1, 1, 1), &key), Some(Some(1.0)));
}

#[test]
fn schema_error_aborts_before_any_output() {
    let input = tempdir().unwrap();
    let root = tempdir().unwrap();
    let output = root.path().join("out");
    write_export(
        input.path(),
        "Demanda_Comercial_Por_Comercializador_SEME_1.csv",
        &["2021-01-01,ACME,SPOT,1,1,1,1"],
    );
    fs::write(
        input.path().join("Demanda_Comercial_Por_Comercializador_SEME_2.csv"),
        "Fecha,Codigo Comercializador,0,1\n2021-01-01,ACME,1,1\n",
    )
    .unwrap();

    let err = build_wide_tables(&config(input.path(), &output, &[2021], 2)).unwrap_err();
    match err {
        PipelineError::Extract(ExtractError::MissingColumns { missing, .. }) => {
            assert_eq!(missing, vec!["Mercado".to_string()]);
        }
        other => panic!("unexpected error: {other}"),
    }
    assert!(!output.exists());
}

#[test]
fn reindexing_a_complete_year_is_a_no_op() {
    let key = SeriesKey::parse("ACME SPOT").unwrap();
    let rows = [ts(2021, 1, 1, 0), ts(2021, 7, 4, 12), ts(2021, 12, 31, 23)]
        .into_iter()
        .enumerate()
        .map(|(i, at)| Observation::new(at, key.clone(), Some(i as f64)).unwrap())
        .collect();
    let long = LongTable::from_rows(rows);

    let table = reindex_period(&long, Period::Year(2021)).unwrap().unwrap();
    let index = period_index(&long, Period::Year(2021)).unwrap().unwrap();
    assert_eq!(table.clone().reindex(&index), table);
    assert_eq!(table.missing_cells(), 8760 - 3);
}

#[test]
fn melted_sources_feed_the_same_build() {
    let input = tempdir().unwrap();
    let output = tempdir().unwrap();
    fs::write(
        input.path().join("observations.csv"),
        "timestamp,series_key,value\n\
         2021-01-01 00:00:00,acme spot,10\n\
         2021-01-01 01:00:00,ACME SPOT,12\n\
         2021-01-01 03:00:00,ACME SPOT,15\n",
    )
    .unwrap();

    let report = build_wide_tables(&config(input.path(), output.path(), &[2021], 2)).unwrap();
    assert_eq!(report.sources.len(), 1);
    assert_eq!(report.sources[0].observations, 3);

    let table = read_wide_table(&report.periods[0].path).unwrap();
    let key = SeriesKey::parse("ACME SPOT").unwrap();
    assert_eq!(table.row_count(), 8760);
    assert_eq!(table.cell(ts(2021, 1, 1, 2), &key), Some(Some(12.0)));
}

#[test]
fn failed_write_removes_tables_already_written() {
    let input = tempdir().unwrap();
    let output = tempdir().unwrap();
    write_export(
        input.path(),
        "Demanda_Comercial_Por_Comercializador_SEME_2021.csv",
        &["2021-01-01,ACME,SPOT,1,2,3,4"],
    );
    // a non-empty directory where the combined table should go
    let blocker = output.path().join("sold_power_wide_2021_2021.csv");
    fs::create_dir(&blocker).unwrap();
    fs::write(blocker.join("keep"), "x").unwrap();

    let err = build_wide_tables(&config(input.path(), output.path(), &[2021], 2)).unwrap_err();
    assert!(matches!(err, PipelineError::TableIo(_)));
    assert!(!output.path().join(wide_file_name(2021, None)).exists());
    assert!(!output
        .path()
        .join("sold_power_wide_2021_2021.csv.tmp")
        .exists());
}
