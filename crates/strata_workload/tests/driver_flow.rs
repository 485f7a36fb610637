//! End-to-end driver test: import, two budget steps, artifact checks.
//!
//! The second step materializes fields on top of an empty first step, so
//! every query untouched by the newly materialized fields must be served
//! from the timing cache with its step-one sample reproduced verbatim.

use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

use strata_advisor::{datasets, ScoringMode};
use strata_workload::{ExperimentConfig, ExperimentDriver};

fn corpus_line(row: usize) -> String {
    let year = 1993 + row % 5;
    format!(
        concat!(
            "{{\"l_orderkey\":{},\"l_partkey\":{},\"l_suppkey\":{},\"l_linenumber\":{},",
            "\"l_quantity\":{},\"l_extendedprice\":{:.2},\"l_discount\":{:.2},\"l_tax\":{:.2},",
            "\"l_returnflag\":\"{}\",\"l_linestatus\":\"{}\",",
            "\"l_shipdate\":\"{:04}-{:02}-{:02}\",\"l_commitdate\":\"{:04}-{:02}-{:02}\",",
            "\"l_receiptdate\":\"{:04}-{:02}-{:02}\",\"l_shipinstruct\":\"NONE\",",
            "\"l_shipmode\":\"{}\",\"l_comment\":\"row {}\"}}"
        ),
        row / 3 + 1,
        row % 11 + 1,
        row % 5 + 1,
        row % 3 + 1,
        row % 45 + 1,
        1000.0 + row as f64 * 7.25,
        (row % 9) as f64 / 100.0,
        (row % 6) as f64 / 100.0,
        ["A", "N", "R"][row % 3],
        if row % 2 == 0 { "F" } else { "O" },
        year,
        1 + row % 12,
        1 + row % 28,
        year,
        1 + row % 12,
        1 + (row + 3) % 28,
        year,
        1 + (row + 1) % 12,
        1 + row % 28,
        ["AIR", "MAIL", "SHIP", "TRUCK"][row % 4],
        row,
    )
}

fn write_corpus(dir: &Path, rows: usize) -> std::path::PathBuf {
    let path = dir.join("corpus.ndjson");
    let body: String = (0..rows).map(|row| corpus_line(row) + "\n").collect();
    std::fs::write(&path, body).unwrap();
    path
}

#[derive(Debug)]
struct TimingRow {
    step: usize,
    query_id: String,
    reused: bool,
    trailing_avg_ms: f64,
    fingerprint: String,
    materialized: String,
}

fn read_timings(path: &Path) -> Vec<TimingRow> {
    let mut reader = csv::Reader::from_path(path).unwrap();
    reader
        .records()
        .map(|record| {
            let record = record.unwrap();
            TimingRow {
                step: record[0].parse().unwrap(),
                query_id: record[2].to_string(),
                reused: record[4].parse().unwrap(),
                trailing_avg_ms: record[7].parse().unwrap(),
                fingerprint: record[9].to_string(),
                materialized: record[10].to_string(),
            }
        })
        .collect()
}

fn parse_set(label: &str) -> BTreeSet<String> {
    if label == "~" {
        BTreeSet::new()
    } else {
        label.split('+').map(String::from).collect()
    }
}

#[test]
fn two_step_experiment_reuses_untouched_queries() {
    let dir = tempfile::tempdir().unwrap();
    let corpus = write_corpus(dir.path(), 45);
    let dataset = datasets::lineitem();

    let config = ExperimentConfig {
        dataset: dataset.name.clone(),
        data: Some(corpus),
        baseline: dir.path().join("baseline.duckdb"),
        workload_length: 60,
        majority_size: 3,
        majority_fraction: 0.8,
        seed: 0,
        iterations: 2,
        budgets: vec![0, 3],
        mode: ScoringMode::Weighted,
        out_dir: dir.path().join("results"),
        keep_step_stores: false,
    };
    ExperimentDriver::new(config, dataset.clone())
        .unwrap()
        .run()
        .unwrap();

    let out = dir.path().join("results");
    assert!(out.join("meta.json").exists());
    assert!(out.join("loads.csv").exists());
    // Per-step store copies were torn down.
    assert!(!out.join("step_00.duckdb").exists());
    assert!(!out.join("step_01.duckdb").exists());

    let rows = read_timings(&out.join("timings.csv"));
    let step0: Vec<&TimingRow> = rows.iter().filter(|row| row.step == 0).collect();
    let step1: Vec<&TimingRow> = rows.iter().filter(|row| row.step == 1).collect();
    assert!(!step0.is_empty());
    assert_eq!(step0.len(), step1.len(), "both steps cover the same distinct queries");
    assert!(step0.iter().all(|row| !row.reused), "first step has no cache to reuse");
    assert!(step0.iter().all(|row| row.materialized == "~"));

    let step1_set = parse_set(&step1[0].materialized);
    assert_eq!(step1_set.len(), 3);

    let step0_by_query: BTreeMap<&str, &TimingRow> = step0
        .iter()
        .map(|row| (row.query_id.as_str(), *row))
        .collect();
    let mut reuse_seen = false;
    for row in &step1 {
        let descriptor = dataset.descriptor(&row.query_id).unwrap();
        let touched = descriptor
            .columns()
            .intersection(&step1_set)
            .next()
            .is_some();
        assert_eq!(
            row.reused, !touched,
            "query {} reuse flag disagrees with column overlap",
            row.query_id
        );
        let baseline = step0_by_query[row.query_id.as_str()];
        // Reuse must be verbatim: identical recorded timing and fingerprint.
        if row.reused {
            reuse_seen = true;
            assert_eq!(row.trailing_avg_ms, baseline.trailing_avg_ms);
        }
        assert_eq!(row.fingerprint, baseline.fingerprint, "query {} diverged", row.query_id);
    }
    assert!(reuse_seen, "at least one query should be untouched by 3 fields");
}
