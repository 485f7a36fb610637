//! Durable result artifacts.
//!
//! Two append-only CSV files plus a JSON metadata record per run. Artifacts
//! are flushed after every experiment step so a crash mid-run leaves the
//! completed steps usable for analysis.

use std::fs::File;
use std::path::Path;

use anyhow::{Context, Result};
use serde::Serialize;
use strata_store::{SizeMetrics, TimingSample};

/// Writers for one run's artifacts, rooted at the output directory.
pub struct ResultWriter {
    timings: csv::Writer<File>,
    loads: csv::Writer<File>,
}

impl ResultWriter {
    /// Creates the output directory and both CSV files with headers.
    pub fn create(out_dir: &Path) -> Result<Self> {
        std::fs::create_dir_all(out_dir)
            .with_context(|| format!("create dir {}", out_dir.display()))?;

        let timings_path = out_dir.join("timings.csv");
        let mut timings = csv::Writer::from_writer(
            File::create(&timings_path)
                .with_context(|| format!("create {}", timings_path.display()))?,
        );
        timings.write_record([
            "step",
            "budget",
            "query_id",
            "occurrences",
            "reused",
            "iterations",
            "iter_ms",
            "trailing_avg_ms",
            "rows",
            "fingerprint",
            "materialized",
        ])?;

        let loads_path = out_dir.join("loads.csv");
        let mut loads = csv::Writer::from_writer(
            File::create(&loads_path)
                .with_context(|| format!("create {}", loads_path.display()))?,
        );
        loads.write_record([
            "step",
            "budget",
            "materialized",
            "load_ms",
            "workload_ms",
            "blocks_used",
            "block_size",
            "total_bytes",
        ])?;

        Ok(Self { timings, loads })
    }

    /// Appends one query measurement (or reuse) row.
    #[allow(clippy::too_many_arguments)]
    pub fn record_query(
        &mut self,
        step: usize,
        budget: usize,
        query_id: &str,
        occurrences: usize,
        reused: bool,
        sample: &TimingSample,
        materialized: &str,
    ) -> Result<()> {
        let iter_ms = sample
            .iter_ms
            .iter()
            .map(|ms| format!("{ms:.3}"))
            .collect::<Vec<_>>()
            .join(";");
        self.timings
            .write_record([
                step.to_string(),
                budget.to_string(),
                query_id.to_string(),
                occurrences.to_string(),
                reused.to_string(),
                sample.iterations.to_string(),
                iter_ms,
                format!("{:.3}", sample.trailing_avg_ms),
                sample.rows.to_string(),
                format!("{:016x}", sample.fingerprint),
                materialized.to_string(),
            ])
            .context("append timings row")?;
        Ok(())
    }

    /// Appends one per-step load row.
    pub fn record_load(
        &mut self,
        step: usize,
        budget: usize,
        materialized: &str,
        load_ms: f64,
        workload_ms: f64,
        size: &SizeMetrics,
    ) -> Result<()> {
        self.loads
            .write_record([
                step.to_string(),
                budget.to_string(),
                materialized.to_string(),
                format!("{load_ms:.3}"),
                format!("{workload_ms:.3}"),
                size.blocks_used.to_string(),
                size.block_size.to_string(),
                size.total_bytes.to_string(),
            ])
            .context("append loads row")?;
        Ok(())
    }

    /// Flushes both files to disk. Called after every step.
    pub fn flush(&mut self) -> Result<()> {
        self.timings.flush().context("flush timings.csv")?;
        self.loads.flush().context("flush loads.csv")?;
        Ok(())
    }
}

/// Serializes the run configuration next to the CSVs for reproducibility.
pub fn write_meta<T: Serialize>(out_dir: &Path, meta: &T) -> Result<()> {
    let path = out_dir.join("meta.json");
    let data = serde_json::to_vec_pretty(meta).context("serialize run metadata")?;
    std::fs::write(&path, data).with_context(|| format!("write {}", path.display()))?;
    Ok(())
}
