//! Experiment driver: the generate → mutate → execute → record loop.
//!
//! One driver run sweeps a budget schedule over a single workload. Every
//! step works on a private copy of the baseline store, so steps are isolated
//! and a crash can never corrupt the baseline. Execution is fail-fast: any
//! engine rejection or cross-variant result divergence aborts the run,
//! because both signal harness bugs rather than transient conditions.

use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;

use anyhow::{bail, ensure, Context, Result};
use serde::Serialize;
use strata_advisor::{canonical_set_label, Dataset, ScoringMode, WeightEngine};
use strata_store::{apply, plan_for_target, DocumentStore};
use tracing::{debug, info};

use crate::cache::TimingCache;
use crate::generate::{generate, occurrence_counts};
use crate::results::{write_meta, ResultWriter};

/// Everything one experiment run depends on. Built by the CLI, serialized
/// into `meta.json` verbatim.
#[derive(Debug, Clone, Serialize)]
pub struct ExperimentConfig {
    /// Dataset name (built-in) or the stem of the dataset file.
    pub dataset: String,
    /// NDJSON corpus to (re)import. When absent, `baseline` must already
    /// exist from a previous import.
    pub data: Option<PathBuf>,
    /// Baseline store file. Never mutated by experiment steps.
    pub baseline: PathBuf,
    /// Number of query invocations in the generated workload.
    pub workload_length: usize,
    /// Number of distinct queries in the majority set.
    pub majority_size: usize,
    /// Fraction of the workload drawn from the majority set.
    pub majority_fraction: f64,
    /// RNG seed for workload generation.
    pub seed: u64,
    /// Timed iterations per measured query (first one is the discarded
    /// cold run).
    pub iterations: usize,
    /// Non-decreasing materialization budget schedule, one step per entry.
    pub budgets: Vec<usize>,
    /// Field scoring mode.
    pub mode: ScoringMode,
    /// Directory for result artifacts.
    pub out_dir: PathBuf,
    /// Keep per-step store copies instead of discarding them at teardown.
    pub keep_step_stores: bool,
}

/// Runs one experiment configuration to completion.
pub struct ExperimentDriver {
    config: ExperimentConfig,
    dataset: Dataset,
    cache: TimingCache,
    /// First-seen result fingerprint and row count per query, checked
    /// against every later measurement of the same query.
    fingerprints: BTreeMap<String, (u64, usize)>,
    materialized: BTreeSet<String>,
}

impl ExperimentDriver {
    pub fn new(config: ExperimentConfig, dataset: Dataset) -> Result<Self> {
        ensure!(!config.budgets.is_empty(), "budget schedule must not be empty");
        ensure!(
            config.budgets.windows(2).all(|pair| pair[0] <= pair[1]),
            "budget schedule must be non-decreasing: {:?}",
            config.budgets
        );
        let max_budget = *config.budgets.last().expect("non-empty schedule");
        ensure!(
            max_budget <= dataset.catalog.len(),
            "budget {max_budget} exceeds the {} catalog fields of dataset '{}'",
            dataset.catalog.len(),
            dataset.name
        );
        ensure!(
            config.iterations >= 2,
            "iterations must be >= 2 so a warm trailing average exists"
        );
        dataset.validate().context("validate dataset")?;

        Ok(Self {
            config,
            dataset,
            cache: TimingCache::new(),
            fingerprints: BTreeMap::new(),
            materialized: BTreeSet::new(),
        })
    }

    pub fn run(mut self) -> Result<()> {
        self.init_baseline()?;

        let ids = self.dataset.query_ids();
        let workload = generate(
            &ids,
            self.config.workload_length,
            self.config.majority_size,
            self.config.majority_fraction,
            self.config.seed,
        )
        .context("generate workload")?;
        let occurrences = occurrence_counts(&workload);
        info!(
            length = workload.len(),
            distinct = occurrences.len(),
            seed = self.config.seed,
            "generated workload"
        );

        let mut results = ResultWriter::create(&self.config.out_dir)?;
        write_meta(&self.config.out_dir, &self.config)?;

        let budgets = self.config.budgets.clone();
        for (step, budget) in budgets.into_iter().enumerate() {
            self.run_step(step, budget, &workload, &occurrences, &mut results)?;
        }

        info!(steps = self.config.budgets.len(), "experiment complete");
        Ok(())
    }

    /// Imports the corpus when one is given, otherwise requires an existing
    /// baseline from a prior import.
    fn init_baseline(&self) -> Result<()> {
        match &self.config.data {
            Some(data) => {
                if let Some(parent) = self.config.baseline.parent() {
                    std::fs::create_dir_all(parent)
                        .with_context(|| format!("create dir {}", parent.display()))?;
                }
                let store = DocumentStore::import(&self.config.baseline, data)
                    .context("import baseline corpus")?;
                let rows = store.document_count()?;
                ensure!(rows > 0, "corpus {} holds no documents", data.display());
            }
            None => {
                ensure!(
                    self.config.baseline.exists(),
                    "baseline store {} does not exist and no --data corpus was given",
                    self.config.baseline.display()
                );
            }
        }
        Ok(())
    }

    fn run_step(
        &mut self,
        step: usize,
        budget: usize,
        workload: &[String],
        occurrences: &BTreeMap<String, usize>,
        results: &mut ResultWriter,
    ) -> Result<()> {
        let engine = WeightEngine::new(&self.dataset, self.config.mode);
        let target = engine
            .select(occurrences, &self.materialized, budget)
            .with_context(|| format!("select fields for budget {budget}"))?;
        let label = canonical_set_label(&target);
        info!(step, budget, materialized = %label, "mutating schema");

        let step_path = self
            .config
            .out_dir
            .join(format!("step_{step:02}.duckdb"));
        let store = DocumentStore::copy_from(&self.config.baseline, &step_path)
            .context("create per-step store copy")?;

        let plan = plan_for_target(&self.dataset.catalog, &target);
        let load = apply(&store, &self.dataset.catalog, &plan)
            .with_context(|| format!("apply materialization set {label}"))?;
        let size = store.size_metrics()?;

        let mut workload_ms = 0.0;
        let mut seen = BTreeSet::new();
        for query_id in workload {
            // Within a step the materialized set is fixed, so repeats of a
            // query are cache hits by construction; one row per distinct
            // query carries its occurrence count instead.
            if !seen.insert(query_id.clone()) {
                continue;
            }
            let descriptor = self
                .dataset
                .descriptor(query_id)
                .with_context(|| format!("workload references unknown query '{query_id}'"))?;
            let columns = descriptor.columns();
            let count = occurrences.get(query_id).copied().unwrap_or(0);

            let (sample, reused) = match self.cache.lookup(query_id, &columns, &target) {
                Some(sample) => {
                    debug!(query = %query_id, "reusing prior timing");
                    (sample.clone(), true)
                }
                None => {
                    let sql = descriptor.render_sql(&self.dataset.catalog, &target)?;
                    let sample = store.timed_execute(query_id, &sql, self.config.iterations)?;
                    self.cache.store(query_id, &columns, &target, sample.clone());
                    (sample, false)
                }
            };

            match self.fingerprints.get(query_id) {
                Some((fingerprint, rows)) => {
                    if *fingerprint != sample.fingerprint || *rows != sample.rows {
                        bail!(
                            "query '{query_id}' diverged under materialization set {label}: \
                             fingerprint {:016x} ({} rows) vs baseline {fingerprint:016x} ({rows} rows)",
                            sample.fingerprint,
                            sample.rows
                        );
                    }
                }
                None => {
                    self.fingerprints
                        .insert(query_id.clone(), (sample.fingerprint, sample.rows));
                }
            }

            workload_ms += count as f64 * sample.trailing_avg_ms;
            results.record_query(step, budget, query_id, count, reused, &sample, &label)?;
        }

        results.record_load(
            step,
            budget,
            &label,
            load.as_secs_f64() * 1_000.0,
            workload_ms,
            &size,
        )?;
        results.flush()?;

        if self.config.keep_step_stores {
            drop(store);
        } else {
            store.discard().context("discard per-step store copy")?;
        }
        self.materialized = target;
        info!(step, budget, workload_ms, "step recorded");
        Ok(())
    }
}
