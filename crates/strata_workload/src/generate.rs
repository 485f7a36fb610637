//! Reproducible skewed workload generation.
//!
//! A workload is a fixed-length sequence of query ids where a small
//! "majority" subset of queries soaks up most of the traffic. Everything is
//! driven by one seeded RNG so identical arguments produce an identical
//! sequence in any process, which is what makes timings comparable across
//! runs and strategies.

use std::collections::BTreeMap;

use anyhow::{ensure, Result};
use rand::rngs::SmallRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};

/// Generates a workload of exactly `length` query ids.
///
/// `majority_size` distinct ids are sampled as the majority set and receive
/// `round(majority_fraction * length)` of the draws; the remaining queries
/// share the rest. Both pools draw uniformly with replacement, and the
/// concatenated sequence is shuffled with the same seeded RNG.
pub fn generate(
    queries: &[String],
    length: usize,
    majority_size: usize,
    majority_fraction: f64,
    seed: u64,
) -> Result<Vec<String>> {
    ensure!(length > 0, "workload length must be > 0");
    ensure!(!queries.is_empty(), "query set must not be empty");
    ensure!(
        majority_size >= 1,
        "majority_size must be >= 1 (got {majority_size})"
    );
    ensure!(
        majority_size < queries.len(),
        "majority_size {majority_size} must be strictly below the number of queries {}",
        queries.len()
    );
    ensure!(
        (0.0..=1.0).contains(&majority_fraction),
        "majority_fraction {majority_fraction} must lie in [0, 1]"
    );

    // Sort candidates so the sampled majority set does not depend on caller
    // iteration order.
    let mut ids: Vec<String> = queries.to_vec();
    ids.sort();

    let mut rng = SmallRng::seed_from_u64(seed);
    let chosen = rand::seq::index::sample(&mut rng, ids.len(), majority_size);
    let mut majority = Vec::with_capacity(majority_size);
    let mut minority = Vec::with_capacity(ids.len() - majority_size);
    for (index, id) in ids.into_iter().enumerate() {
        if chosen.iter().any(|picked| picked == index) {
            majority.push(id);
        } else {
            minority.push(id);
        }
    }

    let majority_draws = (majority_fraction * length as f64).round() as usize;
    let majority_draws = majority_draws.min(length);

    let mut sequence = Vec::with_capacity(length);
    for _ in 0..majority_draws {
        sequence.push(majority[rng.gen_range(0..majority.len())].clone());
    }
    for _ in 0..length - majority_draws {
        sequence.push(minority[rng.gen_range(0..minority.len())].clone());
    }
    sequence.shuffle(&mut rng);

    ensure!(
        sequence.len() == length,
        "generated workload length {} does not match requested {length}",
        sequence.len()
    );
    Ok(sequence)
}

/// Per-query repetition counts of a workload, as consumed by the weight
/// engine.
pub fn occurrence_counts(workload: &[String]) -> BTreeMap<String, usize> {
    let mut counts = BTreeMap::new();
    for id in workload {
        *counts.entry(id.clone()).or_insert(0) += 1;
    }
    counts
}
