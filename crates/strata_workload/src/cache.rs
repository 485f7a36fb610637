//! Timing reuse cache.
//!
//! Re-measuring a query whose plan cannot have changed only adds noise and
//! wall-clock cost, so the driver reuses a prior sample whenever the
//! materialized fields that overlap the query's declared column set are
//! unchanged. The decision is correctness-sensitive, so it lives here as an
//! explicit keyed cache instead of inline conditionals in the driver loop.

use std::collections::{BTreeMap, BTreeSet};

use strata_store::TimingSample;

#[derive(Debug, Clone)]
struct CacheEntry {
    /// Materialized fields relevant to the query at measurement time:
    /// the intersection of its column set with the materialized set.
    relevant: BTreeSet<String>,
    sample: TimingSample,
}

/// Per-query memo of the last measured sample, keyed by the materialized
/// subset that could affect the query's plan.
#[derive(Debug, Clone, Default)]
pub struct TimingCache {
    entries: BTreeMap<String, CacheEntry>,
}

impl TimingCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the prior sample for `query_id` if the materialized fields
    /// intersecting `columns` are exactly those seen at measurement time.
    pub fn lookup(
        &self,
        query_id: &str,
        columns: &BTreeSet<String>,
        materialized: &BTreeSet<String>,
    ) -> Option<&TimingSample> {
        let entry = self.entries.get(query_id)?;
        let relevant = relevant_subset(columns, materialized);
        (entry.relevant == relevant).then_some(&entry.sample)
    }

    /// Records a fresh measurement, replacing any prior entry for the query.
    pub fn store(
        &mut self,
        query_id: &str,
        columns: &BTreeSet<String>,
        materialized: &BTreeSet<String>,
        sample: TimingSample,
    ) {
        self.entries.insert(
            query_id.to_string(),
            CacheEntry {
                relevant: relevant_subset(columns, materialized),
                sample,
            },
        );
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

fn relevant_subset(
    columns: &BTreeSet<String>,
    materialized: &BTreeSet<String>,
) -> BTreeSet<String> {
    columns.intersection(materialized).cloned().collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(avg: f64) -> TimingSample {
        TimingSample {
            iterations: 3,
            iter_ms: vec![avg * 2.0, avg, avg],
            rows: 1,
            fingerprint: 0xfeed,
            trailing_avg_ms: avg,
        }
    }

    fn set(names: &[&str]) -> BTreeSet<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn irrelevant_mutation_reuses_the_sample() {
        let mut cache = TimingCache::new();
        let columns = set(&["l_shipdate", "l_discount"]);
        cache.store("q", &columns, &set(&["l_shipdate"]), sample(5.0));

        // A field outside the query's columns was added; plan unchanged.
        let hit = cache.lookup("q", &columns, &set(&["l_shipdate", "l_partkey"]));
        assert_eq!(hit.unwrap().trailing_avg_ms, 5.0);
    }

    #[test]
    fn intersecting_mutation_invalidates() {
        let mut cache = TimingCache::new();
        let columns = set(&["l_shipdate", "l_discount"]);
        cache.store("q", &columns, &set(&["l_shipdate"]), sample(5.0));

        assert!(cache
            .lookup("q", &columns, &set(&["l_shipdate", "l_discount"]))
            .is_none());
        assert!(cache.lookup("q", &columns, &set(&[])).is_none());
    }

    #[test]
    fn queries_are_cached_independently() {
        let mut cache = TimingCache::new();
        cache.store("a", &set(&["x"]), &set(&[]), sample(1.0));
        cache.store("b", &set(&["y"]), &set(&[]), sample(2.0));
        assert_eq!(cache.len(), 2);
        assert!(cache.lookup("a", &set(&["x"]), &set(&[])).is_some());
        assert!(cache.lookup("c", &set(&["x"]), &set(&[])).is_none());
    }

    #[test]
    fn empty_materialized_set_still_hits_after_first_measurement() {
        let mut cache = TimingCache::new();
        let columns = set(&["l_comment"]);
        cache.store("q", &columns, &set(&[]), sample(9.0));
        // Materializing unrelated fields never invalidates this query.
        assert!(cache
            .lookup("q", &columns, &set(&["l_shipdate", "l_quantity"]))
            .is_some());
    }
}
