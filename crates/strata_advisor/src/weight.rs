//! Weight engine: ranks catalog fields by expected materialization benefit.
//!
//! Scoring consumes the workload's per-query occurrence counts and the set of
//! fields already materialized, and produces one score per catalog field.
//! Selection turns scores into the next materialization set under a budget,
//! never dropping a previously selected field.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::datasets::Dataset;
use crate::error::{AdvisorError, AdvisorResult};

/// How field scores are computed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScoringMode {
    /// One point per clause occurrence, scaled by query repetition count.
    Frequency,
    /// Declared per-query base weights, scaled by query repetition count.
    Weighted,
}

/// Scores and selects materialization candidates for one dataset.
#[derive(Debug, Clone, Copy)]
pub struct WeightEngine<'a> {
    dataset: &'a Dataset,
    mode: ScoringMode,
}

impl<'a> WeightEngine<'a> {
    pub fn new(dataset: &'a Dataset, mode: ScoringMode) -> Self {
        Self { dataset, mode }
    }

    /// Computes a score for every catalog field.
    ///
    /// `occurrences` maps query ids to their repetition count in the
    /// workload; queries absent from the map contribute nothing. Fields in
    /// `previous` keep their scores — exclusion from the candidate pool is
    /// selection's job, not scoring's.
    pub fn score(
        &self,
        occurrences: &BTreeMap<String, usize>,
        previous: &BTreeSet<String>,
    ) -> AdvisorResult<BTreeMap<String, f64>> {
        let catalog = &self.dataset.catalog;
        for field in previous {
            catalog.require(field, "previous materialization set")?;
        }

        let mut scores: BTreeMap<String, f64> = catalog
            .field_names()
            .map(|name| (name.to_string(), 0.0))
            .collect();

        for descriptor in &self.dataset.queries {
            let count = occurrences.get(&descriptor.id).copied().unwrap_or(0);
            if count == 0 {
                continue;
            }
            let count = count as f64;
            match self.mode {
                ScoringMode::Frequency => {
                    for field in clause_occurrences(descriptor) {
                        let slot = scores.get_mut(field).ok_or_else(|| {
                            AdvisorError::UnknownField {
                                field: field.to_string(),
                                referrer: format!("query '{}' (scoring)", descriptor.id),
                            }
                        })?;
                        *slot += count;
                    }
                }
                ScoringMode::Weighted => {
                    for rule in &descriptor.weight_rules {
                        let partner_materialized = rule.direct_filter
                            && descriptor
                                .filter_partner(&rule.field)
                                .is_some_and(|partner| previous.contains(partner));
                        if partner_materialized {
                            // The compound predicate is already accelerated
                            // from the other side; no direct-filter benefit
                            // remains for this field here.
                            continue;
                        }
                        let slot = scores.get_mut(&rule.field).ok_or_else(|| {
                            AdvisorError::UnknownField {
                                field: rule.field.clone(),
                                referrer: format!("query '{}' (weight rule)", descriptor.id),
                            }
                        })?;
                        *slot += rule.weight * count;
                    }
                }
            }
        }

        if self.mode == ScoringMode::Frequency {
            for field in &self.dataset.frequency_zero_overrides {
                if let Some(slot) = scores.get_mut(field) {
                    *slot = 0.0;
                }
            }
        }

        Ok(scores)
    }

    /// Selects the materialization set for a budget of `budget` fields total.
    ///
    /// The previous set is always a subset of the result: candidates are
    /// drawn from the remaining catalog fields, ordered by score descending
    /// with lexicographic field name as the tie-break, and only
    /// `budget - |previous|` of them are taken.
    pub fn select(
        &self,
        occurrences: &BTreeMap<String, usize>,
        previous: &BTreeSet<String>,
        budget: usize,
    ) -> AdvisorResult<BTreeSet<String>> {
        let scores = self.score(occurrences, previous)?;
        let mut candidates: Vec<(&String, f64)> = scores
            .iter()
            .filter(|(name, _)| !previous.contains(*name))
            .map(|(name, score)| (name, *score))
            .collect();
        candidates.sort_by(|left, right| {
            right
                .1
                .partial_cmp(&left.1)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| left.0.cmp(right.0))
        });

        let take = budget.saturating_sub(previous.len()).min(candidates.len());
        let mut selected = previous.clone();
        for (name, score) in candidates.into_iter().take(take) {
            debug!(field = %name, score, "promoting field");
            selected.insert(name.clone());
        }
        Ok(selected)
    }
}

/// Clause-level field occurrences of one query, one item per appearance.
fn clause_occurrences(descriptor: &crate::descriptor::QueryDescriptor) -> Vec<&str> {
    let usage = &descriptor.clause_usage;
    usage
        .select
        .iter()
        .chain(usage.where_.iter())
        .chain(usage.group_by.iter())
        .chain(usage.order_by.iter())
        .map(String::as_str)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{CatalogEntry, FieldCatalog, TargetType};
    use crate::descriptor::{ClauseUsage, QueryDescriptor, WeightRule};

    fn test_dataset() -> Dataset {
        let mut catalog = FieldCatalog::new();
        for name in ["alpha", "beta", "gamma", "delta"] {
            catalog.insert(
                name,
                CatalogEntry {
                    json_path: format!("$.{name}"),
                    target_type: TargetType::Integer,
                },
            );
        }
        let queries = vec![
            QueryDescriptor {
                id: "q_pair".to_string(),
                clause_usage: ClauseUsage {
                    select: vec!["gamma".to_string()],
                    where_: vec!["alpha".to_string(), "beta".to_string()],
                    ..ClauseUsage::default()
                },
                join_edges: BTreeMap::new(),
                self_join_counts: BTreeMap::new(),
                weight_rules: vec![
                    WeightRule {
                        field: "alpha".to_string(),
                        weight: 4.0,
                        direct_filter: true,
                    },
                    WeightRule {
                        field: "beta".to_string(),
                        weight: 4.0,
                        direct_filter: true,
                    },
                    WeightRule {
                        field: "gamma".to_string(),
                        weight: 1.0,
                        direct_filter: false,
                    },
                ],
                filter_partners: vec![("alpha".to_string(), "beta".to_string())],
                sql_template: "SELECT {gamma} FROM documents WHERE {alpha} > 1 AND {beta} > 2"
                    .to_string(),
            },
            QueryDescriptor {
                id: "q_single".to_string(),
                clause_usage: ClauseUsage {
                    where_: vec!["delta".to_string()],
                    ..ClauseUsage::default()
                },
                join_edges: BTreeMap::new(),
                self_join_counts: BTreeMap::new(),
                weight_rules: vec![WeightRule {
                    field: "delta".to_string(),
                    weight: 2.0,
                    direct_filter: true,
                }],
                filter_partners: Vec::new(),
                sql_template: "SELECT count(*) FROM documents WHERE {delta} = 7".to_string(),
            },
        ];
        Dataset::new("test", catalog, queries, BTreeSet::new()).unwrap()
    }

    fn occurrences(pairs: &[(&str, usize)]) -> BTreeMap<String, usize> {
        pairs
            .iter()
            .map(|(id, count)| (id.to_string(), *count))
            .collect()
    }

    #[test]
    fn frequency_score_counts_clause_occurrences() {
        let dataset = test_dataset();
        let engine = WeightEngine::new(&dataset, ScoringMode::Frequency);
        let scores = engine
            .score(&occurrences(&[("q_pair", 3), ("q_single", 5)]), &BTreeSet::new())
            .unwrap();
        assert_eq!(scores["alpha"], 3.0);
        assert_eq!(scores["gamma"], 3.0);
        assert_eq!(scores["delta"], 5.0);
    }

    #[test]
    fn frequency_score_is_monotone_in_occurrences() {
        let dataset = test_dataset();
        let engine = WeightEngine::new(&dataset, ScoringMode::Frequency);
        let low = engine
            .score(&occurrences(&[("q_single", 2)]), &BTreeSet::new())
            .unwrap();
        let high = engine
            .score(&occurrences(&[("q_single", 9)]), &BTreeSet::new())
            .unwrap();
        assert!(high["delta"] >= low["delta"]);
    }

    #[test]
    fn weighted_score_multiplies_base_weight_by_occurrences() {
        let dataset = test_dataset();
        let engine = WeightEngine::new(&dataset, ScoringMode::Weighted);
        let scores = engine
            .score(&occurrences(&[("q_pair", 2)]), &BTreeSet::new())
            .unwrap();
        assert_eq!(scores["alpha"], 8.0);
        assert_eq!(scores["beta"], 8.0);
        assert_eq!(scores["gamma"], 2.0);
    }

    #[test]
    fn pairing_rule_zeroes_the_partner_contribution() {
        let dataset = test_dataset();
        let engine = WeightEngine::new(&dataset, ScoringMode::Weighted);
        let previous: BTreeSet<String> = ["alpha".to_string()].into();
        let scores = engine
            .score(&occurrences(&[("q_pair", 2)]), &previous)
            .unwrap();
        // beta's only rule is direct-filter and its partner alpha is already
        // materialized, so beta collapses to zero; gamma is unaffected.
        assert_eq!(scores["beta"], 0.0);
        assert_eq!(scores["gamma"], 2.0);

        let mirrored: BTreeSet<String> = ["beta".to_string()].into();
        let scores = engine
            .score(&occurrences(&[("q_pair", 2)]), &mirrored)
            .unwrap();
        assert_eq!(scores["alpha"], 0.0);
    }

    #[test]
    fn selection_is_monotone_across_budgets() {
        let dataset = test_dataset();
        let engine = WeightEngine::new(&dataset, ScoringMode::Weighted);
        let workload = occurrences(&[("q_pair", 4), ("q_single", 1)]);
        let mut previous = BTreeSet::new();
        for budget in 1..=dataset.catalog.len() {
            let selected = engine.select(&workload, &previous, budget).unwrap();
            assert!(selected.is_superset(&previous), "budget {budget} dropped a field");
            assert_eq!(selected.len(), budget);
            previous = selected;
        }
    }

    #[test]
    fn ties_break_lexicographically() {
        let dataset = test_dataset();
        let engine = WeightEngine::new(&dataset, ScoringMode::Weighted);
        // alpha and beta tie at 4.0 x 1; alpha wins the first slot by name.
        let selected = engine
            .select(&occurrences(&[("q_pair", 1)]), &BTreeSet::new(), 1)
            .unwrap();
        let expected: BTreeSet<String> = ["alpha".to_string()].into();
        assert_eq!(selected, expected);
    }

    #[test]
    fn scoring_unknown_previous_field_fails() {
        let dataset = test_dataset();
        let engine = WeightEngine::new(&dataset, ScoringMode::Frequency);
        let previous: BTreeSet<String> = ["zeta".to_string()].into();
        let err = engine
            .score(&BTreeMap::new(), &previous)
            .unwrap_err();
        assert!(matches!(err, AdvisorError::UnknownField { .. }));
    }

    #[test]
    fn zero_override_forces_frequency_score_to_zero() {
        let mut dataset = test_dataset();
        dataset.frequency_zero_overrides.insert("delta".to_string());
        let engine = WeightEngine::new(&dataset, ScoringMode::Frequency);
        let scores = engine
            .score(&occurrences(&[("q_single", 9)]), &BTreeSet::new())
            .unwrap();
        assert_eq!(scores["delta"], 0.0);
    }
}
