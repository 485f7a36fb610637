//! Dataset definitions: a catalog plus its query descriptor set.
//!
//! A dataset bundles everything the harness needs to know about one corpus:
//! the field catalog, the queries the workload can draw from (with their
//! weight tables), and the frequency-mode zero-override list. Datasets load
//! from JSON files; the TPC-H `lineitem` dataset ships compiled in as the
//! default.

use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::catalog::{CatalogEntry, FieldCatalog, TargetType};
use crate::descriptor::{ClauseUsage, QueryDescriptor, WeightRule};
use crate::error::{AdvisorError, AdvisorResult};

/// One named (catalog, query set, override table) triple.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Dataset {
    pub name: String,
    pub catalog: FieldCatalog,
    pub queries: Vec<QueryDescriptor>,
    /// Fields whose frequency-mode score is forced to zero regardless of
    /// occurrence counts. A documented exception, not a general mechanism.
    #[serde(default)]
    pub frequency_zero_overrides: BTreeSet<String>,
}

impl Dataset {
    /// Builds and validates a dataset.
    pub fn new(
        name: impl Into<String>,
        catalog: FieldCatalog,
        queries: Vec<QueryDescriptor>,
        frequency_zero_overrides: BTreeSet<String>,
    ) -> AdvisorResult<Self> {
        let dataset = Self {
            name: name.into(),
            catalog,
            queries,
            frequency_zero_overrides,
        };
        dataset.validate()?;
        Ok(dataset)
    }

    /// Loads and validates a dataset from a JSON file.
    pub fn from_json_file(path: &Path) -> AdvisorResult<Self> {
        let data = std::fs::read(path).map_err(|err| AdvisorError::InvalidDataset {
            dataset: path.display().to_string(),
            reason: format!("read dataset file: {err}"),
        })?;
        let dataset: Dataset =
            serde_json::from_slice(&data).map_err(|err| AdvisorError::InvalidDataset {
                dataset: path.display().to_string(),
                reason: format!("decode dataset json: {err}"),
            })?;
        dataset.validate()?;
        Ok(dataset)
    }

    /// Resolves a compiled-in dataset by name.
    pub fn builtin(name: &str) -> AdvisorResult<Self> {
        match name {
            "lineitem" => Ok(lineitem()),
            other => Err(AdvisorError::InvalidDataset {
                dataset: other.to_string(),
                reason: "no built-in dataset under that name (expected 'lineitem')".to_string(),
            }),
        }
    }

    pub fn validate(&self) -> AdvisorResult<()> {
        if self.catalog.is_empty() {
            return Err(AdvisorError::InvalidDataset {
                dataset: self.name.clone(),
                reason: "catalog is empty".to_string(),
            });
        }
        if self.queries.is_empty() {
            return Err(AdvisorError::InvalidDataset {
                dataset: self.name.clone(),
                reason: "query set is empty".to_string(),
            });
        }
        let mut seen = BTreeSet::new();
        for descriptor in &self.queries {
            if !seen.insert(descriptor.id.as_str()) {
                return Err(AdvisorError::InvalidDataset {
                    dataset: self.name.clone(),
                    reason: format!("duplicate query id '{}'", descriptor.id),
                });
            }
            descriptor.validate(&self.catalog)?;
        }
        for field in &self.frequency_zero_overrides {
            self.catalog.require(field, "frequency zero-override table")?;
        }
        Ok(())
    }

    pub fn descriptor(&self, id: &str) -> Option<&QueryDescriptor> {
        self.queries.iter().find(|descriptor| descriptor.id == id)
    }

    /// All query ids, in declaration order.
    pub fn query_ids(&self) -> Vec<String> {
        self.queries.iter().map(|d| d.id.clone()).collect()
    }
}

fn names(list: &[&str]) -> Vec<String> {
    list.iter().map(|s| s.to_string()).collect()
}

fn rule(field: &str, weight: f64, direct_filter: bool) -> WeightRule {
    WeightRule {
        field: field.to_string(),
        weight,
        direct_filter,
    }
}

/// The TPC-H `lineitem` table as a JSON document corpus.
///
/// Weight values are tuned against the skewed default workload; they live
/// here (and in dataset files) rather than in the weight engine so they can
/// be adjusted without touching scoring logic.
pub fn lineitem() -> Dataset {
    let mut catalog = FieldCatalog::new();
    for (name, target_type) in [
        ("l_orderkey", TargetType::Bigint),
        ("l_partkey", TargetType::Bigint),
        ("l_suppkey", TargetType::Bigint),
        ("l_linenumber", TargetType::Integer),
        ("l_quantity", TargetType::Double),
        ("l_extendedprice", TargetType::Double),
        ("l_discount", TargetType::Double),
        ("l_tax", TargetType::Double),
        ("l_returnflag", TargetType::Varchar),
        ("l_linestatus", TargetType::Varchar),
        ("l_shipdate", TargetType::Date),
        ("l_commitdate", TargetType::Date),
        ("l_receiptdate", TargetType::Date),
        ("l_shipinstruct", TargetType::Varchar),
        ("l_shipmode", TargetType::Varchar),
        ("l_comment", TargetType::Varchar),
    ] {
        catalog.insert(
            name,
            CatalogEntry {
                json_path: format!("$.{name}"),
                target_type,
            },
        );
    }

    let queries = vec![
        QueryDescriptor {
            id: "q_pricing_summary".to_string(),
            clause_usage: ClauseUsage {
                select: names(&[
                    "l_returnflag",
                    "l_linestatus",
                    "l_quantity",
                    "l_extendedprice",
                    "l_discount",
                ]),
                where_: names(&["l_shipdate"]),
                group_by: names(&["l_returnflag", "l_linestatus"]),
                order_by: names(&["l_returnflag", "l_linestatus"]),
            },
            join_edges: BTreeMap::new(),
            self_join_counts: BTreeMap::new(),
            weight_rules: vec![
                rule("l_shipdate", 3.0, true),
                rule("l_returnflag", 2.0, false),
                rule("l_linestatus", 2.0, false),
                rule("l_quantity", 1.0, false),
                rule("l_extendedprice", 1.0, false),
                rule("l_discount", 1.0, false),
            ],
            filter_partners: Vec::new(),
            sql_template: "SELECT {l_returnflag}, {l_linestatus}, sum({l_quantity}), \
                           sum({l_extendedprice}), avg({l_discount}) FROM documents \
                           WHERE {l_shipdate} <= DATE '1998-09-02' \
                           GROUP BY {l_returnflag}, {l_linestatus} \
                           ORDER BY {l_returnflag}, {l_linestatus}"
                .to_string(),
        },
        QueryDescriptor {
            id: "q_revenue_delta".to_string(),
            clause_usage: ClauseUsage {
                select: names(&["l_extendedprice", "l_discount"]),
                where_: names(&["l_shipdate", "l_shipdate", "l_discount", "l_quantity"]),
                ..ClauseUsage::default()
            },
            join_edges: BTreeMap::new(),
            self_join_counts: BTreeMap::new(),
            weight_rules: vec![
                rule("l_shipdate", 4.0, true),
                rule("l_discount", 4.0, true),
                rule("l_quantity", 2.0, true),
                rule("l_extendedprice", 1.0, false),
            ],
            filter_partners: vec![("l_shipdate".to_string(), "l_discount".to_string())],
            sql_template: "SELECT sum({l_extendedprice} * {l_discount}) FROM documents \
                           WHERE {l_shipdate} >= DATE '1994-01-01' \
                           AND {l_shipdate} < DATE '1995-01-01' \
                           AND {l_discount} BETWEEN 0.05 AND 0.07 \
                           AND {l_quantity} < 24"
                .to_string(),
        },
        QueryDescriptor {
            id: "q_shipmode_wait".to_string(),
            clause_usage: ClauseUsage {
                select: names(&["l_shipmode"]),
                where_: names(&[
                    "l_shipmode",
                    "l_receiptdate",
                    "l_receiptdate",
                    "l_commitdate",
                    "l_receiptdate",
                    "l_shipdate",
                    "l_commitdate",
                ]),
                group_by: names(&["l_shipmode"]),
                order_by: names(&["l_shipmode"]),
            },
            join_edges: BTreeMap::new(),
            self_join_counts: BTreeMap::new(),
            weight_rules: vec![
                rule("l_receiptdate", 3.0, true),
                rule("l_commitdate", 2.0, true),
                rule("l_shipdate", 2.0, true),
                rule("l_shipmode", 2.0, true),
            ],
            filter_partners: vec![("l_commitdate".to_string(), "l_receiptdate".to_string())],
            sql_template: "SELECT {l_shipmode}, count(*) FROM documents \
                           WHERE {l_shipmode} IN ('MAIL', 'SHIP') \
                           AND {l_receiptdate} >= DATE '1994-01-01' \
                           AND {l_receiptdate} < DATE '1995-01-01' \
                           AND {l_commitdate} < {l_receiptdate} \
                           AND {l_shipdate} < {l_commitdate} \
                           GROUP BY {l_shipmode} ORDER BY {l_shipmode}"
                .to_string(),
        },
        QueryDescriptor {
            id: "q_lineage".to_string(),
            clause_usage: ClauseUsage {
                where_: names(&["l_shipmode"]),
                ..ClauseUsage::default()
            },
            join_edges: BTreeMap::from([
                (
                    "l_orderkey".to_string(),
                    vec![Some("l_orderkey".to_string())],
                ),
                (
                    "l_linenumber".to_string(),
                    vec![Some("l_linenumber".to_string())],
                ),
            ]),
            self_join_counts: BTreeMap::from([
                ("l_orderkey".to_string(), 1),
                ("l_linenumber".to_string(), 1),
            ]),
            weight_rules: vec![
                rule("l_orderkey", 5.0, false),
                rule("l_linenumber", 3.0, false),
                rule("l_shipmode", 2.0, true),
            ],
            filter_partners: Vec::new(),
            sql_template: "SELECT count(*) FROM documents a JOIN documents b \
                           ON {a.l_orderkey} = {b.l_orderkey} \
                           AND {a.l_linenumber} < {b.l_linenumber} \
                           WHERE {a.l_shipmode} = 'AIR'"
                .to_string(),
        },
        QueryDescriptor {
            id: "q_top_freight".to_string(),
            clause_usage: ClauseUsage {
                select: names(&["l_orderkey", "l_extendedprice"]),
                where_: names(&["l_tax"]),
                order_by: names(&["l_extendedprice"]),
                ..ClauseUsage::default()
            },
            join_edges: BTreeMap::new(),
            self_join_counts: BTreeMap::new(),
            weight_rules: vec![
                rule("l_tax", 3.0, true),
                rule("l_extendedprice", 2.0, false),
                rule("l_orderkey", 1.0, false),
            ],
            filter_partners: Vec::new(),
            sql_template: "SELECT {l_orderkey}, {l_extendedprice} FROM documents \
                           WHERE {l_tax} > 0.05 \
                           ORDER BY {l_extendedprice} DESC, {l_orderkey} LIMIT 100"
                .to_string(),
        },
        QueryDescriptor {
            id: "q_returned_value".to_string(),
            clause_usage: ClauseUsage {
                select: names(&["l_returnflag", "l_extendedprice"]),
                where_: names(&["l_returnflag", "l_receiptdate", "l_commitdate"]),
                group_by: names(&["l_returnflag"]),
                ..ClauseUsage::default()
            },
            join_edges: BTreeMap::new(),
            self_join_counts: BTreeMap::new(),
            weight_rules: vec![
                rule("l_returnflag", 3.0, true),
                rule("l_receiptdate", 2.0, true),
                rule("l_commitdate", 2.0, true),
                rule("l_extendedprice", 1.0, false),
            ],
            filter_partners: vec![("l_receiptdate".to_string(), "l_commitdate".to_string())],
            sql_template: "SELECT {l_returnflag}, sum({l_extendedprice}) FROM documents \
                           WHERE {l_returnflag} = 'R' \
                           AND {l_receiptdate} > {l_commitdate} \
                           GROUP BY {l_returnflag}"
                .to_string(),
        },
        QueryDescriptor {
            id: "q_part_demand".to_string(),
            clause_usage: ClauseUsage {
                select: names(&["l_partkey", "l_quantity"]),
                where_: names(&["l_quantity"]),
                group_by: names(&["l_partkey"]),
                ..ClauseUsage::default()
            },
            join_edges: BTreeMap::new(),
            self_join_counts: BTreeMap::new(),
            weight_rules: vec![rule("l_quantity", 3.0, true), rule("l_partkey", 2.0, false)],
            filter_partners: Vec::new(),
            sql_template: "SELECT {l_partkey}, count(*), sum({l_quantity}) FROM documents \
                           WHERE {l_quantity} >= 30 \
                           GROUP BY {l_partkey} ORDER BY count(*) DESC, {l_partkey} LIMIT 50"
                .to_string(),
        },
        QueryDescriptor {
            id: "q_comment_scan".to_string(),
            clause_usage: ClauseUsage {
                where_: names(&["l_comment"]),
                ..ClauseUsage::default()
            },
            join_edges: BTreeMap::new(),
            self_join_counts: BTreeMap::new(),
            weight_rules: vec![rule("l_comment", 1.0, true)],
            filter_partners: Vec::new(),
            sql_template: "SELECT count(*) FROM documents \
                           WHERE {l_comment} LIKE '%special requests%'"
                .to_string(),
        },
        QueryDescriptor {
            id: "q_supplier_revenue".to_string(),
            clause_usage: ClauseUsage {
                select: names(&["l_suppkey", "l_extendedprice", "l_discount"]),
                where_: names(&["l_shipdate"]),
                group_by: names(&["l_suppkey"]),
                ..ClauseUsage::default()
            },
            join_edges: BTreeMap::new(),
            self_join_counts: BTreeMap::new(),
            weight_rules: vec![
                rule("l_shipdate", 3.0, true),
                rule("l_suppkey", 2.0, false),
                rule("l_extendedprice", 1.0, false),
                rule("l_discount", 1.0, false),
            ],
            filter_partners: Vec::new(),
            sql_template: "SELECT {l_suppkey}, sum({l_extendedprice} * (1 - {l_discount})) \
                           AS revenue FROM documents \
                           WHERE {l_shipdate} > DATE '1995-03-15' \
                           GROUP BY {l_suppkey} ORDER BY revenue DESC, {l_suppkey} LIMIT 10"
                .to_string(),
        },
    ];

    // l_comment is a wide free-text field; promoting it buys nothing over
    // scanning the document, so frequency mode pins it to zero.
    let overrides: BTreeSet<String> = ["l_comment".to_string()].into();

    Dataset::new("lineitem", catalog, queries, overrides)
        .expect("built-in lineitem dataset must validate")
}
