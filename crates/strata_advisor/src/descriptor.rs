//! Data-driven query descriptors.
//!
//! Each query the workload can issue is described by a plain record: which
//! catalog fields appear in which clause, how the query joins the document
//! table to itself, the declared weight table used by the weight engine, and
//! a SQL template rendered against the current materialization state. The
//! record is fully serde-(de)serializable so a dataset's query set and its
//! weight tables are tunable configuration, not code.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::catalog::FieldCatalog;
use crate::error::{AdvisorError, AdvisorResult};

/// Fields used by each clause of a query, in clause order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClauseUsage {
    #[serde(default)]
    pub select: Vec<String>,
    #[serde(default, rename = "where")]
    pub where_: Vec<String>,
    #[serde(default)]
    pub group_by: Vec<String>,
    #[serde(default)]
    pub order_by: Vec<String>,
}

impl ClauseUsage {
    fn clauses(&self) -> [(&'static str, &[String]); 4] {
        [
            ("select", self.select.as_slice()),
            ("where", self.where_.as_slice()),
            ("group_by", self.group_by.as_slice()),
            ("order_by", self.order_by.as_slice()),
        ]
    }
}

/// One entry of a query's declared weight table.
///
/// `direct_filter` marks contributions that come from the field filtering
/// rows directly; only those are zeroed by the pairing rule when the field's
/// declared partner is already materialized.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WeightRule {
    pub field: String,
    pub weight: f64,
    #[serde(default)]
    pub direct_filter: bool,
}

/// Static description of one query shape.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryDescriptor {
    /// Stable identifier used in workloads and result artifacts.
    pub id: String,
    pub clause_usage: ClauseUsage,
    /// Join comparisons keyed by the left-hand field. `None` on the right
    /// side records a comparison against a constant rather than a field.
    #[serde(default)]
    pub join_edges: BTreeMap<String, Vec<Option<String>>>,
    /// How often each field participates in a self-join of the document table.
    #[serde(default)]
    pub self_join_counts: BTreeMap<String, u32>,
    /// Declared base weights consumed by the weighted scoring mode.
    #[serde(default)]
    pub weight_rules: Vec<WeightRule>,
    /// Field pairs that accelerate the same compound predicate; materializing
    /// one side removes the other side's direct-filter contribution.
    #[serde(default)]
    pub filter_partners: Vec<(String, String)>,
    /// SQL with `{field}` / `{alias.field}` placeholders for field access.
    pub sql_template: String,
}

impl QueryDescriptor {
    /// Every catalog field this query touches, from clause usage and joins.
    ///
    /// The timing cache keys its reuse decision on this set, so the template
    /// is validated to reference no field outside of it.
    pub fn columns(&self) -> BTreeSet<String> {
        let mut columns = BTreeSet::new();
        for (_, fields) in self.clause_usage.clauses() {
            columns.extend(fields.iter().cloned());
        }
        for (left, rights) in &self.join_edges {
            columns.insert(left.clone());
            columns.extend(rights.iter().flatten().cloned());
        }
        columns.extend(self.self_join_counts.keys().cloned());
        columns
    }

    /// Checks that every referenced field exists in the catalog and that the
    /// SQL template stays inside the declared column set.
    pub fn validate(&self, catalog: &FieldCatalog) -> AdvisorResult<()> {
        for (clause, fields) in self.clause_usage.clauses() {
            for field in fields {
                catalog.require(field, &format!("query '{}' ({clause} clause)", self.id))?;
            }
        }
        for (left, rights) in &self.join_edges {
            catalog.require(left, &format!("query '{}' (join edge)", self.id))?;
            for right in rights.iter().flatten() {
                catalog.require(right, &format!("query '{}' (join edge)", self.id))?;
            }
        }
        for field in self.self_join_counts.keys() {
            catalog.require(field, &format!("query '{}' (self join)", self.id))?;
        }
        for rule in &self.weight_rules {
            catalog.require(&rule.field, &format!("query '{}' (weight rule)", self.id))?;
        }
        for (left, right) in &self.filter_partners {
            catalog.require(left, &format!("query '{}' (filter partner)", self.id))?;
            catalog.require(right, &format!("query '{}' (filter partner)", self.id))?;
        }

        let columns = self.columns();
        for token in template_tokens(&self.sql_template, &self.id)? {
            catalog.require(&token.field, &format!("query '{}' (sql template)", self.id))?;
            if !columns.contains(&token.field) {
                return Err(AdvisorError::Template {
                    query: self.id.clone(),
                    reason: format!(
                        "template references '{}' which is outside the declared column set",
                        token.field
                    ),
                });
            }
        }
        Ok(())
    }

    /// The declared filter partner of `field` within this query, if any.
    pub fn filter_partner(&self, field: &str) -> Option<&str> {
        self.filter_partners.iter().find_map(|(left, right)| {
            if left == field {
                Some(right.as_str())
            } else if right == field {
                Some(left.as_str())
            } else {
                None
            }
        })
    }

    /// Renders the SQL template for the given materialization state.
    ///
    /// Materialized fields render as native column references; everything
    /// else falls back to the extraction expression over the raw document.
    pub fn render_sql(
        &self,
        catalog: &FieldCatalog,
        materialized: &BTreeSet<String>,
    ) -> AdvisorResult<String> {
        let mut out = String::with_capacity(self.sql_template.len() + 64);
        let mut rest = self.sql_template.as_str();
        while let Some(start) = rest.find('{') {
            out.push_str(&rest[..start]);
            let after = &rest[start + 1..];
            let end = after.find('}').ok_or_else(|| AdvisorError::Template {
                query: self.id.clone(),
                reason: "unterminated '{' placeholder".to_string(),
            })?;
            let token = parse_token(&after[..end], &self.id)?;
            let entry = catalog.require(
                &token.field,
                &format!("query '{}' (sql template)", self.id),
            )?;
            if materialized.contains(&token.field) {
                match &token.alias {
                    Some(alias) => {
                        out.push_str(alias);
                        out.push('.');
                        out.push_str(&token.field);
                    }
                    None => out.push_str(&token.field),
                }
            } else {
                out.push_str(&entry.extraction_expr(token.alias.as_deref()));
            }
            rest = &after[end + 1..];
        }
        out.push_str(rest);
        Ok(out)
    }
}

/// A `{field}` or `{alias.field}` reference inside a SQL template.
#[derive(Debug, Clone, PartialEq, Eq)]
struct FieldToken {
    alias: Option<String>,
    field: String,
}

fn parse_token(raw: &str, query: &str) -> AdvisorResult<FieldToken> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Err(AdvisorError::Template {
            query: query.to_string(),
            reason: "empty '{}' placeholder".to_string(),
        });
    }
    match raw.split_once('.') {
        Some((alias, field)) if !alias.is_empty() && !field.is_empty() => Ok(FieldToken {
            alias: Some(alias.to_string()),
            field: field.to_string(),
        }),
        Some(_) => Err(AdvisorError::Template {
            query: query.to_string(),
            reason: format!("malformed placeholder '{{{raw}}}'"),
        }),
        None => Ok(FieldToken {
            alias: None,
            field: raw.to_string(),
        }),
    }
}

fn template_tokens(template: &str, query: &str) -> AdvisorResult<Vec<FieldToken>> {
    let mut tokens = Vec::new();
    let mut rest = template;
    while let Some(start) = rest.find('{') {
        let after = &rest[start + 1..];
        let end = after.find('}').ok_or_else(|| AdvisorError::Template {
            query: query.to_string(),
            reason: "unterminated '{' placeholder".to_string(),
        })?;
        tokens.push(parse_token(&after[..end], query)?);
        rest = &after[end + 1..];
    }
    Ok(tokens)
}

/// Canonical serialized form of a materialization set, used as a cache key
/// component and in result artifacts. Empty sets print as `~` so artifact
/// columns stay non-empty.
pub fn canonical_set_label(set: &BTreeSet<String>) -> String {
    if set.is_empty() {
        "~".to_string()
    } else {
        set.iter().cloned().collect::<Vec<_>>().join("+")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{CatalogEntry, TargetType};

    fn catalog() -> FieldCatalog {
        let mut catalog = FieldCatalog::new();
        for (name, target_type) in [
            ("l_orderkey", TargetType::Bigint),
            ("l_linenumber", TargetType::Integer),
            ("l_shipdate", TargetType::Date),
            ("l_shipmode", TargetType::Varchar),
        ] {
            catalog.insert(
                name,
                CatalogEntry {
                    json_path: format!("$.{name}"),
                    target_type,
                },
            );
        }
        catalog
    }

    fn descriptor() -> QueryDescriptor {
        QueryDescriptor {
            id: "q_lineage".to_string(),
            clause_usage: ClauseUsage {
                where_: vec!["l_shipmode".to_string()],
                ..ClauseUsage::default()
            },
            join_edges: BTreeMap::from([
                ("l_orderkey".to_string(), vec![Some("l_orderkey".to_string())]),
                (
                    "l_linenumber".to_string(),
                    vec![Some("l_linenumber".to_string())],
                ),
            ]),
            self_join_counts: BTreeMap::from([
                ("l_orderkey".to_string(), 1),
                ("l_linenumber".to_string(), 1),
            ]),
            weight_rules: Vec::new(),
            filter_partners: Vec::new(),
            sql_template: "SELECT count(*) FROM documents a JOIN documents b \
                           ON {a.l_orderkey} = {b.l_orderkey} AND {a.l_linenumber} < {b.l_linenumber} \
                           WHERE {a.l_shipmode} = 'AIR'"
                .to_string(),
        }
    }

    #[test]
    fn columns_cover_clauses_and_joins() {
        let columns = descriptor().columns();
        let expected: BTreeSet<String> = ["l_orderkey", "l_linenumber", "l_shipmode"]
            .into_iter()
            .map(String::from)
            .collect();
        assert_eq!(columns, expected);
    }

    #[test]
    fn render_uses_native_columns_when_materialized() {
        let catalog = catalog();
        let descriptor = descriptor();
        let materialized: BTreeSet<String> =
            ["l_orderkey".to_string(), "l_shipmode".to_string()].into();
        let sql = descriptor.render_sql(&catalog, &materialized).unwrap();
        assert!(sql.contains("ON a.l_orderkey = b.l_orderkey"));
        assert!(sql.contains("WHERE a.l_shipmode = 'AIR'"));
        assert!(sql.contains("CAST(json_extract_string(a.doc, '$.l_linenumber') AS INTEGER)"));
    }

    #[test]
    fn render_falls_back_to_extraction_when_raw() {
        let catalog = catalog();
        let descriptor = descriptor();
        let sql = descriptor.render_sql(&catalog, &BTreeSet::new()).unwrap();
        assert!(sql.contains("CAST(json_extract_string(a.doc, '$.l_orderkey') AS BIGINT)"));
        assert!(sql.contains("json_extract_string(a.doc, '$.l_shipmode') = 'AIR'"));
    }

    #[test]
    fn validate_rejects_template_outside_declared_columns() {
        let catalog = catalog();
        let mut descriptor = descriptor();
        descriptor.sql_template =
            "SELECT count(*) FROM documents WHERE {l_shipdate} IS NOT NULL".to_string();
        let err = descriptor.validate(&catalog).unwrap_err();
        assert!(matches!(err, AdvisorError::Template { .. }));
    }

    #[test]
    fn validate_rejects_unknown_field() {
        let catalog = catalog();
        let mut descriptor = descriptor();
        descriptor.clause_usage.where_.push("l_ghost".to_string());
        let err = descriptor.validate(&catalog).unwrap_err();
        assert!(matches!(err, AdvisorError::UnknownField { .. }));
    }

    #[test]
    fn unterminated_placeholder_is_a_template_error() {
        let catalog = catalog();
        let mut descriptor = descriptor();
        descriptor.sql_template = "SELECT {l_orderkey FROM documents".to_string();
        let err = descriptor.render_sql(&catalog, &BTreeSet::new()).unwrap_err();
        assert!(matches!(err, AdvisorError::Template { .. }));
    }

    #[test]
    fn canonical_label_is_sorted_and_stable() {
        let set: BTreeSet<String> = ["l_shipdate".to_string(), "l_orderkey".to_string()].into();
        assert_eq!(canonical_set_label(&set), "l_orderkey+l_shipdate");
        assert_eq!(canonical_set_label(&BTreeSet::new()), "~");
    }
}
