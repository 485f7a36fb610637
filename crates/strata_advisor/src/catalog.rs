//! Field catalog: the registry of extractable document fields.
//!
//! Every field the harness is allowed to touch is declared here with its
//! JSON path inside the raw document and the native type it materializes to.
//! Descriptors, the weight engine and the mutation engine all resolve field
//! names through this registry; a miss is a fatal configuration bug.

use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{AdvisorError, AdvisorResult};

/// Native column type a field materializes to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TargetType {
    Boolean,
    Integer,
    Bigint,
    Double,
    Date,
    Varchar,
}

impl TargetType {
    /// SQL type name understood by the underlying engine.
    pub fn sql(self) -> &'static str {
        match self {
            Self::Boolean => "BOOLEAN",
            Self::Integer => "INTEGER",
            Self::Bigint => "BIGINT",
            Self::Double => "DOUBLE",
            Self::Date => "DATE",
            Self::Varchar => "VARCHAR",
        }
    }
}

/// One extractable field: where it lives in the document and what it becomes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CatalogEntry {
    /// JSON path of the field inside the raw document, e.g. `$.l_shipdate`.
    pub json_path: String,
    /// Native type of the materialized column.
    pub target_type: TargetType,
}

impl CatalogEntry {
    /// SQL expression extracting this field from the raw document column.
    ///
    /// `alias` qualifies the document column for self-joins
    /// (`a.doc` instead of `doc`). VARCHAR targets skip the cast because
    /// extraction already yields text.
    pub fn extraction_expr(&self, alias: Option<&str>) -> String {
        let doc = match alias {
            Some(alias) => format!("{alias}.doc"),
            None => "doc".to_string(),
        };
        let raw = format!("json_extract_string({doc}, '{}')", self.json_path);
        match self.target_type {
            TargetType::Varchar => raw,
            other => format!("CAST({raw} AS {})", other.sql()),
        }
    }
}

/// Registry of all extractable fields for one dataset.
///
/// Field names map to sorted iteration order, which downstream code relies on
/// for deterministic plans and artifacts.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FieldCatalog {
    fields: BTreeMap<String, CatalogEntry>,
}

impl FieldCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a field. Replaces any previous entry under the same name.
    pub fn insert(&mut self, name: impl Into<String>, entry: CatalogEntry) {
        self.fields.insert(name.into(), entry);
    }

    /// Loads a catalog from a JSON file mapping `field_name -> entry`.
    pub fn from_json_file(path: &Path) -> AdvisorResult<Self> {
        let data = std::fs::read(path).map_err(|err| AdvisorError::InvalidDataset {
            dataset: path.display().to_string(),
            reason: format!("read catalog file: {err}"),
        })?;
        let fields: BTreeMap<String, CatalogEntry> =
            serde_json::from_slice(&data).map_err(|err| AdvisorError::InvalidDataset {
                dataset: path.display().to_string(),
                reason: format!("decode catalog json: {err}"),
            })?;
        Ok(Self { fields })
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.fields.contains_key(name)
    }

    pub fn get(&self, name: &str) -> Option<&CatalogEntry> {
        self.fields.get(name)
    }

    /// Resolves a field or fails with the caller's context attached.
    pub fn require(&self, name: &str, referrer: &str) -> AdvisorResult<&CatalogEntry> {
        self.fields
            .get(name)
            .ok_or_else(|| AdvisorError::UnknownField {
                field: name.to_string(),
                referrer: referrer.to_string(),
            })
    }

    /// Field names in sorted order.
    pub fn field_names(&self) -> impl Iterator<Item = &str> {
        self.fields.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &CatalogEntry)> {
        self.fields.iter().map(|(name, entry)| (name.as_str(), entry))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> FieldCatalog {
        let mut catalog = FieldCatalog::new();
        catalog.insert(
            "l_shipdate",
            CatalogEntry {
                json_path: "$.l_shipdate".to_string(),
                target_type: TargetType::Date,
            },
        );
        catalog.insert(
            "l_comment",
            CatalogEntry {
                json_path: "$.l_comment".to_string(),
                target_type: TargetType::Varchar,
            },
        );
        catalog
    }

    #[test]
    fn extraction_casts_to_target_type() {
        let catalog = sample();
        let entry = catalog.get("l_shipdate").unwrap();
        assert_eq!(
            entry.extraction_expr(None),
            "CAST(json_extract_string(doc, '$.l_shipdate') AS DATE)"
        );
        assert_eq!(
            entry.extraction_expr(Some("a")),
            "CAST(json_extract_string(a.doc, '$.l_shipdate') AS DATE)"
        );
    }

    #[test]
    fn varchar_extraction_skips_cast() {
        let catalog = sample();
        let entry = catalog.get("l_comment").unwrap();
        assert_eq!(
            entry.extraction_expr(None),
            "json_extract_string(doc, '$.l_comment')"
        );
    }

    #[test]
    fn require_reports_unknown_field() {
        let catalog = sample();
        let err = catalog.require("l_ghost", "unit test").unwrap_err();
        assert_eq!(
            err,
            AdvisorError::UnknownField {
                field: "l_ghost".to_string(),
                referrer: "unit test".to_string(),
            }
        );
    }

    #[test]
    fn json_round_trip_through_file() {
        let catalog = sample();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("catalog.json");
        std::fs::write(&path, serde_json::to_vec_pretty(&catalog.fields).unwrap()).unwrap();
        let loaded = FieldCatalog::from_json_file(&path).unwrap();
        assert_eq!(loaded, catalog);
    }
}
