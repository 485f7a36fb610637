//! Schema mutation: atomic transitions between materialization states.
//!
//! One `apply` call moves the store from whatever materialization state it is
//! in to exactly the state described by the plan, inside a single
//! transaction: every catalog field's native column is dropped if present,
//! then each flagged field is re-added and populated from the raw document.
//! A failure rolls the whole transaction back; the store never holds a
//! partial mutation.

use std::collections::BTreeSet;
use std::time::{Duration, Instant};

use strata_advisor::{CatalogEntry, FieldCatalog};
use tracing::{debug, info};

use crate::store::{DocumentStore, StoreError};

/// One field's desired state in a mutation plan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldAction {
    pub name: String,
    pub materialize: bool,
}

/// Builds a full-catalog plan realizing `target`: every catalog field
/// appears, flagged according to membership.
pub fn plan_for_target(catalog: &FieldCatalog, target: &BTreeSet<String>) -> Vec<FieldAction> {
    catalog
        .field_names()
        .map(|name| FieldAction {
            name: name.to_string(),
            materialize: target.contains(name),
        })
        .collect()
}

/// Applies a materialization plan to the store.
///
/// Returns the elapsed time of the populate phase: the interval starts after
/// the drop phase and covers add + populate + commit + checkpoint +
/// statistics refresh. Idempotent: re-applying the same plan yields an
/// equivalent store.
pub fn apply(
    store: &DocumentStore,
    catalog: &FieldCatalog,
    plan: &[FieldAction],
) -> Result<Duration, StoreError> {
    for action in plan {
        if !catalog.contains(&action.name) {
            return Err(StoreError::UnknownField {
                field: action.name.clone(),
            });
        }
    }

    let conn = store.connection();
    let present = existing_columns(store)?;

    conn.execute_batch("BEGIN;")?;

    // Drop phase, untimed and idempotent: absent columns are skipped.
    for action in plan {
        if present.contains(&action.name) {
            let sql = format!(
                "ALTER TABLE documents DROP COLUMN {}",
                quote_ident(&action.name)
            );
            if let Err(source) = conn.execute_batch(&sql) {
                abort(store);
                return Err(StoreError::Engine(source));
            }
        }
    }

    let populate_started = Instant::now();
    for action in plan.iter().filter(|action| action.materialize) {
        // Membership was checked above.
        let entry = catalog
            .get(&action.name)
            .expect("plan validated against catalog");
        let add = format!(
            "ALTER TABLE documents ADD COLUMN {} {}",
            quote_ident(&action.name),
            entry.target_type.sql()
        );
        if let Err(source) = conn.execute_batch(&add) {
            abort(store);
            return Err(StoreError::Engine(source));
        }
        let populate = format!(
            "UPDATE documents SET {} = {}",
            quote_ident(&action.name),
            entry.extraction_expr(None)
        );
        debug!(field = %action.name, "populating native column");
        if let Err(source) = conn.execute_batch(&populate) {
            abort(store);
            return Err(cast_failure_error(store, &action.name, entry, source));
        }
    }

    if let Err(source) = conn.execute_batch("COMMIT;") {
        abort(store);
        return Err(StoreError::Engine(source));
    }
    store.checkpoint()?;
    store.refresh_statistics()?;
    let elapsed = populate_started.elapsed();

    let materialized = plan.iter().filter(|action| action.materialize).count();
    info!(
        materialized,
        elapsed_ms = elapsed.as_secs_f64() * 1_000.0,
        "applied materialization plan"
    );
    Ok(elapsed)
}

/// Catalog-managed columns currently present on the documents table.
fn existing_columns(store: &DocumentStore) -> Result<BTreeSet<String>, StoreError> {
    let mut stmt = store.connection().prepare(
        "SELECT column_name FROM information_schema.columns WHERE table_name = 'documents'",
    )?;
    let mut rows = stmt.query([])?;
    let mut present = BTreeSet::new();
    while let Some(row) = rows.next()? {
        let name: String = row.get(0)?;
        if name != "row_id" && name != "doc" {
            present.insert(name);
        }
    }
    Ok(present)
}

/// After a failed populate, probes for the first row whose extracted value
/// exists but does not cast to the target type, so the error can name it.
fn cast_failure_error(
    store: &DocumentStore,
    field: &str,
    entry: &CatalogEntry,
    source: duckdb::Error,
) -> StoreError {
    let raw_text = format!("json_extract_string(doc, '{}')", entry.json_path);
    let probe = format!(
        "SELECT row_id FROM documents WHERE {raw_text} IS NOT NULL \
         AND try_cast({raw_text} AS {}) IS NULL ORDER BY row_id LIMIT 1",
        entry.target_type.sql()
    );
    match store
        .connection()
        .query_row(&probe, [], |row| row.get::<_, i64>(0))
    {
        Ok(row) => StoreError::Materialization {
            field: field.to_string(),
            row,
            message: source.to_string(),
        },
        Err(_) => StoreError::Engine(source),
    }
}

/// Rolls back the open transaction, ignoring errors on an already-aborted
/// connection.
fn abort(store: &DocumentStore) {
    let _ = store.connection().execute_batch("ROLLBACK;");
}

fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}
