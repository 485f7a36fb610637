//! Engine-facing layer: the document store and its schema mutations.
//!
//! The underlying tabular engine is embedded DuckDB, consumed as a black
//! box: SQL execution, `ALTER TABLE`, transactions, `CHECKPOINT`, `ANALYZE`
//! and `PRAGMA database_size`. Raw documents live in a two-column table
//! (`row_id`, `doc`); materialized fields become additional native columns
//! maintained exclusively by the mutation engine in this crate.

pub mod mutation;
pub mod store;

pub use mutation::{apply, plan_for_target, FieldAction};
pub use store::{DocumentStore, SizeMetrics, StoreError, TimingSample};
