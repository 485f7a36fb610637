//! Document store on top of embedded DuckDB.
//!
//! One store file holds one `documents` table: a synthetic `row_id`, the raw
//! JSON document in `doc`, and whatever native columns are currently
//! materialized. Experiments never mutate the baseline file; each step works
//! on a private copy created through [`DocumentStore::copy_from`].

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::io::BufRead;
use std::path::{Path, PathBuf};
use std::time::Instant;

use duckdb::types::Value;
use duckdb::{params, Connection};
use thiserror::Error;
use tracing::{debug, info};

/// Error taxonomy for store and mutation operations. All of these signal
/// bugs in harness logic or input data and are fatal for the current run;
/// none are retried.
#[derive(Error, Debug)]
pub enum StoreError {
    /// A materialization plan referenced a field the catalog does not know.
    #[error("unknown field '{field}' in materialization plan")]
    UnknownField { field: String },

    /// Populating a native column failed, typically on a cast. The reported
    /// row is the first offending one; the transaction was rolled back.
    #[error("failed to materialize field '{field}' at row {row}: {message}")]
    Materialization {
        field: String,
        row: i64,
        message: String,
    },

    /// The engine rejected generated SQL. Aborts the whole run.
    #[error("query '{query}' failed: {source}")]
    QueryExecution {
        query: String,
        #[source]
        source: duckdb::Error,
    },

    /// Filesystem-level store management failed.
    #[error("store I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Any other engine-level failure.
    #[error(transparent)]
    Engine(#[from] duckdb::Error),
}

/// Result of timing one query over several iterations.
///
/// The first iteration is the cold one: its result set is reduced to a
/// fingerprint for cross-variant correctness checks, and it is excluded from
/// the trailing average that experiments record.
#[derive(Debug, Clone, PartialEq)]
pub struct TimingSample {
    pub iterations: usize,
    pub iter_ms: Vec<f64>,
    pub rows: usize,
    /// Order-insensitive 64-bit hash of the first iteration's result rows.
    pub fingerprint: u64,
    pub trailing_avg_ms: f64,
}

/// Store size as reported by the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SizeMetrics {
    pub blocks_used: i64,
    pub block_size: i64,
    pub total_bytes: i64,
}

/// Handle to one open store file.
pub struct DocumentStore {
    conn: Connection,
    path: PathBuf,
}

impl DocumentStore {
    /// Creates a fresh store at `path` and loads one JSON document per line
    /// of the newline-delimited file at `ndjson`. Blank lines are skipped;
    /// row ids are assigned in file order starting at 1.
    pub fn import(path: &Path, ndjson: &Path) -> Result<Self, StoreError> {
        if path.exists() {
            std::fs::remove_file(path).map_err(|source| StoreError::Io {
                path: path.to_path_buf(),
                source,
            })?;
        }
        let conn = Connection::open(path)?;
        conn.execute_batch(
            "CREATE TABLE documents (row_id BIGINT NOT NULL, doc VARCHAR NOT NULL);",
        )?;

        let file = std::fs::File::open(ndjson).map_err(|source| StoreError::Io {
            path: ndjson.to_path_buf(),
            source,
        })?;
        let reader = std::io::BufReader::new(file);

        conn.execute_batch("BEGIN;")?;
        let mut loaded = 0i64;
        {
            let mut insert = conn.prepare("INSERT INTO documents VALUES (?, ?)")?;
            for line in reader.lines() {
                let line = line.map_err(|source| StoreError::Io {
                    path: ndjson.to_path_buf(),
                    source,
                })?;
                if line.trim().is_empty() {
                    continue;
                }
                loaded += 1;
                insert.execute(params![loaded, line])?;
            }
        }
        conn.execute_batch("COMMIT;")?;
        conn.execute_batch("CHECKPOINT;")?;
        info!(rows = loaded, path = %path.display(), "imported document corpus");

        Ok(Self {
            conn,
            path: path.to_path_buf(),
        })
    }

    /// Opens an existing store file.
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        let conn = Connection::open(path)?;
        Ok(Self {
            conn,
            path: path.to_path_buf(),
        })
    }

    /// Copies the baseline store file to `target` and opens the copy. The
    /// baseline must not be open elsewhere; the copy is exclusively owned by
    /// the returned handle.
    pub fn copy_from(baseline: &Path, target: &Path) -> Result<Self, StoreError> {
        if target.exists() {
            std::fs::remove_file(target).map_err(|source| StoreError::Io {
                path: target.to_path_buf(),
                source,
            })?;
        }
        std::fs::copy(baseline, target).map_err(|source| StoreError::Io {
            path: baseline.to_path_buf(),
            source,
        })?;
        debug!(baseline = %baseline.display(), copy = %target.display(), "created private store copy");
        Self::open(target)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub(crate) fn connection(&self) -> &Connection {
        &self.conn
    }

    /// Number of documents in the store.
    pub fn document_count(&self) -> Result<i64, StoreError> {
        let count = self
            .conn
            .query_row("SELECT count(*) FROM documents", [], |row| row.get(0))?;
        Ok(count)
    }

    /// Runs a query once and collects all rows as display strings. Intended
    /// for tests and small result sets, not for timed measurement.
    pub fn execute_collect(&self, sql: &str) -> Result<Vec<Vec<String>>, StoreError> {
        let mut stmt = self
            .conn
            .prepare(sql)
            .map_err(|source| StoreError::QueryExecution {
                query: sql.to_string(),
                source,
            })?;
        let mut rows = stmt
            .query([])
            .map_err(|source| StoreError::QueryExecution {
                query: sql.to_string(),
                source,
            })?;
        let mut collected = Vec::new();
        while let Some(row) = rows.next()? {
            let columns = row.as_ref().column_count();
            let mut cells = Vec::with_capacity(columns);
            for index in 0..columns {
                let value: Value = row.get(index)?;
                cells.push(value_to_string(&value));
            }
            collected.push(cells);
        }
        Ok(collected)
    }

    /// Executes `sql` for `iterations` iterations, recording wall-clock time
    /// per iteration. Every iteration fully drains the result set; the first
    /// one also folds each row into the sample's fingerprint.
    pub fn timed_execute(
        &self,
        query_id: &str,
        sql: &str,
        iterations: usize,
    ) -> Result<TimingSample, StoreError> {
        let iterations = iterations.max(1);
        let mut iter_ms = Vec::with_capacity(iterations);
        let mut fingerprint = 0u64;
        let mut rows_seen = 0usize;

        for iteration in 0..iterations {
            let started = Instant::now();
            let mut stmt =
                self.conn
                    .prepare(sql)
                    .map_err(|source| StoreError::QueryExecution {
                        query: query_id.to_string(),
                        source,
                    })?;
            let mut rows = stmt
                .query([])
                .map_err(|source| StoreError::QueryExecution {
                    query: query_id.to_string(),
                    source,
                })?;
            let mut count = 0usize;
            let mut combined = 0u64;
            while let Some(row) = rows.next().map_err(|source| StoreError::QueryExecution {
                query: query_id.to_string(),
                source,
            })? {
                count += 1;
                if iteration == 0 {
                    let columns = row.as_ref().column_count();
                    let mut hasher = DefaultHasher::new();
                    for index in 0..columns {
                        let value: Value = row.get(index)?;
                        value_to_string(&value).hash(&mut hasher);
                    }
                    // Row order is not stable across plans, so rows combine
                    // commutatively.
                    combined = combined.wrapping_add(hasher.finish());
                }
            }
            iter_ms.push(started.elapsed().as_secs_f64() * 1_000.0);
            if iteration == 0 {
                fingerprint = combined;
                rows_seen = count;
            }
        }

        let trailing_avg_ms = if iter_ms.len() > 1 {
            iter_ms[1..].iter().sum::<f64>() / (iter_ms.len() - 1) as f64
        } else {
            iter_ms[0]
        };

        Ok(TimingSample {
            iterations,
            iter_ms,
            rows: rows_seen,
            fingerprint,
            trailing_avg_ms,
        })
    }

    /// Flushes the write-ahead log into the database file.
    pub fn checkpoint(&self) -> Result<(), StoreError> {
        self.conn.execute_batch("CHECKPOINT;")?;
        Ok(())
    }

    /// Recomputes engine statistics so subsequent plans see current
    /// cardinalities.
    pub fn refresh_statistics(&self) -> Result<(), StoreError> {
        self.conn.execute_batch("ANALYZE;")?;
        Ok(())
    }

    /// Current store size as reported by the engine.
    pub fn size_metrics(&self) -> Result<SizeMetrics, StoreError> {
        let (block_size, total_blocks, used_blocks): (i64, i64, i64) = self.conn.query_row(
            "SELECT block_size, total_blocks, used_blocks FROM pragma_database_size()",
            [],
            |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
        )?;
        Ok(SizeMetrics {
            blocks_used: used_blocks,
            block_size,
            total_bytes: block_size * total_blocks,
        })
    }

    /// Closes the handle and removes the underlying store file. Used by the
    /// driver's teardown to discard a step's private copy.
    pub fn discard(self) -> Result<(), StoreError> {
        let path = self.path.clone();
        drop(self.conn);
        if path.exists() {
            std::fs::remove_file(&path).map_err(|source| StoreError::Io {
                path: path.clone(),
                source,
            })?;
        }
        // DuckDB cleans its WAL on a clean close; a leftover file after a
        // crash mid-step must not leak into later runs.
        let wal = PathBuf::from(format!("{}.wal", path.display()));
        if wal.exists() {
            std::fs::remove_file(&wal).map_err(|source| StoreError::Io { path: wal, source })?;
        }
        Ok(())
    }
}

/// Stable display form of a scalar engine value, used for fingerprints and
/// collected rows.
fn value_to_string(value: &Value) -> String {
    match value {
        Value::Null => "NULL".to_string(),
        Value::Boolean(v) => v.to_string(),
        Value::TinyInt(v) => v.to_string(),
        Value::SmallInt(v) => v.to_string(),
        Value::Int(v) => v.to_string(),
        Value::BigInt(v) => v.to_string(),
        Value::HugeInt(v) => v.to_string(),
        Value::UTinyInt(v) => v.to_string(),
        Value::USmallInt(v) => v.to_string(),
        Value::UInt(v) => v.to_string(),
        Value::UBigInt(v) => v.to_string(),
        Value::Float(v) => v.to_string(),
        Value::Double(v) => v.to_string(),
        Value::Decimal(v) => v.to_string(),
        Value::Text(v) => v.clone(),
        Value::Date32(v) => v.to_string(),
        Value::Timestamp(_, v) => v.to_string(),
        Value::Time64(_, v) => v.to_string(),
        other => format!("{other:?}"),
    }
}
