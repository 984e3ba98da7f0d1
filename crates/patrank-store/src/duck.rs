//! DuckDB corpus over a local `publications` snapshot.

use std::path::Path;
use std::sync::{Arc, Mutex};

use arrow::record_batch::RecordBatch;
use async_trait::async_trait;
use duckdb::Connection;
use duckdb::types::Value;
use patrank_core::config::DuckDbConfig;
use patrank_core::{Dialect, QueryPlan, ResultRow, ScalarValue};
use tracing::{debug, info};

use crate::rows::rows_from_batches;
use crate::{CorpusBackend, ExecContext, ExecError, StoreError};

/// Local corpus backed by DuckDB.
///
/// The `publications` table has flat columns: `publication_number`, `title`,
/// `abstract`, `assignee`, `publication_date` (YYYYMMDD integer) and
/// `ipc_codes` (comma-separated, no spaces).
///
/// Use [`open`](Self::open) for an in-memory database and
/// [`open_persistent`](Self::open_persistent) for one that survives restarts.
#[derive(Clone)]
pub struct DuckCorpus {
    conn: Arc<Mutex<Connection>>,
}

impl DuckCorpus {
    pub fn open() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory()?;
        Ok(Self::wrap(conn))
    }

    /// Open or create a database file. Tables already present are usable
    /// without re-importing; see [`has_publications`](Self::has_publications).
    pub fn open_persistent(path: &Path) -> Result<Self, StoreError> {
        let conn = Connection::open(path)?;
        Ok(Self::wrap(conn))
    }

    /// Open per config and import `publications.parquet` from the data
    /// directory when the table is not there yet.
    pub fn from_config(cfg: &DuckDbConfig) -> Result<Self, StoreError> {
        let corpus = match &cfg.database {
            Some(path) => Self::open_persistent(path)?,
            None => Self::open()?,
        };
        if !corpus.has_publications() {
            if let Some(dir) = &cfg.data_dir {
                corpus.load_publications(&dir.join("publications.parquet"))?;
            }
        }
        Ok(corpus)
    }

    fn wrap(conn: Connection) -> Self {
        Self {
            conn: Arc::new(Mutex::new(conn)),
        }
    }

    fn with_conn<T>(
        &self,
        f: impl FnOnce(&Connection) -> Result<T, StoreError>,
    ) -> Result<T, StoreError> {
        let conn = self
            .conn
            .lock()
            .map_err(|_| StoreError::Other("duckdb connection lock poisoned".into()))?;
        f(&conn)
    }

    /// Replace the `publications` table with the contents of a Parquet file.
    pub fn load_publications(&self, path: &Path) -> Result<(), StoreError> {
        if !path.exists() {
            return Err(StoreError::ParquetNotFound(path.to_path_buf()));
        }
        let literal = path.display().to_string().replace('\'', "''");
        let sql = format!(
            "CREATE OR REPLACE TABLE publications AS SELECT * FROM read_parquet('{literal}')"
        );
        self.with_conn(|conn| Ok(conn.execute_batch(&sql)?))?;
        let count = self.publication_count()?;
        info!(count, path = %path.display(), "loaded publications table");
        Ok(())
    }

    /// Run DDL/DML directly, e.g. to seed a corpus.
    pub fn execute_batch(&self, sql: &str) -> Result<(), StoreError> {
        self.with_conn(|conn| Ok(conn.execute_batch(sql)?))
    }

    pub fn has_publications(&self) -> bool {
        self.publication_count().is_ok()
    }

    pub fn publication_count(&self) -> Result<usize, StoreError> {
        self.with_conn(|conn| {
            let count: i64 =
                conn.query_row("SELECT count(*)::BIGINT FROM publications", [], |row| {
                    row.get(0)
                })?;
            usize::try_from(count).map_err(|_| StoreError::Other("negative row count".into()))
        })
    }
}

#[async_trait]
impl CorpusBackend for DuckCorpus {
    fn dialect(&self) -> Dialect {
        Dialect::DuckDb
    }

    async fn execute(
        &self,
        plan: &QueryPlan,
        _ctx: &ExecContext,
    ) -> Result<Vec<ResultRow>, ExecError> {
        let positional = plan.positional();
        let conn = Arc::clone(&self.conn);
        let plan_for_errors = plan.clone();
        debug!(params = positional.values.len(), "executing duckdb query");

        let batches = tokio::task::spawn_blocking(move || -> Result<Vec<RecordBatch>, ExecError> {
            let conn = conn
                .lock()
                .map_err(|_| ExecError::Transient("duckdb connection lock poisoned".into()))?;
            let params: Vec<Value> = positional
                .values
                .into_iter()
                .map(|v| match v {
                    ScalarValue::Int64(n) => Value::BigInt(n),
                    ScalarValue::String(s) => Value::Text(s),
                })
                .collect();
            let mut stmt = conn
                .prepare(&positional.sql)
                .map_err(|e| ExecError::syntax(e.to_string(), &plan_for_errors))?;
            let batches = stmt
                .query_arrow(duckdb::params_from_iter(params))
                .map_err(|e| ExecError::syntax(e.to_string(), &plan_for_errors))?
                .collect();
            Ok(batches)
        })
        .await
        .map_err(|e| ExecError::Transient(format!("duckdb worker failed: {e}")))??;

        rows_from_batches(&batches)
    }
}
