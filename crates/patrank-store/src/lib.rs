//! Corpus backends: BigQuery (REST) for the public patents dataset, DuckDB for
//! local Parquet snapshots.

mod bigquery;
mod corpus;
mod error;
pub mod rows;

pub use bigquery::BigQueryCorpus;
pub use corpus::{CorpusBackend, ExecContext, QueryExecutor};
pub use error::{ExecError, StoreError};

#[cfg(feature = "duckdb")]
mod duck;
#[cfg(feature = "duckdb")]
pub use duck::DuckCorpus;
