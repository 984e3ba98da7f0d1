use patrank_core::{Binding, QueryPlan};
use thiserror::Error;

/// Setup failures: opening databases, loading snapshots, building clients.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("parquet file not found: {0}")]
    ParquetNotFound(std::path::PathBuf),

    #[cfg(feature = "duckdb")]
    #[error("duckdb error: {0}")]
    DuckDb(#[from] ::duckdb::Error),

    #[error("http client error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("{0}")]
    Other(String),
}

/// Classified failure of one query execution.
#[derive(Debug, Clone, Error)]
pub enum ExecError {
    #[error("authentication failed: {0}")]
    Authentication(String),

    #[error("query rejected by backend: {message}")]
    QuerySyntax {
        message: String,
        query: String,
        bindings: Vec<Binding>,
    },

    #[error("transient backend failure: {0}")]
    Transient(String),

    #[error("result row could not be mapped: {0}")]
    Schema(String),
}

impl ExecError {
    /// Backend rejection of `plan`, carrying the full query for diagnostics.
    pub fn syntax(message: impl Into<String>, plan: &QueryPlan) -> Self {
        Self::QuerySyntax {
            message: message.into(),
            query: plan.sql().to_string(),
            bindings: plan.bindings().to_vec(),
        }
    }

    /// Safe to retry unchanged.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Transient(_))
    }
}
