use std::path::PathBuf;

use chrono::NaiveDate;
use thiserror::Error;

/// Rejection of a search request before any query is built.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("at least one keyword or classification code must be given")]
    EmptyConditions,

    #[error("result limit {limit} is outside {min}..={max}")]
    ResultLimitOutOfRange { limit: u32, min: u32, max: u32 },

    #[error("date range needs both a start and an end date")]
    UnpairedDateRange,

    #[error("date range starts ({start}) after it ends ({end})")]
    InvertedDateRange { start: NaiveDate, end: NaiveDate },

    #[error("jurisdiction {0:?} is not a two-letter office code")]
    InvalidJurisdiction(String),
}

/// Failure to turn conditions into a query plan.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BuildError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    /// Placeholders and bindings disagree. Always a builder defect.
    #[error("inconsistent query plan: {0}")]
    Inconsistent(String),
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file at {path:?}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to parse config file at {path:?}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },

    #[error("failed to parse config")]
    Toml(#[source] toml::de::Error),

    #[error("{0}")]
    Validation(String),
}
