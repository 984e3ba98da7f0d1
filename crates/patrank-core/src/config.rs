//! Shared configuration, loaded from TOML.
//!
//! Secrets (access tokens, API keys) are deliberately absent: they are passed
//! to the backends explicitly at call or construction time.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::{Composition, ConfigError, Dialect};

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct Config {
    pub corpus: CorpusConfig,
    pub embedding: EmbeddingConfig,
    pub search: SearchConfig,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct CorpusConfig {
    /// Which backend (and therefore which SQL dialect) to use.
    pub backend: Dialect,
    pub bigquery: BigQueryConfig,
    pub duckdb: DuckDbConfig,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct BigQueryConfig {
    pub endpoint: String,
    pub location: Option<String>,
    pub timeout_ms: u64,
    pub poll_interval_ms: u64,
}

impl Default for BigQueryConfig {
    fn default() -> Self {
        Self {
            endpoint: "https://bigquery.googleapis.com/bigquery/v2".to_string(),
            location: None,
            timeout_ms: 60_000,
            poll_interval_ms: 1_000,
        }
    }
}

impl BigQueryConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct DuckDbConfig {
    /// Persistent database file. In-memory when unset.
    pub database: Option<PathBuf>,
    /// Directory holding `publications.parquet`.
    pub data_dir: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct EmbeddingConfig {
    pub api_base: String,
    pub path: String,
    pub model: String,
    pub dimensions: Option<u32>,
    pub timeout_ms: u64,
    /// Whether the provider accepts many inputs in one request.
    pub batch_input: bool,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            api_base: "https://api.openai.com/v1".to_string(),
            path: "/embeddings".to_string(),
            model: "text-embedding-3-small".to_string(),
            dimensions: None,
            timeout_ms: 30_000,
            batch_input: true,
        }
    }
}

impl EmbeddingConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn url(&self) -> String {
        format!("{}{}", self.api_base, self.path)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct SearchConfig {
    /// Composition used when a caller doesn't pick one.
    pub default_composition: Composition,
    pub query_timeout_ms: Option<u64>,
    pub ranking_timeout_ms: Option<u64>,
}

impl SearchConfig {
    pub fn query_timeout(&self) -> Option<Duration> {
        self.query_timeout_ms.map(Duration::from_millis)
    }

    pub fn ranking_timeout(&self) -> Option<Duration> {
        self.ranking_timeout_ms.map(Duration::from_millis)
    }
}

pub fn load(path: &Path) -> Result<Config, ConfigError> {
    let raw = fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    let cfg: Config = toml::from_str(&raw).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })?;
    finish(cfg)
}

/// Parse an in-memory TOML document.
pub fn parse(raw: &str) -> Result<Config, ConfigError> {
    let cfg: Config = toml::from_str(raw).map_err(ConfigError::Toml)?;
    finish(cfg)
}

fn finish(mut cfg: Config) -> Result<Config, ConfigError> {
    normalize(&mut cfg);
    validate(&cfg)?;
    Ok(cfg)
}

fn normalize(cfg: &mut Config) {
    cfg.embedding.api_base = cfg.embedding.api_base.trim().trim_end_matches('/').to_string();
    let path = cfg.embedding.path.trim();
    cfg.embedding.path = if path.starts_with('/') {
        path.to_string()
    } else {
        format!("/{path}")
    };
    cfg.corpus.bigquery.endpoint = cfg
        .corpus
        .bigquery
        .endpoint
        .trim()
        .trim_end_matches('/')
        .to_string();
}

pub fn validate(cfg: &Config) -> Result<(), ConfigError> {
    let fail = |msg: &str| Err(ConfigError::Validation(msg.to_string()));

    if cfg.corpus.backend == Dialect::BigQuery {
        if cfg.corpus.bigquery.endpoint.is_empty() {
            return fail("corpus.bigquery.endpoint must be non-empty.");
        }
        if cfg.corpus.bigquery.timeout_ms == 0 {
            return fail("corpus.bigquery.timeout_ms must be greater than zero.");
        }
        if cfg.corpus.bigquery.poll_interval_ms == 0 {
            return fail("corpus.bigquery.poll_interval_ms must be greater than zero.");
        }
    }
    if cfg.embedding.api_base.is_empty() {
        return fail("embedding.api_base must be non-empty.");
    }
    if cfg.embedding.model.trim().is_empty() {
        return fail("embedding.model must be non-empty.");
    }
    if cfg.embedding.dimensions == Some(0) {
        return fail("embedding.dimensions must be greater than zero when set.");
    }
    if cfg.embedding.timeout_ms == 0 {
        return fail("embedding.timeout_ms must be greater than zero.");
    }
    if cfg.search.query_timeout_ms == Some(0) || cfg.search.ranking_timeout_ms == Some(0) {
        return fail("search timeouts must be greater than zero when set.");
    }
    Ok(())
}
