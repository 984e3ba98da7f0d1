use std::fmt;
use std::sync::Arc;

use patrank_ai::{EmbeddingProvider, RelevanceRanker};
use patrank_core::config::SearchConfig;
use patrank_core::{
    Composition, Dialect, RankedResult, SearchConditions, ValidationError, build, unranked,
};
use patrank_store::{CorpusBackend, ExecContext, QueryExecutor};
use serde::Serialize;
use tracing::{error, info, warn};

use crate::{SearchCycle, SearchError, SearchState};

/// Non-fatal problems attached to a completed search.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SearchWarning {
    /// Ranking failed; results are in executor order with no scores.
    EmbeddingDegraded { reason: String },
}

impl fmt::Display for SearchWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::EmbeddingDegraded { reason } => {
                write!(f, "relevance ranking unavailable: {reason}")
            }
        }
    }
}

/// A completed search: possibly empty, possibly unranked.
#[derive(Debug, Clone, Serialize)]
pub struct SearchOutcome {
    pub results: Vec<RankedResult>,
    pub warnings: Vec<SearchWarning>,
    /// Query text as sent to the corpus, for display.
    pub query: String,
    pub composition: Composition,
    pub trail: Vec<SearchState>,
}

impl SearchOutcome {
    pub fn is_degraded(&self) -> bool {
        !self.warnings.is_empty()
    }
}

/// Runs one search cycle per call: validate, build, execute, rank.
pub struct SearchEngine {
    executor: QueryExecutor,
    ranker: RelevanceRanker,
    default_composition: Composition,
}

impl SearchEngine {
    pub fn new(backend: Arc<dyn CorpusBackend>, provider: Arc<dyn EmbeddingProvider>) -> Self {
        Self {
            executor: QueryExecutor::new(backend),
            ranker: RelevanceRanker::new(provider),
            default_composition: Composition::default(),
        }
    }

    pub fn from_config(
        cfg: &SearchConfig,
        backend: Arc<dyn CorpusBackend>,
        provider: Arc<dyn EmbeddingProvider>,
    ) -> Self {
        Self {
            executor: QueryExecutor::new(backend).with_default_timeout(cfg.query_timeout()),
            ranker: RelevanceRanker::new(provider).with_timeout(cfg.ranking_timeout()),
            default_composition: cfg.default_composition,
        }
    }

    pub fn with_default_composition(mut self, composition: Composition) -> Self {
        self.default_composition = composition;
        self
    }

    pub fn default_composition(&self) -> Composition {
        self.default_composition
    }

    pub fn dialect(&self) -> Dialect {
        self.executor.dialect()
    }

    /// [`search_with`](Self::search_with) using the default composition.
    pub async fn search(
        &self,
        theme: &str,
        conditions: &SearchConditions,
        ctx: &ExecContext,
    ) -> Result<SearchOutcome, SearchError> {
        self.search_with(theme, conditions, self.default_composition, ctx)
            .await
    }

    pub async fn search_with(
        &self,
        theme: &str,
        conditions: &SearchConditions,
        composition: Composition,
        ctx: &ExecContext,
    ) -> Result<SearchOutcome, SearchError> {
        let mut cycle = SearchCycle::new();
        let result = self
            .run(&mut cycle, theme, conditions, composition, ctx)
            .await;
        if let Err(err) = &result {
            cycle.fail();
            if err.is_recoverable() {
                warn!(error = %err, stage = ?err.stage(), "search failed, may be retried");
            } else {
                error!(error = %err, stage = ?err.stage(), "search failed");
            }
        }
        result
    }

    async fn run(
        &self,
        cycle: &mut SearchCycle,
        theme: &str,
        conditions: &SearchConditions,
        composition: Composition,
        ctx: &ExecContext,
    ) -> Result<SearchOutcome, SearchError> {
        cycle.advance(SearchState::Validating);
        if conditions.is_empty() {
            return Err(ValidationError::EmptyConditions.into());
        }

        cycle.advance(SearchState::BuildingQuery);
        let plan = build(conditions, composition, self.executor.dialect())?;

        cycle.advance(SearchState::Executing);
        let rows = self.executor.execute(&plan, ctx).await?;

        let mut warnings = Vec::new();
        let results = if rows.is_empty() {
            info!("no matching documents, skipping ranking");
            Vec::new()
        } else {
            cycle.advance(SearchState::Ranking);
            match self.ranker.rank(theme, &rows).await {
                Ok(ranked) => ranked,
                Err(err) => {
                    let warning = SearchWarning::EmbeddingDegraded {
                        reason: err.to_string(),
                    };
                    warn!(error = %err, rows = rows.len(), "ranking failed, returning executor order");
                    warnings.push(warning);
                    unranked(rows)
                }
            }
        };

        cycle.advance(SearchState::Complete);
        info!(
            results = results.len(),
            composition = composition.as_str(),
            degraded = !warnings.is_empty(),
            "search complete"
        );
        Ok(SearchOutcome {
            results,
            warnings,
            query: plan.sql().to_string(),
            composition,
            trail: cycle.trail().to_vec(),
        })
    }
}
