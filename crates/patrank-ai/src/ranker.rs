//! Rank corpus rows by cosine similarity to a research theme.

use std::slice;
use std::sync::Arc;
use std::time::Duration;

use patrank_core::{RankedResult, ResultRow, cosine_similarity, rank_by_score};
use tracing::{debug, info};

use crate::{EmbeddingError, EmbeddingProvider};

#[derive(Clone)]
pub struct RelevanceRanker {
    provider: Arc<dyn EmbeddingProvider>,
    timeout: Option<Duration>,
}

impl RelevanceRanker {
    pub fn new(provider: Arc<dyn EmbeddingProvider>) -> Self {
        Self {
            provider,
            timeout: None,
        }
    }

    /// Bound the whole ranking step, including every provider call.
    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    /// Score every row against `theme` and return them by descending score.
    ///
    /// Document text is `title + " " + abstract`. Ties keep input order. Any
    /// provider failure fails the whole call; there is no partial ranking.
    /// An empty `rows` returns immediately without calling the provider.
    pub async fn rank(
        &self,
        theme: &str,
        rows: &[ResultRow],
    ) -> Result<Vec<RankedResult>, EmbeddingError> {
        if rows.is_empty() {
            return Ok(vec![]);
        }
        match self.timeout {
            Some(limit) => tokio::time::timeout(limit, self.score(theme, rows))
                .await
                .map_err(|_| EmbeddingError::Timeout(limit))?,
            None => self.score(theme, rows).await,
        }
    }

    async fn score(
        &self,
        theme: &str,
        rows: &[ResultRow],
    ) -> Result<Vec<RankedResult>, EmbeddingError> {
        let theme_input = [theme.to_string()];
        let documents: Vec<String> = rows.iter().map(ResultRow::embedding_text).collect();
        debug!(
            documents = documents.len(),
            batched = self.provider.supports_batch(),
            "embedding theme and documents"
        );

        let (theme_vectors, doc_vectors) = futures::try_join!(
            self.provider.embed(&theme_input),
            self.embed_documents(&documents),
        )?;

        let theme_vector = single(theme_vectors)?;
        expect_count(documents.len(), doc_vectors.len())?;
        for doc in &doc_vectors {
            if doc.len() != theme_vector.len() {
                return Err(EmbeddingError::DimensionMismatch {
                    expected: theme_vector.len(),
                    actual: doc.len(),
                });
            }
        }

        let scores: Vec<f32> = doc_vectors
            .iter()
            .map(|doc| cosine_similarity(&theme_vector, doc))
            .collect();
        let ranked = rank_by_score(rows.to_vec(), scores);
        info!(ranked = ranked.len(), "ranking complete");
        Ok(ranked)
    }

    /// One call for all documents, or one call per document in order when the
    /// provider can't batch.
    async fn embed_documents(&self, documents: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        if self.provider.supports_batch() {
            return self.provider.embed(documents).await;
        }
        let mut vectors = Vec::with_capacity(documents.len());
        for doc in documents {
            let out = self.provider.embed(slice::from_ref(doc)).await?;
            vectors.push(single(out)?);
        }
        Ok(vectors)
    }
}

fn expect_count(expected: usize, actual: usize) -> Result<(), EmbeddingError> {
    if expected == actual {
        Ok(())
    } else {
        Err(EmbeddingError::CountMismatch { expected, actual })
    }
}

fn single(mut vectors: Vec<Vec<f32>>) -> Result<Vec<f32>, EmbeddingError> {
    expect_count(1, vectors.len())?;
    vectors.pop().ok_or(EmbeddingError::CountMismatch {
        expected: 1,
        actual: 0,
    })
}
