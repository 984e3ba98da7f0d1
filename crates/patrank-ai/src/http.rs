//! OpenAI-compatible `/embeddings` client.

use std::fmt;

use async_trait::async_trait;
use patrank_core::config::EmbeddingConfig;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::{EmbeddingError, EmbeddingProvider};

pub struct HttpEmbedder {
    client: reqwest::Client,
    url: String,
    model: String,
    dimensions: Option<u32>,
    api_key: String,
    batch_input: bool,
}

impl fmt::Debug for HttpEmbedder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HttpEmbedder")
            .field("url", &self.url)
            .field("model", &self.model)
            .field("dimensions", &self.dimensions)
            .field("batch_input", &self.batch_input)
            .finish_non_exhaustive()
    }
}

#[derive(Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: &'a [String],
    #[serde(skip_serializing_if = "Option::is_none")]
    dimensions: Option<u32>,
}

#[derive(Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingItem>,
}

#[derive(Deserialize)]
struct EmbeddingItem {
    #[serde(default)]
    index: Option<usize>,
    embedding: Vec<f32>,
}

impl HttpEmbedder {
    /// `api_key` may be empty for endpoints that need no auth.
    pub fn from_config(cfg: &EmbeddingConfig, api_key: impl Into<String>) -> Result<Self, EmbeddingError> {
        let client = reqwest::Client::builder().timeout(cfg.timeout()).build()?;
        Ok(Self {
            client,
            url: cfg.url(),
            model: cfg.model.clone(),
            dimensions: cfg.dimensions,
            api_key: api_key.into(),
            batch_input: cfg.batch_input,
        })
    }

    pub fn model(&self) -> &str {
        &self.model
    }
}

#[async_trait]
impl EmbeddingProvider for HttpEmbedder {
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        if texts.is_empty() {
            return Ok(vec![]);
        }

        let body = EmbeddingRequest {
            model: &self.model,
            input: texts,
            dimensions: self.dimensions,
        };
        debug!(url = %self.url, inputs = texts.len(), "requesting embeddings");

        let mut req = self.client.post(&self.url).json(&body);
        if !self.api_key.is_empty() {
            req = req.bearer_auth(&self.api_key);
        }
        let resp = req.send().await?;
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(EmbeddingError::Provider {
                status: status.as_u16(),
                body,
            });
        }

        let bytes = resp.bytes().await?;
        let vectors = parse_response(&bytes)?;
        if vectors.len() != texts.len() {
            return Err(EmbeddingError::CountMismatch {
                expected: texts.len(),
                actual: vectors.len(),
            });
        }
        Ok(vectors)
    }

    fn supports_batch(&self) -> bool {
        self.batch_input
    }
}

/// Decode the response, restoring input order from each item's `index`.
fn parse_response(bytes: &[u8]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
    let parsed: EmbeddingResponse = serde_json::from_slice(bytes)
        .map_err(|e| EmbeddingError::InvalidResponse(e.to_string()))?;

    let mut indexed: Vec<(usize, Vec<f32>)> = parsed
        .data
        .into_iter()
        .enumerate()
        .map(|(fallback, item)| (item.index.unwrap_or(fallback), item.embedding))
        .collect();
    indexed.sort_by_key(|(index, _)| *index);

    for (expected, (index, _)) in indexed.iter().enumerate() {
        if *index != expected {
            return Err(EmbeddingError::InvalidResponse(format!(
                "embedding indices are not contiguous: found {index} at position {expected}"
            )));
        }
    }
    Ok(indexed.into_iter().map(|(_, v)| v).collect())
}
