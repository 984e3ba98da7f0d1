//! Embedding providers (remote HTTP, local ONNX Runtime) and the relevance
//! ranker that orders corpus rows by similarity to a research theme.

mod error;
mod http;
mod provider;
mod ranker;

pub use error::EmbeddingError;
pub use http::HttpEmbedder;
pub use provider::EmbeddingProvider;
pub use ranker::RelevanceRanker;

#[cfg(feature = "onnx")]
mod embedder;
#[cfg(feature = "onnx")]
pub use embedder::OnnxEmbedder;
