use async_trait::async_trait;

use crate::EmbeddingError;

/// Turns texts into vectors.
///
/// All-or-nothing: either one vector per input, in input order, or an error.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError>;

    /// Whether one call may carry many inputs. When false, callers send one
    /// text per call.
    fn supports_batch(&self) -> bool {
        true
    }
}
