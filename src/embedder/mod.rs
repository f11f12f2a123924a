/// Embedding providers.
///
/// The synchronization engine never embeds text itself; vector index
/// adapters hold an [`Embedder`] and call it on upsert and query.
pub mod http;
pub mod mock;

use std::sync::Arc;

use thiserror::Error;

use crate::config::EmbeddingConfig;

/// Errors that can occur during embedding operations.
#[derive(Error, Debug)]
pub enum EmbedderError {
    #[error("embedding request failed: {0}")]
    Request(String),

    #[error("invalid embedding response: {0}")]
    InvalidResponse(String),

    #[error("embedding has {found} dimensions, expected {expected}")]
    DimensionMismatch { expected: usize, found: usize },

    #[error("unknown embedding provider: {0}")]
    UnknownProvider(String),
}

/// Trait for text embedding implementations.
///
/// All implementations must be `Send + Sync` to allow concurrent use
/// behind `Arc`.
pub trait Embedder: Send + Sync {
    /// Embed a single text string into a vector.
    fn embed(&self, text: &str) -> Result<Vec<f32>, EmbedderError>;

    /// Embed multiple text strings into vectors, in input order.
    fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>, EmbedderError>;

    /// Return the dimensionality of the embedding vectors.
    fn dimensions(&self) -> usize;
}

/// Build the embedder named by `config.provider`.
pub fn from_config(config: &EmbeddingConfig) -> Result<Arc<dyn Embedder>, EmbedderError> {
    match config.provider.as_str() {
        "mock" => Ok(Arc::new(mock::MockEmbedder::new(config.dimensions))),
        "http" => Ok(Arc::new(http::HttpEmbedder::new(config)?)),
        other => Err(EmbedderError::UnknownProvider(other.to_string())),
    }
}
