//! Vector index adapters.
//!
//! The index stores chunk text keyed by chunk id and answers similarity
//! queries. Scores are cosine distances: lower means more similar.
use std::collections::BTreeSet;

use thiserror::Error;

use crate::embedder::EmbedderError;
use crate::loader::Metadata;

pub mod memory;
pub mod vec_store;

pub use memory::MemoryIndex;
pub use vec_store::SqliteVecIndex;

#[derive(Error, Debug)]
pub enum IndexError {
    #[error("vector database error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error(transparent)]
    Embedding(#[from] EmbedderError),

    #[error("metadata encoding error: {0}")]
    Metadata(#[from] serde_json::Error),

    #[error("index was built with {found} dimensions, embedder produces {expected}")]
    DimensionMismatch { expected: usize, found: usize },

    #[error("embedder returned {found} vectors for {expected} texts")]
    VectorCount { expected: usize, found: usize },

    #[error("vector index lock poisoned")]
    LockPoisoned,

    #[error("vector index unavailable: {0}")]
    Unavailable(String),
}

/// A chunk to be written to the index.
#[derive(Debug, Clone, PartialEq)]
pub struct IndexEntry {
    pub id: String,
    pub text: String,
    pub metadata: Metadata,
}

/// A search hit with its cosine distance to the query.
#[derive(Debug, Clone, PartialEq)]
pub struct ScoredEntry {
    pub id: String,
    pub text: String,
    pub metadata: Metadata,
    pub score: f64,
}

/// Storage for chunk vectors. Implementations must be safe to share between
/// the synchronization worker and concurrent searches.
pub trait VectorIndex: Send + Sync {
    /// Insert entries, replacing any existing entry with the same id.
    fn upsert(&self, entries: &[IndexEntry]) -> Result<(), IndexError>;

    /// Remove entries by id. Unknown ids are ignored. Returns how many were removed.
    fn delete(&self, ids: &[String]) -> Result<usize, IndexError>;

    /// Up to `k` entries nearest to `query`, ascending by distance.
    fn similarity_search(&self, query: &str, k: usize) -> Result<Vec<ScoredEntry>, IndexError>;

    fn count(&self) -> Result<usize, IndexError>;

    /// Every id currently stored.
    fn ids(&self) -> Result<BTreeSet<String>, IndexError>;

    /// Drop all entries.
    fn clear(&self) -> Result<(), IndexError>;
}
