//! Threshold-filtered similarity search over the vector index.
use std::fmt;
use std::path::Path;
use std::sync::Arc;

use serde::Serialize;
use thiserror::Error;
use tracing::debug;

use crate::index::{IndexError, VectorIndex};

const NO_RESULTS_MESSAGE: &str = "No relevant documents found in knowledge base for this query.";

#[derive(Error, Debug)]
pub enum RetrieveError {
    #[error("vector index query failed: {0}")]
    Index(#[from] IndexError),

    #[error("retrieval worker failed: {0}")]
    Worker(String),
}

/// A chunk that passed the relevance threshold.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Passage {
    pub text: String,
    /// Path of the originating file.
    pub source: String,
    /// Cosine distance to the query; lower is more relevant.
    pub score: f64,
}

/// Why a search produced nothing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum NoResultsReason {
    EmptyQuery,
    EmptyIndex,
    NothingRelevant,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum Retrieval {
    Passages(Vec<Passage>),
    NoResults(NoResultsReason),
}

impl Retrieval {
    pub fn passages(&self) -> &[Passage] {
        match self {
            Retrieval::Passages(p) => p,
            Retrieval::NoResults(_) => &[],
        }
    }

    /// Plain-text rendering for prompts and the CLI.
    pub fn render(&self) -> String {
        match self {
            Retrieval::NoResults(_) => NO_RESULTS_MESSAGE.to_string(),
            Retrieval::Passages(passages) => passages
                .iter()
                .enumerate()
                .map(|(i, p)| {
                    format!(
                        "[Document {}] (Score: {:.2}) From {}:\n{}",
                        i + 1,
                        p.score,
                        source_name(&p.source),
                        p.text.trim()
                    )
                })
                .collect::<Vec<_>>()
                .join("\n\n---\n\n"),
        }
    }
}

impl fmt::Display for Retrieval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.render())
    }
}

fn source_name(source: &str) -> &str {
    Path::new(source)
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or(source)
}

#[derive(Clone)]
pub struct Retriever {
    index: Arc<dyn VectorIndex>,
}

impl Retriever {
    pub fn new(index: Arc<dyn VectorIndex>) -> Self {
        Self { index }
    }

    /// Up to `k` passages whose distance is at most `max_distance`, best first.
    pub fn search(&self, query: &str, k: usize, max_distance: f64) -> Result<Retrieval, RetrieveError> {
        if query.trim().is_empty() {
            return Ok(Retrieval::NoResults(NoResultsReason::EmptyQuery));
        }
        if self.index.count()? == 0 {
            return Ok(Retrieval::NoResults(NoResultsReason::EmptyIndex));
        }

        let candidates = self.index.similarity_search(query, k)?;
        let total = candidates.len();
        let passages: Vec<Passage> = candidates
            .into_iter()
            // NaN never compares <=, so it is dropped too.
            .filter(|hit| hit.score <= max_distance)
            .map(|hit| Passage {
                source: hit.metadata.get("source").cloned().unwrap_or(hit.id),
                text: hit.text,
                score: hit.score,
            })
            .collect();

        debug!(
            "Retrieved {} of {} candidates within distance {}",
            passages.len(),
            total,
            max_distance
        );

        if passages.is_empty() {
            Ok(Retrieval::NoResults(NoResultsReason::NothingRelevant))
        } else {
            Ok(Retrieval::Passages(passages))
        }
    }
}
