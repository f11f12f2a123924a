//! In-memory [`VectorIndex`] for tests and throwaway runs.
//!
//! Brute-force cosine distance over every stored vector.
use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, RwLock};

use super::{IndexEntry, IndexError, ScoredEntry, VectorIndex};
use crate::embedder::Embedder;
use crate::loader::Metadata;

struct StoredEntry {
    text: String,
    metadata: Metadata,
    vector: Vec<f32>,
}

pub struct MemoryIndex {
    embedder: Arc<dyn Embedder>,
    entries: RwLock<BTreeMap<String, StoredEntry>>,
}

impl MemoryIndex {
    pub fn new(embedder: Arc<dyn Embedder>) -> Self {
        Self {
            embedder,
            entries: RwLock::new(BTreeMap::new()),
        }
    }
}

fn cosine_distance(a: &[f32], b: &[f32]) -> f64 {
    if a.len() != b.len() || a.is_empty() {
        return 1.0;
    }
    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let mag_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let mag_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if mag_a < f32::EPSILON || mag_b < f32::EPSILON {
        1.0
    } else {
        1.0 - f64::from(dot / (mag_a * mag_b))
    }
}

impl VectorIndex for MemoryIndex {
    fn upsert(&self, entries: &[IndexEntry]) -> Result<(), IndexError> {
        if entries.is_empty() {
            return Ok(());
        }
        let texts: Vec<&str> = entries.iter().map(|e| e.text.as_str()).collect();
        let vectors = self.embedder.embed_batch(&texts)?;
        if vectors.len() != entries.len() {
            return Err(IndexError::VectorCount {
                expected: entries.len(),
                found: vectors.len(),
            });
        }

        let mut stored = self.entries.write().map_err(|_| IndexError::LockPoisoned)?;
        for (entry, vector) in entries.iter().zip(vectors) {
            stored.insert(
                entry.id.clone(),
                StoredEntry {
                    text: entry.text.clone(),
                    metadata: entry.metadata.clone(),
                    vector,
                },
            );
        }
        Ok(())
    }

    fn delete(&self, ids: &[String]) -> Result<usize, IndexError> {
        let mut stored = self.entries.write().map_err(|_| IndexError::LockPoisoned)?;
        Ok(ids.iter().filter(|id| stored.remove(*id).is_some()).count())
    }

    fn similarity_search(&self, query: &str, k: usize) -> Result<Vec<ScoredEntry>, IndexError> {
        if k == 0 {
            return Ok(Vec::new());
        }
        let query_vector = self.embedder.embed(query)?;

        let stored = self.entries.read().map_err(|_| IndexError::LockPoisoned)?;
        let mut hits: Vec<ScoredEntry> = stored
            .iter()
            .map(|(id, entry)| ScoredEntry {
                id: id.clone(),
                text: entry.text.clone(),
                metadata: entry.metadata.clone(),
                score: cosine_distance(&query_vector, &entry.vector),
            })
            .collect();
        hits.sort_by(|a, b| a.score.total_cmp(&b.score));
        hits.truncate(k);
        Ok(hits)
    }

    fn count(&self) -> Result<usize, IndexError> {
        Ok(self
            .entries
            .read()
            .map_err(|_| IndexError::LockPoisoned)?
            .len())
    }

    fn ids(&self) -> Result<BTreeSet<String>, IndexError> {
        Ok(self
            .entries
            .read()
            .map_err(|_| IndexError::LockPoisoned)?
            .keys()
            .cloned()
            .collect())
    }

    fn clear(&self) -> Result<(), IndexError> {
        self.entries
            .write()
            .map_err(|_| IndexError::LockPoisoned)?
            .clear();
        Ok(())
    }
}
