//! Async facade tying the ledger, reconciler and retriever together.
//!
//! Synchronization runs are exclusive: the ledger sits behind a tokio mutex
//! and a second concurrent run is rejected instead of queued. Retrieval only
//! touches the vector index and never waits on a run.
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::Serialize;
use tokio::sync::Mutex as TokioMutex;
use tracing::{info, warn};

use crate::chunker::TextSplitter;
use crate::config::Config;
use crate::embedder;
use crate::index::{SqliteVecIndex, VectorIndex};
use crate::ledger::{Ledger, LedgerStats};
use crate::loader::LoaderRegistry;
use crate::retriever::{RetrieveError, Retrieval, Retriever};
use crate::sync::{NotReady, Reconciler, SyncError, SyncReport};

/// Ledger and index totals.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct KnowledgeBaseStats {
    pub ledger: LedgerStats,
    pub index_entries: usize,
}

/// Result of comparing ledger chunk records with index entries.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Consistency {
    /// Ids recorded in the ledger but absent from the index.
    pub missing_from_index: BTreeSet<String>,
    /// Ids in the index that no ledger record owns.
    pub untracked_in_index: BTreeSet<String>,
}

impl Consistency {
    pub fn is_consistent(&self) -> bool {
        self.missing_from_index.is_empty() && self.untracked_in_index.is_empty()
    }
}

pub struct KnowledgeBase {
    documents_dir: PathBuf,
    ledger: Arc<TokioMutex<Ledger>>,
    reconciler: Arc<Reconciler>,
    retriever: Retriever,
    index: Arc<dyn VectorIndex>,
}

impl KnowledgeBase {
    /// Build a knowledge base from configuration: the embedder, the
    /// sqlite-vec index and the ledger both under `index_dir`.
    pub fn open(config: &Config) -> Result<Self, SyncError> {
        let index_dir = config.index_path();
        std::fs::create_dir_all(&index_dir).map_err(|e| {
            NotReady::IndexUnavailable(format!("{}: {e}", index_dir.display()))
        })?;

        let embedder = embedder::from_config(&config.embedding)
            .map_err(|e| NotReady::IndexUnavailable(e.to_string()))?;
        let index = SqliteVecIndex::open(&index_dir, embedder)
            .map_err(|e| NotReady::IndexUnavailable(e.to_string()))?;
        let ledger = Ledger::open(config.ledger_path())?;
        let splitter = TextSplitter::new(config.chunk_size, config.chunk_overlap)
            .map_err(|e| NotReady::IndexUnavailable(e.to_string()))?;

        Ok(Self::with_parts(
            config.documents_path(),
            ledger,
            Arc::new(index),
            LoaderRegistry::default(),
            splitter,
        ))
    }

    /// Assemble a knowledge base from already constructed parts.
    pub fn with_parts(
        documents_dir: impl Into<PathBuf>,
        ledger: Ledger,
        index: Arc<dyn VectorIndex>,
        loaders: LoaderRegistry,
        splitter: TextSplitter,
    ) -> Self {
        Self {
            documents_dir: documents_dir.into(),
            ledger: Arc::new(TokioMutex::new(ledger)),
            reconciler: Arc::new(Reconciler::new(index.clone(), loaders, splitter)),
            retriever: Retriever::new(index.clone()),
            index,
        }
    }

    pub fn documents_dir(&self) -> &Path {
        &self.documents_dir
    }

    /// Run one synchronization pass over the document root.
    ///
    /// Returns [`SyncError::Busy`] when another pass is still running.
    pub async fn synchronize(&self, force_rebuild: bool) -> Result<SyncReport, SyncError> {
        let mut ledger = match self.ledger.clone().try_lock_owned() {
            Ok(guard) => guard,
            Err(_) => {
                warn!("Synchronization requested while another run is in progress");
                return Err(SyncError::Busy);
            }
        };

        let reconciler = self.reconciler.clone();
        let root = self.documents_dir.clone();
        tokio::task::spawn_blocking(move || reconciler.synchronize(&mut ledger, &root, force_rebuild))
            .await
            .map_err(|e| SyncError::Worker(e.to_string()))?
    }

    /// Search the index, keeping passages within `max_distance`.
    pub async fn retrieve(
        &self,
        query: &str,
        k: usize,
        max_distance: f64,
    ) -> Result<Retrieval, RetrieveError> {
        let retriever = self.retriever.clone();
        let query = query.to_string();
        tokio::task::spawn_blocking(move || retriever.search(&query, k, max_distance))
            .await
            .map_err(|e| RetrieveError::Worker(e.to_string()))?
    }

    /// Ledger and index totals. Waits for an in-progress run to finish.
    pub async fn stats(&self) -> Result<KnowledgeBaseStats, SyncError> {
        let ledger = self.ledger.lock().await;
        let ledger_stats = ledger.stats()?;
        let index_entries = self
            .index
            .count()
            .map_err(|e| NotReady::IndexUnavailable(e.to_string()))?;
        Ok(KnowledgeBaseStats {
            ledger: ledger_stats,
            index_entries,
        })
    }

    /// Check the ledger's internal invariants and compare its chunk ids with
    /// the ids held by the vector index.
    pub async fn verify(&self) -> Result<Consistency, SyncError> {
        let ledger = self.ledger.lock().await;
        ledger.verify()?;

        let recorded = ledger.all_chunk_ids()?;
        let indexed = self
            .index
            .ids()
            .map_err(|e| NotReady::IndexUnavailable(e.to_string()))?;

        let consistency = Consistency {
            missing_from_index: recorded.difference(&indexed).cloned().collect(),
            untracked_in_index: indexed.difference(&recorded).cloned().collect(),
        };
        if consistency.is_consistent() {
            info!("Ledger and index agree on {} chunks", recorded.len());
        } else {
            warn!(
                "Ledger/index mismatch: {} missing from index, {} untracked in index",
                consistency.missing_from_index.len(),
                consistency.untracked_in_index.len()
            );
        }
        Ok(consistency)
    }

    /// Delete index entries that no ledger record owns, such as chunks left
    /// behind when a run stopped between the index write and the ledger
    /// commit. Returns the number of entries removed.
    ///
    /// Returns [`SyncError::Busy`] while a synchronization pass is running.
    pub async fn repair(&self) -> Result<usize, SyncError> {
        let Ok(ledger) = self.ledger.try_lock() else {
            warn!("Repair requested while a synchronization run is in progress");
            return Err(SyncError::Busy);
        };

        let recorded = ledger.all_chunk_ids()?;
        let indexed = self
            .index
            .ids()
            .map_err(|e| NotReady::IndexUnavailable(e.to_string()))?;
        let untracked: Vec<String> = indexed.difference(&recorded).cloned().collect();
        if untracked.is_empty() {
            return Ok(0);
        }

        let removed = self
            .index
            .delete(&untracked)
            .map_err(|e| NotReady::IndexUnavailable(e.to_string()))?;
        info!("Removed {removed} untracked index entries");
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn config_in(dir: &Path) -> Config {
        Config {
            documents_dir: dir.join("kb").to_string_lossy().into_owned(),
            index_dir: dir.join("index").to_string_lossy().into_owned(),
            ..Config::default()
        }
    }

    #[tokio::test]
    async fn test_open_creates_storage_files() {
        let dir = tempdir().unwrap();
        let config = config_in(dir.path());
        std::fs::create_dir_all(config.documents_path()).unwrap();
        std::fs::write(config.documents_path().join("a.txt"), "hello knowledge base").unwrap();

        let kb = KnowledgeBase::open(&config).unwrap();
        let report = kb.synchronize(false).await.unwrap();
        assert_eq!(report.new, 1);

        assert!(config.ledger_path().is_file());
        assert!(config.index_path().join("vectors.db").is_file());

        let stats = kb.stats().await.unwrap();
        assert_eq!(stats.ledger.file_count, 1);
        assert_eq!(stats.index_entries, stats.ledger.chunk_count);
        assert!(kb.verify().await.unwrap().is_consistent());
    }

    #[tokio::test]
    async fn test_index_dir_blocked_by_file() {
        let dir = tempdir().unwrap();
        let blocker = dir.path().join("index");
        std::fs::write(&blocker, "not a directory").unwrap();

        let config = config_in(dir.path());
        assert!(matches!(
            KnowledgeBase::open(&config),
            Err(SyncError::NotReady(NotReady::IndexUnavailable(_)))
        ));
    }
}
