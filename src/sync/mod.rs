//! Differential synchronization between the document root, the ledger and
//! the vector index.
//!
//! A run scans the root, classifies every path against the ledger and only
//! touches the vector index for files that were added, modified or removed.
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use serde::Serialize;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::chunker::TextSplitter;
use crate::index::{IndexEntry, IndexError, VectorIndex};
use crate::ledger::{Ledger, LedgerError, chunk_id};
use crate::loader::{LoadError, LoaderRegistry, extension_of};

pub mod scan;

pub use scan::{ScanResult, ScannedFile, path_key, scan_documents};

/// Conditions under which a run cannot start at all.
#[derive(Error, Debug)]
pub enum NotReady {
    #[error("document root {0} does not exist (it has been created; add documents and retry)")]
    DocumentRootMissing(PathBuf),

    #[error("document root {0} is not a directory")]
    NotADirectory(PathBuf),

    #[error("vector index unavailable: {0}")]
    IndexUnavailable(String),
}

#[derive(Error, Debug)]
pub enum SyncError {
    #[error(transparent)]
    NotReady(#[from] NotReady),

    #[error(transparent)]
    Ledger(#[from] LedgerError),

    #[error("failed to clear vector index for rebuild: {0}")]
    Rebuild(#[source] IndexError),

    #[error("a synchronization run is already in progress")]
    Busy,

    #[error("synchronization worker failed: {0}")]
    Worker(String),
}

/// Per-file failures. Everything except `Ledger` is isolated to the file.
#[derive(Error, Debug)]
enum FileError {
    #[error(transparent)]
    Load(#[from] LoadError),

    #[error(transparent)]
    Index(#[from] IndexError),

    #[error(transparent)]
    Ledger(#[from] LedgerError),
}

enum Ingested {
    Stored(usize),
    Empty,
    NoLoader,
}

/// Summary of one synchronization run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SyncReport {
    /// Readable supported files found under the root.
    pub total: usize,
    pub new: usize,
    pub changed: usize,
    pub deleted: usize,
    pub unchanged: usize,
    /// Paths whose state could not be determined this run.
    pub unreadable: usize,
    /// Files skipped because of a load or index failure.
    pub failed: usize,
    /// Ledger totals after the run.
    pub files: usize,
    pub chunks: usize,
    pub rebuilt: bool,
}

impl SyncReport {
    /// True when the run found nothing to do.
    pub fn is_noop(&self) -> bool {
        self.new == 0 && self.changed == 0 && self.deleted == 0 && !self.rebuilt
    }
}

/// Paths grouped by what a run has to do with them.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ChangeSet {
    pub new: Vec<String>,
    pub changed: Vec<String>,
    pub deleted: Vec<String>,
    pub unchanged: usize,
    /// Tracked paths that could not be read; left untouched.
    pub unknown: Vec<String>,
}

impl ChangeSet {
    /// Diff a scan against the stored `path -> hash` map.
    pub fn classify(scan: &ScanResult, stored: &BTreeMap<String, String>) -> Self {
        let mut changes = ChangeSet::default();

        for (path, file) in &scan.files {
            match stored.get(path) {
                None => changes.new.push(path.clone()),
                Some(previous) if *previous == file.hash => changes.unchanged += 1,
                Some(_) => changes.changed.push(path.clone()),
            }
        }

        for path in stored.keys() {
            if scan.files.contains_key(path) {
                continue;
            }
            if scan.is_unknown(path) {
                changes.unknown.push(path.clone());
            } else {
                changes.deleted.push(path.clone());
            }
        }

        changes
    }

    pub fn is_empty(&self) -> bool {
        self.new.is_empty() && self.changed.is_empty() && self.deleted.is_empty()
    }
}

/// Resolve the document root, creating it when missing.
fn prepare_root(root: &Path) -> Result<PathBuf, NotReady> {
    let root = std::path::absolute(root)
        .map_err(|_| NotReady::DocumentRootMissing(root.to_path_buf()))?;

    if !root.exists() {
        warn!("Document root {} not found, creating it", root.display());
        if let Err(e) = std::fs::create_dir_all(&root) {
            warn!("Could not create {}: {}", root.display(), e);
        }
        return Err(NotReady::DocumentRootMissing(root));
    }
    if !root.is_dir() {
        return Err(NotReady::NotADirectory(root));
    }
    Ok(root)
}

pub struct Reconciler {
    index: Arc<dyn VectorIndex>,
    loaders: LoaderRegistry,
    splitter: TextSplitter,
}

impl Reconciler {
    pub fn new(index: Arc<dyn VectorIndex>, loaders: LoaderRegistry, splitter: TextSplitter) -> Self {
        Self {
            index,
            loaders,
            splitter,
        }
    }

    /// Bring the ledger and vector index in line with the files under `root`.
    ///
    /// With `force_rebuild` the index and ledger are wiped first and every
    /// file is ingested as new.
    pub fn synchronize(
        &self,
        ledger: &mut Ledger,
        root: &Path,
        force_rebuild: bool,
    ) -> Result<SyncReport, SyncError> {
        let started = Instant::now();
        let root = prepare_root(root)?;

        if force_rebuild {
            info!("Force rebuild: clearing vector index and ledger");
            self.index.clear().map_err(SyncError::Rebuild)?;
            ledger.clear()?;
        }

        let scan = scan_documents(&root);
        let report = self.apply(ledger, &scan, force_rebuild)?;

        info!(
            "Sync of {} finished in {:.2?}: {} new, {} changed, {} deleted, {} unchanged, {} failed",
            root.display(),
            started.elapsed(),
            report.new,
            report.changed,
            report.deleted,
            report.unchanged,
            report.failed
        );
        Ok(report)
    }

    /// Reconcile the ledger and index against an already computed scan.
    pub(crate) fn apply(
        &self,
        ledger: &mut Ledger,
        scan: &ScanResult,
        rebuilt: bool,
    ) -> Result<SyncReport, SyncError> {
        let mut stored = BTreeMap::new();
        for path in ledger.tracked_files()? {
            if let Some(hash) = ledger.stored_hash(&path)? {
                stored.insert(path, hash);
            }
        }

        let changes = ChangeSet::classify(scan, &stored);
        let mut report = SyncReport {
            total: scan.files.len(),
            new: changes.new.len(),
            changed: changes.changed.len(),
            deleted: changes.deleted.len(),
            unchanged: changes.unchanged,
            unreadable: scan.unreadable.len(),
            rebuilt,
            ..SyncReport::default()
        };

        for path in &changes.unknown {
            warn!("{}: unreadable this run, keeping its indexed state", path);
        }

        if changes.is_empty() {
            debug!("No changes detected");
            let stats = ledger.stats()?;
            report.files = stats.file_count;
            report.chunks = stats.chunk_count;
            return Ok(report);
        }

        for path in &changes.deleted {
            if !self.remove_deleted(ledger, path)? {
                report.failed += 1;
            }
        }

        for path in &changes.changed {
            let stale = ledger.chunk_ids(path)?;
            if let Err(e) = self.index.delete(&stale) {
                warn!("{}: failed to remove stale chunks, skipping: {}", path, e);
                report.failed += 1;
                continue;
            }
            debug!("{}: removed {} stale chunks", path, stale.len());

            match self.ingest_file(ledger, path, &scan.files[path]) {
                Ok(Ingested::Stored(n)) => debug!("{}: re-ingested {} chunks", path, n),
                Ok(Ingested::Empty) => {
                    info!("{}: no text left, no longer tracked", path);
                    ledger.delete(path)?;
                }
                Ok(Ingested::NoLoader) => {
                    warn!("{}: no loader registered, no longer tracked", path);
                    ledger.delete(path)?;
                }
                Err(FileError::Ledger(e)) => return Err(e.into()),
                Err(e) => {
                    warn!("{}: re-ingestion failed, will retry next run: {}", path, e);
                    report.failed += 1;
                    // Stale chunks are already gone from the index.
                    ledger.delete(path)?;
                }
            }
        }

        for path in &changes.new {
            match self.ingest_file(ledger, path, &scan.files[path]) {
                Ok(Ingested::Stored(n)) => debug!("{}: ingested {} chunks", path, n),
                Ok(Ingested::Empty) => debug!("{}: no text, skipped", path),
                Ok(Ingested::NoLoader) => warn!("{}: no loader registered, skipped", path),
                Err(FileError::Ledger(e)) => return Err(e.into()),
                Err(e) => {
                    warn!("{}: ingestion failed, will retry next run: {}", path, e);
                    report.failed += 1;
                }
            }
        }

        let stats = ledger.stats()?;
        report.files = stats.file_count;
        report.chunks = stats.chunk_count;
        Ok(report)
    }

    /// Remove a vanished file from the index, then from the ledger. Returns
    /// false (leaving the ledger record) when the index refuses the delete.
    fn remove_deleted(&self, ledger: &mut Ledger, path: &str) -> Result<bool, LedgerError> {
        let ids = ledger.chunk_ids(path)?;
        if !ids.is_empty() {
            if let Err(e) = self.index.delete(&ids) {
                warn!("{}: failed to remove chunks of deleted file: {}", path, e);
                return Ok(false);
            }
        }
        ledger.delete(path)?;
        debug!("{}: deleted ({} chunks)", path, ids.len());
        Ok(true)
    }

    /// Load `file` from its real path and record it under the key `path`.
    fn ingest_file(
        &self,
        ledger: &mut Ledger,
        path: &str,
        file: &ScannedFile,
    ) -> Result<Ingested, FileError> {
        let Some(sections) = self.loaders.load(&file.path)? else {
            return Ok(Ingested::NoLoader);
        };

        let chunks = self.splitter.split_sections(&sections);
        if chunks.is_empty() {
            return Ok(Ingested::Empty);
        }

        let ids: Vec<String> = chunks.iter().map(|c| chunk_id(path, c.position)).collect();
        let entries: Vec<IndexEntry> = chunks
            .into_iter()
            .zip(&ids)
            .map(|(chunk, id)| {
                let mut metadata = chunk.metadata;
                metadata.insert("ordinal".to_string(), chunk.position.to_string());
                IndexEntry {
                    id: id.clone(),
                    text: chunk.content,
                    metadata,
                }
            })
            .collect();

        if let Err(e) = self.index.upsert(&entries) {
            self.discard(&ids);
            return Err(e.into());
        }

        let file_type = extension_of(&file.path).unwrap_or_default();
        if let Err(e) = ledger.store(path, &file.hash, &ids, &file_type) {
            self.discard(&ids);
            return Err(e.into());
        }
        Ok(Ingested::Stored(ids.len()))
    }

    /// Best-effort removal of entries the ledger will not record.
    fn discard(&self, ids: &[String]) {
        if let Err(e) = self.index.delete(ids) {
            warn!("Failed to discard {} unrecorded chunks: {}", ids.len(), e);
        }
    }
}
