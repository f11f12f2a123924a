//! Document root scan: walk, filter by extension, hash in parallel.
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

use ignore::WalkBuilder;
use rayon::prelude::*;
use tracing::{debug, warn};

use crate::hasher::hash_file;
use crate::loader::is_supported;

/// Normalized key under which a path is tracked.
pub fn path_key(path: &Path) -> String {
    path.to_string_lossy().replace('\\', "/")
}

/// A readable file found by the scan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScannedFile {
    /// Real path on disk. The key may be a lossy rendering of it.
    pub path: PathBuf,
    pub hash: String,
}

/// What a scan found. Lives for one run only.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ScanResult {
    /// Path key to file for every readable supported file.
    pub files: BTreeMap<String, ScannedFile>,
    /// Files that failed hashing and directories that could not be listed.
    pub unreadable: BTreeSet<String>,
}

impl ScanResult {
    /// Whether the state of `path` could not be determined this run, either
    /// because it was unreadable itself or because a parent directory was.
    pub fn is_unknown(&self, path: &str) -> bool {
        if self.unreadable.contains(path) {
            return true;
        }
        let path = Path::new(path);
        self.unreadable
            .iter()
            .any(|dir| path.starts_with(Path::new(dir)))
    }
}

fn error_path(err: &ignore::Error) -> Option<&Path> {
    match err {
        ignore::Error::WithPath { path, .. } => Some(path.as_path()),
        ignore::Error::WithDepth { err, .. } | ignore::Error::WithLineNumber { err, .. } => {
            error_path(err)
        }
        ignore::Error::Loop { child, .. } => Some(child.as_path()),
        _ => None,
    }
}

/// Walk `root` recursively and hash every supported file.
///
/// Hidden files are included, ignore files are not honoured and symbolic
/// links are followed: the document root is taken as-is.
pub fn scan_documents(root: &Path) -> ScanResult {
    let mut result = ScanResult::default();
    let mut candidates: BTreeMap<String, Vec<PathBuf>> = BTreeMap::new();

    let walker = WalkBuilder::new(root)
        .standard_filters(false)
        .follow_links(true)
        .build();
    for entry in walker {
        match entry {
            Ok(entry) => {
                let is_file = entry.file_type().is_some_and(|t| t.is_file());
                if is_file && is_supported(entry.path()) {
                    let path = entry.into_path();
                    candidates.entry(path_key(&path)).or_default().push(path);
                }
            }
            Err(err) => {
                warn!("Scan error: {}", err);
                match error_path(&err) {
                    Some(path) => {
                        result.unreadable.insert(path_key(path));
                    }
                    // Without a path the whole root is suspect.
                    None => {
                        result.unreadable.insert(path_key(root));
                    }
                }
            }
        }
    }

    // Names that are not valid UTF-8 can render to the same key.
    let mut unique: Vec<(String, PathBuf)> = Vec::with_capacity(candidates.len());
    for (key, mut paths) in candidates {
        match paths.pop() {
            Some(path) if paths.is_empty() => unique.push((key, path)),
            _ => {
                warn!("{}: several files share this name after decoding, skipping them", key);
                result.unreadable.insert(key);
            }
        }
    }

    let hashed: Vec<(String, PathBuf, std::io::Result<String>)> = unique
        .into_par_iter()
        .map(|(key, path)| {
            let hash = hash_file(&path);
            (key, path, hash)
        })
        .collect();

    for (key, path, hash) in hashed {
        match hash {
            Ok(hash) => {
                result.files.insert(key, ScannedFile { path, hash });
            }
            Err(e) => {
                warn!("Failed to hash {}: {}", key, e);
                result.unreadable.insert(key);
            }
        }
    }

    debug!(
        "Scanned {}: {} files, {} unreadable",
        root.display(),
        result.files.len(),
        result.unreadable.len()
    );
    result
}
