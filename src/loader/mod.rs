//! Per-format document loaders.
//!
//! A loader turns a file into one or more text [`Section`]s (PDF pages, CSV
//! rows, or the whole document). The [`LoaderRegistry`] selects a loader by
//! file extension.
use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::sync::Arc;

use thiserror::Error;

pub mod csv;
pub mod docx;
pub mod html;
pub mod json;
pub mod markdown;
pub mod pdf;
pub mod text;

/// Extensions the scanner picks up. Matched case-insensitively.
pub const SUPPORTED_EXTENSIONS: &[&str] =
    &["txt", "pdf", "docx", "md", "csv", "json", "html", "htm"];

/// Metadata attached to a section and carried into the vector index.
pub type Metadata = BTreeMap<String, String>;

#[derive(Error, Debug)]
pub enum LoadError {
    #[error("failed to read file: {0}")]
    Io(#[from] std::io::Error),

    #[error("{format} parse failed: {message}")]
    Parse {
        format: &'static str,
        message: String,
    },
}

impl LoadError {
    pub(crate) fn parse(format: &'static str, err: impl std::fmt::Display) -> Self {
        LoadError::Parse {
            format,
            message: err.to_string(),
        }
    }
}

/// A contiguous slice of a loaded document.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Section {
    pub content: String,
    pub metadata: Metadata,
}

impl Section {
    pub fn new(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            metadata: Metadata::new(),
        }
    }

    /// Attach a metadata key.
    #[must_use]
    pub fn with(mut self, key: &str, value: impl ToString) -> Self {
        self.metadata.insert(key.to_string(), value.to_string());
        self
    }
}

/// Trait for format-specific loaders.
pub trait Loader: Send + Sync {
    fn load(&self, path: &Path) -> Result<Vec<Section>, LoadError>;
}

/// Lowercased extension of `path`, if any.
pub fn extension_of(path: &Path) -> Option<String> {
    path.extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase)
}

/// Whether the scanner should consider `path`.
pub fn is_supported(path: &Path) -> bool {
    extension_of(path).is_some_and(|ext| SUPPORTED_EXTENSIONS.contains(&ext.as_str()))
}

/// Maps file extensions to loaders.
#[derive(Clone)]
pub struct LoaderRegistry {
    loaders: HashMap<String, Arc<dyn Loader>>,
}

impl LoaderRegistry {
    /// A registry with no loaders.
    pub fn empty() -> Self {
        Self {
            loaders: HashMap::new(),
        }
    }

    /// Register `loader` for `extension` (without the dot), replacing any
    /// previous registration.
    pub fn register(&mut self, extension: &str, loader: Arc<dyn Loader>) {
        self.loaders
            .insert(extension.to_ascii_lowercase(), loader);
    }

    /// Loader for `path`'s extension.
    pub fn for_path(&self, path: &Path) -> Option<Arc<dyn Loader>> {
        let ext = extension_of(path)?;
        self.loaders.get(&ext).cloned()
    }

    /// Load `path` and tag every section with its `source`.
    ///
    /// Returns `Ok(None)` when no loader is registered for the extension.
    pub fn load(&self, path: &Path) -> Result<Option<Vec<Section>>, LoadError> {
        let Some(loader) = self.for_path(path) else {
            return Ok(None);
        };
        let source = path.to_string_lossy().replace('\\', "/");
        let sections = loader
            .load(path)?
            .into_iter()
            .map(|s| s.with("source", &source))
            .collect();
        Ok(Some(sections))
    }
}

impl Default for LoaderRegistry {
    fn default() -> Self {
        let mut registry = Self::empty();
        let html: Arc<dyn Loader> = Arc::new(html::HtmlLoader);
        registry.register("txt", Arc::new(text::TextLoader));
        registry.register("md", Arc::new(markdown::MarkdownLoader));
        registry.register("pdf", Arc::new(pdf::PdfLoader));
        registry.register("docx", Arc::new(docx::DocxLoader));
        registry.register("csv", Arc::new(csv::CsvLoader));
        registry.register("json", Arc::new(json::JsonLoader));
        registry.register("html", html.clone());
        registry.register("htm", html);
        registry
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn test_is_supported() {
        assert!(is_supported(Path::new("/kb/a.txt")));
        assert!(is_supported(Path::new("/kb/REPORT.PDF")));
        assert!(is_supported(Path::new("/kb/page.htm")));
        assert!(!is_supported(Path::new("/kb/image.png")));
        assert!(!is_supported(Path::new("/kb/Makefile")));
    }

    #[test]
    fn test_default_registry_covers_supported_extensions() {
        let registry = LoaderRegistry::default();
        for ext in SUPPORTED_EXTENSIONS {
            let path = format!("/kb/file.{ext}");
            assert!(
                registry.for_path(Path::new(&path)).is_some(),
                "no loader for {ext}"
            );
        }
    }

    #[test]
    fn test_load_tags_source() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("note.txt");
        fs::write(&path, "hello").unwrap();

        let sections = LoaderRegistry::default().load(&path).unwrap().unwrap();
        assert_eq!(sections.len(), 1);
        assert_eq!(
            sections[0].metadata.get("source").map(String::as_str),
            Some(path.to_string_lossy().replace('\\', "/").as_str())
        );
    }

    #[test]
    fn test_missing_loader_is_none() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("note.txt");
        fs::write(&path, "hello").unwrap();
        assert!(LoaderRegistry::empty().load(&path).unwrap().is_none());
    }
}
