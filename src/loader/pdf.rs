use std::path::Path;

use lopdf::Document;
use tracing::debug;

use super::{LoadError, Loader, Section};

/// PDF text, one section per page. The `page` metadata key is zero-based.
pub struct PdfLoader;

impl Loader for PdfLoader {
    fn load(&self, path: &Path) -> Result<Vec<Section>, LoadError> {
        let doc = Document::load(path).map_err(|e| LoadError::parse("pdf", e))?;
        if doc.is_encrypted() {
            return Err(LoadError::parse("pdf", "document is encrypted"));
        }

        let mut sections = Vec::new();
        for (index, page_number) in doc.get_pages().into_keys().enumerate() {
            match doc.extract_text(&[page_number]) {
                Ok(text) if !text.trim().is_empty() => {
                    sections.push(Section::new(text).with("page", index));
                }
                Ok(_) => {}
                Err(e) => debug!("{}: page {page_number} has no extractable text: {e}", path.display()),
            }
        }
        Ok(sections)
    }
}
