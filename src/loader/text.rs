use std::fs;
use std::path::Path;

use tracing::debug;

use super::{LoadError, Loader, Section};

/// Plain text. Bytes that are not valid UTF-8 are replaced rather than
/// rejected, so legacy-encoded files still load.
pub struct TextLoader;

pub(crate) fn read_text_lossy(path: &Path) -> Result<String, LoadError> {
    let bytes = fs::read(path)?;
    match String::from_utf8(bytes) {
        Ok(text) => Ok(text),
        Err(e) => {
            debug!("{} is not valid UTF-8, decoding lossily", path.display());
            Ok(String::from_utf8_lossy(e.as_bytes()).into_owned())
        }
    }
}

impl Loader for TextLoader {
    fn load(&self, path: &Path) -> Result<Vec<Section>, LoadError> {
        Ok(vec![Section::new(read_text_lossy(path)?)])
    }
}
