use std::path::Path;

use super::{LoadError, Loader, Section};

/// CSV files, one section per data row rendered as `header: value` lines.
/// The `row` metadata key is the zero-based data row index.
pub struct CsvLoader;

impl Loader for CsvLoader {
    fn load(&self, path: &Path) -> Result<Vec<Section>, LoadError> {
        let mut reader = ::csv::ReaderBuilder::new()
            .flexible(true)
            .from_path(path)
            .map_err(|e| LoadError::parse("csv", e))?;
        let headers = reader
            .headers()
            .map_err(|e| LoadError::parse("csv", e))?
            .clone();

        let mut sections = Vec::new();
        for (row, record) in reader.records().enumerate() {
            let record = record.map_err(|e| LoadError::parse("csv", e))?;
            let lines: Vec<String> = headers
                .iter()
                .zip(record.iter())
                .map(|(header, value)| format!("{}: {}", header.trim(), value.trim()))
                .collect();
            sections.push(Section::new(lines.join("\n")).with("row", row));
        }
        Ok(sections)
    }
}
