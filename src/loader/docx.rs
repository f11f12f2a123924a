use std::fs;
use std::path::Path;

use docx_rs::{DocumentChild, Paragraph, ParagraphChild, RunChild};

use super::{LoadError, Loader, Section};

/// Word documents: the text of every body paragraph, one per line.
pub struct DocxLoader;

fn paragraph_text(paragraph: &Paragraph) -> String {
    let mut out = String::new();
    for child in &paragraph.children {
        if let ParagraphChild::Run(run) = child {
            for run_child in &run.children {
                match run_child {
                    RunChild::Text(text) => out.push_str(&text.text),
                    RunChild::Tab(_) => out.push('\t'),
                    RunChild::Break(_) => out.push('\n'),
                    _ => {}
                }
            }
        }
    }
    out
}

impl Loader for DocxLoader {
    fn load(&self, path: &Path) -> Result<Vec<Section>, LoadError> {
        let bytes = fs::read(path)?;
        let docx = docx_rs::read_docx(&bytes).map_err(|e| LoadError::parse("docx", e))?;

        let lines: Vec<String> = docx
            .document
            .children
            .iter()
            .filter_map(|child| match child {
                DocumentChild::Paragraph(p) => Some(paragraph_text(p)),
                _ => None,
            })
            .collect();

        Ok(vec![Section::new(lines.join("\n"))])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use docx_rs::{Docx, Run};
    use tempfile::tempdir;

    #[test]
    fn test_reads_paragraphs() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("memo.docx");
        let file = fs::File::create(&path).unwrap();
        Docx::new()
            .add_paragraph(Paragraph::new().add_run(Run::new().add_text("Quarterly targets")))
            .add_paragraph(Paragraph::new().add_run(Run::new().add_text("Renewals first")))
            .build()
            .pack(file)
            .unwrap();

        let sections = DocxLoader.load(&path).unwrap();
        assert_eq!(sections.len(), 1);
        assert!(sections[0].content.contains("Quarterly targets"));
        assert!(sections[0].content.contains("Renewals first"));
    }

    #[test]
    fn test_not_a_docx() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("fake.docx");
        fs::write(&path, "plain bytes").unwrap();
        assert!(matches!(
            DocxLoader.load(&path),
            Err(LoadError::Parse { format: "docx", .. })
        ));
    }
}
