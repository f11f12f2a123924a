use std::path::Path;

use pulldown_cmark::{Event, Parser, TagEnd};

use super::text::read_text_lossy;
use super::{LoadError, Loader, Section};

/// Markdown with the markup stripped: headings, paragraphs, list items and
/// code blocks become plain lines.
pub struct MarkdownLoader;

pub fn markdown_to_text(source: &str) -> String {
    let mut out = String::with_capacity(source.len());

    for event in Parser::new(source) {
        match event {
            Event::Text(text) | Event::Code(text) => out.push_str(&text),
            Event::SoftBreak => out.push(' '),
            Event::HardBreak => out.push('\n'),
            Event::End(
                TagEnd::Paragraph
                | TagEnd::Heading(_)
                | TagEnd::Item
                | TagEnd::CodeBlock
                | TagEnd::TableRow
                | TagEnd::TableHead,
            ) => out.push_str("\n\n"),
            Event::End(TagEnd::TableCell) => out.push(' '),
            _ => {}
        }
    }

    out.trim().to_string()
}

impl Loader for MarkdownLoader {
    fn load(&self, path: &Path) -> Result<Vec<Section>, LoadError> {
        let source = read_text_lossy(path)?;
        Ok(vec![Section::new(markdown_to_text(&source))])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strips_markup() {
        let text = markdown_to_text("# Title\n\nSome **bold** and `code`.\n\n- one\n- two");
        assert!(text.starts_with("Title"));
        assert!(text.contains("Some bold and code."));
        assert!(text.contains("one"));
        assert!(!text.contains('#'));
        assert!(!text.contains("**"));
    }

    #[test]
    fn test_blocks_separated_by_blank_line() {
        let text = markdown_to_text("# A\n\nParagraph");
        assert_eq!(text, "A\n\nParagraph");
    }
}
