use std::path::Path;

use scraper::Html;

use super::text::read_text_lossy;
use super::{LoadError, Loader, Section};

/// HTML pages reduced to their visible text, one text node per line.
pub struct HtmlLoader;

const HIDDEN_ELEMENTS: &[&str] = &["script", "style", "noscript", "template"];

pub fn html_to_text(source: &str) -> String {
    let document = Html::parse_document(source);
    let mut lines = Vec::new();

    for node in document.root_element().descendants() {
        let Some(text) = node.value().as_text() else {
            continue;
        };
        let hidden = node.ancestors().any(|ancestor| {
            ancestor
                .value()
                .as_element()
                .is_some_and(|el| HIDDEN_ELEMENTS.contains(&el.name()))
        });
        if hidden {
            continue;
        }
        let normalized = text.split_whitespace().collect::<Vec<_>>().join(" ");
        if !normalized.is_empty() {
            lines.push(normalized);
        }
    }

    lines.join("\n")
}

impl Loader for HtmlLoader {
    fn load(&self, path: &Path) -> Result<Vec<Section>, LoadError> {
        let source = read_text_lossy(path)?;
        Ok(vec![Section::new(html_to_text(&source))])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_visible_text_only() {
        let text = html_to_text(
            r#"<html><head><title>Pricing</title><style>p { color: red }</style></head>
            <body><h1>Plans</h1><p>Starter   costs
            $10.</p><script>var tracking = 1;</script></body></html>"#,
        );
        assert_eq!(text, "Pricing\nPlans\nStarter costs $10.");
    }
}
