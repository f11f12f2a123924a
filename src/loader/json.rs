use std::path::Path;

use serde_json::Value;

use super::text::read_text_lossy;
use super::{LoadError, Loader, Section};

/// JSON documents flattened into `path.to.key: value` lines.
pub struct JsonLoader;

fn line(key: &str, value: &str) -> String {
    if key.is_empty() {
        value.to_string()
    } else {
        format!("{key}: {value}")
    }
}

fn flatten(prefix: &str, value: &Value, out: &mut Vec<String>) {
    match value {
        Value::Object(map) => {
            for (key, child) in map {
                let path = if prefix.is_empty() {
                    key.clone()
                } else {
                    format!("{prefix}.{key}")
                };
                flatten(&path, child, out);
            }
        }
        Value::Array(items) => {
            for (i, child) in items.iter().enumerate() {
                flatten(&format!("{prefix}[{i}]"), child, out);
            }
        }
        Value::String(s) => out.push(line(prefix, s)),
        Value::Null => {}
        other => out.push(line(prefix, &other.to_string())),
    }
}

pub fn json_to_text(value: &Value) -> String {
    let mut lines = Vec::new();
    flatten("", value, &mut lines);
    lines.join("\n")
}

impl Loader for JsonLoader {
    fn load(&self, path: &Path) -> Result<Vec<Section>, LoadError> {
        let source = read_text_lossy(path)?;
        let value: Value = serde_json::from_str(&source).map_err(|e| LoadError::parse("json", e))?;
        Ok(vec![Section::new(json_to_text(&value))])
    }
}
