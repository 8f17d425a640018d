use anyhow::{Result, bail};
use serde_json::Value;
use std::path::Path;

use crate::store::read_jsonl;

/// Pull the curated lesson texts out of a human-pass JSONL file, whitespace
/// collapsed, in file order. Rows without text are skipped.
pub fn extract_texts(path: &Path) -> Result<Vec<String>> {
    let rows: Vec<Value> = read_jsonl(path)?;
    let texts: Vec<String> = rows
        .iter()
        .filter_map(|row| match row.get("text")? {
            Value::Null => None,
            Value::String(s) => Some(collapse_whitespace(s)),
            other => Some(collapse_whitespace(&other.to_string())),
        })
        .filter(|t| !t.is_empty() && !t.starts_with('#'))
        .collect();
    if texts.is_empty() {
        bail!("{}: no lessons found (non-null text)", path.display());
    }
    Ok(texts)
}

pub fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// `lessons.txt` body: one lesson per line.
pub fn render(texts: &[String]) -> String {
    let mut out = String::new();
    for t in texts {
        out.push_str(t);
        out.push('\n');
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_and_normalizes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("hp.jsonl");
        std::fs::write(
            &path,
            concat!(
                "{\"cluster_id\":0,\"text\":\"  Act \\n without   fear \"}\n",
                "{\"cluster_id\":1,\"text\":null}\n",
                "{\"cluster_id\":2}\n",
                "{\"cluster_id\":3,\"text\":\"   \"}\n",
                "{\"cluster_id\":4,\"text\":\"Serve others.\"}\n",
            ),
        )
        .unwrap();
        let texts = extract_texts(&path).unwrap();
        assert_eq!(texts, vec!["Act without fear", "Serve others."]);
        assert_eq!(render(&texts), "Act without fear\nServe others.\n");
    }

    #[test]
    fn no_texts_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("hp.jsonl");
        std::fs::write(&path, "{\"cluster_id\":1,\"text\":null}\n").unwrap();
        assert!(extract_texts(&path).is_err());
    }
}
