//! Readers for the two clusterable inputs: raw candidates from the generation
//! step, and the curator's one-representative-per-cluster pass.

use anyhow::Result;
use serde_json::{Map, Value};
use std::path::Path;

use super::TextItem;
use crate::error::ValidationError;
use crate::store::read_jsonl_numbered;

/// Rows shaped `{lesson_id, raw, ...}` (`text` accepted in place of `raw`).
/// Candidates are echoed as `{lesson_id, text}`.
pub fn load_candidates(path: &Path, limit: Option<usize>) -> Result<Vec<TextItem>> {
    let mut rows: Vec<(usize, Value)> = read_jsonl_numbered(path)?;
    if let Some(limit) = limit {
        rows.truncate(limit);
    }
    rows.into_iter()
        .map(|(line, row)| -> Result<TextItem> {
            let lesson_id = row
                .get("lesson_id")
                .filter(|v| !v.is_null())
                .cloned()
                .ok_or_else(|| bad_row(line, "missing lesson_id"))?;
            let text = row
                .get("raw")
                .or_else(|| row.get("text"))
                .and_then(Value::as_str)
                .map(str::trim)
                .ok_or_else(|| bad_row(line, "missing raw/text"))?;
            let mut fields = Map::new();
            fields.insert("lesson_id".into(), lesson_id);
            fields.insert("text".into(), Value::String(text.to_string()));
            Ok(TextItem {
                text: text.to_string(),
                fields,
            })
        })
        .collect()
}

/// Rows shaped `{cluster_id, text, ...}` from a human review pass. The prior
/// id is kept only as `old_cluster_id` for traceability.
pub fn load_humanpass(path: &Path) -> Result<Vec<TextItem>> {
    let rows: Vec<(usize, Value)> = read_jsonl_numbered(path)?;
    rows.into_iter()
        .map(|(line, row)| -> Result<TextItem> {
            let old_id = match row.get("cluster_id") {
                None | Some(Value::Null) => return Err(bad_row(line, "missing cluster_id").into()),
                Some(v) => parse_cluster_id(v).ok_or_else(|| bad_row(line, "invalid cluster_id"))?,
            };
            let text = match row.get("text") {
                None | Some(Value::Null) => return Err(bad_row(line, "missing text").into()),
                Some(Value::String(s)) => s.clone(),
                Some(other) => other.to_string(),
            };
            if text.is_empty() {
                return Err(bad_row(line, "empty text").into());
            }
            let mut fields = Map::new();
            fields.insert("old_cluster_id".into(), Value::from(old_id));
            fields.insert("text".into(), Value::String(text.clone()));
            Ok(TextItem { text, fields })
        })
        .collect()
}

/// Accepts integers and integer-valued strings.
pub fn parse_cluster_id(v: &Value) -> Option<i64> {
    match v {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn bad_row(line: usize, message: &str) -> ValidationError {
    ValidationError::BadRow {
        line,
        message: message.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn write(dir: &tempfile::TempDir, name: &str, body: &str) -> std::path::PathBuf {
        let path = dir.path().join(name);
        std::fs::write(&path, body).unwrap();
        path
    }

    #[test]
    fn candidates_trim_raw_and_honor_limit() {
        let dir = tempfile::tempdir().unwrap();
        let path = write(
            &dir,
            "candidates.jsonl",
            concat!(
                "{\"lesson_id\":\"a1\",\"unit\":{\"chapter\":2,\"start\":47,\"end\":48},\"raw\":\"  Act without clinging. \"}\n",
                "{\"lesson_id\":\"a2\",\"raw\":\"Stay steady.\"}\n",
                "{\"lesson_id\":\"a3\",\"raw\":\"Ignored by limit.\"}\n",
            ),
        );
        let items = load_candidates(&path, Some(2)).unwrap();
        assert_eq!(items.len(), 2);
        assert_eq!(items[0].text, "Act without clinging.");
        assert_eq!(Value::Object(items[0].fields.clone()), json!({"lesson_id": "a1", "text": "Act without clinging."}));
    }

    #[test]
    fn candidate_without_text_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = write(&dir, "c.jsonl", "{\"lesson_id\":\"a1\"}\n");
        let err = load_candidates(&path, None).unwrap_err();
        assert!(format!("{err:#}").contains("line 1: missing raw/text"));
    }

    #[test]
    fn humanpass_accepts_string_ids() {
        let dir = tempfile::tempdir().unwrap();
        let path = write(
            &dir,
            "hp.jsonl",
            "{\"cluster_id\":\"7\",\"text\":\"Be equal in success and failure.\"}\n",
        );
        let items = load_humanpass(&path).unwrap();
        assert_eq!(items[0].fields["old_cluster_id"], json!(7));
    }

    #[test]
    fn humanpass_rejects_empty_text_with_line_number() {
        let dir = tempfile::tempdir().unwrap();
        let path = write(
            &dir,
            "hp.jsonl",
            "{\"cluster_id\":1,\"text\":\"ok\"}\n\n{\"cluster_id\":2,\"text\":\"\"}\n",
        );
        let err = load_humanpass(&path).unwrap_err();
        assert!(format!("{err:#}").contains("line 3: empty text"));
    }

    #[test]
    fn humanpass_rejects_missing_cluster_id() {
        let dir = tempfile::tempdir().unwrap();
        let path = write(&dir, "hp.jsonl", "{\"text\":\"orphan\"}\n");
        let err = load_humanpass(&path).unwrap_err();
        assert!(format!("{err:#}").contains("missing cluster_id"));
    }
}
