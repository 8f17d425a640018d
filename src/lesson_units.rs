//! Which verses each indexed lesson came from.
//!
//! A curated lesson traces back through the human pass to the first-pass
//! cluster it represents (`old_cluster_id`), that cluster lists the candidate
//! lessons it grouped, and each candidate carries the verse span it was
//! generated from. The result is aligned with the lesson index by position.

use anyhow::{Result, bail};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::Path;
use tracing::{info, warn};

use crate::cluster::input::parse_cluster_id;
use crate::store::read_jsonl;
use crate::verse_map::{LessonUnits, VerseSpan};

/// One human-pass row, reduced to what the mapping needs.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PassRow {
    pub old_cluster_id: Option<i64>,
    pub text: Option<String>,
}

/// Lesson ids accept strings and numbers.
fn id_key(v: &Value) -> Option<String> {
    match v {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

pub fn load_pass(path: &Path) -> Result<Vec<PassRow>> {
    let rows: Vec<Value> = read_jsonl(path)?;
    Ok(rows
        .iter()
        .map(|row| PassRow {
            old_cluster_id: row.get("old_cluster_id").and_then(parse_cluster_id),
            text: row.get("text").and_then(Value::as_str).map(str::to_string),
        })
        .collect())
}

/// First-pass cluster id → member lesson ids. Rows may list
/// `member_lesson_ids` directly or carry candidates with a `lesson_id`.
pub fn load_cluster_members(path: &Path) -> Result<BTreeMap<i64, Vec<String>>> {
    let rows: Vec<Value> = read_jsonl(path)?;
    let mut out = BTreeMap::new();
    for row in &rows {
        let Some(cid) = row.get("cluster_id").and_then(parse_cluster_id) else {
            continue;
        };
        let ids: Vec<String> = match row.get("member_lesson_ids").and_then(Value::as_array) {
            Some(ids) => ids.iter().filter_map(id_key).collect(),
            None => row
                .get("candidates")
                .and_then(Value::as_array)
                .map(|cands| cands.iter().filter_map(|c| c.get("lesson_id").and_then(id_key)).collect())
                .unwrap_or_default(),
        };
        out.insert(cid, ids);
    }
    if out.is_empty() {
        bail!("{}: no clusters found", path.display());
    }
    Ok(out)
}

/// Candidate lesson id → the verse spans it was generated from. Rows without
/// an id or a well-formed `unit` are skipped.
pub fn load_candidate_units(path: &Path) -> Result<HashMap<String, Vec<VerseSpan>>> {
    let rows: Vec<Value> = read_jsonl(path)?;
    let mut out: HashMap<String, Vec<VerseSpan>> = HashMap::new();
    for row in &rows {
        let Some(id) = row.get("lesson_id").and_then(id_key) else {
            continue;
        };
        let Some(span) = row
            .get("unit")
            .and_then(|u| serde_json::from_value::<VerseSpan>(u.clone()).ok())
        else {
            continue;
        };
        out.entry(id).or_default().push(span);
    }
    if out.is_empty() {
        bail!("{}: no candidates with verse units", path.display());
    }
    Ok(out)
}

fn normalize_whitespace(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// The first-pass cluster behind each indexed lesson.
///
/// When the index and the human-pass rows with text have the same length,
/// they are paired by position. Otherwise each lesson is looked up by its
/// whitespace-normalized text; lessons with no match get `None`.
pub fn align(texts: &[String], pass: &[PassRow]) -> Vec<Option<i64>> {
    let with_text: Vec<&PassRow> = pass.iter().filter(|r| r.text.is_some()).collect();
    if with_text.len() == texts.len() {
        return with_text.iter().map(|r| r.old_cluster_id).collect();
    }

    warn!(
        lessons = texts.len(),
        pass_rows = with_text.len(),
        "index and human pass differ in length; matching by text"
    );
    let mut by_text: HashMap<String, Option<i64>> = HashMap::new();
    for r in &with_text {
        let key = normalize_whitespace(r.text.as_deref().unwrap_or_default());
        if !key.is_empty() {
            by_text.entry(key).or_insert(r.old_cluster_id);
        }
    }
    let mut misses = 0;
    let aligned: Vec<Option<i64>> = texts
        .iter()
        .map(|t| match by_text.get(&normalize_whitespace(t)) {
            Some(&cid) => cid,
            None => {
                misses += 1;
                None
            }
        })
        .collect();
    if misses > 0 {
        warn!(misses, "lessons not found in the human pass by text");
    }
    aligned
}

/// Spans in first-seen order, exact repeats removed.
pub fn dedupe_spans(spans: impl IntoIterator<Item = VerseSpan>) -> Vec<VerseSpan> {
    let mut seen = HashSet::new();
    spans.into_iter().filter(|s| seen.insert(*s)).collect()
}

/// One entry per indexed lesson, in index order.
pub fn build(
    texts: &[String],
    pass: &[PassRow],
    members: &BTreeMap<i64, Vec<String>>,
    units: &HashMap<String, Vec<VerseSpan>>,
) -> Vec<LessonUnits> {
    let out: Vec<LessonUnits> = align(texts, pass)
        .into_iter()
        .map(|old_cluster_id| {
            let spans = old_cluster_id
                .and_then(|cid| members.get(&cid))
                .into_iter()
                .flatten()
                .flat_map(|lid| units.get(lid).into_iter().flatten().copied());
            LessonUnits {
                old_cluster_id,
                units: dedupe_spans(spans),
            }
        })
        .collect();
    let unmapped = out.iter().filter(|l| l.units.is_empty()).count();
    info!(lessons = out.len(), unmapped, "mapped lessons to verse units");
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn span(chapter: u32, start: u32, end: u32) -> VerseSpan {
        VerseSpan { chapter, start, end }
    }

    fn row(cid: Option<i64>, text: Option<&str>) -> PassRow {
        PassRow {
            old_cluster_id: cid,
            text: text.map(str::to_string),
        }
    }

    fn fixtures() -> (BTreeMap<i64, Vec<String>>, HashMap<String, Vec<VerseSpan>>) {
        let members = BTreeMap::from([
            (3, vec!["L1".to_string(), "L2".to_string()]),
            (8, vec!["L3".to_string()]),
        ]);
        let units = HashMap::from([
            ("L1".to_string(), vec![span(2, 47, 47)]),
            ("L2".to_string(), vec![span(2, 47, 47), span(3, 19, 20)]),
            ("L3".to_string(), vec![span(6, 5, 5)]),
        ]);
        (members, units)
    }

    #[test]
    fn equal_lengths_align_by_position() {
        let texts = vec!["Work is worship".to_string(), "Lift yourself".to_string()];
        let pass = vec![row(Some(3), Some("a")), row(Some(99), None), row(Some(8), Some("b"))];
        assert_eq!(align(&texts, &pass), vec![Some(3), Some(8)]);
    }

    #[test]
    fn length_mismatch_falls_back_to_text() {
        let texts = vec!["Lift  yourself".to_string(), "Unknown".to_string()];
        let pass = vec![
            row(Some(3), Some("Work is worship")),
            row(Some(8), Some(" Lift yourself ")),
            row(Some(9), Some("Lift yourself")),
        ];
        assert_eq!(align(&texts, &pass), vec![Some(8), None]);
    }

    #[test]
    fn spans_gathered_from_cluster_members_and_deduped() {
        let (members, units) = fixtures();
        let texts = vec!["a".to_string(), "b".to_string(), "c".to_string()];
        let pass = vec![row(Some(3), Some("a")), row(Some(8), Some("b")), row(None, Some("c"))];
        let out = build(&texts, &pass, &members, &units);

        assert_eq!(out.len(), 3);
        assert_eq!(out[0].old_cluster_id, Some(3));
        assert_eq!(out[0].units, vec![span(2, 47, 47), span(3, 19, 20)]);
        assert_eq!(out[1].units, vec![span(6, 5, 5)]);
        assert_eq!(out[2], LessonUnits { old_cluster_id: None, units: vec![] });
    }

    #[test]
    fn loaders_read_both_cluster_shapes_and_skip_bad_units() {
        let dir = tempfile::tempdir().unwrap();
        let clusters = dir.path().join("clusters.jsonl");
        std::fs::write(
            &clusters,
            concat!(
                "{\"cluster_id\": 0, \"member_lesson_ids\": [\"L1\", \"L2\"]}\n",
                "{\"cluster_id\": \"1\", \"candidates\": [{\"lesson_id\": \"L3\", \"text\": \"x\"}]}\n",
                "{\"text\": \"no id\"}\n",
            ),
        )
        .unwrap();
        let members = load_cluster_members(&clusters).unwrap();
        assert_eq!(members[&0], vec!["L1", "L2"]);
        assert_eq!(members[&1], vec!["L3"]);
        assert_eq!(members.len(), 2);

        let candidates = dir.path().join("candidates.jsonl");
        std::fs::write(
            &candidates,
            concat!(
                "{\"lesson_id\": \"L1\", \"unit\": {\"chapter\": 2, \"start\": 47, \"end\": 48}}\n",
                "{\"lesson_id\": \"L2\", \"unit\": {\"chapter\": 2}}\n",
                "{\"lesson_id\": \"L3\"}\n",
            ),
        )
        .unwrap();
        let units = load_candidate_units(&candidates).unwrap();
        assert_eq!(units.len(), 1);
        assert_eq!(units["L1"], vec![span(2, 47, 48)]);
    }

    #[test]
    fn no_clusters_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("empty.jsonl");
        std::fs::write(&path, "\n").unwrap();
        assert!(load_cluster_members(&path).is_err());
    }
}
