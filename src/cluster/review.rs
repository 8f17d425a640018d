//! One clusters file rendered for a curator: each cluster's distinct texts
//! with how many candidates repeat them and which lessons they came from.

use serde_json::{Map, Value};
use std::collections::{BTreeMap, HashMap};
use std::fmt::Write;

use super::ClusterRecord;

#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum ReviewFormat {
    Md,
    Txt,
    Csv,
}

impl ReviewFormat {
    pub fn extension(self) -> &'static str {
        match self {
            Self::Md => "md",
            Self::Txt => "txt",
            Self::Csv => "csv",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct TextGroup {
    pub text: String,
    pub lesson_ids: Vec<String>,
}

fn field(cand: &Map<String, Value>, key: &str) -> String {
    match cand.get(key) {
        None | Some(Value::Null) => String::new(),
        Some(Value::String(s)) => s.clone(),
        Some(other) => other.to_string(),
    }
}

/// Candidates of all records, keyed by cluster id. Repeated ids are joined.
fn by_cluster(records: &[ClusterRecord]) -> BTreeMap<i64, Vec<&Map<String, Value>>> {
    let mut out: BTreeMap<i64, Vec<&Map<String, Value>>> = BTreeMap::new();
    for r in records {
        out.entry(r.cluster_id).or_default().extend(r.candidates.iter());
    }
    out
}

/// Identical texts folded together, sorted case-insensitively.
pub fn group_texts<'a>(candidates: impl IntoIterator<Item = &'a Map<String, Value>>) -> Vec<TextGroup> {
    let mut groups: Vec<TextGroup> = Vec::new();
    let mut slot: HashMap<String, usize> = HashMap::new();
    for cand in candidates {
        let text = field(cand, "text");
        let lesson_id = field(cand, "lesson_id");
        match slot.get(&text) {
            Some(&i) => groups[i].lesson_ids.push(lesson_id),
            None => {
                slot.insert(text.clone(), groups.len());
                groups.push(TextGroup { text, lesson_ids: vec![lesson_id] });
            }
        }
    }
    groups.sort_by_cached_key(|g| g.text.to_lowercase());
    groups
}

fn repeat_suffix(n: usize) -> String {
    if n > 1 { format!(" (x{n})") } else { String::new() }
}

pub fn render_markdown(records: &[ClusterRecord]) -> String {
    let mut out = String::from("## Clusters Review\n\n");
    for (cid, cands) in by_cluster(records) {
        let groups = group_texts(cands.iter().copied());
        let _ = writeln!(
            out,
            "### Cluster {cid} (unique texts: {}, total candidates: {})",
            groups.len(),
            cands.len()
        );
        for g in &groups {
            let _ = writeln!(out, "- {}{}", g.text, repeat_suffix(g.lesson_ids.len()));
        }
        out.push('\n');
    }
    finish(out)
}

pub fn render_text(records: &[ClusterRecord]) -> String {
    let mut out = String::new();
    for (cid, cands) in by_cluster(records) {
        let _ = writeln!(out, "Cluster {cid}");
        for g in group_texts(cands.iter().copied()) {
            let _ = writeln!(out, "  - {}{}", g.text, repeat_suffix(g.lesson_ids.len()));
        }
        out.push('\n');
    }
    finish(out)
}

/// Columns `cluster_id,text,count,lesson_ids`; lesson ids are `;`-joined.
pub fn render_csv(records: &[ClusterRecord]) -> String {
    let mut out = String::from("cluster_id,text,count,lesson_ids\n");
    for (cid, cands) in by_cluster(records) {
        for g in group_texts(cands.iter().copied()) {
            let _ = writeln!(
                out,
                "{cid},{},{},{}",
                csv_field(&g.text),
                g.lesson_ids.len(),
                csv_field(&g.lesson_ids.join(";"))
            );
        }
    }
    out
}

pub fn render(records: &[ClusterRecord], format: ReviewFormat) -> String {
    match format {
        ReviewFormat::Md => render_markdown(records),
        ReviewFormat::Txt => render_text(records),
        ReviewFormat::Csv => render_csv(records),
    }
}

fn csv_field(s: &str) -> String {
    if s.contains([',', '"', '\n', '\r']) {
        format!("\"{}\"", s.replace('"', "\"\""))
    } else {
        s.to_string()
    }
}

fn finish(mut out: String) -> String {
    let trimmed = out.trim_end().len();
    out.truncate(trimmed);
    out.push('\n');
    out
}
