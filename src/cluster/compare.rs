//! Diff two clusterings of the same corpus and render a Markdown report.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt::Write;

use super::ClusterRecord;

pub struct ClusterDiff {
    pub total_a: usize,
    pub total_b: usize,
    pub both: usize,
    pub only_a: Vec<i64>,
    pub only_b: Vec<i64>,
    /// `(cluster_id, removed, added)` for ids present in both with differing texts.
    pub changed: Vec<(i64, Vec<String>, Vec<String>)>,
    /// `(text, ids in A, ids in B)` where the assignment differs.
    pub moved: Vec<(String, Vec<i64>, Vec<i64>)>,
}

fn texts_by_cluster(records: &[ClusterRecord]) -> BTreeMap<i64, BTreeSet<String>> {
    let mut out: BTreeMap<i64, BTreeSet<String>> = BTreeMap::new();
    for r in records {
        out.entry(r.cluster_id)
            .or_default()
            .extend(r.texts().map(str::to_string));
    }
    out
}

fn clusters_by_text(records: &[ClusterRecord]) -> BTreeMap<String, BTreeSet<i64>> {
    let mut out: BTreeMap<String, BTreeSet<i64>> = BTreeMap::new();
    for r in records {
        for t in r.texts() {
            out.entry(t.to_string()).or_default().insert(r.cluster_id);
        }
    }
    out
}

pub fn diff(a: &[ClusterRecord], b: &[ClusterRecord]) -> ClusterDiff {
    let texts_a = texts_by_cluster(a);
    let texts_b = texts_by_cluster(b);

    let only_a = texts_a.keys().filter(|k| !texts_b.contains_key(*k)).copied().collect();
    let only_b = texts_b.keys().filter(|k| !texts_a.contains_key(*k)).copied().collect();

    let mut both = 0;
    let mut changed = Vec::new();
    for (cid, ta) in &texts_a {
        let Some(tb) = texts_b.get(cid) else { continue };
        both += 1;
        let removed: Vec<String> = ta.difference(tb).cloned().collect();
        let added: Vec<String> = tb.difference(ta).cloned().collect();
        if !removed.is_empty() || !added.is_empty() {
            changed.push((*cid, removed, added));
        }
    }

    let by_text_a = clusters_by_text(a);
    let by_text_b = clusters_by_text(b);
    let all_texts: BTreeSet<&String> = by_text_a.keys().chain(by_text_b.keys()).collect();
    let empty = BTreeSet::new();
    let moved = all_texts
        .into_iter()
        .filter_map(|t| {
            let ca = by_text_a.get(t).unwrap_or(&empty);
            let cb = by_text_b.get(t).unwrap_or(&empty);
            (ca != cb).then(|| (t.clone(), ca.iter().copied().collect(), cb.iter().copied().collect()))
        })
        .collect();

    ClusterDiff {
        total_a: texts_a.len(),
        total_b: texts_b.len(),
        both,
        only_a,
        only_b,
        changed,
        moved,
    }
}

fn fmt_ids(ids: &[i64]) -> String {
    if ids.is_empty() {
        "-".to_string()
    } else {
        format!("{ids:?}")
    }
}

/// Render `diff` as Markdown, listing at most `limit` entries per section.
pub fn render_markdown(name_a: &str, name_b: &str, diff: &ClusterDiff, limit: usize) -> String {
    let added: usize = diff.changed.iter().map(|(_, _, a)| a.len()).sum();
    let removed: usize = diff.changed.iter().map(|(_, r, _)| r.len()).sum();

    let mut out = String::new();
    let _ = writeln!(out, "## Cluster Comparison\n");
    let _ = writeln!(out, "- Comparing: {name_a} (A) vs {name_b} (B)");
    let _ = writeln!(
        out,
        "- Total clusters: A={}, B={}, both={}",
        diff.total_a, diff.total_b, diff.both
    );
    let _ = writeln!(
        out,
        "- Cluster IDs only in A: {}; only in B: {}",
        diff.only_a.len(),
        diff.only_b.len()
    );
    let _ = writeln!(
        out,
        "- Clusters (in both) with text diffs: {} (added={added}, removed={removed})",
        diff.changed.len()
    );
    let _ = writeln!(out, "- Texts with different cluster assignments: {}\n", diff.moved.len());

    for (label, ids) in [("only in A", &diff.only_a), ("only in B", &diff.only_b)] {
        if ids.is_empty() {
            continue;
        }
        let _ = writeln!(out, "### Cluster IDs {label} ({})", ids.len());
        for id in ids.iter().take(limit) {
            let _ = writeln!(out, "- {id}");
        }
        more(&mut out, "", ids.len(), limit, "");
        out.push('\n');
    }

    if !diff.changed.is_empty() {
        let _ = writeln!(
            out,
            "### Clusters present in both with added/removed texts ({})",
            diff.changed.len()
        );
        for (cid, removed, added) in diff.changed.iter().take(limit) {
            let _ = writeln!(out, "- Cluster {cid}");
            for (label, list) in [("removed", removed), ("added", added)] {
                if list.is_empty() {
                    continue;
                }
                let _ = writeln!(out, "  - {label} ({}):", list.len());
                for t in list.iter().take(10) {
                    let _ = writeln!(out, "    - {t}");
                }
                more(&mut out, "    ", list.len(), 10, "");
            }
        }
        more(&mut out, "", diff.changed.len(), limit, " clusters with diffs");
        out.push('\n');
    }

    if !diff.moved.is_empty() {
        let _ = writeln!(out, "### Texts with different cluster assignments ({})", diff.moved.len());
        for (t, ca, cb) in diff.moved.iter().take(limit) {
            let _ = writeln!(out, "- {t}");
            let _ = writeln!(out, "  - A clusters: {}", fmt_ids(ca));
            let _ = writeln!(out, "  - B clusters: {}", fmt_ids(cb));
        }
        more(&mut out, "", diff.moved.len(), limit, " texts moved");
    }

    let trimmed = out.trim_end().len();
    out.truncate(trimmed);
    out.push('\n');
    out
}

fn more(out: &mut String, indent: &str, total: usize, shown: usize, suffix: &str) {
    if total > shown {
        let _ = writeln!(out, "{indent}- ... and {} more{suffix}", total - shown);
    }
}
