//! Curator-driven edits to a clusters file: fold several clusters into one and
//! optionally renumber.

use serde_json::{Map, Value};
use std::collections::{BTreeMap, HashSet};
use thiserror::Error;

use super::ClusterRecord;

pub type ClusterMap = BTreeMap<i64, Vec<Map<String, Value>>>;

#[derive(Debug, Error, PartialEq)]
pub enum MergeError {
    #[error("provide at least two cluster ids to merge")]
    TooFewIds,

    #[error("cluster ids not found: {0:?}")]
    UnknownIds(Vec<i64>),
}

/// Later records with a duplicate id replace earlier ones.
pub fn to_map(records: Vec<ClusterRecord>) -> ClusterMap {
    records
        .into_iter()
        .map(|r| (r.cluster_id, r.candidates))
        .collect()
}

/// Records in ascending id order.
pub fn to_records(clusters: ClusterMap) -> Vec<ClusterRecord> {
    clusters
        .into_iter()
        .map(|(cluster_id, candidates)| ClusterRecord {
            cluster_id,
            candidates,
        })
        .collect()
}

/// Case- and whitespace-insensitive key used for dedupe.
pub fn normalize_text(text: &str) -> String {
    text.split_whitespace()
        .map(str::to_lowercase)
        .collect::<Vec<_>>()
        .join(" ")
}

/// Merge `ids` into one cluster under `target_id` (default: smallest of `ids`).
///
/// Candidates are concatenated in ascending source-id order, keeping their
/// order within each source. With `dedupe`, a candidate whose normalized
/// `text` was already taken is dropped; candidates without text are kept.
pub fn merge_clusters(
    mut clusters: ClusterMap,
    ids: &[i64],
    target_id: Option<i64>,
    dedupe: bool,
) -> Result<ClusterMap, MergeError> {
    let mut ids: Vec<i64> = ids.to_vec();
    ids.sort_unstable();
    ids.dedup();
    if ids.len() < 2 {
        return Err(MergeError::TooFewIds);
    }
    let missing: Vec<i64> = ids
        .iter()
        .copied()
        .filter(|id| !clusters.contains_key(id))
        .collect();
    if !missing.is_empty() {
        return Err(MergeError::UnknownIds(missing));
    }

    let target = target_id.unwrap_or(ids[0]);
    let mut merged = Vec::new();
    for id in &ids {
        merged.extend(clusters.remove(id).unwrap_or_default());
    }

    if dedupe {
        let mut seen = HashSet::new();
        merged.retain(|cand| match cand.get("text").and_then(Value::as_str) {
            Some(text) => seen.insert(normalize_text(text)),
            None => true,
        });
    }

    clusters.insert(target, merged);
    Ok(clusters)
}

/// Renumber to contiguous `0..N-1`, preserving ascending id order.
pub fn reindex(clusters: ClusterMap) -> ClusterMap {
    clusters
        .into_values()
        .enumerate()
        .map(|(new_id, cands)| (new_id as i64, cands))
        .collect()
}
