//! Near-duplicate grouping of lesson texts.
//!
//! Greedy single-linkage over cosine similarity: items are visited in input
//! order and each one joins the *first* existing cluster holding any member at
//! or above the threshold, otherwise it opens a new cluster. The first-match
//! rule keeps output stable across runs so curators can diff review passes.

pub mod compare;
pub mod input;
pub mod merge;
pub mod review;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{debug, warn};

use crate::embed::{Embedder, cosine_similarity};
use crate::error::ValidationError;

/// Indices into the clustered input, in the order they joined.
pub type Cluster = Vec<usize>;

/// Partition `embeddings` into clusters. O(n²) comparisons.
///
/// Every vector must be non-empty and share one dimension; otherwise nothing
/// is clustered.
pub fn cluster<E: AsRef<[f32]>>(
    embeddings: &[E],
    threshold: f32,
) -> Result<Vec<Cluster>, ValidationError> {
    validate(embeddings)?;

    let mut clusters: Vec<Cluster> = Vec::new();
    for (i, emb) in embeddings.iter().enumerate() {
        let emb = emb.as_ref();
        let home = clusters.iter_mut().find(|members| {
            members
                .iter()
                .any(|&j| cosine_similarity(emb, embeddings[j].as_ref()) >= threshold)
        });
        match home {
            Some(members) => members.push(i),
            None => clusters.push(vec![i]),
        }
    }
    Ok(clusters)
}

fn validate<E: AsRef<[f32]>>(embeddings: &[E]) -> Result<(), ValidationError> {
    let Some(first) = embeddings.first() else {
        return Ok(());
    };
    let expected = first.as_ref().len();
    for (index, emb) in embeddings.iter().enumerate() {
        let actual = emb.as_ref().len();
        if actual == 0 {
            return Err(ValidationError::MissingEmbedding { index });
        }
        if actual != expected {
            return Err(ValidationError::DimensionMismatch {
                index,
                expected,
                actual,
            });
        }
    }
    Ok(())
}

/// One text to be grouped, plus whatever fields should be echoed into the
/// cluster record for it.
#[derive(Debug, Clone)]
pub struct TextItem {
    pub text: String,
    pub fields: Map<String, Value>,
}

/// Result of embedding and clustering a batch of texts.
pub struct ClusterRun {
    /// Clusters of indices into the original item list.
    pub clusters: Vec<Cluster>,
    /// Items that could not be embedded, with the provider's error.
    pub failed: Vec<(usize, String)>,
}

/// Embed every item and cluster the ones that succeeded. A failing item is
/// reported in `failed` and left out; the rest of the batch proceeds.
pub fn cluster_texts(
    items: &[TextItem],
    embedder: &dyn Embedder,
    threshold: f32,
) -> anyhow::Result<ClusterRun> {
    let texts: Vec<&str> = items.iter().map(|item| item.text.as_str()).collect();

    let mut kept = Vec::with_capacity(items.len());
    let mut embeddings = Vec::with_capacity(items.len());
    let mut failed = Vec::new();
    for (idx, result) in embedder.embed_batch(&texts).into_iter().enumerate() {
        match result {
            Ok(emb) => {
                kept.push(idx);
                embeddings.push(emb);
            }
            Err(e) => {
                warn!(item = idx, error = %format!("{e:#}"), "skipping item that failed to embed");
                failed.push((idx, format!("{e:#}")));
            }
        }
    }

    let clusters = cluster(&embeddings, threshold)?
        .into_iter()
        .map(|members| members.into_iter().map(|m| kept[m]).collect())
        .collect::<Vec<Cluster>>();
    debug!(items = items.len(), clusters = clusters.len(), threshold, "clustered");

    Ok(ClusterRun { clusters, failed })
}

/// One line of a clusters JSONL file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClusterRecord {
    pub cluster_id: i64,
    pub candidates: Vec<Map<String, Value>>,
}

impl ClusterRecord {
    /// Texts of all candidates that carry one.
    pub fn texts(&self) -> impl Iterator<Item = &str> {
        self.candidates
            .iter()
            .filter_map(|c| c.get("text").and_then(Value::as_str))
    }
}

/// Number clusters 0..N-1 in creation order and attach each member's fields.
pub fn to_records(items: &[TextItem], clusters: &[Cluster]) -> Vec<ClusterRecord> {
    clusters
        .iter()
        .enumerate()
        .map(|(cid, members)| ClusterRecord {
            cluster_id: cid as i64,
            candidates: members.iter().map(|&i| items[i].fields.clone()).collect(),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embed::mock::HashEmbedder;
    use anyhow::bail;
    use proptest::prelude::*;

    fn unit(dims: &[f32]) -> Vec<f32> {
        let mut v = dims.to_vec();
        crate::embed::l2_normalize(&mut v);
        v
    }

    #[test]
    fn empty_input_gives_no_clusters() {
        let none: Vec<Vec<f32>> = Vec::new();
        assert!(cluster(&none, 0.85).unwrap().is_empty());
    }

    #[test]
    fn identical_vectors_join_orthogonal_split() {
        let a = unit(&[1.0, 0.0, 0.0]);
        let b = unit(&[0.0, 1.0, 0.0]);
        let clusters = cluster(&[a.clone(), b.clone(), a, b], 0.85).unwrap();
        assert_eq!(clusters, vec![vec![0, 2], vec![1, 3]]);
    }

    #[test]
    fn joins_through_any_member() {
        // c is close to b but not to a; b already sits in a's cluster.
        let a = unit(&[1.0, 0.0]);
        let b = unit(&[0.8, 0.6]);
        let c = unit(&[0.28, 0.96]);
        assert!(cosine_similarity(&a, &c) < 0.5);
        let clusters = cluster(&[a, b, c], 0.75).unwrap();
        assert_eq!(clusters, vec![vec![0, 1, 2]]);
    }

    #[test]
    fn first_qualifying_cluster_wins() {
        // m is equally close to x and y, which sit in separate clusters.
        let x = unit(&[1.0, 0.0]);
        let y = unit(&[0.0, 1.0]);
        let m = unit(&[1.0, 1.0]);
        let clusters = cluster(&[x, y, m], 0.7).unwrap();
        assert_eq!(clusters, vec![vec![0, 2], vec![1]]);
    }

    #[test]
    fn missing_embedding_is_rejected() {
        let err = cluster(&[vec![1.0, 0.0], vec![]], 0.9).unwrap_err();
        assert_eq!(err, ValidationError::MissingEmbedding { index: 1 });
    }

    #[test]
    fn dimension_mismatch_is_rejected() {
        let err = cluster(&[vec![1.0, 0.0], vec![1.0, 0.0, 0.0]], 0.9).unwrap_err();
        assert!(matches!(err, ValidationError::DimensionMismatch { index: 1, .. }));
    }

    fn item(text: &str) -> TextItem {
        let mut fields = Map::new();
        fields.insert("text".into(), Value::String(text.into()));
        TextItem { text: text.into(), fields }
    }

    #[test]
    fn texts_cluster_by_normalized_content() {
        let items = vec![
            item("Do your duty without attachment."),
            item("Anger clouds judgement."),
            item("do your duty without attachment."),
        ];
        let run = cluster_texts(&items, &HashEmbedder::default(), 0.88).unwrap();
        assert!(run.failed.is_empty());
        assert_eq!(run.clusters, vec![vec![0, 2], vec![1]]);

        let records = to_records(&items, &run.clusters);
        assert_eq!(records[1].cluster_id, 1);
        assert_eq!(records[0].texts().count(), 2);
    }

    struct RejectsEmpty;

    impl Embedder for RejectsEmpty {
        fn embed(&self, text: &str) -> anyhow::Result<crate::embed::Embedding> {
            if text.trim().is_empty() {
                bail!("empty prompt");
            }
            HashEmbedder::new(8).embed(text)
        }
        fn dimensions(&self) -> usize {
            8
        }
        fn model_name(&self) -> &str {
            "rejects-empty"
        }
    }

    #[test]
    fn failed_items_are_reported_and_skipped() {
        let items = vec![item("alpha"), item("  "), item("alpha")];
        let run = cluster_texts(&items, &RejectsEmpty, 0.9).unwrap();
        assert_eq!(run.failed.len(), 1);
        assert_eq!(run.failed[0].0, 1);
        assert_eq!(run.clusters, vec![vec![0, 2]]);
    }

    fn vectors() -> impl Strategy<Value = Vec<Vec<f32>>> {
        prop::collection::vec(prop::collection::vec(-1.0f32..1.0, 4), 0..40)
            .prop_map(|vs| vs.into_iter().map(|v| v.into_iter().map(|x| x + 1.5).collect()).collect())
    }

    proptest! {
        #[test]
        fn clusters_partition_the_input(vs in vectors(), threshold in 0.5f32..1.0) {
            let clusters = cluster(&vs, threshold).unwrap();
            let mut seen: Vec<usize> = clusters.iter().flatten().copied().collect();
            seen.sort_unstable();
            prop_assert_eq!(seen, (0..vs.len()).collect::<Vec<_>>());
            prop_assert!(clusters.iter().all(|c| !c.is_empty()));
        }

        #[test]
        fn clustering_is_deterministic(vs in vectors(), threshold in 0.5f32..1.0) {
            prop_assert_eq!(cluster(&vs, threshold).unwrap(), cluster(&vs, threshold).unwrap());
        }
    }
}
