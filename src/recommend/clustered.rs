//! Goldilocks selection per group of seeds.
//!
//! Seeds are split into `K = clamp(round(√S), 1, 3)` groups by a few rounds of
//! weighted spherical k-means. Each group's centroid gathers its nearest
//! candidates, a percentile band picks one of them, and one group's pick is
//! returned. Groups whose band comes out empty are skipped.

use rand::Rng;
use std::collections::HashSet;
use tracing::{debug, warn};

use super::goldilocks::{band, non_seeds};
use super::{Fallback, Pick, Recommendation, RecommendParams, Scored, SeedSet, choose, max_similarity, ranked};
use crate::embed::{cosine_similarity, l2_normalize, norm};
use crate::index::LessonIndex;

const ITERATIONS: usize = 5;
const MAX_CLUSTERS: usize = 3;

/// Seed groups: one centroid per group and each seed's group, by seed position.
#[derive(Debug, Clone, PartialEq)]
pub struct SeedClusters {
    pub centroids: Vec<Vec<f32>>,
    pub assignment: Vec<usize>,
}

impl SeedClusters {
    /// Seed lesson ids assigned to group `c`.
    pub fn members(&self, seeds: &SeedSet, c: usize) -> Vec<usize> {
        self.assignment
            .iter()
            .zip(&seeds.ids)
            .filter(|&(&a, _)| a == c)
            .map(|(_, &id)| id)
            .collect()
    }
}

/// Group count for `s` seeds: `round(√s)` kept within `1..=3` and never above `s`.
pub fn auto_k(s: usize) -> usize {
    let k = ((s as f64).sqrt().round() as usize).clamp(1, MAX_CLUSTERS);
    k.min(s.max(1))
}

/// Weighted spherical k-means over the seed embeddings.
///
/// Centroids start at evenly spaced seeds. Each round assigns every seed to
/// its most similar centroid (first wins on ties), then rebuilds each
/// centroid as the weight-scaled sum of its members. Empty groups keep their
/// previous centroid.
pub fn seed_clusters(index: &LessonIndex, seeds: &SeedSet) -> SeedClusters {
    let s = seeds.len();
    let k = auto_k(s);
    if s == 0 {
        return SeedClusters { centroids: Vec::new(), assignment: Vec::new() };
    }

    let vectors: Vec<&[f32]> = seeds.ids.iter().map(|&id| index.embedding(id)).collect();
    let mut centroids: Vec<Vec<f32>> = (0..k)
        .map(|i| {
            let at = if k == 1 { 0 } else { i * (s - 1) / (k - 1) };
            vectors[at].to_vec()
        })
        .collect();
    let mut assignment = vec![0; s];

    for _ in 0..ITERATIONS {
        for (slot, v) in assignment.iter_mut().zip(&vectors) {
            *slot = nearest(&centroids, v);
        }
        for (c, centroid) in centroids.iter_mut().enumerate() {
            let mut sum = vec![0.0f32; centroid.len()];
            let mut any = false;
            for (m, v) in vectors.iter().enumerate().filter(|&(m, _)| assignment[m] == c) {
                let w = seeds.weights[m] as f32;
                for (acc, x) in sum.iter_mut().zip(v.iter()) {
                    *acc += w * x;
                }
                any = true;
            }
            if !any {
                continue;
            }
            if norm(&sum) > 1e-6 {
                l2_normalize(&mut sum);
            }
            *centroid = sum;
        }
    }

    SeedClusters { centroids, assignment }
}

fn nearest(centroids: &[Vec<f32>], v: &[f32]) -> usize {
    let mut best = 0;
    let mut best_score = f32::NEG_INFINITY;
    for (c, centroid) in centroids.iter().enumerate() {
        let score = cosine_similarity(centroid, v);
        if score > best_score {
            best = c;
            best_score = score;
        }
    }
    best
}

/// Up to `topm_per_cluster` candidates nearest the centroid, best first.
fn cluster_pool(
    index: &LessonIndex,
    centroid: &[f32],
    members: &[usize],
    seed_ids: &HashSet<usize>,
    shown: &HashSet<usize>,
    params: &RecommendParams,
) -> Vec<(usize, f32)> {
    let mut pool = Vec::new();
    for (id, score) in index.top_k(centroid, index.len()) {
        if params.exclude_same && seed_ids.contains(&id) {
            continue;
        }
        if shown.contains(&id) {
            continue;
        }
        if score < params.min_cos {
            break;
        }
        if !members.is_empty() && max_similarity(index, members, id) > params.max_similar {
            continue;
        }
        pool.push((id, score));
        if pool.len() >= params.topm_per_cluster {
            break;
        }
    }
    pool
}

pub fn recommend<R: Rng + ?Sized>(
    index: &LessonIndex,
    seeds: &SeedSet,
    shown: &HashSet<usize>,
    params: &RecommendParams,
    rng: &mut R,
) -> Recommendation {
    let groups = seed_clusters(index, seeds);
    let seed_ids = seeds.id_set();

    let mut picks: Vec<Pick> = Vec::new();
    for (c, centroid) in groups.centroids.iter().enumerate() {
        let members = groups.members(seeds, c);
        let pool = cluster_pool(index, centroid, &members, &seed_ids, shown, params);
        if pool.is_empty() {
            debug!(cluster = c, "no candidates near centroid");
            continue;
        }
        let ((lo, hi), inside) = band(&pool, params.band_low_pct, params.band_high_pct);
        let Some(&(id, score)) = choose(&inside, rng) else {
            debug!(cluster = c, lo, hi, "band empty; cluster skipped");
            continue;
        };
        picks.push(Pick {
            index: id,
            score: Some(score),
            band: Some((lo as f32, hi as f32)),
            fallback: None,
            cluster: Some(c),
        });
    }
    debug!(clusters = groups.centroids.len(), picks = picks.len(), "clustered goldilocks");

    if let Some(choice) = choose(&picks, rng).cloned() {
        let results = ranked(
            picks.iter().map(|p| (p.index, p.score.unwrap_or(f32::NEG_INFINITY))).collect(),
            params.overall_topk,
        );
        return Recommendation { results, pick: Some(choice), random_pick: None };
    }

    let pool = non_seeds(index, seeds);
    let Some(&id) = choose(&pool, rng) else {
        warn!("no non-seed lessons to fall back to");
        return Recommendation::default();
    };
    warn!(pick = id, "no cluster produced a pick; random pick from all non-seed lessons");
    let score = groups
        .centroids
        .first()
        .map_or(0.0, |c| cosine_similarity(c, index.embedding(id)));
    Recommendation {
        results: vec![Scored { index: id, score }],
        pick: Some(Pick {
            index: id,
            score: None,
            band: None,
            fallback: Some(Fallback::RandomAny),
            cluster: None,
        }),
        random_pick: None,
    }
}
