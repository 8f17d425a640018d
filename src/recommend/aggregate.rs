use std::collections::HashMap;

use super::{Combine, RecommendParams, Scored, SeedSet, max_similarity, ranked};
use crate::index::LessonIndex;

/// Weighted nearest-neighbour aggregation.
///
/// Each seed contributes `weight × similarity` for up to `topk_per_seed` of
/// its neighbours at or above `min_cos`. Contributions are merged per
/// candidate with `max` or `sum`. Candidates closer than `max_similar` to any
/// seed are then dropped as near-duplicates, and the rest ranked.
pub fn recommend(index: &LessonIndex, seeds: &SeedSet, params: &RecommendParams) -> Vec<Scored> {
    let seed_ids = seeds.id_set();
    // insertion-ordered so ties rank deterministically
    let mut slots: HashMap<usize, usize> = HashMap::new();
    let mut combined: Vec<(usize, f32)> = Vec::new();

    for (&seed, &weight) in seeds.ids.iter().zip(&seeds.weights) {
        let mut taken = 0;
        for (idx, sim) in index.top_k(index.embedding(seed), index.len()) {
            if taken >= params.topk_per_seed {
                break;
            }
            if params.exclude_same && seed_ids.contains(&idx) {
                continue;
            }
            if sim < params.min_cos {
                break;
            }
            let contrib = weight as f32 * sim;
            match slots.get(&idx) {
                Some(&slot) => {
                    let current = &mut combined[slot].1;
                    *current = match params.combine {
                        Combine::Sum => *current + contrib,
                        Combine::Max => current.max(contrib),
                    };
                }
                None => {
                    slots.insert(idx, combined.len());
                    combined.push((idx, contrib));
                }
            }
            taken += 1;
        }
    }

    let kept: Vec<(usize, f32)> = combined
        .into_iter()
        .filter(|&(idx, _)| !(params.exclude_same && seed_ids.contains(&idx)))
        .filter(|&(idx, _)| max_similarity(index, &seeds.ids, idx) <= params.max_similar)
        .collect();
    ranked(kept, params.overall_topk)
}
