//! Next-lesson sampling from a reader's bookmarked ("seed") lessons.
//!
//! Three selection modes share the same inputs: the lesson index, the seeds
//! with their recency weights, and the set of recently shown lessons.
//!
//! - [`Mode::Aggregate`]: each seed's nearest neighbours, weighted and
//!   combined, ranked. See [`aggregate`].
//! - [`Mode::Goldilocks`]: one pick from a percentile band of
//!   max-similarity-to-any-seed, with a reported fallback chain. See
//!   [`goldilocks`].
//! - [`Mode::Clustered`]: seeds grouped around up to three weighted
//!   centroids, one banded pick per group, one group chosen. See
//!   [`clustered`].
//!
//! All random choices draw from the caller's RNG, so a seeded `StdRng` makes
//! every mode reproducible.

pub mod aggregate;
pub mod clustered;
pub mod goldilocks;
pub mod shown;
pub mod weights;

use rand::Rng;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use thiserror::Error;

use crate::embed::cosine_similarity;
use crate::error::ValidationError;
use crate::index::LessonIndex;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Combine {
    Max,
    Sum,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    Aggregate,
    Goldilocks,
    Clustered,
}

#[derive(Debug, Clone, Serialize)]
pub struct RecommendParams {
    /// Similarity floor; neighbours below it are never considered.
    pub min_cos: f32,
    /// Near-duplicate ceiling against the seeds.
    pub max_similar: f32,
    pub topk_per_seed: usize,
    pub overall_topk: usize,
    pub exclude_same: bool,
    pub combine: Combine,
    pub band_low_pct: f64,
    pub band_high_pct: f64,
    pub topm_per_cluster: usize,
    pub random_pick_threshold: Option<f32>,
}

impl Default for RecommendParams {
    fn default() -> Self {
        crate::config::RecommendConfig::default().params()
    }
}

/// Seed lessons in priority order with their normalized weights.
#[derive(Debug, Clone, Default, Serialize)]
pub struct SeedSet {
    pub ids: Vec<usize>,
    pub weights: Vec<f64>,
}

impl SeedSet {
    pub fn new(ids: Vec<usize>, weights: Vec<f64>) -> Self {
        debug_assert_eq!(ids.len(), weights.len());
        Self { ids, weights }
    }

    /// Equal weights summing to 1.
    pub fn uniform(ids: Vec<usize>) -> Self {
        let w = 1.0 / ids.len().max(1) as f64;
        let weights = vec![w; ids.len()];
        Self { ids, weights }
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    pub fn contains(&self, id: usize) -> bool {
        self.ids.contains(&id)
    }

    pub fn id_set(&self) -> HashSet<usize> {
        self.ids.iter().copied().collect()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Scored {
    pub index: usize,
    pub score: f32,
}

/// Why a pick is less than a confident in-band choice.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Fallback {
    /// The band was empty; chosen among candidates that passed the filters.
    RandomFromFiltered,
    /// Nothing passed the filters; chosen among all non-seed lessons.
    RandomAny,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Pick {
    pub index: usize,
    pub score: Option<f32>,
    pub band: Option<(f32, f32)>,
    pub fallback: Option<Fallback>,
    /// Seed cluster that produced the pick (clustered mode only).
    pub cluster: Option<usize>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct Recommendation {
    pub results: Vec<Scored>,
    pub pick: Option<Pick>,
    pub random_pick: Option<Scored>,
}

#[derive(Debug, Error, PartialEq)]
pub enum RecommendError {
    #[error("no seed lessons: none of the bookmarks map to a lesson")]
    NoSeeds,

    #[error(transparent)]
    Invalid(#[from] ValidationError),
}

/// Run one selection mode.
pub fn recommend<R: Rng + ?Sized>(
    index: &LessonIndex,
    seeds: &SeedSet,
    shown: &HashSet<usize>,
    mode: Mode,
    params: &RecommendParams,
    rng: &mut R,
) -> Result<Recommendation, RecommendError> {
    if seeds.is_empty() {
        return Err(RecommendError::NoSeeds);
    }
    if seeds.weights.len() != seeds.ids.len() {
        return Err(ValidationError::LengthMismatch {
            what: "seed weights",
            expected: seeds.ids.len(),
            actual: seeds.weights.len(),
        }
        .into());
    }
    if let Some(&id) = seeds.ids.iter().find(|&&id| id >= index.len()) {
        return Err(ValidationError::SeedOutOfRange { id, len: index.len() }.into());
    }

    let mut rec = match mode {
        Mode::Aggregate => Recommendation {
            results: aggregate::recommend(index, seeds, params),
            ..Default::default()
        },
        Mode::Goldilocks => goldilocks::recommend(index, seeds, shown, params, rng),
        Mode::Clustered => clustered::recommend(index, seeds, shown, params, rng),
    };

    if mode != Mode::Goldilocks {
        if let Some(threshold) = params.random_pick_threshold {
            rec.random_pick = random_pick(&rec.results, threshold, rng);
        }
    }
    Ok(rec)
}

/// Uniform choice among results scoring at least `threshold`.
pub fn random_pick<R: Rng + ?Sized>(results: &[Scored], threshold: f32, rng: &mut R) -> Option<Scored> {
    let pool: Vec<&Scored> = results.iter().filter(|r| r.score >= threshold).collect();
    choose(&pool, rng).map(|r| **r)
}

/// Highest similarity between `candidate` and any of `members`.
pub(crate) fn max_similarity(index: &LessonIndex, members: &[usize], candidate: usize) -> f32 {
    let v = index.embedding(candidate);
    members
        .iter()
        .map(|&m| cosine_similarity(index.embedding(m), v))
        .fold(f32::NEG_INFINITY, f32::max)
}

pub(crate) fn choose<'a, T, R: Rng + ?Sized>(items: &'a [T], rng: &mut R) -> Option<&'a T> {
    if items.is_empty() {
        None
    } else {
        Some(&items[rng.random_range(0..items.len())])
    }
}

pub(crate) fn ranked(mut items: Vec<(usize, f32)>, limit: usize) -> Vec<Scored> {
    crate::index::sort_by_score_desc(&mut items);
    items
        .into_iter()
        .take(limit)
        .map(|(index, score)| Scored { index, score })
        .collect()
}

#[cfg(test)]
pub(crate) mod fixtures {
    use crate::index::LessonIndex;

    /// Index over hand-written vectors, normalized.
    pub fn index_of(vectors: &[&[f32]]) -> LessonIndex {
        let embeddings: Vec<Vec<f32>> = vectors
            .iter()
            .map(|v| {
                let mut v = v.to_vec();
                crate::embed::l2_normalize(&mut v);
                v
            })
            .collect();
        LessonIndex {
            model: "fixture".into(),
            source: None,
            content_hash: String::new(),
            dimensions: embeddings.first().map_or(0, Vec::len),
            ids: (0..embeddings.len() as u32).collect(),
            texts: (0..embeddings.len()).map(|i| format!("lesson {i}")).collect(),
            embeddings,
        }
    }

    /// Unit vector at `angle_deg` in the plane of the first two axes.
    pub fn at(angle_deg: f32) -> [f32; 3] {
        let r = angle_deg.to_radians();
        [r.cos(), r.sin(), 0.0]
    }
}

#[cfg(test)]
mod tests {
    use super::fixtures::*;
    use super::*;
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    #[test]
    fn empty_seed_set_is_reported() {
        let index = index_of(&[&at(0.0), &at(10.0)]);
        let mut rng = StdRng::seed_from_u64(1);
        for mode in [Mode::Aggregate, Mode::Goldilocks, Mode::Clustered] {
            let err = recommend(&index, &SeedSet::default(), &HashSet::new(), mode, &RecommendParams::default(), &mut rng)
                .unwrap_err();
            assert_eq!(err, RecommendError::NoSeeds);
        }
    }

    #[test]
    fn out_of_range_seed_is_rejected() {
        let index = index_of(&[&at(0.0), &at(10.0)]);
        let mut rng = StdRng::seed_from_u64(1);
        let err = recommend(
            &index,
            &SeedSet::uniform(vec![5]),
            &HashSet::new(),
            Mode::Goldilocks,
            &RecommendParams::default(),
            &mut rng,
        )
        .unwrap_err();
        assert_eq!(err, RecommendError::Invalid(ValidationError::SeedOutOfRange { id: 5, len: 2 }));
    }

    #[test]
    fn random_pick_respects_threshold() {
        let results = vec![
            Scored { index: 4, score: 0.9 },
            Scored { index: 7, score: 0.4 },
        ];
        let mut rng = StdRng::seed_from_u64(3);
        for _ in 0..20 {
            assert_eq!(random_pick(&results, 0.5, &mut rng).unwrap().index, 4);
        }
        assert!(random_pick(&results, 0.95, &mut rng).is_none());
    }

    #[test]
    fn random_pick_runs_for_aggregate_only_when_enabled() {
        let index = index_of(&[&at(0.0), &at(30.0), &at(40.0), &at(80.0)]);
        let params = RecommendParams {
            random_pick_threshold: Some(0.5),
            ..Default::default()
        };
        let mut rng = StdRng::seed_from_u64(9);
        let rec = recommend(&index, &SeedSet::uniform(vec![0]), &HashSet::new(), Mode::Aggregate, &params, &mut rng).unwrap();
        let pick = rec.random_pick.unwrap();
        assert!(pick.score >= 0.5);
        assert!(rec.results.contains(&pick));
    }
}
