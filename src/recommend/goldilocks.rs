//! Single "goldilocks" pick: related to the seeds, but neither redundant nor
//! off-topic.
//!
//! Every lesson is scored by its highest similarity to any seed. Candidates
//! must clear the `min_cos` floor, stay under the `max_similar` ceiling, and
//! not have been shown recently. Among those, only scores inside the
//! `[band_low_pct, band_high_pct]` percentile band are eligible, and one is
//! drawn uniformly.
//!
//! Fallbacks, reported on the pick:
//! 1. band empty → uniform draw from the filtered candidates
//!    ([`Fallback::RandomFromFiltered`]);
//! 2. nothing filtered → uniform draw from every non-seed lesson
//!    ([`Fallback::RandomAny`]).

use rand::Rng;
use std::collections::HashSet;
use tracing::{debug, info, warn};

use super::{Fallback, Pick, Recommendation, RecommendParams, Scored, SeedSet, choose, max_similarity, ranked};
use crate::index::LessonIndex;

/// Percentile of `values` with linear interpolation between closest ranks.
/// `pct` is clamped to `[0, 100]`. Empty input yields NaN.
pub fn percentile(values: &[f32], pct: f64) -> f64 {
    if values.is_empty() {
        return f64::NAN;
    }
    let mut sorted: Vec<f64> = values.iter().map(|&v| v as f64).collect();
    sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    let rank = pct.clamp(0.0, 100.0) / 100.0 * (sorted.len() - 1) as f64;
    let lo = rank.floor() as usize;
    let hi = rank.ceil() as usize;
    sorted[lo] + (sorted[hi] - sorted[lo]) * (rank - lo as f64)
}

/// The closed score band `[p_low, p_high]` and the members falling inside it.
pub fn band(pool: &[(usize, f32)], low_pct: f64, high_pct: f64) -> ((f64, f64), Vec<(usize, f32)>) {
    let scores: Vec<f32> = pool.iter().map(|&(_, s)| s).collect();
    let lo = percentile(&scores, low_pct);
    let hi = percentile(&scores, high_pct);
    let inside = pool
        .iter()
        .copied()
        .filter(|&(_, s)| (s as f64) >= lo && (s as f64) <= hi)
        .collect();
    ((lo, hi), inside)
}

/// Lessons that are not seeds, in index order.
pub(crate) fn non_seeds(index: &LessonIndex, seeds: &SeedSet) -> Vec<usize> {
    let ids = seeds.id_set();
    (0..index.len()).filter(|i| !ids.contains(i)).collect()
}

pub fn recommend<R: Rng + ?Sized>(
    index: &LessonIndex,
    seeds: &SeedSet,
    shown: &HashSet<usize>,
    params: &RecommendParams,
    rng: &mut R,
) -> Recommendation {
    let seed_ids = seeds.id_set();
    let max_to_seed: Vec<f32> = (0..index.len())
        .map(|i| max_similarity(index, &seeds.ids, i))
        .collect();

    let filtered: Vec<(usize, f32)> = max_to_seed
        .iter()
        .copied()
        .enumerate()
        .filter(|(i, _)| !(params.exclude_same && seed_ids.contains(i)))
        .filter(|&(_, s)| s >= params.min_cos)
        .filter(|&(_, s)| params.max_similar >= 1.0 || s <= params.max_similar)
        .filter(|(i, _)| !shown.contains(i))
        .collect();
    debug!(candidates = filtered.len(), shown = shown.len(), "goldilocks filter");

    if filtered.is_empty() {
        let pool = non_seeds(index, seeds);
        let Some(&pick) = choose(&pool, rng) else {
            warn!("no non-seed lessons to fall back to");
            return Recommendation::default();
        };
        let score = max_to_seed[pick];
        warn!(pick, "no candidates passed the filters; random pick from all non-seed lessons");
        return Recommendation {
            results: vec![Scored { index: pick, score }],
            pick: Some(Pick {
                index: pick,
                score: Some(score),
                band: None,
                fallback: Some(Fallback::RandomAny),
                cluster: None,
            }),
            random_pick: None,
        };
    }

    let ((lo, hi), inside) = band(&filtered, params.band_low_pct, params.band_high_pct);
    let band_bounds = Some((lo as f32, hi as f32));

    if inside.is_empty() {
        let Some(&(pick, score)) = choose(&filtered, rng) else {
            return Recommendation::default();
        };
        info!(pick, lo, hi, "percentile band empty; random pick from filtered candidates");
        return Recommendation {
            results: ranked(filtered, params.overall_topk),
            pick: Some(Pick {
                index: pick,
                score: Some(score),
                band: band_bounds,
                fallback: Some(Fallback::RandomFromFiltered),
                cluster: None,
            }),
            random_pick: None,
        };
    }

    let Some(&(pick, score)) = choose(&inside, rng) else {
        return Recommendation::default();
    };
    debug!(pick, score, lo, hi, band = inside.len(), "goldilocks pick");
    Recommendation {
        results: ranked(inside, params.overall_topk),
        pick: Some(Pick {
            index: pick,
            score: Some(score),
            band: band_bounds,
            fallback: None,
            cluster: None,
        }),
        random_pick: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::recommend::fixtures::{at, index_of};
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    fn params() -> RecommendParams {
        RecommendParams {
            min_cos: 0.25,
            max_similar: 0.9,
            band_low_pct: 70.0,
            band_high_pct: 90.0,
            ..Default::default()
        }
    }

    #[test]
    fn percentile_interpolates() {
        let v = [1.0f32, 2.0, 3.0, 4.0, 5.0];
        assert_eq!(percentile(&v, 0.0), 1.0);
        assert_eq!(percentile(&v, 100.0), 5.0);
        assert_eq!(percentile(&v, 50.0), 3.0);
        assert!((percentile(&v, 70.0) - 3.8).abs() < 1e-9);
        assert!((percentile(&[5.0, 1.0], 25.0) - 2.0).abs() < 1e-9);
        assert_eq!(percentile(&[0.7], 90.0), 0.7f32 as f64);
    }

    #[test]
    fn identical_scores_all_fall_inside_band() {
        let pool = vec![(1, 0.5f32), (2, 0.5), (3, 0.5)];
        let (_, inside) = band(&pool, 70.0, 90.0);
        assert_eq!(inside.len(), 3);
    }

    #[test]
    fn picks_from_the_band() {
        // seed at 0°, candidates spread from 10° to 70°
        let angles = [0.0, 10.0, 20.0, 30.0, 40.0, 50.0, 60.0, 70.0];
        let vectors: Vec<[f32; 3]> = angles.iter().map(|&a| at(a)).collect();
        let refs: Vec<&[f32]> = vectors.iter().map(|v| v.as_slice()).collect();
        let index = index_of(&refs);
        let seeds = SeedSet::uniform(vec![0]);

        for seed in 0..10 {
            let mut rng = StdRng::seed_from_u64(seed);
            let rec = recommend(&index, &seeds, &HashSet::new(), &params(), &mut rng);
            let pick = rec.pick.unwrap();
            assert_eq!(pick.fallback, None);
            // 10° and 20° are above the ceiling; of the five survivors only
            // 40° lands in the 70th..90th percentile band
            assert_eq!(pick.index, 4);
            assert_eq!(rec.results.len(), 1);
            let (lo, hi) = pick.band.unwrap();
            let s = pick.score.unwrap();
            assert!(s >= lo && s <= hi);
        }
    }

    #[test]
    fn never_returns_a_seed() {
        let index = index_of(&[&at(0.0), &at(30.0), &at(35.0), &at(45.0), &at(60.0)]);
        let seeds = SeedSet::uniform(vec![0, 2]);
        let p = RecommendParams { band_low_pct: 0.0, band_high_pct: 100.0, max_similar: 1.0, ..params() };
        for seed in 0..25 {
            let mut rng = StdRng::seed_from_u64(seed);
            let rec = recommend(&index, &seeds, &HashSet::new(), &p, &mut rng);
            let pick = rec.pick.unwrap();
            assert!(!seeds.contains(pick.index));
            assert!(rec.results.iter().all(|r| !seeds.contains(r.index)));
        }
    }

    #[test]
    fn empty_band_falls_back_to_filtered() {
        // two candidates with distinct scores: the 30th..60th percentile
        // window lies strictly between them
        let index = index_of(&[&at(0.0), &at(30.0), &at(60.0)]);
        let p = RecommendParams { band_low_pct: 30.0, band_high_pct: 60.0, ..params() };
        let mut rng = StdRng::seed_from_u64(7);
        let rec = recommend(&index, &SeedSet::uniform(vec![0]), &HashSet::new(), &p, &mut rng);
        let pick = rec.pick.unwrap();
        assert_eq!(pick.fallback, Some(Fallback::RandomFromFiltered));
        assert!(pick.index == 1 || pick.index == 2);
        assert_eq!(rec.results.iter().map(|r| r.index).collect::<Vec<_>>(), vec![1, 2]);
    }

    #[test]
    fn nothing_filtered_falls_back_to_any_non_seed() {
        // every candidate is a near-duplicate of the seed
        let index = index_of(&[&at(0.0), &at(1.0), &at(2.0)]);
        let mut rng = StdRng::seed_from_u64(11);
        let rec = recommend(&index, &SeedSet::uniform(vec![0]), &HashSet::new(), &params(), &mut rng);
        let pick = rec.pick.unwrap();
        assert_eq!(pick.fallback, Some(Fallback::RandomAny));
        assert_ne!(pick.index, 0);
        assert_eq!(pick.band, None);
        assert_eq!(rec.results.len(), 1);
    }

    #[test]
    fn recently_shown_are_skipped() {
        let index = index_of(&[&at(0.0), &at(30.0), &at(40.0)]);
        let p = RecommendParams { band_low_pct: 0.0, band_high_pct: 100.0, ..params() };
        let shown = HashSet::from([1]);
        for seed in 0..10 {
            let mut rng = StdRng::seed_from_u64(seed);
            let rec = recommend(&index, &SeedSet::uniform(vec![0]), &shown, &p, &mut rng);
            assert_eq!(rec.pick.unwrap().index, 2);
        }
    }

    #[test]
    fn same_seed_same_pick() {
        let angles: Vec<[f32; 3]> = (0..40).map(|i| at(i as f32 * 2.0)).collect();
        let refs: Vec<&[f32]> = angles.iter().map(|v| v.as_slice()).collect();
        let index = index_of(&refs);
        let seeds = SeedSet::uniform(vec![0]);
        let run = |s| {
            let mut rng = StdRng::seed_from_u64(s);
            recommend(&index, &seeds, &HashSet::new(), &params(), &mut rng).pick
        };
        assert_eq!(run(42), run(42));
    }

    #[test]
    fn only_seeds_in_index_yields_nothing() {
        let index = index_of(&[&at(0.0)]);
        let mut rng = StdRng::seed_from_u64(0);
        let rec = recommend(&index, &SeedSet::uniform(vec![0]), &HashSet::new(), &params(), &mut rng);
        assert!(rec.pick.is_none());
        assert!(rec.results.is_empty());
    }
}
