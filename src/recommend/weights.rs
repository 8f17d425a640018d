//! Recency weighting of seeds and the bookmark → seed mapping.

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::Deserialize;
use std::collections::{BTreeMap, HashMap};
use tracing::warn;

use super::SeedSet;

const SECONDS_PER_DAY: f64 = 86_400.0;

/// One entry of a bookmarks log: `{"verse": "2:47", "ts": "2025-01-03T10:00:00Z"}`.
#[derive(Debug, Clone, Deserialize)]
pub struct Bookmark {
    pub verse: String,
    #[serde(default)]
    pub ts: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SeedWeights {
    /// `exp(-Δt/τ)` before flooring; the most recent seed is exactly 1.0.
    pub raw: Vec<f64>,
    /// Floored at `w_min` and scaled to sum to 1.
    pub normalized: Vec<f64>,
}

/// RFC 3339 (with `Z` or an offset); naive timestamps are read as UTC.
pub fn parse_timestamp(s: &str) -> Option<DateTime<Utc>> {
    let s = s.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }
    ["%Y-%m-%dT%H:%M:%S", "%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S"]
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(s, fmt).ok())
        .map(|naive| naive.and_utc())
}

/// Weight each seed by how recently it was bookmarked, relative to the most
/// recent seed. Seeds without a timestamp sit at the floor. When no seed
/// has a timestamp every seed gets the same weight.
pub fn recency_weights(timestamps: &[Option<DateTime<Utc>>], tau_days: f64, w_min: f64) -> SeedWeights {
    let n = timestamps.len();
    let Some(anchor) = timestamps.iter().flatten().max().copied() else {
        return SeedWeights {
            raw: vec![1.0; n],
            normalized: vec![1.0 / n.max(1) as f64; n],
        };
    };

    let tau = tau_days.max(1e-3) * SECONDS_PER_DAY;
    let raw: Vec<f64> = timestamps
        .iter()
        .map(|ts| match ts {
            Some(ts) => {
                let dt = ((anchor - *ts).num_milliseconds() as f64 / 1000.0).max(0.0);
                (-dt / tau).exp()
            }
            None => 0.0,
        })
        .collect();

    let floored: Vec<f64> = raw.iter().map(|w| w.max(w_min)).collect();
    let total: f64 = floored.iter().sum();
    let normalized = if total > 0.0 {
        floored.iter().map(|w| w / total).collect()
    } else {
        floored
    };
    SeedWeights { raw, normalized }
}

/// Resolve bookmarks to seed lessons.
///
/// Order: verses given directly (`verses`) first, then timestamped bookmarks
/// in first-seen order. A lesson bookmarked several times keeps its latest
/// timestamp. Verses missing from the map are skipped with a warning.
pub fn seeds_from_bookmarks(
    verses: &[String],
    timed: &[Bookmark],
    verse_to_lesson: &BTreeMap<String, usize>,
    tau_days: f64,
    w_min: f64,
) -> SeedSet {
    let mut ordered: Vec<usize> = Vec::new();
    let mut latest: HashMap<usize, DateTime<Utc>> = HashMap::new();
    let mut timed_order: Vec<usize> = Vec::new();

    for b in timed {
        let Some(&lesson) = verse_to_lesson.get(&b.verse) else {
            warn!(verse = %b.verse, "bookmark verse has no lesson; skipping");
            continue;
        };
        let Some(ts) = b.ts.as_deref().and_then(parse_timestamp) else {
            warn!(verse = %b.verse, ts = ?b.ts, "bookmark without a usable timestamp; skipping");
            continue;
        };
        match latest.get_mut(&lesson) {
            Some(prev) => {
                if ts > *prev {
                    *prev = ts;
                }
            }
            None => {
                latest.insert(lesson, ts);
                timed_order.push(lesson);
            }
        }
    }

    for v in verses {
        match verse_to_lesson.get(v) {
            Some(&lesson) => {
                if !ordered.contains(&lesson) {
                    ordered.push(lesson);
                }
            }
            None => warn!(verse = %v, "bookmark verse has no lesson; skipping"),
        }
    }
    for lesson in timed_order {
        if !ordered.contains(&lesson) {
            ordered.push(lesson);
        }
    }

    let timestamps: Vec<Option<DateTime<Utc>>> =
        ordered.iter().map(|id| latest.get(id).copied()).collect();
    let weights = recency_weights(&timestamps, tau_days, w_min);
    SeedSet::new(ordered, weights.normalized)
}
