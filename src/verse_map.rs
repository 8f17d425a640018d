//! Verse → lesson lookup tables for the reading app.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct VerseSpan {
    pub chapter: u32,
    pub start: u32,
    pub end: u32,
}

/// One entry of `lesson_units.json`, aligned with the lesson index.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LessonUnits {
    /// First-pass cluster the lesson was curated from, when known.
    #[serde(default)]
    pub old_cluster_id: Option<i64>,
    #[serde(default)]
    pub units: Vec<VerseSpan>,
}

pub fn verse_key(chapter: u32, verse: u32) -> String {
    format!("{chapter}:{verse}")
}

#[derive(Debug, Default)]
pub struct VerseMaps {
    /// Each verse mapped to the lowest lesson index covering it.
    pub primary: BTreeMap<String, usize>,
    /// Each verse mapped to every covering lesson, in lesson order.
    pub all_hits: BTreeMap<String, Vec<usize>>,
}

/// Walk every span of every lesson. A span whose end precedes its start
/// covers only its start verse.
pub fn build(lessons: &[LessonUnits]) -> VerseMaps {
    let mut maps = VerseMaps::default();
    for (lesson, entry) in lessons.iter().enumerate() {
        for span in &entry.units {
            let end = span.end.max(span.start);
            for verse in span.start..=end {
                let key = verse_key(span.chapter, verse);
                maps.all_hits.entry(key.clone()).or_default().push(lesson);
                maps.primary.entry(key).or_insert(lesson);
            }
        }
    }
    maps
}
