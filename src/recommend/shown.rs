//! The "recently shown" log: lessons the reader saw within the no-repeat
//! horizon are excluded from recommendations.

use chrono::{DateTime, TimeDelta, Utc};
use serde::Deserialize;
use std::collections::HashSet;
use std::path::Path;
use tracing::warn;

use super::weights::parse_timestamp;

#[derive(Debug, Clone, Deserialize)]
pub struct ShownEntry {
    pub index: Option<i64>,
    pub ts: Option<String>,
}

/// Lessons shown at or after `now - horizon_days`. Entries with a missing
/// index, negative index or unreadable timestamp are ignored. A horizon
/// reaching past the representable calendar covers every entry.
pub fn recently_shown(entries: &[ShownEntry], now: DateTime<Utc>, horizon_days: f64) -> HashSet<usize> {
    let cutoff = cutoff(now, horizon_days);
    entries
        .iter()
        .filter_map(|e| {
            let index = usize::try_from(e.index?).ok()?;
            let ts = parse_timestamp(e.ts.as_deref()?)?;
            cutoff.is_none_or(|c| ts >= c).then_some(index)
        })
        .collect()
}

/// `None` when the window start is before the earliest representable time.
fn cutoff(now: DateTime<Utc>, horizon_days: f64) -> Option<DateTime<Utc>> {
    let millis = (horizon_days * 86_400_000.0) as i64;
    TimeDelta::try_milliseconds(millis).and_then(|d| now.checked_sub_signed(d))
}

/// Load the log at `path`. The log is optional: a missing path yields an
/// empty set, and an unreadable file is logged and treated as empty.
pub fn load(path: Option<&Path>, now: DateTime<Utc>, horizon_days: f64) -> HashSet<usize> {
    let Some(path) = path else {
        return HashSet::new();
    };
    if !path.exists() {
        return HashSet::new();
    }
    match crate::store::read_json::<Vec<ShownEntry>>(path) {
        Ok(entries) => recently_shown(&entries, now, horizon_days),
        Err(e) => {
            warn!(path = %path.display(), error = %format!("{e:#}"), "ignoring unreadable shown log");
            HashSet::new()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(index: i64, ts: &str) -> ShownEntry {
        ShownEntry {
            index: Some(index),
            ts: Some(ts.into()),
        }
    }

    #[test]
    fn keeps_only_entries_inside_horizon() {
        let now = parse_timestamp("2025-06-30T00:00:00Z").unwrap();
        let entries = vec![
            entry(1, "2025-06-29T00:00:00Z"),
            entry(2, "2024-01-01T00:00:00Z"),
            entry(-4, "2025-06-29T00:00:00Z"),
            entry(5, "not a date"),
            ShownEntry { index: None, ts: Some("2025-06-29T00:00:00Z".into()) },
        ];
        let shown = recently_shown(&entries, now, 180.0);
        assert_eq!(shown, HashSet::from([1]));
    }

    #[test]
    fn endless_horizon_keeps_everything() {
        let now = parse_timestamp("2025-06-30T00:00:00Z").unwrap();
        let entries = vec![entry(1, "2025-06-29T00:00:00Z"), entry(2, "1970-01-01T00:00:00Z")];
        assert_eq!(recently_shown(&entries, now, 1.0e9), HashSet::from([1, 2]));
        assert_eq!(recently_shown(&entries, now, f64::INFINITY), HashSet::from([1, 2]));
    }

    #[test]
    fn missing_and_broken_files_are_empty() {
        let dir = tempfile::tempdir().unwrap();
        let now = Utc::now();
        assert!(load(Some(&dir.path().join("absent.json")), now, 30.0).is_empty());

        let broken = dir.path().join("shown.json");
        std::fs::write(&broken, "[{").unwrap();
        assert!(load(Some(&broken), now, 30.0).is_empty());
        assert!(load(None, now, 30.0).is_empty());
    }

    #[test]
    fn loads_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("shown.json");
        std::fs::write(&path, r#"[{"index": 12, "ts": "2025-06-01T08:00:00Z"}]"#).unwrap();
        let now = parse_timestamp("2025-06-02T00:00:00Z").unwrap();
        assert_eq!(load(Some(&path), now, 180.0), HashSet::from([12]));
    }
}
