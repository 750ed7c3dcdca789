//! Per-date JSON store for hot moments.
//!
//! One file per calendar date (`YYYY-MM-DD.json`). Each file holds every
//! session saved on that date, oldest first.

use chrono::Local;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use crate::detection::hot_moment::{HotMomentRecord, TIME_FORMAT};
use crate::error::{WaveWatchError, WaveWatchResult};

/// One saved broadcast session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionEntry {
    pub title: String,
    pub saved_at: String,
    pub hot_moments: Vec<HotMomentRecord>,
    /// Total matches per pattern key
    #[serde(default)]
    pub pattern_totals: BTreeMap<String, u64>,
}

/// Contents of one date file.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DailyHotMoments {
    pub date: String,
    #[serde(default)]
    pub last_updated: Option<String>,
    #[serde(default)]
    pub sessions: Vec<SessionEntry>,
}

impl DailyHotMoments {
    /// Per-pattern totals summed over every session of the day
    pub fn pattern_totals(&self) -> BTreeMap<String, u64> {
        let mut totals = BTreeMap::new();
        for session in &self.sessions {
            for (key, count) in &session.pattern_totals {
                *totals.entry(key.clone()).or_insert(0) += count;
            }
        }
        totals
    }
}

/// Date key (`YYYY-MM-DD`) for a session start time.
///
/// Uses the leading date part of `"YYYY-MM-DD HH:MM:SS"` and falls back to
/// today when the start time is absent or empty.
pub fn session_date(start_time: Option<&str>) -> String {
    start_time
        .and_then(|s| s.split_whitespace().next())
        .filter(|d| !d.is_empty())
        .map(|d| d.to_string())
        .unwrap_or_else(|| Local::now().format("%Y-%m-%d").to_string())
}

#[derive(Debug, Clone)]
pub struct HotMomentStore {
    data_dir: PathBuf,
}

impl HotMomentStore {
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
        }
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    fn day_path(&self, date: &str) -> PathBuf {
        self.data_dir.join(format!("{}.json", date))
    }

    /// Load one date file. A missing file is `Ok(None)`.
    pub fn load_day(&self, date: &str) -> WaveWatchResult<Option<DailyHotMoments>> {
        let path = self.day_path(date);
        if !path.exists() {
            return Ok(None);
        }

        let content = fs::read_to_string(&path)?;
        let day: DailyHotMoments = serde_json::from_str(&content)?;
        Ok(Some(day))
    }

    /// Append a session to the file for `date`, creating it if needed.
    ///
    /// A file that exists but cannot be parsed is left untouched and the
    /// append fails.
    pub fn append_session(&self, date: &str, entry: SessionEntry) -> WaveWatchResult<PathBuf> {
        fs::create_dir_all(&self.data_dir)?;

        let mut day = self.load_day(date)?.unwrap_or_default();
        day.date = date.to_string();
        day.last_updated = Some(Local::now().format(TIME_FORMAT).to_string());
        day.sessions.push(entry);

        let path = self.day_path(date);
        write_json_atomic(&path, &day)?;
        Ok(path)
    }

    /// Dates that have a stored file, newest first.
    pub fn list_dates(&self) -> Vec<String> {
        let entries = match fs::read_dir(&self.data_dir) {
            Ok(entries) => entries,
            Err(e) => {
                tracing::debug!(
                    "📂 Hot moment directory not readable ({}): {}",
                    self.data_dir.display(),
                    e
                );
                return Vec::new();
            }
        };

        let mut dates: Vec<String> = entries
            .filter_map(|entry| entry.ok())
            .filter_map(|entry| {
                let name = entry.file_name().to_string_lossy().into_owned();
                name.strip_suffix(".json").map(|d| d.to_string())
            })
            .collect();
        dates.sort_unstable_by(|a, b| b.cmp(a));
        dates
    }
}

/// Write pretty JSON through a temporary file and rename it into place.
pub(crate) fn write_json_atomic<T: Serialize>(path: &Path, value: &T) -> WaveWatchResult<()> {
    let json = serde_json::to_string_pretty(value)?;
    let tmp_path = path.with_extension("json.tmp");
    fs::write(&tmp_path, json)?;
    fs::rename(&tmp_path, path).map_err(|e| {
        WaveWatchError::generic(
            "saving json",
            format!("Failed to move '{}' into place: {}", tmp_path.display(), e),
        )
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn entry(title: &str, totals: &[(&str, u64)]) -> SessionEntry {
        SessionEntry {
            title: title.to_string(),
            saved_at: "2024-03-09 23:00:00".to_string(),
            hot_moments: vec![HotMomentRecord {
                time: "2024-03-09 21:00:00".to_string(),
                count: 20,
                description: "20초간 20회 [지창] 폭주!".to_string(),
                pattern_labels: vec!["지창".to_string()],
            }],
            pattern_totals: totals.iter().map(|(k, v)| (k.to_string(), *v)).collect(),
        }
    }

    #[test]
    fn test_session_date() {
        assert_eq!(session_date(Some("2024-03-09 21:00:00")), "2024-03-09");
        assert_eq!(session_date(Some("2024-03-09")), "2024-03-09");

        let today = Local::now().format("%Y-%m-%d").to_string();
        assert_eq!(session_date(None), today);
        assert_eq!(session_date(Some("")), today);
        assert_eq!(session_date(Some("   ")), today);
    }

    #[test]
    fn test_append_creates_directory_and_file() {
        let dir = TempDir::new().unwrap();
        let store = HotMomentStore::new(dir.path().join("nested/hot_moments"));

        let path = store
            .append_session("2024-03-09", entry("방송", &[("ji_chang", 3)]))
            .unwrap();
        assert!(path.exists());

        let day = store.load_day("2024-03-09").unwrap().unwrap();
        assert_eq!(day.date, "2024-03-09");
        assert!(day.last_updated.is_some());
        assert_eq!(day.sessions.len(), 1);
        assert_eq!(day.sessions[0].hot_moments[0].count, 20);
    }

    #[test]
    fn test_daily_totals_sum_sessions() {
        let dir = TempDir::new().unwrap();
        let store = HotMomentStore::new(dir.path());

        store
            .append_session("2024-03-09", entry("1부", &[("ji_chang", 3), ("sesin", 1)]))
            .unwrap();
        store
            .append_session("2024-03-09", entry("2부", &[("ji_chang", 4)]))
            .unwrap();

        let totals = store.load_day("2024-03-09").unwrap().unwrap().pattern_totals();
        assert_eq!(totals.get("ji_chang"), Some(&7));
        assert_eq!(totals.get("sesin"), Some(&1));
    }

    #[test]
    fn test_corrupt_file_is_not_overwritten() {
        let dir = TempDir::new().unwrap();
        let store = HotMomentStore::new(dir.path());
        let path = dir.path().join("2024-03-09.json");
        fs::write(&path, "{ not json").unwrap();

        let result = store.append_session("2024-03-09", entry("방송", &[]));
        assert!(matches!(result, Err(WaveWatchError::Json(_))));
        assert_eq!(fs::read_to_string(&path).unwrap(), "{ not json");
    }

    #[test]
    fn test_missing_day_is_none() {
        let dir = TempDir::new().unwrap();
        let store = HotMomentStore::new(dir.path());
        assert!(store.load_day("1999-01-01").unwrap().is_none());
    }

    #[test]
    fn test_list_dates_newest_first() {
        let dir = TempDir::new().unwrap();
        let store = HotMomentStore::new(dir.path());
        for date in ["2024-03-08", "2024-03-10", "2024-03-09"] {
            store.append_session(date, entry("방송", &[])).unwrap();
        }
        fs::write(dir.path().join("notes.txt"), "ignored").unwrap();

        assert_eq!(
            store.list_dates(),
            vec!["2024-03-10", "2024-03-09", "2024-03-08"]
        );
    }

    #[test]
    fn test_list_dates_without_directory() {
        let dir = TempDir::new().unwrap();
        let store = HotMomentStore::new(dir.path().join("missing"));
        assert!(store.list_dates().is_empty());
    }
}
