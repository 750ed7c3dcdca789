//! JSON file holding the bounded broadcast history, most recent first.

use std::fs;
use std::path::{Path, PathBuf};

use crate::error::WaveWatchResult;
use crate::io::hot_moment_store::write_json_atomic;
use crate::monitor::history::BroadcastHistoryRecord;

#[derive(Debug, Clone)]
pub struct HistoryStore {
    path: PathBuf,
}

impl HistoryStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load all records. A missing file is an empty history.
    pub fn load(&self) -> WaveWatchResult<Vec<BroadcastHistoryRecord>> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }
        let content = fs::read_to_string(&self.path)?;
        Ok(serde_json::from_str(&content)?)
    }

    pub fn save(&self, records: &[BroadcastHistoryRecord]) -> WaveWatchResult<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        write_json_atomic(&self.path, &records)
    }
}
