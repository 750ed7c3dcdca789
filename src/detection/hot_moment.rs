//! Hot Moment 記録
//!
//! ウェーブ1件 = Hot Moment 1件。確定したウェーブだけがここに流れてくる。

use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, VecDeque};
use std::path::PathBuf;

use crate::io::hot_moment_store::{session_date, HotMomentStore, SessionEntry};

/// 説明文に使うウェーブの時間窓（秒）
pub const WAVE_WINDOW_SECS: u64 = 20;

/// 記録時刻のフォーマット
pub const TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Hot Moment 1件
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HotMomentRecord {
    pub time: String,
    pub count: u32,
    pub description: String,
    #[serde(default)]
    pub pattern_labels: Vec<String>,
}

impl HotMomentRecord {
    pub fn from_wave(timestamp: DateTime<Local>, pattern_label: &str, burst_size: u32) -> Self {
        Self {
            time: timestamp.format(TIME_FORMAT).to_string(),
            count: burst_size,
            description: format!(
                "{}초간 {}회 [{}] 폭주!",
                WAVE_WINDOW_SECS, burst_size, pattern_label
            ),
            pattern_labels: vec![pattern_label.to_string()],
        }
    }
}

/// ウェーブ確定を受け取る記録先の抽象インタフェース
pub trait HotMomentRecorder: Send {
    fn record_wave(
        &mut self,
        timestamp: DateTime<Local>,
        pattern_label: &str,
        burst_size: u32,
    ) -> HotMomentRecord;
}

/// Hot Moment 設定
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HotMomentConfig {
    /// メモリ上に保持する最大件数
    pub max_records: usize,
    /// 日付別JSONの保存先
    pub data_directory: PathBuf,
}

impl Default for HotMomentConfig {
    fn default() -> Self {
        Self {
            max_records: 100,
            data_directory: PathBuf::from("data/hot_moments"),
        }
    }
}

/// 本番用の Hot Moment 記録器
///
/// 新しいものが先頭。上限を超えたら最も古いものから捨てる。
#[derive(Debug)]
pub struct HotMomentDetector {
    max_records: usize,
    records: VecDeque<HotMomentRecord>,
    store: HotMomentStore,
}

impl HotMomentDetector {
    pub fn new(config: &HotMomentConfig) -> Self {
        Self {
            max_records: config.max_records,
            records: VecDeque::new(),
            store: HotMomentStore::new(config.data_directory.clone()),
        }
    }

    pub fn hot_moments(&self) -> Vec<HotMomentRecord> {
        self.records.iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn store(&self) -> &HotMomentStore {
        &self.store
    }

    /// セッション開始時にメモリ上の記録だけを消す（保存済みデータは残る）
    pub fn reset(&mut self) {
        self.records.clear();
    }

    /// 現在の記録を1セッション分として日付別ファイルに追記
    ///
    /// 記録が空なら何もしない。失敗はログに残して握りつぶす。
    pub fn persist(
        &self,
        session_title: &str,
        start_time: Option<&str>,
        pattern_totals: &BTreeMap<String, u64>,
    ) -> Option<PathBuf> {
        if self.records.is_empty() {
            tracing::info!("📝 No hot moments to save for '{}'", session_title);
            return None;
        }

        let date = session_date(start_time);
        let entry = SessionEntry {
            title: session_title.to_string(),
            saved_at: Local::now().format(TIME_FORMAT).to_string(),
            hot_moments: self.hot_moments(),
            pattern_totals: pattern_totals.clone(),
        };

        match self.store.append_session(&date, entry) {
            Ok(path) => {
                tracing::info!(
                    "💾 Hot moments saved: {} ({} records)",
                    path.display(),
                    self.records.len()
                );
                Some(path)
            }
            Err(e) => {
                tracing::warn!("⚠️ Failed to save hot moments for {}: {}", date, e);
                None
            }
        }
    }
}

impl HotMomentRecorder for HotMomentDetector {
    fn record_wave(
        &mut self,
        timestamp: DateTime<Local>,
        pattern_label: &str,
        burst_size: u32,
    ) -> HotMomentRecord {
        let record = HotMomentRecord::from_wave(timestamp, pattern_label, burst_size);

        self.records.push_front(record.clone());
        while self.records.len() > self.max_records {
            self.records.pop_back();
        }

        tracing::info!(
            "🔥 [HOT] {} - {}",
            timestamp.format("%H:%M:%S"),
            record.description
        );
        record
    }
}
