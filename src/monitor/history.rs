//! 放送履歴
//!
//! 放送終了ごとに1件追加。新しいものが先頭で、上限を超えた古いものは捨てる。

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::collections::VecDeque;

use crate::io::hot_moment_store::session_date;

/// 放送1回分の履歴
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BroadcastHistoryRecord {
    pub date: String,
    pub title: String,
    /// パターンキー別のウェーブ数
    #[serde(default)]
    pub wave_counts: BTreeMap<String, u32>,
}

impl BroadcastHistoryRecord {
    pub fn new(title: &str, start_time: Option<&str>, wave_counts: BTreeMap<String, u32>) -> Self {
        Self {
            date: session_date(start_time),
            title: title.to_string(),
            wave_counts,
        }
    }
}

/// 上限付きの履歴リスト
#[derive(Debug, Clone)]
pub struct BroadcastHistoryLog {
    max_entries: usize,
    records: VecDeque<BroadcastHistoryRecord>,
}

impl BroadcastHistoryLog {
    pub fn new(max_entries: usize) -> Self {
        Self {
            max_entries,
            records: VecDeque::new(),
        }
    }

    /// 保存済みの記録から復元する（先頭が最新である前提）
    pub fn with_records(max_entries: usize, records: Vec<BroadcastHistoryRecord>) -> Self {
        let mut records: VecDeque<_> = records.into();
        records.truncate(max_entries);
        Self {
            max_entries,
            records,
        }
    }

    pub fn push(&mut self, record: BroadcastHistoryRecord) {
        tracing::info!(
            "✅ Broadcast history saved: {} '{}' (waves: {:?})",
            record.date,
            record.title,
            record.wave_counts
        );
        self.records.push_front(record);
        self.records.truncate(self.max_entries);
    }

    pub fn records(&self) -> Vec<BroadcastHistoryRecord> {
        self.records.iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}
