//! Pattern detection: per-pattern scanners plus the hot-moment recorder.

pub mod hot_moment;
pub mod scanner;

pub use hot_moment::{
    HotMomentConfig, HotMomentDetector, HotMomentRecord, HotMomentRecorder, WAVE_WINDOW_SECS,
};
pub use scanner::{
    default_patterns, PatternConfig, PatternDefinition, PatternScanner, ScannerState,
    WaveConfirmation, WaveDetectionConfig,
};

use chrono::{DateTime, Local};
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::sync::Arc;

use crate::error::WaveWatchResult;

/// セッション間で共有される検出状態
pub type SharedDetection<R> = Arc<Mutex<DetectionState<R>>>;

/// スキャナー群と記録器
///
/// 受信ループとオーケストレーターの両方からロック越しに触られる。
#[derive(Debug)]
pub struct DetectionState<R> {
    scanners: Vec<PatternScanner>,
    recorder: R,
    last_detected_at: Option<DateTime<Local>>,
}

impl<R: HotMomentRecorder> DetectionState<R> {
    pub fn new(scanners: Vec<PatternScanner>, recorder: R) -> Self {
        Self {
            scanners,
            recorder,
            last_detected_at: None,
        }
    }

    /// パターン定義から全スキャナーを組み立てる
    pub fn from_patterns(
        patterns: &[PatternConfig],
        wave: WaveDetectionConfig,
        recorder: R,
    ) -> WaveWatchResult<Self> {
        let scanners = patterns
            .iter()
            .map(|p| PatternDefinition::from_config(p).map(|d| PatternScanner::new(d, wave)))
            .collect::<WaveWatchResult<Vec<_>>>()?;
        Ok(Self::new(scanners, recorder))
    }

    pub fn into_shared(self) -> SharedDetection<R> {
        Arc::new(Mutex::new(self))
    }

    pub fn scanners(&self) -> &[PatternScanner] {
        &self.scanners
    }

    pub fn recorder(&self) -> &R {
        &self.recorder
    }

    pub fn last_detected_at(&self) -> Option<DateTime<Local>> {
        self.last_detected_at
    }

    /// 1メッセージを全スキャナーに流し、確定したウェーブを記録する
    pub fn handle_message(&mut self, text: &str, now: DateTime<Local>) -> Vec<HotMomentRecord> {
        let mut matched = false;
        for scanner in self.scanners.iter_mut() {
            matched |= scanner.process(text, now);
        }
        if matched {
            self.last_detected_at = Some(now);
        }

        let mut recorded = Vec::new();
        for scanner in self.scanners.iter_mut() {
            if let Some(wave) = scanner.take_confirmation() {
                recorded.push(self.recorder.record_wave(
                    wave.timestamp,
                    scanner.label(),
                    wave.burst_size,
                ));
            }
        }
        recorded
    }

    /// スキャナーだけを初期化（記録器の初期化は呼び出し側）
    pub fn reset_scanners(&mut self) {
        for scanner in self.scanners.iter_mut() {
            scanner.reset();
        }
        self.last_detected_at = None;
    }

    /// パターンキー別の総マッチ数
    pub fn pattern_totals(&self) -> BTreeMap<String, u64> {
        self.scanners
            .iter()
            .map(|s| (s.key().to_string(), s.total_count()))
            .collect()
    }

    /// パターンキー別のウェーブ数
    pub fn wave_counts(&self) -> BTreeMap<String, u32> {
        self.scanners
            .iter()
            .map(|s| (s.key().to_string(), s.wave_count()))
            .collect()
    }
}

impl DetectionState<HotMomentDetector> {
    /// 新しいセッション用にすべて初期化
    pub fn reset(&mut self) {
        self.reset_scanners();
        self.recorder.reset();
    }
}
