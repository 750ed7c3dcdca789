//! パターン別のストリーク／ウェーブ判定
//!
//! 1つの `PatternScanner` が1つのパターンを担当し、マッチしたメッセージの
//! 連続（ストリーク）からウェーブを確定する。

use chrono::{DateTime, Duration, Local};
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::{WaveWatchError, WaveWatchResult};

/// 設定ファイル上のパターン定義
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PatternConfig {
    pub key: String,
    pub label: String,
    pub regex: String,
}

impl PatternConfig {
    pub fn new(key: &str, label: &str, regex: &str) -> Self {
        Self {
            key: key.to_string(),
            label: label.to_string(),
            regex: regex.to_string(),
        }
    }
}

/// 既定の追跡パターン（揺れ表記を許容する）
pub fn default_patterns() -> Vec<PatternConfig> {
    vec![
        PatternConfig::new("ji_chang", "지창", r"지[ㅡ\s~-]*창"),
        PatternConfig::new("sesin", "세신", r"세[ㅡ\s~-]*신"),
        PatternConfig::new("jjajang", "짜장면", r"짜[ㅡ\s~-]*장[ㅡ\s~-]*면"),
        PatternConfig::new("djrg", "ㄷㅈㄹㄱ", r"ㄷ[ㅡ\s~-]*ㅈ[ㅡ\s~-]*ㄹ[ㅡ\s~-]*ㄱ"),
        PatternConfig::new(
            "sdn",
            "ㅆㄷㄴ",
            r"(?:ㅆ[ㅡ\s~-]*ㄷ[ㅡ\s~-]*ㄴ|쌋[ㅡ\s~-]*다[ㅡ\s~-]*나|쌌[ㅡ\s~-]*다[ㅡ\s~-]*나)",
        ),
    ]
}

/// コンパイル済みパターン（起動時に生成し、以後不変）
#[derive(Debug, Clone)]
pub struct PatternDefinition {
    key: String,
    label: String,
    matcher: Regex,
}

impl PatternDefinition {
    pub fn new(key: &str, label: &str, pattern: &str) -> WaveWatchResult<Self> {
        let matcher = Regex::new(pattern).map_err(|source| WaveWatchError::Pattern {
            key: key.to_string(),
            source,
        })?;

        Ok(Self {
            key: key.to_string(),
            label: label.to_string(),
            matcher,
        })
    }

    pub fn from_config(config: &PatternConfig) -> WaveWatchResult<Self> {
        Self::new(&config.key, &config.label, &config.regex)
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn is_match(&self, text: &str) -> bool {
        self.matcher.is_match(text)
    }
}

/// ウェーブ判定の閾値
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WaveDetectionConfig {
    /// ストリーク開始からの最短継続時間
    pub min_duration_secs: u64,
    /// 確定に必要な最小メッセージ数
    pub min_message_count: u32,
    /// これを超える間隔が空くとストリークを閉じる
    pub gap_timeout_secs: u64,
    /// ウェーブ確定後のクールダウン
    pub cooldown_secs: u64,
}

impl Default for WaveDetectionConfig {
    fn default() -> Self {
        Self {
            min_duration_secs: 20,
            min_message_count: 20,
            gap_timeout_secs: 10,
            cooldown_secs: 60,
        }
    }
}

impl WaveDetectionConfig {
    fn min_duration(&self) -> Duration {
        Duration::seconds(self.min_duration_secs as i64)
    }

    fn gap_timeout(&self) -> Duration {
        Duration::seconds(self.gap_timeout_secs as i64)
    }

    fn cooldown(&self) -> Duration {
        Duration::seconds(self.cooldown_secs as i64)
    }
}

/// スキャナーのセッション内カウンター
///
/// `streak_start` が `Some` の間ストリークが開いている。
/// `streak_confirmed` は1ストリークにつき1回しか立たない。
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScannerState {
    pub wave_count: u32,
    pub total_count: u64,
    pub streak_start: Option<DateTime<Local>>,
    pub streak_last: Option<DateTime<Local>>,
    pub streak_count: u32,
    pub streak_confirmed: bool,
    pub last_wave_time: Option<DateTime<Local>>,
}

impl ScannerState {
    fn close_streak(&mut self) {
        self.streak_start = None;
        self.streak_last = None;
        self.streak_count = 0;
        self.streak_confirmed = false;
    }

    pub fn is_streak_open(&self) -> bool {
        self.streak_start.is_some()
    }
}

/// 確定したウェーブ（取り出すまで1件だけ保持される）
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WaveConfirmation {
    pub timestamp: DateTime<Local>,
    pub burst_size: u32,
}

/// 1パターン分のスキャナー
#[derive(Debug, Clone)]
pub struct PatternScanner {
    definition: PatternDefinition,
    config: WaveDetectionConfig,
    state: ScannerState,
    pending: Option<WaveConfirmation>,
}

impl PatternScanner {
    pub fn new(definition: PatternDefinition, config: WaveDetectionConfig) -> Self {
        Self {
            definition,
            config,
            state: ScannerState::default(),
            pending: None,
        }
    }

    pub fn key(&self) -> &str {
        self.definition.key()
    }

    pub fn label(&self) -> &str {
        self.definition.label()
    }

    pub fn wave_count(&self) -> u32 {
        self.state.wave_count
    }

    pub fn total_count(&self) -> u64 {
        self.state.total_count
    }

    pub fn state(&self) -> &ScannerState {
        &self.state
    }

    /// 新しいセッション開始時に全状態を初期化
    pub fn reset(&mut self) {
        self.state = ScannerState::default();
        self.pending = None;
    }

    /// メッセージを判定し、マッチしたら `true` を返す
    pub fn process(&mut self, text: &str, timestamp: DateTime<Local>) -> bool {
        if !self.definition.is_match(text) {
            return false;
        }

        self.state.total_count += 1;
        self.update_streak(timestamp);
        true
    }

    /// 確定済みウェーブを取り出す（取り出すとクリアされる）
    pub fn take_confirmation(&mut self) -> Option<WaveConfirmation> {
        self.pending.take()
    }

    fn update_streak(&mut self, timestamp: DateTime<Local>) {
        if let Some(last) = self.state.streak_last {
            if timestamp - last > self.config.gap_timeout() {
                tracing::trace!(pattern = %self.key(), "⏹️ Streak closed by gap timeout");
                self.state.close_streak();
            }
        }

        if self.state.streak_start.is_none() {
            self.state.streak_start = Some(timestamp);
            self.state.streak_count = 0;
            self.state.streak_confirmed = false;
        }

        self.state.streak_count += 1;
        self.state.streak_last = Some(timestamp);

        self.check_confirmation(timestamp);
    }

    fn check_confirmation(&mut self, timestamp: DateTime<Local>) {
        if self.state.streak_confirmed || self.is_cooling_down(timestamp) {
            return;
        }
        let Some(start) = self.state.streak_start else {
            return;
        };

        let long_enough = timestamp - start >= self.config.min_duration();
        let count_enough = self.state.streak_count >= self.config.min_message_count;

        if long_enough && count_enough {
            self.state.wave_count += 1;
            self.state.streak_confirmed = true;
            self.state.last_wave_time = Some(timestamp);
            self.pending = Some(WaveConfirmation {
                timestamp,
                burst_size: self.state.streak_count,
            });

            tracing::info!(
                pattern = %self.key(),
                burst = self.state.streak_count,
                waves = self.state.wave_count,
                "🌊 [WAVE] {} confirmed",
                self.label()
            );
        }
    }

    fn is_cooling_down(&self, timestamp: DateTime<Local>) -> bool {
        match self.state.last_wave_time {
            Some(last_wave) => timestamp - last_wave <= self.config.cooldown(),
            None => false,
        }
    }
}
