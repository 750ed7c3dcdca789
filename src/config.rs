//! アプリケーション設定管理モジュール
//!
//! XDGディレクトリ上の `config.toml` を読み書きする。ファイルが無ければ既定値で動く。

use anyhow::{Context, Result};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use crate::api::{BroadcasterConfig, HttpConfig};
use crate::chat::TransportConfig;
use crate::detection::{default_patterns, HotMomentConfig, PatternConfig, WaveDetectionConfig};

/// ログ設定
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// ログレベル (trace/debug/info/warn/error)。RUST_LOG があればそちらを優先
    pub level: String,
    /// カスタムログディレクトリ（Noneの場合はXDGデフォルト使用）
    pub log_dir: Option<PathBuf>,
    /// ファイル出力有効化
    pub enable_file_logging: bool,
    /// 保存するログファイル数上限
    pub max_log_files: usize,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            log_dir: None,
            enable_file_logging: false,
            max_log_files: 14,
        }
    }
}

/// 放送履歴設定
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HistoryConfig {
    pub max_entries: usize,
    pub file: PathBuf,
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self {
            max_entries: 50,
            file: PathBuf::from("data/history.json"),
        }
    }
}

/// アプリケーション設定
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub broadcaster: BroadcasterConfig,
    pub wave: WaveDetectionConfig,
    pub hot_moments: HotMomentConfig,
    pub history: HistoryConfig,
    pub http: HttpConfig,
    pub transport: TransportConfig,
    pub log: LogConfig,
    /// 追跡するパターン（データとして定義）
    pub patterns: Vec<PatternConfig>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            broadcaster: BroadcasterConfig::default(),
            wave: WaveDetectionConfig::default(),
            hot_moments: HotMomentConfig::default(),
            history: HistoryConfig::default(),
            http: HttpConfig::default(),
            transport: TransportConfig::default(),
            log: LogConfig::default(),
            patterns: default_patterns(),
        }
    }
}

impl AppConfig {
    /// 監視対象の配信者IDを差し替える
    pub fn override_broadcaster(&mut self, id: &str) {
        self.broadcaster.id = id.to_string();
    }

    /// データ保存先をまとめて差し替える
    ///
    /// `<dir>/hot_moments/` と `<dir>/history.json` を使う。
    pub fn override_data_dir(&mut self, dir: &Path) {
        self.hot_moments.data_directory = dir.join("hot_moments");
        self.history.file = dir.join("history.json");
    }

    pub fn override_log_level(&mut self, level: &str) {
        self.log.level = level.to_string();
    }
}

/// 設定管理マネージャー
#[derive(Debug, Clone)]
pub struct ConfigManager {
    config_path: PathBuf,
}

impl ConfigManager {
    /// XDG設定ディレクトリを使う設定マネージャーを作成
    pub fn new() -> Result<Self> {
        let project_dirs = ProjectDirs::from("dev", "wavewatch", "wavewatch")
            .context("Failed to get project directories")?;
        let config_path = project_dirs.config_dir().join("config.toml");
        debug!("Config file path: {}", config_path.display());

        Ok(Self { config_path })
    }

    /// 任意のパスを使う設定マネージャーを作成
    pub fn with_path(path: impl Into<PathBuf>) -> Self {
        Self {
            config_path: path.into(),
        }
    }

    pub fn config_path(&self) -> &Path {
        &self.config_path
    }

    pub fn config_exists(&self) -> bool {
        self.config_path.exists()
    }

    /// 設定を読み込み
    pub fn load_config(&self) -> Result<AppConfig> {
        if !self.config_path.exists() {
            info!(
                "Config file not found, using default settings: {}",
                self.config_path.display()
            );
            return Ok(AppConfig::default());
        }

        let config_content = fs::read_to_string(&self.config_path).with_context(|| {
            format!("Failed to read config file: {}", self.config_path.display())
        })?;

        let config: AppConfig = toml::from_str(&config_content).with_context(|| {
            format!(
                "Failed to parse config file: {}",
                self.config_path.display()
            )
        })?;

        info!(
            "✅ Configuration loaded from: {}",
            self.config_path.display()
        );

        Ok(config)
    }

    /// 設定を保存
    pub fn save_config(&self, config: &AppConfig) -> Result<()> {
        if let Some(parent) = self.config_path.parent() {
            fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create config directory: {}", parent.display())
            })?;
        }

        let config_content = render_config(config)?;
        fs::write(&self.config_path, config_content).with_context(|| {
            format!(
                "Failed to write config file: {}",
                self.config_path.display()
            )
        })?;

        info!("💾 Configuration saved to: {}", self.config_path.display());

        Ok(())
    }
}

/// TOML 文字列に整形
pub fn render_config(config: &AppConfig) -> Result<String> {
    toml::to_string_pretty(config).context("Failed to serialize config")
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_default_config_values() {
        let config = AppConfig::default();
        assert_eq!(config.broadcaster.id, "cnsgkcnehd74");
        assert_eq!(config.patterns.len(), 5);
        assert_eq!(config.wave.min_message_count, 20);
        assert_eq!(config.hot_moments.max_records, 100);
        assert_eq!(config.history.max_entries, 50);
        assert_eq!(config.transport.ping_interval_secs, 20);
        assert_eq!(config.http.timeout_secs, 15);
        assert!(!config.log.enable_file_logging);
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let config: AppConfig = toml::from_str(
            r#"
            [broadcaster]
            id = "other"

            [wave]
            min_message_count = 5
            "#,
        )
        .unwrap();

        assert_eq!(config.broadcaster.id, "other");
        assert_eq!(config.broadcaster.name, BroadcasterConfig::default().name);
        assert_eq!(config.wave.min_message_count, 5);
        assert_eq!(config.wave.cooldown_secs, 60);
        assert_eq!(config.patterns, default_patterns());
    }

    #[test]
    fn test_custom_patterns_replace_defaults() {
        let config: AppConfig = toml::from_str(
            r#"
            [[patterns]]
            key = "lol"
            label = "ㅋㅋ"
            regex = "ㅋ{3,}"
            "#,
        )
        .unwrap();

        assert_eq!(config.patterns, vec![PatternConfig::new("lol", "ㅋㅋ", "ㅋ{3,}")]);
    }

    #[test]
    fn test_render_and_parse_back() {
        let config = AppConfig::default();
        let rendered = render_config(&config).unwrap();
        let parsed: AppConfig = toml::from_str(&rendered).unwrap();
        assert_eq!(parsed, config);
    }

    #[test]
    fn test_load_missing_file_gives_defaults() {
        let dir = TempDir::new().unwrap();
        let manager = ConfigManager::with_path(dir.path().join("config.toml"));
        assert!(!manager.config_exists());
        assert_eq!(manager.load_config().unwrap(), AppConfig::default());
    }

    #[test]
    fn test_save_then_load() {
        let dir = TempDir::new().unwrap();
        let manager = ConfigManager::with_path(dir.path().join("nested/config.toml"));

        let mut config = AppConfig::default();
        config.override_broadcaster("someone");
        manager.save_config(&config).unwrap();

        assert!(manager.config_exists());
        assert_eq!(manager.load_config().unwrap().broadcaster.id, "someone");
    }

    #[test]
    fn test_invalid_toml_is_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(&path, "[wave\nbroken").unwrap();

        let err = ConfigManager::with_path(&path).load_config().unwrap_err();
        assert!(err.to_string().contains("Failed to parse config file"));
    }

    #[test]
    fn test_overrides() {
        let mut config = AppConfig::default();
        config.override_data_dir(Path::new("/tmp/ww"));
        config.override_log_level("debug");

        assert_eq!(
            config.hot_moments.data_directory,
            PathBuf::from("/tmp/ww/hot_moments")
        );
        assert_eq!(config.history.file, PathBuf::from("/tmp/ww/history.json"));
        assert_eq!(config.log.level, "debug");
    }
}
