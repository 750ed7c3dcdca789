//! ログ初期化
//!
//! 標準出力は常に compact 形式。ファイル出力は日次ローテーションで、古いものから削除する。

use anyhow::{Context, Result};
use directories::ProjectDirs;
use std::fs;
use std::path::{Path, PathBuf};
use tracing_appender::non_blocking::WorkerGuard;

use crate::config::LogConfig;

/// ローテーションされるログファイル名の接頭辞
pub const LOG_FILE_PREFIX: &str = "wavewatch.log";

/// ログ初期化（tokio-console 版）
#[cfg(feature = "debug-tokio")]
pub fn init_logging(_config: &LogConfig) -> Result<Option<WorkerGuard>> {
    console_subscriber::init();
    Ok(None)
}

/// ログ初期化
///
/// 返されたガードは main の終了まで保持すること（破棄するとファイル出力が止まる）。
#[cfg(not(feature = "debug-tokio"))]
pub fn init_logging(config: &LogConfig) -> Result<Option<WorkerGuard>> {
    use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.level))
        .with_context(|| format!("Invalid log level: {}", config.level))?;

    let stdout_layer = fmt::layer()
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .compact();

    let mut log_dir = None;
    let (file_layer, guard) = if config.enable_file_logging {
        let dir = resolve_log_dir(config);
        fs::create_dir_all(&dir)
            .with_context(|| format!("Failed to create log directory: {}", dir.display()))?;

        let appender = tracing_appender::rolling::daily(&dir, LOG_FILE_PREFIX);
        let (writer, guard) = tracing_appender::non_blocking(appender);
        let layer = fmt::layer().with_writer(writer).with_ansi(false);
        log_dir = Some(dir);
        (Some(layer), Some(guard))
    } else {
        (None, None)
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(stdout_layer)
        .with(file_layer)
        .try_init()?;

    if let Some(dir) = log_dir {
        tracing::info!("📁 Writing logs to {}", dir.display());
        let removed = cleanup_old_logs(&dir, config.max_log_files);
        if removed > 0 {
            tracing::info!("🧹 Removed {} old log files", removed);
        }
    }

    Ok(guard)
}

/// ログディレクトリ（未指定ならXDGデータディレクトリ配下）
pub fn resolve_log_dir(config: &LogConfig) -> PathBuf {
    if let Some(dir) = &config.log_dir {
        return dir.clone();
    }
    ProjectDirs::from("dev", "wavewatch", "wavewatch")
        .map(|dirs| dirs.data_local_dir().join("logs"))
        .unwrap_or_else(|| PathBuf::from("logs"))
}

/// 新しい順に `max_files` 件を残して古いログを削除し、削除数を返す
pub fn cleanup_old_logs(dir: &Path, max_files: usize) -> usize {
    let pattern = dir.join(format!("{}.*", LOG_FILE_PREFIX));
    let pattern = pattern.to_string_lossy();

    let mut files: Vec<PathBuf> = match glob::glob(&pattern) {
        Ok(paths) => paths.filter_map(|entry| entry.ok()).collect(),
        Err(e) => {
            tracing::warn!("⚠️ Invalid log cleanup pattern '{}': {}", pattern, e);
            return 0;
        }
    };

    // 日付サフィックスなので名前の降順 = 新しい順
    files.sort_unstable_by(|a, b| b.cmp(a));

    let mut removed = 0;
    for old in files.iter().skip(max_files) {
        match fs::remove_file(old) {
            Ok(()) => removed += 1,
            Err(e) => tracing::warn!("⚠️ Failed to remove old log {}: {}", old.display(), e),
        }
    }
    removed
}
