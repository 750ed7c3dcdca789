use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;

use wavewatch::config::render_config;
use wavewatch::io::{HistoryStore, HotMomentStore};
use wavewatch::logging::init_logging;
use wavewatch::{AppConfig, ConfigManager, MonitorBot};

#[derive(Parser, Debug)]
#[command(
    name = "wavewatch",
    version,
    about = "Live chat wave and hot-moment watcher for a single SOOP channel"
)]
struct Cli {
    /// 設定ファイル（省略時はXDG設定ディレクトリの config.toml）
    #[arg(long, value_name = "FILE", global = true)]
    config: Option<PathBuf>,

    /// 監視する配信者ID
    #[arg(long, value_name = "ID", global = true)]
    broadcaster: Option<String>,

    /// データ保存ディレクトリ
    #[arg(long, value_name = "DIR", global = true)]
    data_dir: Option<PathBuf>,

    /// ログレベル (trace/debug/info/warn/error)
    #[arg(long, value_name = "LEVEL", global = true)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// 配信を監視する（既定）
    Run,
    /// 保存済みの Hot Moment を表示する
    History {
        /// YYYY-MM-DD（省略時は日付一覧）
        date: Option<String>,
    },
    /// 有効な設定を表示する
    Config {
        /// 設定ファイルに書き出す
        #[arg(long)]
        save: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let manager = match &cli.config {
        Some(path) => ConfigManager::with_path(path),
        None => ConfigManager::new()?,
    };
    let mut config = manager.load_config()?;
    apply_overrides(&cli, &mut config);

    let _log_guard = init_logging(&config.log)?;

    match cli.command {
        None | Some(Command::Run) => run(config).await,
        Some(Command::History { date }) => show_history(&config, date.as_deref()),
        Some(Command::Config { save }) => show_config(&manager, &config, save),
    }
}

fn apply_overrides(cli: &Cli, config: &mut AppConfig) {
    if let Some(id) = &cli.broadcaster {
        config.override_broadcaster(id);
    }
    if let Some(dir) = &cli.data_dir {
        config.override_data_dir(dir);
    }
    if let Some(level) = &cli.log_level {
        config.override_log_level(level);
    }
}

async fn run(config: AppConfig) -> Result<()> {
    // 証明書検証を差し替えない経路でも使うプロセス既定のプロバイダー
    let _ = rustls::crypto::ring::default_provider().install_default();

    let mut bot = MonitorBot::from_config(&config).context("Failed to build monitor")?;

    tokio::select! {
        _ = bot.run_forever() => {}
        signal = tokio::signal::ctrl_c() => match signal {
            Ok(()) => tracing::info!("🛑 Received Ctrl-C"),
            Err(e) => tracing::warn!("⚠️ Failed to listen for Ctrl-C: {}", e),
        },
    }

    bot.shutdown().await;
    tracing::info!("👋 wavewatch shutting down");
    Ok(())
}

fn show_history(config: &AppConfig, date: Option<&str>) -> Result<()> {
    let store = HotMomentStore::new(&config.hot_moments.data_directory);

    let Some(date) = date else {
        let dates = store.list_dates();
        if dates.is_empty() {
            println!("No hot moments recorded yet");
        }
        for date in dates {
            println!("{}", date);
        }

        let history = HistoryStore::new(&config.history.file)
            .load()
            .context("Failed to load broadcast history")?;
        if !history.is_empty() {
            println!("\nRecent broadcasts:");
        }
        for record in history {
            let waves: Vec<String> = record
                .wave_counts
                .iter()
                .map(|(key, count)| format!("{}={}", key, count))
                .collect();
            println!("  {}  {}  [{}]", record.date, record.title, waves.join(" "));
        }
        return Ok(());
    };

    let day = store
        .load_day(date)
        .with_context(|| format!("Failed to load hot moments for {}", date))?;
    let Some(day) = day else {
        println!("No hot moments recorded on {}", date);
        return Ok(());
    };

    println!(
        "📅 {} (last updated: {})",
        day.date,
        day.last_updated.as_deref().unwrap_or("-")
    );
    for session in &day.sessions {
        println!("\n📺 {} (saved {})", session.title, session.saved_at);
        for moment in &session.hot_moments {
            println!("  🔥 {}  {}", moment.time, moment.description);
        }
    }

    println!("\nTotals:");
    for (key, total) in day.pattern_totals() {
        println!("  {}: {}", key, total);
    }
    Ok(())
}

fn show_config(manager: &ConfigManager, config: &AppConfig, save: bool) -> Result<()> {
    println!("# {}", manager.config_path().display());
    println!("{}", render_config(config)?);
    if save {
        manager.save_config(config)?;
    }
    Ok(())
}
