//! 監視ボット本体
//!
//! 配信状態をポーリングし、配信の開始・終了に合わせてチャットセッションを張り替える。
//! 1回のポーリングで起きたパニックはログに残して 60 秒待つだけで、ループは止まらない。

pub mod history;
pub mod polling;

pub use history::{BroadcastHistoryLog, BroadcastHistoryRecord};
pub use polling::next_poll_delay;

use chrono::{DateTime, Local};
use futures_util::FutureExt;
use serde::Serialize;
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use crate::api::{
    BroadcastId, BroadcastInfo, BroadcastStatusService, BroadcastStatusSource, BroadcasterConfig,
    ChatConnectionService, ConnectionParameters, ConnectionResolver, HttpClient,
    ReqwestHttpClient,
};
use crate::chat::{ChatSession, SessionHandle, TransportConfig};
use crate::config::AppConfig;
use crate::detection::hot_moment::TIME_FORMAT;
use crate::detection::{DetectionState, HotMomentDetector, HotMomentRecord, SharedDetection};
use crate::error::WaveWatchResult;
use crate::io::HistoryStore;

/// ループ内エラー後の待ち時間
pub const ERROR_BACKOFF: Duration = Duration::from_secs(60);

/// 配信していない間のタイトル
const IDLE_TITLE: &str = "방송 준비 중";

/// チャットセッションの起動方法
pub trait SessionLauncher: Send + Sync {
    fn launch(
        &self,
        params: ConnectionParameters,
        detection: SharedDetection<HotMomentDetector>,
    ) -> SessionHandle;
}

/// WebSocket で接続する本番実装
#[derive(Debug, Clone)]
pub struct WebSocketLauncher {
    config: TransportConfig,
}

impl WebSocketLauncher {
    pub fn new(config: TransportConfig) -> Self {
        Self { config }
    }
}

impl SessionLauncher for WebSocketLauncher {
    fn launch(
        &self,
        params: ConnectionParameters,
        detection: SharedDetection<HotMomentDetector>,
    ) -> SessionHandle {
        SessionHandle::spawn(ChatSession::new(params, detection, self.config.clone()))
    }
}

/// ボットが依存する外部とのやり取り
pub struct Collaborators {
    pub status: Arc<dyn BroadcastStatusSource>,
    pub resolver: Arc<dyn ConnectionResolver>,
    pub launcher: Arc<dyn SessionLauncher>,
}

#[derive(Debug, Clone)]
struct BotState {
    is_live: bool,
    broadcast_id: Option<BroadcastId>,
    title: String,
    start_time: Option<String>,
    last_offline_at: Option<DateTime<Local>>,
}

impl Default for BotState {
    fn default() -> Self {
        Self {
            is_live: false,
            broadcast_id: None,
            title: IDLE_TITLE.to_string(),
            start_time: None,
            last_offline_at: None,
        }
    }
}

/// 配信状態
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, derive_more::Display)]
#[serde(rename_all = "UPPERCASE")]
pub enum LiveStatus {
    #[display("LIVE")]
    Live,
    #[display("WAITING")]
    Waiting,
}

/// パターン別の集計
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PatternStats {
    pub key: String,
    pub label: String,
    pub wave_count: u32,
    pub total_count: u64,
}

/// 現在の監視状況
#[derive(Debug, Clone, Serialize)]
pub struct MonitorSnapshot {
    pub status: LiveStatus,
    pub broadcaster: String,
    pub title: String,
    pub started_at: Option<String>,
    pub patterns: Vec<PatternStats>,
    pub last_detected_at: Option<String>,
    pub hot_moments: Vec<HotMomentRecord>,
    pub history: Vec<BroadcastHistoryRecord>,
}

pub struct MonitorBot {
    broadcaster: BroadcasterConfig,
    collaborators: Collaborators,
    detection: SharedDetection<HotMomentDetector>,
    history: BroadcastHistoryLog,
    history_store: Option<HistoryStore>,
    state: BotState,
    session: Option<SessionHandle>,
}

impl MonitorBot {
    pub fn new(
        broadcaster: BroadcasterConfig,
        collaborators: Collaborators,
        detection: SharedDetection<HotMomentDetector>,
        history: BroadcastHistoryLog,
    ) -> Self {
        Self {
            broadcaster,
            collaborators,
            detection,
            history,
            history_store: None,
            state: BotState::default(),
            session: None,
        }
    }

    /// 放送履歴をファイルにも保存する
    pub fn with_history_store(mut self, store: HistoryStore) -> Self {
        self.history_store = Some(store);
        self
    }

    /// 設定から本番用の構成を組み立てる
    pub fn from_config(config: &AppConfig) -> WaveWatchResult<Self> {
        let http: Arc<dyn HttpClient> = Arc::new(ReqwestHttpClient::new(&config.http)?);
        let collaborators = Collaborators {
            status: Arc::new(BroadcastStatusService::new(
                config.broadcaster.clone(),
                Arc::clone(&http),
            )),
            resolver: Arc::new(ChatConnectionService::new(config.broadcaster.clone(), http)),
            launcher: Arc::new(WebSocketLauncher::new(config.transport.clone())),
        };

        let detection = DetectionState::from_patterns(
            &config.patterns,
            config.wave,
            HotMomentDetector::new(&config.hot_moments),
        )?
        .into_shared();

        let store = HistoryStore::new(&config.history.file);
        let bot = match store.load() {
            Ok(records) => {
                let history = BroadcastHistoryLog::with_records(config.history.max_entries, records);
                Self::new(config.broadcaster.clone(), collaborators, detection, history)
                    .with_history_store(store)
            }
            Err(e) => {
                tracing::warn!(
                    "⚠️ Failed to load history from {} (history will not be saved): {}",
                    store.path().display(),
                    e
                );
                let history = BroadcastHistoryLog::new(config.history.max_entries);
                Self::new(config.broadcaster.clone(), collaborators, detection, history)
            }
        };
        Ok(bot)
    }

    pub fn is_live(&self) -> bool {
        self.state.is_live
    }

    pub fn title(&self) -> &str {
        &self.state.title
    }

    pub fn start_time(&self) -> Option<&str> {
        self.state.start_time.as_deref()
    }

    pub fn broadcast_id(&self) -> Option<&BroadcastId> {
        self.state.broadcast_id.as_ref()
    }

    pub fn last_offline_at(&self) -> Option<DateTime<Local>> {
        self.state.last_offline_at
    }

    pub fn detection(&self) -> &SharedDetection<HotMomentDetector> {
        &self.detection
    }

    pub fn history(&self) -> Vec<BroadcastHistoryRecord> {
        self.history.records()
    }

    /// チャット接続が動いているか
    pub fn has_running_session(&self) -> bool {
        self.session.as_ref().is_some_and(|s| !s.is_finished())
    }

    /// 停止するまでポーリングを続ける
    pub async fn run_forever(&mut self) {
        tracing::info!(
            "🤖 [{}] Wave monitor started (ID: {})",
            self.broadcaster.name,
            self.broadcaster.id
        );

        loop {
            let delay = match AssertUnwindSafe(self.poll_once()).catch_unwind().await {
                Ok(()) => self.next_delay(Local::now()),
                Err(panic) => {
                    tracing::error!("💥 Monitor loop panicked: {}", panic_message(&panic));
                    ERROR_BACKOFF
                }
            };

            tracing::debug!("⏱️ Next status check in {}s", delay.as_secs());
            tokio::time::sleep(delay).await;
        }
    }

    pub fn next_delay(&self, now: DateTime<Local>) -> Duration {
        next_poll_delay(self.state.is_live, self.state.last_offline_at.as_ref(), &now)
    }

    /// 1回分の状態確認と遷移
    ///
    /// 状態確認や接続情報の失敗は「配信なし」「接続不可」として扱われ、ここでは失敗しない。
    pub async fn poll_once(&mut self) {
        match self.collaborators.status.live_broadcast().await {
            Some(info) => {
                self.handle_live(info).await;
                self.log_summary();
            }
            None => self.handle_offline().await,
        }
    }

    async fn handle_live(&mut self, info: BroadcastInfo) {
        let is_new_broadcast =
            !self.state.is_live || self.state.broadcast_id.as_ref() != Some(&info.broadcast_id);

        if is_new_broadcast {
            tracing::info!("📺 Broadcast started: {} ({})", info.title, info.broadcast_id);
            self.start_session(info).await;
        } else if !self.has_running_session() {
            tracing::info!("🔁 Chat connection is down, reconnecting");
            self.stop_transport().await;
            self.connect_transport().await;
        }
    }

    async fn handle_offline(&mut self) {
        if self.state.is_live {
            tracing::info!(
                "💤 Broadcast ended ({})",
                Local::now().format("%H:%M:%S")
            );
            self.stop_session().await;
            self.state.last_offline_at = Some(Local::now());
        }
    }

    async fn start_session(&mut self, info: BroadcastInfo) {
        self.stop_session().await;

        self.state.is_live = true;
        self.state.broadcast_id = Some(info.broadcast_id);
        self.state.title = info.title;
        self.state.start_time = Some(
            info.start_time
                .unwrap_or_else(|| Local::now().format(TIME_FORMAT).to_string()),
        );

        self.detection.lock().reset();
        self.connect_transport().await;
    }

    /// 配信中なら履歴と Hot Moment を保存し、セッションを閉じる
    async fn stop_session(&mut self) {
        self.stop_transport().await;
        if self.state.is_live {
            self.save_session();
        }

        self.state.is_live = false;
        self.state.broadcast_id = None;
        self.state.title = IDLE_TITLE.to_string();
    }

    fn save_session(&mut self) {
        let start_time = self.state.start_time.as_deref();
        let detection = self.detection.lock();

        let record =
            BroadcastHistoryRecord::new(&self.state.title, start_time, detection.wave_counts());
        self.history.push(record);
        if let Some(store) = &self.history_store {
            if let Err(e) = store.save(&self.history.records()) {
                tracing::warn!("⚠️ Failed to save broadcast history: {}", e);
            }
        }

        detection
            .recorder()
            .persist(&self.state.title, start_time, &detection.pattern_totals());
    }

    async fn connect_transport(&mut self) {
        let Some(broadcast_id) = self.state.broadcast_id.clone() else {
            return;
        };

        match self.collaborators.resolver.resolve(&broadcast_id).await {
            Some(params) => {
                let handle = self
                    .collaborators
                    .launcher
                    .launch(params, Arc::clone(&self.detection));
                self.session = Some(handle);
            }
            None => tracing::warn!(
                "⚠️ Chat server info unavailable for {}, retrying on next poll",
                broadcast_id
            ),
        }
    }

    async fn stop_transport(&mut self) {
        if let Some(session) = self.session.take() {
            if let Err(e) = session.stop().await {
                tracing::debug!("Chat session ended with error: {}", e);
            }
        }
    }

    /// 終了処理（配信中なら保存してから閉じる）
    pub async fn shutdown(&mut self) {
        tracing::info!("🛑 Shutting down monitor");
        self.stop_session().await;
    }

    pub fn snapshot(&self) -> MonitorSnapshot {
        let detection = self.detection.lock();
        MonitorSnapshot {
            status: if self.state.is_live {
                LiveStatus::Live
            } else {
                LiveStatus::Waiting
            },
            broadcaster: self.broadcaster.name.clone(),
            title: self.state.title.clone(),
            started_at: self.state.start_time.clone(),
            patterns: detection
                .scanners()
                .iter()
                .map(|s| PatternStats {
                    key: s.key().to_string(),
                    label: s.label().to_string(),
                    wave_count: s.wave_count(),
                    total_count: s.total_count(),
                })
                .collect(),
            last_detected_at: detection
                .last_detected_at()
                .map(|t| t.format(TIME_FORMAT).to_string()),
            hot_moments: detection.recorder().hot_moments(),
            history: self.history.records(),
        }
    }

    fn log_summary(&self) {
        let snapshot = self.snapshot();
        let waves: Vec<String> = snapshot
            .patterns
            .iter()
            .map(|p| format!("{}={}/{}", p.label, p.wave_count, p.total_count))
            .collect();
        tracing::info!(
            status = %snapshot.status,
            hot_moments = snapshot.hot_moments.len(),
            "📊 {} | {}",
            snapshot.title,
            waves.join(" ")
        );
    }
}

fn panic_message(panic: &Box<dyn Any + Send>) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
