//! チャットサーバー接続情報の取得（player live API）

use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;

use crate::api::http::HttpClient;
use crate::api::station::BroadcastId;
use crate::api::BroadcasterConfig;
use crate::error::{WaveWatchError, WaveWatchResult};

const PLAYER_API_URL: &str = "https://live.afreecatv.com/afreeca/player_live_api.php";

/// 1配信分のチャット接続パラメータ
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionParameters {
    pub host: String,
    pub chat_id: String,
    pub token: String,
    /// 接続に使うポート（API値 + 1 済み）
    pub port: u16,
    pub channel_id: String,
}

impl ConnectionParameters {
    pub fn websocket_uri(&self) -> String {
        format!(
            "wss://{}:{}/Websocket/{}",
            self.host, self.port, self.channel_id
        )
    }
}

/// 接続パラメータの解決
#[async_trait]
pub trait ConnectionResolver: Send + Sync {
    /// 取得できなければ `None`
    async fn resolve(&self, broadcast_id: &BroadcastId) -> Option<ConnectionParameters>;
}

pub struct ChatConnectionService {
    broadcaster: BroadcasterConfig,
    http: Arc<dyn HttpClient>,
}

impl ChatConnectionService {
    pub fn new(broadcaster: BroadcasterConfig, http: Arc<dyn HttpClient>) -> Self {
        Self { broadcaster, http }
    }
}

#[async_trait]
impl ConnectionResolver for ChatConnectionService {
    async fn resolve(&self, broadcast_id: &BroadcastId) -> Option<ConnectionParameters> {
        let bno = broadcast_id.to_string();
        let form = [
            ("bid", self.broadcaster.id.as_str()),
            ("bno", bno.as_str()),
            ("type", "live"),
            ("player_type", "html5"),
        ];

        let response = match self.http.post_form(PLAYER_API_URL, &form).await {
            Ok(response) => response,
            Err(e) => {
                tracing::warn!("⚠️ Connection lookup failed for {}: {}", broadcast_id, e);
                return None;
            }
        };

        match parse_connection_parameters(&response) {
            Ok(params) => params,
            Err(e) => {
                tracing::warn!("⚠️ Unexpected player payload: {}", e);
                None
            }
        }
    }
}

/// `CHANNEL` オブジェクトから接続パラメータを組み立てる
pub fn parse_connection_parameters(response: &Value) -> WaveWatchResult<Option<ConnectionParameters>> {
    let channel = match response.get("CHANNEL") {
        Some(Value::Object(map)) if !map.is_empty() => &response["CHANNEL"],
        _ => return Ok(None),
    };

    let base_port: u16 = field_str(channel, "CHPT")?
        .trim()
        .parse()
        .map_err(|e| WaveWatchError::generic("CHANNEL.CHPT", format!("invalid port: {e}")))?;
    let port = base_port
        .checked_add(1)
        .ok_or_else(|| WaveWatchError::generic("CHANNEL.CHPT", "port out of range"))?;

    Ok(Some(ConnectionParameters {
        host: field_str(channel, "CHDOMAIN")?.to_lowercase(),
        chat_id: field_str(channel, "CHATNO")?,
        token: field_str(channel, "FTK")?,
        port,
        channel_id: field_str(channel, "BJID")?,
    }))
}

/// 文字列でも数値でも受け付ける
fn field_str(channel: &Value, key: &str) -> WaveWatchResult<String> {
    match channel.get(key) {
        Some(Value::String(s)) => Ok(s.clone()),
        Some(Value::Number(n)) => Ok(n.to_string()),
        _ => Err(WaveWatchError::missing_field(key, "CHANNEL")),
    }
}
