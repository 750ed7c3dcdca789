//! 配信状態の確認（station API）

use async_trait::async_trait;
use chrono::{Local, TimeZone};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;

use crate::api::http::HttpClient;
use crate::api::BroadcasterConfig;
use crate::detection::hot_moment::TIME_FORMAT;
use crate::error::{WaveWatchError, WaveWatchResult};

const STATION_API_URL: &str = "https://bjapi.afreecatv.com/api/{id}/station";

/// 開始時刻を探すキー（優先順）
const START_TIME_KEYS: [&str; 3] = ["broad_start", "broad_start_time", "start_time"];

/// 配信番号
#[derive(Debug, Clone, PartialEq, Eq, Hash, derive_more::Display, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BroadcastId(pub String);

/// 配信中の放送情報
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BroadcastInfo {
    pub broadcast_id: BroadcastId,
    pub title: String,
    /// `"YYYY-MM-DD HH:MM:SS"`（ローカル時刻）
    pub start_time: Option<String>,
}

/// 配信状態の取得元
#[async_trait]
pub trait BroadcastStatusSource: Send + Sync {
    /// 配信中なら放送情報、オフラインや取得失敗なら `None`
    async fn live_broadcast(&self) -> Option<BroadcastInfo>;
}

pub struct BroadcastStatusService {
    broadcaster: BroadcasterConfig,
    http: Arc<dyn HttpClient>,
}

impl BroadcastStatusService {
    pub fn new(broadcaster: BroadcasterConfig, http: Arc<dyn HttpClient>) -> Self {
        Self { broadcaster, http }
    }

    fn station_url(&self) -> String {
        STATION_API_URL.replace("{id}", &self.broadcaster.id)
    }
}

#[async_trait]
impl BroadcastStatusSource for BroadcastStatusService {
    async fn live_broadcast(&self) -> Option<BroadcastInfo> {
        let url = self.station_url();
        let response = match self.http.get_json(&url).await {
            Ok(response) => response,
            Err(e) => {
                tracing::warn!("⚠️ Station lookup failed for {}: {}", self.broadcaster.id, e);
                return None;
            }
        };

        match parse_broadcast_info(&response) {
            Ok(info) => info,
            Err(e) => {
                tracing::warn!("⚠️ Unexpected station payload: {}", e);
                None
            }
        }
    }
}

/// station API のレスポンスから放送情報を取り出す
///
/// `broad` が空ならオフライン。
pub fn parse_broadcast_info(response: &Value) -> WaveWatchResult<Option<BroadcastInfo>> {
    let broad = match response.get("broad") {
        Some(Value::Object(map)) if !map.is_empty() => &response["broad"],
        _ => return Ok(None),
    };

    let broadcast_id = match broad.get("broad_no") {
        Some(Value::String(s)) if !s.is_empty() => s.clone(),
        Some(Value::Number(n)) => n.to_string(),
        _ => return Err(WaveWatchError::missing_field("broad_no", "broad")),
    };
    let title = broad
        .get("broad_title")
        .and_then(Value::as_str)
        .ok_or_else(|| WaveWatchError::missing_field("broad_title", "broad"))?
        .to_string();

    let start_time = [response.get("station"), Some(broad), Some(response)]
        .into_iter()
        .flatten()
        .find_map(extract_start_time);

    Ok(Some(BroadcastInfo {
        broadcast_id: BroadcastId(broadcast_id),
        title,
        start_time,
    }))
}

fn extract_start_time(data: &Value) -> Option<String> {
    START_TIME_KEYS.iter().find_map(|key| match data.get(*key)? {
        Value::Number(n) => {
            let secs = n.as_i64().or_else(|| n.as_f64().map(|f| f as i64))?;
            Local
                .timestamp_opt(secs, 0)
                .single()
                .map(|dt| dt.format(TIME_FORMAT).to_string())
        }
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        _ => None,
    })
}
