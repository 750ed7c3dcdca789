//! 外部API（配信状態・チャット接続情報）

pub mod http;
pub mod player;
pub mod station;

pub use http::{HttpClient, HttpConfig, ReqwestHttpClient};
pub use player::{ChatConnectionService, ConnectionParameters, ConnectionResolver};
pub use station::{BroadcastId, BroadcastInfo, BroadcastStatusService, BroadcastStatusSource};

use serde::{Deserialize, Serialize};

/// 監視対象の配信者
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BroadcasterConfig {
    pub id: String,
    pub name: String,
}

impl Default for BroadcasterConfig {
    fn default() -> Self {
        Self {
            id: "cnsgkcnehd74".to_string(),
            name: "조경훈".to_string(),
        }
    }
}
