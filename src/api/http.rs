//! 外部APIへのHTTPアクセス
//!
//! 状態確認と接続情報取得はどちらもこのトレイト越しに行う。

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;

use crate::error::WaveWatchResult;

/// ブラウザと同じユーザーエージェント
pub const BROWSER_USER_AGENT: &str = "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) \
     AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36";

/// HTTP設定
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpConfig {
    /// 1リクエストの上限時間（秒）
    pub timeout_secs: u64,
    pub user_agent: String,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            timeout_secs: 15,
            user_agent: BROWSER_USER_AGENT.to_string(),
        }
    }
}

/// JSONを返すHTTPクライアントの抽象インタフェース
#[async_trait]
pub trait HttpClient: Send + Sync {
    async fn get_json(&self, url: &str) -> WaveWatchResult<Value>;

    /// フォームエンコードでPOSTし、JSONを受け取る
    async fn post_form(&self, url: &str, form: &[(&str, &str)]) -> WaveWatchResult<Value>;
}

/// reqwest による本番実装
#[derive(Debug, Clone)]
pub struct ReqwestHttpClient {
    client: reqwest::Client,
}

impl ReqwestHttpClient {
    pub fn new(config: &HttpConfig) -> WaveWatchResult<Self> {
        let client = reqwest::Client::builder()
            .user_agent(config.user_agent.as_str())
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self { client })
    }
}

#[async_trait]
impl HttpClient for ReqwestHttpClient {
    async fn get_json(&self, url: &str) -> WaveWatchResult<Value> {
        tracing::debug!("📡 GET {}", url);
        let response = self.client.get(url).send().await?.error_for_status()?;
        Ok(response.json().await?)
    }

    async fn post_form(&self, url: &str, form: &[(&str, &str)]) -> WaveWatchResult<Value> {
        tracing::debug!("📡 POST {}", url);
        let response = self
            .client
            .post(url)
            .form(form)
            .send()
            .await?
            .error_for_status()?;
        Ok(response.json().await?)
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use crate::error::WaveWatchError;
    use parking_lot::Mutex;
    use std::collections::HashMap;

    /// URLごとに決まったJSONを返すテスト用クライアント
    #[derive(Debug, Default)]
    pub struct FakeHttpClient {
        pub responses: HashMap<String, Value>,
        pub posted: Mutex<Vec<(String, Vec<(String, String)>)>>,
    }

    impl FakeHttpClient {
        pub fn with_response(mut self, url: &str, body: Value) -> Self {
            self.responses.insert(url.to_string(), body);
            self
        }

        fn lookup(&self, url: &str) -> WaveWatchResult<Value> {
            self.responses
                .get(url)
                .cloned()
                .ok_or_else(|| WaveWatchError::generic("fake http", format!("no route for {url}")))
        }
    }

    #[async_trait]
    impl HttpClient for FakeHttpClient {
        async fn get_json(&self, url: &str) -> WaveWatchResult<Value> {
            self.lookup(url)
        }

        async fn post_form(&self, url: &str, form: &[(&str, &str)]) -> WaveWatchResult<Value> {
            self.posted.lock().push((
                url.to_string(),
                form.iter()
                    .map(|(k, v)| (k.to_string(), v.to_string()))
                    .collect(),
            ));
            self.lookup(url)
        }
    }
}
