//! チャット接続セッション
//!
//! 1配信につき1接続。`Disconnected → Handshaking → Listening → Closed` の順に進み、
//! 再接続はしない（次のポーリングでオーケストレーターが張り直す）。

use chrono::Local;
use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{Connector, MaybeTlsStream, WebSocketStream};

use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::crypto::{verify_tls12_signature, verify_tls13_signature, CryptoProvider};
use rustls::pki_types::{CertificateDer, ServerName, UnixTime};
use rustls::{ClientConfig, DigitallySignedStruct, SignatureScheme};

use crate::api::player::ConnectionParameters;
use crate::chat::protocol::{decode_frame, join_frame, login_frame, ping_frame};
use crate::detection::{HotMomentRecorder, SharedDetection};
use crate::error::{WaveWatchError, WaveWatchResult};

/// WebSocket サブプロトコル
const CHAT_SUBPROTOCOL: &str = "chat";

/// stop() がタスク終了を待つ上限
const STOP_TIMEOUT: Duration = Duration::from_secs(5);

/// セッションの状態
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Disconnected,
    Handshaking,
    Listening,
    Closed,
}

/// 接続設定
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransportConfig {
    /// ping フレームの送信間隔（秒）
    pub ping_interval_secs: u64,
    /// 自己署名証明書を受け入れる
    pub accept_invalid_certs: bool,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            ping_interval_secs: 20,
            accept_invalid_certs: true,
        }
    }
}

impl TransportConfig {
    pub fn ping_interval(&self) -> Duration {
        Duration::from_secs(self.ping_interval_secs.max(1))
    }
}

/// 1接続分のセッション
pub struct ChatSession<R> {
    params: ConnectionParameters,
    detection: SharedDetection<R>,
    config: TransportConfig,
    state: Arc<RwLock<SessionState>>,
}

impl<R: HotMomentRecorder + 'static> ChatSession<R> {
    pub fn new(
        params: ConnectionParameters,
        detection: SharedDetection<R>,
        config: TransportConfig,
    ) -> Self {
        Self {
            params,
            detection,
            config,
            state: Arc::new(RwLock::new(SessionState::Disconnected)),
        }
    }

    pub fn state(&self) -> SessionState {
        *self.state.read()
    }

    fn set_state(&self, state: SessionState) {
        tracing::debug!("🔄 Chat session state: {:?}", state);
        *self.state.write() = state;
    }

    /// 接続からハンドシェイク、受信ループまでを実行する
    ///
    /// `cancel` が発火するか送信側が破棄されると正常終了する。
    pub async fn run(self, mut cancel: oneshot::Receiver<()>) -> WaveWatchResult<()> {
        let uri = self.params.websocket_uri();
        tracing::info!("🔗 Connecting to chat server: {}", uri);
        self.set_state(SessionState::Handshaking);

        let ws = tokio::select! {
            result = connect(&self.params, &self.config) => match result {
                Ok(ws) => ws,
                Err(e) => {
                    tracing::warn!("⚠️ Chat connection failed: {}", e);
                    self.set_state(SessionState::Closed);
                    return Err(e);
                }
            },
            _ = &mut cancel => {
                self.set_state(SessionState::Closed);
                return Ok(());
            }
        };

        self.run_on_stream(ws, cancel).await
    }

    /// 接続済みのストリームでハンドシェイク以降を実行する
    pub async fn run_on_stream<S>(
        self,
        mut ws: WebSocketStream<S>,
        mut cancel: oneshot::Receiver<()>,
    ) -> WaveWatchResult<()>
    where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        self.set_state(SessionState::Handshaking);

        let handshake_result = tokio::select! {
            result = handshake(&mut ws, &self.params) => result,
            _ = &mut cancel => {
                self.set_state(SessionState::Closed);
                return Ok(());
            }
        };
        if let Err(e) = handshake_result {
            tracing::warn!("❌ Chat handshake failed: {}", e);
            self.set_state(SessionState::Closed);
            return Err(e);
        }

        tracing::info!("✅ Chat monitoring started (chat {})", self.params.chat_id);
        self.set_state(SessionState::Listening);

        let result = self.listen(ws, cancel).await;
        self.set_state(SessionState::Closed);
        result
    }

    async fn listen<S>(
        &self,
        ws: WebSocketStream<S>,
        mut cancel: oneshot::Receiver<()>,
    ) -> WaveWatchResult<()>
    where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let (sink, mut stream) = ws.split();
        let (heartbeat_cancel, heartbeat_rx) = oneshot::channel();
        let heartbeat = tokio::spawn(run_heartbeat(
            sink,
            self.config.ping_interval(),
            heartbeat_rx,
        ));

        let result = loop {
            tokio::select! {
                _ = &mut cancel => {
                    tracing::debug!("🛑 Chat session cancelled");
                    break Ok(());
                }
                frame = stream.next() => match frame {
                    Some(Ok(Message::Binary(bytes))) => self.dispatch(&bytes),
                    Some(Ok(Message::Text(text))) => self.dispatch(text.as_bytes()),
                    Some(Ok(Message::Close(close))) => {
                        tracing::info!("🔌 Chat server closed the connection: {:?}", close);
                        break Ok(());
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        tracing::warn!("❌ Chat connection lost: {}", e);
                        break Err(WaveWatchError::from(e));
                    }
                    None => {
                        tracing::info!("🔌 Chat stream ended");
                        break Ok(());
                    }
                }
            }
        };

        let _ = heartbeat_cancel.send(());
        if let Err(e) = heartbeat.await {
            tracing::warn!("⚠️ Heartbeat task failed: {}", e);
        }
        result
    }

    /// 1フレームをデコードして全スキャナーに流す
    fn dispatch(&self, bytes: &[u8]) {
        let Some(message) = decode_frame(bytes) else {
            return;
        };
        if message.is_system {
            return;
        }

        let recorded = self
            .detection
            .lock()
            .handle_message(&message.text, Local::now());
        if !recorded.is_empty() {
            tracing::debug!(
                sender = %message.sender,
                waves = recorded.len(),
                "📨 Message confirmed waves"
            );
        }
    }
}

/// ログイン → 応答1件待ち → チャンネル参加
async fn handshake<S>(ws: &mut WebSocketStream<S>, params: &ConnectionParameters) -> WaveWatchResult<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    ws.send(Message::Binary(login_frame()))
        .await
        .map_err(|e| WaveWatchError::Handshake(format!("login send failed: {e}")))?;

    // 制御フレームは応答として数えない
    loop {
        match ws.next().await {
            Some(Ok(Message::Binary(_))) | Some(Ok(Message::Text(_))) => break,
            Some(Ok(Message::Close(_))) | None => {
                return Err(WaveWatchError::Handshake(
                    "connection closed before login acknowledgement".to_string(),
                ))
            }
            Some(Err(e)) => {
                return Err(WaveWatchError::Handshake(format!(
                    "login acknowledgement failed: {e}"
                )))
            }
            Some(Ok(_)) => continue,
        }
    }

    ws.send(Message::Binary(join_frame(&params.chat_id, &params.token)))
        .await
        .map_err(|e| WaveWatchError::Handshake(format!("join send failed: {e}")))?;
    Ok(())
}

/// 受信とは独立に ping を送り続ける。キャンセル時は何も送らずに終わる。
async fn run_heartbeat<S>(
    mut sink: SplitSink<WebSocketStream<S>, Message>,
    period: Duration,
    mut cancel: oneshot::Receiver<()>,
) where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
    loop {
        tokio::select! {
            biased;
            _ = &mut cancel => break,
            _ = ticker.tick() => {
                if let Err(e) = sink.send(Message::Binary(ping_frame())).await {
                    tracing::warn!("⚠️ Failed to send ping: {}", e);
                    break;
                }
                tracing::trace!("💓 Ping sent");
            }
        }
    }
}

async fn connect(
    params: &ConnectionParameters,
    config: &TransportConfig,
) -> WaveWatchResult<WebSocketStream<MaybeTlsStream<TcpStream>>> {
    let mut request = params.websocket_uri().as_str().into_client_request()?;
    request.headers_mut().insert(
        "Sec-WebSocket-Protocol",
        HeaderValue::from_static(CHAT_SUBPROTOCOL),
    );

    let connector = if config.accept_invalid_certs {
        Some(relaxed_tls_connector()?)
    } else {
        None
    };

    let (ws, _response) =
        tokio_tungstenite::connect_async_tls_with_config(request, None, false, connector).await?;
    Ok(ws)
}

/// 証明書検証を行わない TLS コネクター
///
/// チャットサーバーは自己署名証明書のため。署名の検証だけは行う。
fn relaxed_tls_connector() -> WaveWatchResult<Connector> {
    let provider = Arc::new(rustls::crypto::ring::default_provider());
    let config = ClientConfig::builder_with_provider(provider.clone())
        .with_safe_default_protocol_versions()?
        .dangerous()
        .with_custom_certificate_verifier(Arc::new(AcceptAnyServerCert(provider)))
        .with_no_client_auth();
    Ok(Connector::Rustls(Arc::new(config)))
}

#[derive(Debug)]
struct AcceptAnyServerCert(Arc<CryptoProvider>);

impl ServerCertVerifier for AcceptAnyServerCert {
    fn verify_server_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: UnixTime,
    ) -> Result<ServerCertVerified, rustls::Error> {
        Ok(ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        verify_tls12_signature(message, cert, dss, &self.0.signature_verification_algorithms)
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        verify_tls13_signature(message, cert, dss, &self.0.signature_verification_algorithms)
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.0.signature_verification_algorithms.supported_schemes()
    }
}

/// 実行中セッションのハンドル
pub struct SessionHandle {
    cancel: Option<oneshot::Sender<()>>,
    join: JoinHandle<WaveWatchResult<()>>,
    state: Arc<RwLock<SessionState>>,
}

impl SessionHandle {
    /// 接続から始めるセッションを起動
    pub fn spawn<R: HotMomentRecorder + 'static>(session: ChatSession<R>) -> Self {
        let (cancel, cancel_rx) = oneshot::channel();
        let state = Arc::clone(&session.state);
        let join = tokio::spawn(session.run(cancel_rx));
        Self {
            cancel: Some(cancel),
            join,
            state,
        }
    }

    /// 接続済みストリームでセッションを起動
    pub fn spawn_on_stream<R, S>(session: ChatSession<R>, ws: WebSocketStream<S>) -> Self
    where
        R: HotMomentRecorder + 'static,
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let (cancel, cancel_rx) = oneshot::channel();
        let state = Arc::clone(&session.state);
        let join = tokio::spawn(session.run_on_stream(ws, cancel_rx));
        Self {
            cancel: Some(cancel),
            join,
            state,
        }
    }

    pub fn state(&self) -> SessionState {
        *self.state.read()
    }

    /// タスクが終了済みか（接続失敗・切断を含む）
    pub fn is_finished(&self) -> bool {
        self.join.is_finished()
    }

    /// キャンセルを送り、終了を待つ。待ちきれなければ中断する。
    pub async fn stop(mut self) -> WaveWatchResult<()> {
        if let Some(cancel) = self.cancel.take() {
            let _ = cancel.send(());
        }

        match tokio::time::timeout(STOP_TIMEOUT, &mut self.join).await {
            Ok(joined) => joined?,
            Err(_) => {
                tracing::warn!("⚠️ Chat session did not stop in time, aborting");
                self.join.abort();
                Ok(())
            }
        }
    }
}

#[cfg(test)]
impl SessionHandle {
    /// 接続せずにキャンセルだけを待つハンドル
    pub(crate) fn idle() -> Self {
        let (cancel, cancel_rx) = oneshot::channel::<()>();
        let state = Arc::new(RwLock::new(SessionState::Listening));
        let task_state = Arc::clone(&state);
        let join = tokio::spawn(async move {
            let _ = cancel_rx.await;
            *task_state.write() = SessionState::Closed;
            Ok(())
        });
        Self {
            cancel: Some(cancel),
            join,
            state,
        }
    }
}
