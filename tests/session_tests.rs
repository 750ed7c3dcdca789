//! チャットセッションの結合テスト（ローカル WebSocket サーバー相手）

use futures_util::{SinkExt, StreamExt};
use std::net::SocketAddr;
use std::time::Duration;
use tempfile::TempDir;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, oneshot};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

use wavewatch::api::ConnectionParameters;
use wavewatch::chat::protocol::{encode_frame, join_frame, login_frame, ping_frame, FIELD_SEPARATOR};
use wavewatch::chat::{ChatSession, ServiceCode, SessionHandle, SessionState, TransportConfig};
use wavewatch::detection::{
    default_patterns, DetectionState, HotMomentConfig, HotMomentDetector, WaveDetectionConfig,
};
use wavewatch::{SharedDetection, WaveWatchError};

enum Script {
    /// ハンドシェイク後にフレームを送り、接続は開いたまま
    Send(Vec<Vec<u8>>),
    /// ハンドシェイク後にフレームを送ってから閉じる
    SendThenClose(Vec<Vec<u8>>),
    /// ログインを受けたら応答せずに閉じる
    CloseAfterLogin,
    /// 応答の前に Ping を送り、しばらく待つ（その間に届いたフレームも流す）
    PingBeforeAck(Vec<Vec<u8>>),
}

fn chat(text: &str) -> Vec<u8> {
    let sep = FIELD_SEPARATOR;
    let body = format!("{sep}{text}{sep}uid{sep}0{sep}1{sep}0{sep}nick{sep}");
    encode_frame(ServiceCode::Chat, &body)
}

async fn next_binary(ws: &mut WebSocketStream<TcpStream>) -> Option<Vec<u8>> {
    while let Some(Ok(message)) = ws.next().await {
        if let Message::Binary(bytes) = message {
            return Some(bytes);
        }
    }
    None
}

/// クライアントから届いたバイナリフレームを全て `frames` に流すサーバー
async fn spawn_server(script: Script) -> (SocketAddr, mpsc::UnboundedReceiver<Vec<u8>>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (tx, rx) = mpsc::unbounded_channel();

    tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let mut ws = tokio_tungstenite::accept_async(stream).await.unwrap();

        let Some(login) = next_binary(&mut ws).await else {
            return;
        };
        let _ = tx.send(login);

        let (frames, close) = match script {
            Script::CloseAfterLogin => {
                let _ = ws.close(None).await;
                return;
            }
            Script::Send(frames) => (frames, false),
            Script::SendThenClose(frames) => (frames, true),
            Script::PingBeforeAck(frames) => {
                ws.send(Message::Ping(vec![1])).await.unwrap();
                let early = tokio::time::timeout(Duration::from_millis(500), next_binary(&mut ws));
                if let Ok(Some(frame)) = early.await {
                    let _ = tx.send(frame);
                }
                (frames, false)
            }
        };

        let ack = encode_frame(ServiceCode::Login, &FIELD_SEPARATOR.to_string());
        ws.send(Message::Binary(ack)).await.unwrap();
        let Some(join) = next_binary(&mut ws).await else {
            return;
        };
        let _ = tx.send(join);

        for frame in frames {
            ws.send(Message::Binary(frame)).await.unwrap();
        }
        if close {
            let _ = ws.close(None).await;
        }

        while let Some(Ok(message)) = ws.next().await {
            if let Message::Binary(bytes) = message {
                let _ = tx.send(bytes);
            }
        }
    });

    (addr, rx)
}

async fn connect(addr: SocketAddr) -> WebSocketStream<MaybeTlsStream<TcpStream>> {
    let (ws, _) = tokio_tungstenite::connect_async(format!("ws://{}", addr))
        .await
        .unwrap();
    ws
}

fn params() -> ConnectionParameters {
    ConnectionParameters {
        host: "127.0.0.1".to_string(),
        chat_id: "12345".to_string(),
        token: "tok".to_string(),
        port: 0,
        channel_id: "bj".to_string(),
    }
}

fn detection(dir: &TempDir) -> SharedDetection<HotMomentDetector> {
    let wave = WaveDetectionConfig {
        min_duration_secs: 0,
        min_message_count: 2,
        ..WaveDetectionConfig::default()
    };
    DetectionState::from_patterns(
        &default_patterns(),
        wave,
        HotMomentDetector::new(&HotMomentConfig {
            max_records: 100,
            data_directory: dir.path().to_path_buf(),
        }),
    )
    .unwrap()
    .into_shared()
}

async fn wait_until(mut condition: impl FnMut() -> bool) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("condition was not met in time");
}

async fn recv_frame(rx: &mut mpsc::UnboundedReceiver<Vec<u8>>) -> Vec<u8> {
    tokio::time::timeout(Duration::from_secs(5), rx.recv())
        .await
        .expect("no frame in time")
        .expect("server closed")
}

#[tokio::test]
async fn test_handshake_then_dispatch_to_scanners() {
    let frames = vec![chat("지창"), chat("-1"), chat("안녕"), chat("지 창"), chat("지~창")];
    let (addr, mut rx) = spawn_server(Script::Send(frames)).await;
    let dir = TempDir::new().unwrap();
    let shared = detection(&dir);

    let session = ChatSession::new(params(), shared.clone(), TransportConfig::default());
    let handle = SessionHandle::spawn_on_stream(session, connect(addr).await);

    assert_eq!(recv_frame(&mut rx).await, login_frame());
    assert_eq!(recv_frame(&mut rx).await, join_frame("12345", "tok"));

    wait_until(|| shared.lock().pattern_totals()["ji_chang"] == 3).await;
    assert_eq!(handle.state(), SessionState::Listening);

    {
        let state = shared.lock();
        assert_eq!(state.wave_counts()["ji_chang"], 1);
        assert_eq!(state.recorder().len(), 1);
        assert_eq!(state.recorder().hot_moments()[0].count, 2);
        assert!(state.last_detected_at().is_some());
    }

    tokio_test::assert_ok!(handle.stop().await);
}

#[tokio::test]
async fn test_heartbeat_sends_ping() {
    let (addr, mut rx) = spawn_server(Script::Send(Vec::new())).await;
    let dir = TempDir::new().unwrap();
    let config = TransportConfig {
        ping_interval_secs: 1,
        ..TransportConfig::default()
    };

    let session = ChatSession::new(params(), detection(&dir), config);
    let handle = SessionHandle::spawn_on_stream(session, connect(addr).await);

    recv_frame(&mut rx).await;
    recv_frame(&mut rx).await;
    assert_eq!(recv_frame(&mut rx).await, ping_frame());

    tokio_test::assert_ok!(handle.stop().await);
}

#[tokio::test]
async fn test_stop_cancels_listening_session() {
    let (addr, mut rx) = spawn_server(Script::Send(Vec::new())).await;
    let dir = TempDir::new().unwrap();

    let session = ChatSession::new(params(), detection(&dir), TransportConfig::default());
    let handle = SessionHandle::spawn_on_stream(session, connect(addr).await);

    recv_frame(&mut rx).await;
    recv_frame(&mut rx).await;
    wait_until(|| handle.state() == SessionState::Listening).await;

    let result = tokio::time::timeout(Duration::from_secs(2), handle.stop()).await;
    assert!(matches!(result, Ok(Ok(()))));

    // 停止後にクライアントから追加のフレームは来ない
    let after = tokio::time::timeout(Duration::from_secs(2), rx.recv()).await;
    assert!(matches!(after, Ok(None)));
}

#[tokio::test]
async fn test_server_close_ends_session() {
    let (addr, _rx) = spawn_server(Script::SendThenClose(vec![chat("세신")])).await;
    let dir = TempDir::new().unwrap();
    let shared = detection(&dir);

    let session = ChatSession::new(params(), shared.clone(), TransportConfig::default());
    let handle = SessionHandle::spawn_on_stream(session, connect(addr).await);

    wait_until(|| handle.is_finished()).await;
    assert_eq!(handle.state(), SessionState::Closed);
    assert_eq!(shared.lock().pattern_totals()["sesin"], 1);
    assert!(handle.stop().await.is_ok());
}

#[tokio::test]
async fn test_handshake_failure_is_reported() {
    let (addr, _rx) = spawn_server(Script::CloseAfterLogin).await;
    let dir = TempDir::new().unwrap();

    let session = ChatSession::new(params(), detection(&dir), TransportConfig::default());
    let (_cancel, cancel_rx) = oneshot::channel();
    let result = session.run_on_stream(connect(addr).await, cancel_rx).await;

    assert!(matches!(result, Err(WaveWatchError::Handshake(_))));
}

#[tokio::test]
async fn test_connect_failure_closes_session() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    drop(listener);

    let dir = TempDir::new().unwrap();
    let params = ConnectionParameters {
        port,
        ..params()
    };
    let session = ChatSession::new(params, detection(&dir), TransportConfig::default());
    let handle = SessionHandle::spawn(session);

    wait_until(|| handle.is_finished()).await;
    assert_eq!(handle.state(), SessionState::Closed);
    assert!(handle.stop().await.is_err());
}

#[tokio::test]
async fn test_ping_is_not_taken_as_login_ack() {
    let (addr, mut rx) = spawn_server(Script::PingBeforeAck(vec![chat("지창")])).await;
    let dir = TempDir::new().unwrap();
    let shared = detection(&dir);

    let session = ChatSession::new(params(), shared.clone(), TransportConfig::default());
    let handle = SessionHandle::spawn_on_stream(session, connect(addr).await);

    assert_eq!(recv_frame(&mut rx).await, login_frame());

    // Ping の後、応答が来るまで join は送られない
    let early = tokio::time::timeout(Duration::from_millis(300), rx.recv()).await;
    assert!(early.is_err());
    assert_eq!(handle.state(), SessionState::Handshaking);

    assert_eq!(recv_frame(&mut rx).await, join_frame("12345", "tok"));
    wait_until(|| shared.lock().pattern_totals()["ji_chang"] == 1).await;
    assert_eq!(handle.state(), SessionState::Listening);

    tokio_test::assert_ok!(handle.stop().await);
}

#[tokio::test]
async fn test_connecting_session_is_handshaking() {
    // TCP は受け付けるが TLS には応答しないサーバー
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    tokio::spawn(async move {
        let (_stream, _) = listener.accept().await.unwrap();
        tokio::time::sleep(Duration::from_secs(30)).await;
    });

    let dir = TempDir::new().unwrap();
    let params = ConnectionParameters {
        port,
        ..params()
    };
    let session = ChatSession::new(params, detection(&dir), TransportConfig::default());
    assert_eq!(session.state(), SessionState::Disconnected);
    let handle = SessionHandle::spawn(session);

    wait_until(|| handle.state() == SessionState::Handshaking).await;
    assert!(!handle.is_finished());

    tokio_test::assert_ok!(handle.stop().await);
}
