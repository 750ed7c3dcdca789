//! チャットサーバーとの通信（フレーム形式と接続セッション）

pub mod protocol;
pub mod session;

pub use protocol::{decode_frame, encode_frame, ParsedMessage, ServiceCode};
pub use session::{ChatSession, SessionHandle, SessionState, TransportConfig};
