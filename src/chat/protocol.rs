//! Chat wire protocol codec.
//!
//! Every frame is `ESC TAB` + 4-digit service code + 6-digit body length +
//! `"00"` + the UTF-8 body. Inside bodies, fields are separated by a single
//! form-feed byte (`0x0C`).

/// Escape marker that opens every frame
pub const ESCAPE_SEQUENCE: &str = "\x1b\t";

/// Field separator used inside frame bodies
pub const FIELD_SEPARATOR: char = '\x0c';

/// Capability code sent with the anonymous login frame
const LOGIN_CAPABILITY: &str = "16";

/// Header length: escape (2) + service code (4) + body length (6) + "00" (2)
const HEADER_LEN: usize = 14;

/// Minimum number of separator-delimited fields in a chat frame
const MIN_CHAT_FIELDS: usize = 7;

/// Contents that mark a chat frame as a system notice instead of a viewer message
const SYSTEM_CONTENTS: [&str; 2] = ["-1", "1"];

/// サービスコード
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceCode {
    Ping,
    Login,
    Join,
    Chat,
}

impl ServiceCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ServiceCode::Ping => "0000",
            ServiceCode::Login => "0001",
            ServiceCode::Join => "0002",
            ServiceCode::Chat => "0005",
        }
    }

    pub fn from_code(code: &str) -> Option<Self> {
        match code {
            "0000" => Some(ServiceCode::Ping),
            "0001" => Some(ServiceCode::Login),
            "0002" => Some(ServiceCode::Join),
            "0005" => Some(ServiceCode::Chat),
            _ => None,
        }
    }
}

/// Chat message decoded from one inbound frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedMessage {
    pub text: String,
    pub sender: String,
    pub is_system: bool,
}

/// Header and body of a frame, split by the declared body length.
#[cfg(test)]
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct RawFrame {
    pub service_code: String,
    pub body: String,
}

#[cfg(test)]
impl RawFrame {
    /// Split a frame into service code and body.
    ///
    /// Returns `None` if the header is malformed or the declared length does
    /// not match the payload.
    pub(crate) fn parse(bytes: &[u8]) -> Option<Self> {
        if bytes.len() < HEADER_LEN || !bytes.starts_with(ESCAPE_SEQUENCE.as_bytes()) {
            return None;
        }

        let header = std::str::from_utf8(&bytes[..HEADER_LEN]).ok()?;
        if !header.is_ascii() {
            return None;
        }
        let service_code = &header[2..6];
        let length_field = &header[6..12];
        if !service_code.bytes().all(|b| b.is_ascii_digit())
            || !length_field.bytes().all(|b| b.is_ascii_digit())
            || &header[12..14] != "00"
        {
            return None;
        }

        let body_len: usize = length_field.parse().ok()?;
        let body_bytes = &bytes[HEADER_LEN..];
        if body_bytes.len() != body_len {
            return None;
        }

        Some(Self {
            service_code: service_code.to_string(),
            body: std::str::from_utf8(body_bytes).ok()?.to_string(),
        })
    }
}

/// Build a frame for the given service code and body.
pub fn encode_frame(code: ServiceCode, body: &str) -> Vec<u8> {
    let body_bytes = body.as_bytes();
    let header = format!("{}{:06}00", code.as_str(), body_bytes.len());

    let mut frame = Vec::with_capacity(HEADER_LEN + body_bytes.len());
    frame.extend_from_slice(ESCAPE_SEQUENCE.as_bytes());
    frame.extend_from_slice(header.as_bytes());
    frame.extend_from_slice(body_bytes);
    frame
}

/// Anonymous login frame: three separators, capability code, trailing separator.
pub fn login_frame() -> Vec<u8> {
    let sep = FIELD_SEPARATOR;
    let body = format!("{sep}{sep}{sep}{LOGIN_CAPABILITY}{sep}");
    encode_frame(ServiceCode::Login, &body)
}

/// Channel join frame carrying the resolved chat id and token.
pub fn join_frame(chat_id: &str, token: &str) -> Vec<u8> {
    let sep = FIELD_SEPARATOR;
    let body = format!("{sep}{chat_id}{sep}{token}{sep}0{sep}{sep}");
    encode_frame(ServiceCode::Join, &body)
}

/// Keepalive frame
pub fn ping_frame() -> Vec<u8> {
    encode_frame(ServiceCode::Ping, &FIELD_SEPARATOR.to_string())
}

/// Decode an inbound frame into a chat message.
///
/// Anything that is not a well-formed chat frame yields `None`: invalid
/// UTF-8, fewer than seven fields, or a service code other than chat.
pub fn decode_frame(bytes: &[u8]) -> Option<ParsedMessage> {
    let decoded = std::str::from_utf8(bytes).ok()?;
    let parts: Vec<&str> = decoded.split(FIELD_SEPARATOR).collect();

    if parts.len() < MIN_CHAT_FIELDS {
        return None;
    }

    let code = parts[0].get(2..6)?;
    if ServiceCode::from_code(code) != Some(ServiceCode::Chat) {
        return None;
    }

    let text = parts[1];
    let is_system = SYSTEM_CONTENTS.contains(&text) || text.contains("fw=");

    Some(ParsedMessage {
        text: text.to_string(),
        sender: parts[6].to_string(),
        is_system,
    })
}

#[cfg(test)]
pub(crate) fn chat_frame(text: &str, sender: &str) -> Vec<u8> {
    let sep = FIELD_SEPARATOR;
    let body = format!("{sep}{text}{sep}viewer_id{sep}0{sep}1{sep}0{sep}{sender}{sep}");
    encode_frame(ServiceCode::Chat, &body)
}
