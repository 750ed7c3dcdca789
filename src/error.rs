//! Error types shared across the watcher.
//!
//! Decode failures never show up here: the codec reports them as `None`.

use thiserror::Error;

/// 監視ボット全体で使うエラー型
#[derive(Error, Debug)]
pub enum WaveWatchError {
    /// HTTP request to a collaborator endpoint failed
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// WebSocket transport error
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    /// TLS client configuration could not be built
    #[error("TLS configuration error: {0}")]
    Tls(#[from] rustls::Error),

    /// JSON parsing error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// File I/O error
    #[error("File I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A tracked pattern failed to compile
    #[error("Invalid pattern '{key}': {source}")]
    Pattern {
        key: String,
        #[source]
        source: regex::Error,
    },

    /// Login/join handshake did not complete
    #[error("Handshake failed: {0}")]
    Handshake(String),

    /// Missing required field in a collaborator payload
    #[error("Missing required field '{field}' in {structure}")]
    MissingField { field: String, structure: String },

    /// Background session task panicked or was aborted
    #[error("Session task failed: {0}")]
    Task(#[from] tokio::task::JoinError),

    /// Generic error with context
    #[error("Error in {context}: {message}")]
    Generic { context: String, message: String },
}

impl WaveWatchError {
    /// Create a new generic error with context
    pub fn generic(context: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Generic {
            context: context.into(),
            message: message.into(),
        }
    }

    /// Create a missing field error
    pub fn missing_field(field: impl Into<String>, structure: impl Into<String>) -> Self {
        Self::MissingField {
            field: field.into(),
            structure: structure.into(),
        }
    }
}

pub type WaveWatchResult<T> = Result<T, WaveWatchError>;
