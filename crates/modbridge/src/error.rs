//! Error taxonomy for the sync engine.
//!
//! Almost everything here is recoverable: a failed tick is logged and the
//! next tick tries again. [`BridgeError::Layout`] is the one fatal channel,
//! raised when an upstream page no longer has the structure we parse.

use crate::platform::Platform;

/// Errors surfaced by the chat surface.
#[derive(thiserror::Error, Debug)]
pub enum ChatError {
    #[error("message {0} not found")]
    NotFound(u64),

    #[error("chat service unavailable: {0}")]
    Unavailable(String),

    #[error("chat request failed: {0}")]
    Request(String),
}

/// Missing or malformed configuration.
#[derive(thiserror::Error, Debug)]
pub enum ConfigError {
    #[error("Missing config entry: {entry}\n{hint}")]
    Missing { entry: String, hint: String },

    #[error("Invalid config entry {entry}: {reason}")]
    Invalid { entry: String, reason: String },
}

#[derive(thiserror::Error, Debug)]
pub enum BridgeError {
    #[error("{platform} login failed: {message}")]
    Auth { platform: Platform, message: String },

    #[error("forum administration login failed: {0}")]
    AdminAuth(String),

    #[error("{0} session is no longer valid")]
    SessionInvalid(Platform),

    #[error("skipped item: {0}")]
    ExtractionSkip(String),

    #[error("upstream rejected the request: {0}")]
    Upstream(String),

    #[error("page layout changed: {0}")]
    Layout(String),

    #[error("chat error: {0}")]
    Chat(#[from] ChatError),

    #[error("config error: {0}")]
    Config(#[from] ConfigError),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("storage error: {0}")]
    Storage(#[from] rusqlite::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl BridgeError {
    pub fn auth(platform: Platform, message: impl Into<String>) -> Self {
        Self::Auth {
            platform,
            message: message.into(),
        }
    }

    /// True when retrying on the next tick cannot help.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Layout(_))
    }
}

pub type BridgeResult<T> = Result<T, BridgeError>;
