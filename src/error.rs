use thiserror::Error;

/// Application error types.
#[derive(Error, Debug)]
pub enum AppError {
    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Notification error: {0}")]
    Notification(String),

    #[error("External API error: {0}")]
    ExternalApi(String),

    #[error("Reconnect attempts exhausted after {attempts} tries")]
    ReconnectExhausted { attempts: u32 },

    #[error(transparent)]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    #[error(transparent)]
    Reqwest(#[from] reqwest::Error),

    #[error(transparent)]
    SerdeJson(#[from] serde_json::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Sqlite(#[from] rusqlite::Error),
}

impl AppError {
    /// Whether this error should stop the process rather than be logged and retried.
    pub fn is_terminal(&self) -> bool {
        matches!(self, AppError::ReconnectExhausted { .. })
    }
}

pub type Result<T> = std::result::Result<T, AppError>;

/// Leading `max` characters of a response body for log and error lines.
pub(crate) fn body_snippet(text: &str, max: usize) -> String {
    text.chars().take(max).collect()
}
