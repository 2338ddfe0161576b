use thiserror::Error;

/// Errors surfaced by the HTTP client, the key-value store and settings IO.
///
/// Socket failures never show up here: they are connection state transitions.
#[derive(Debug, Error)]
pub enum GantryError {
    #[cfg(feature = "client")]
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("unexpected HTTP status {status}: {body}")]
    Status { status: u16, body: String },

    #[error("failed to decode JSON: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("store error: {0}")]
    Store(String),
}

pub type Result<T> = std::result::Result<T, GantryError>;
