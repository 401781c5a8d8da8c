//! Client Errors

use thiserror::Error;

/// Errors surfaced by the client handles.
#[derive(Debug, Error)]
pub enum ClientError {
    /// The transport task has stopped; nothing can be sent any more.
    #[error("Transport is not running")]
    NotRunning,

    #[error("Invalid server URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    #[error("Unsupported URL scheme: {0}")]
    UnsupportedScheme(String),

    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Server rejected request ({status}): {message}")]
    Rejected { status: u16, message: String },
}
