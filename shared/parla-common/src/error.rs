//! Common Errors

use thiserror::Error;

/// Validation errors for identifiers carried on the wire.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Error {
    /// Room id was absent or blank.
    #[error("room_id is required")]
    MissingRoomId,

    /// Room id failed validation.
    #[error("invalid room_id: {0}")]
    InvalidRoomId(String),

    /// Language tag was absent or blank.
    #[error("language is required")]
    MissingLanguage,

    /// Language tag failed validation.
    #[error("invalid language: {0}")]
    InvalidLanguage(String),
}

/// Result alias for common validation.
pub type Result<T> = std::result::Result<T, Error>;
