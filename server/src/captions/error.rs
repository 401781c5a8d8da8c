//! Caption Errors

use axum::{
    extract::rejection::JsonRejection,
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use thiserror::Error;

use crate::session::SessionError;

/// Caption subscribe/publish errors.
#[derive(Debug, Error)]
pub enum CaptionError {
    #[error("Caption text is empty")]
    EmptyText,

    #[error("Caption text too long (max: {max} characters)")]
    TextTooLong { max: usize },

    #[error(transparent)]
    InvalidField(#[from] parla_common::Error),

    #[error("Invalid request body: {0}")]
    InvalidBody(#[from] JsonRejection),

    #[error(transparent)]
    Session(#[from] SessionError),
}

impl CaptionError {
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Self::EmptyText => "EMPTY_TEXT",
            Self::TextTooLong { .. } => "TEXT_TOO_LONG",
            Self::InvalidField(_) => "INVALID_FIELD",
            Self::InvalidBody(_) => "INVALID_BODY",
            Self::Session(e) => e.code(),
        }
    }
}

impl IntoResponse for CaptionError {
    fn into_response(self) -> Response {
        let status = match &self {
            Self::Session(SessionError::UnknownConnection(_)) => StatusCode::GONE,
            _ => StatusCode::BAD_REQUEST,
        };
        let body = Json(serde_json::json!({
            "error": self.to_string(),
            "code": self.code(),
        }));

        (status, body).into_response()
    }
}
