//! Session Errors

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use parla_common::{ConnectionId, ServerEvent};
use thiserror::Error;

/// Usage errors reported back to the offending sender.
#[derive(Debug, Error)]
pub enum SessionError {
    /// Sender has no room peers to forward to.
    #[error("Not in a room with a peer")]
    NotInRoom,

    /// Room is at capacity.
    #[error("Room is full (max: {max_members})")]
    RoomFull {
        /// Maximum allowed members.
        max_members: usize,
    },

    /// Missing or malformed identifier.
    #[error(transparent)]
    InvalidField(#[from] parla_common::Error),

    /// Message could not be parsed.
    #[error("Invalid message: {0}")]
    InvalidMessage(String),

    /// Operation requires a duplex connection.
    #[error("Operation not supported on a push-only stream")]
    PushOnly,

    /// Connection is not (or no longer) registered.
    #[error("Unknown connection: {0}")]
    UnknownConnection(ConnectionId),
}

impl SessionError {
    /// Stable machine-readable code.
    #[must_use]
    pub const fn code(&self) -> &'static str {
        match self {
            Self::NotInRoom => "NOT_IN_ROOM",
            Self::RoomFull { .. } => "ROOM_FULL",
            Self::InvalidField(_) => "INVALID_FIELD",
            Self::InvalidMessage(_) => "INVALID_MESSAGE",
            Self::PushOnly => "PUSH_ONLY",
            Self::UnknownConnection(_) => "UNKNOWN_CONNECTION",
        }
    }

    /// Error event for the duplex channel.
    #[must_use]
    pub fn to_event(&self) -> ServerEvent {
        ServerEvent::error(self.code(), self.to_string())
    }

    const fn status(&self) -> StatusCode {
        match self {
            Self::NotInRoom | Self::InvalidField(_) | Self::InvalidMessage(_) | Self::PushOnly => {
                StatusCode::BAD_REQUEST
            }
            Self::RoomFull { .. } => StatusCode::CONFLICT,
            Self::UnknownConnection(_) => StatusCode::GONE,
        }
    }
}

impl IntoResponse for SessionError {
    fn into_response(self) -> Response {
        let body = Json(serde_json::json!({
            "error": self.to_string(),
            "code": self.code(),
        }));

        (self.status(), body).into_response()
    }
}
