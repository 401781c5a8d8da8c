//! Wire Protocol
//!
//! JSON messages exchanged over the duplex signaling channel and the
//! server-push caption stream. Every message carries a kebab-case `type` tag.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::types::{Language, RoomId};

/// Peer negotiation message.
///
/// The `payload` (session description or ICE candidate body) is opaque and
/// is routed untouched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum NegotiationMessage {
    /// Session description offer.
    Offer {
        #[serde(default)]
        payload: Value,
    },
    /// Session description answer.
    Answer {
        #[serde(default)]
        payload: Value,
    },
    /// Trickled ICE candidate.
    IceCandidate {
        #[serde(default)]
        payload: Value,
    },
}

impl NegotiationMessage {
    /// Wire tag of this message.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Offer { .. } => "offer",
            Self::Answer { .. } => "answer",
            Self::IceCandidate { .. } => "ice-candidate",
        }
    }

    /// The opaque body.
    #[must_use]
    pub const fn payload(&self) -> &Value {
        match self {
            Self::Offer { payload } | Self::Answer { payload } | Self::IceCandidate { payload } => {
                payload
            }
        }
    }
}

/// Client-to-server events on the duplex channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ClientEvent {
    /// Join a room, leaving any previous one.
    Join {
        /// Kept raw so a missing or malformed id becomes a usage error reply.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        room_id: Option<String>,
    },
    /// Leave the current room.
    Leave,
    /// Keepalive.
    Ping,
    /// Offer to relay.
    Offer {
        #[serde(default)]
        payload: Value,
    },
    /// Answer to relay.
    Answer {
        #[serde(default)]
        payload: Value,
    },
    /// ICE candidate to relay.
    IceCandidate {
        #[serde(default)]
        payload: Value,
    },
}

impl ClientEvent {
    /// Split off negotiation messages, which the server only routes.
    pub fn into_negotiation(self) -> Result<NegotiationMessage, Self> {
        match self {
            Self::Offer { payload } => Ok(NegotiationMessage::Offer { payload }),
            Self::Answer { payload } => Ok(NegotiationMessage::Answer { payload }),
            Self::IceCandidate { payload } => Ok(NegotiationMessage::IceCandidate { payload }),
            other => Err(other),
        }
    }
}

impl From<NegotiationMessage> for ClientEvent {
    fn from(message: NegotiationMessage) -> Self {
        match message {
            NegotiationMessage::Offer { payload } => Self::Offer { payload },
            NegotiationMessage::Answer { payload } => Self::Answer { payload },
            NegotiationMessage::IceCandidate { payload } => Self::IceCandidate { payload },
        }
    }
}

/// Server-to-client events.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ServerEvent {
    /// Join acknowledged.
    Joined { room_id: RoomId, member_count: usize },
    /// Leave acknowledged.
    Left { room_id: RoomId },
    /// Another member joined the room.
    PeerJoined { member_count: usize },
    /// Another member left the room.
    PeerLeft { member_count: usize },
    /// Pong response.
    Pong,
    /// Relayed offer.
    Offer { payload: Value },
    /// Relayed answer.
    Answer { payload: Value },
    /// Relayed ICE candidate.
    IceCandidate { payload: Value },
    /// Translated caption.
    Translation {
        text: String,
        translated: String,
        from: Language,
        to: Language,
    },
    /// Translation for this subscription's language failed.
    CaptionError {
        from: Language,
        to: Language,
        error: String,
    },
    /// Usage error.
    Error { error: String, code: String },
}

impl ServerEvent {
    /// Build a usage error event.
    pub fn error(code: impl Into<String>, error: impl Into<String>) -> Self {
        Self::Error {
            error: error.into(),
            code: code.into(),
        }
    }

    /// Wire tag of this event.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Joined { .. } => "joined",
            Self::Left { .. } => "left",
            Self::PeerJoined { .. } => "peer-joined",
            Self::PeerLeft { .. } => "peer-left",
            Self::Pong => "pong",
            Self::Offer { .. } => "offer",
            Self::Answer { .. } => "answer",
            Self::IceCandidate { .. } => "ice-candidate",
            Self::Translation { .. } => "translation",
            Self::CaptionError { .. } => "caption-error",
            Self::Error { .. } => "error",
        }
    }

    /// Recover a relayed negotiation message.
    #[must_use]
    pub fn as_negotiation(&self) -> Option<NegotiationMessage> {
        match self {
            Self::Offer { payload } => Some(NegotiationMessage::Offer {
                payload: payload.clone(),
            }),
            Self::Answer { payload } => Some(NegotiationMessage::Answer {
                payload: payload.clone(),
            }),
            Self::IceCandidate { payload } => Some(NegotiationMessage::IceCandidate {
                payload: payload.clone(),
            }),
            _ => None,
        }
    }
}

impl From<NegotiationMessage> for ServerEvent {
    fn from(message: NegotiationMessage) -> Self {
        match message {
            NegotiationMessage::Offer { payload } => Self::Offer { payload },
            NegotiationMessage::Answer { payload } => Self::Answer { payload },
            NegotiationMessage::IceCandidate { payload } => Self::IceCandidate { payload },
        }
    }
}

/// One translated utterance for one target language.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CaptionEvent {
    pub room_id: RoomId,
    pub text: String,
    pub translated: String,
    pub from: Language,
    pub to: Language,
}

impl From<CaptionEvent> for ServerEvent {
    fn from(event: CaptionEvent) -> Self {
        Self::Translation {
            text: event.text,
            translated: event.translated,
            from: event.from,
            to: event.to,
        }
    }
}
