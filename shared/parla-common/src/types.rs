//! Identifier Types
//!
//! Strongly typed wrappers for the parts of a message the server inspects.

use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{Error, Result};

/// Maximum length of a room id.
pub const MAX_ROOM_ID_LEN: usize = 64;

/// Maximum length of a language tag.
pub const MAX_LANGUAGE_LEN: usize = 16;

/// Server-assigned identity of a live transport connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConnectionId(Uuid);

impl ConnectionId {
    /// Allocate a new, time-ordered connection id.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }

    /// Underlying UUID.
    #[must_use]
    pub const fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Client-supplied rendezvous name.
///
/// Opaque to the server beyond validation: trimmed, non-empty, at most
/// [`MAX_ROOM_ID_LEN`] characters of ASCII alphanumerics, `-` or `_`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct RoomId(String);

impl RoomId {
    /// Validate and wrap a room id.
    pub fn parse(raw: &str) -> Result<Self> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err(Error::MissingRoomId);
        }
        if trimmed.len() > MAX_ROOM_ID_LEN {
            return Err(Error::InvalidRoomId(format!(
                "longer than {MAX_ROOM_ID_LEN} characters"
            )));
        }
        if !trimmed
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
        {
            return Err(Error::InvalidRoomId(trimmed.to_string()));
        }
        Ok(Self(trimmed.to_string()))
    }

    /// Validate an optional field, treating `None` as missing.
    pub fn from_field(raw: Option<&str>) -> Result<Self> {
        raw.map_or(Err(Error::MissingRoomId), Self::parse)
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RoomId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl<'de> Deserialize<'de> for RoomId {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Self::parse(&raw).map_err(serde::de::Error::custom)
    }
}

/// Language tag such as `it`, `es` or `pt-br`, normalized to lower case.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct Language(String);

impl Language {
    /// Validate and normalize a language tag.
    pub fn parse(raw: &str) -> Result<Self> {
        let normalized = raw.trim().to_ascii_lowercase();
        if normalized.is_empty() {
            return Err(Error::MissingLanguage);
        }
        let valid_len = (2..=MAX_LANGUAGE_LEN).contains(&normalized.len());
        let valid_chars = normalized
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-');
        if !valid_len || !valid_chars || normalized.starts_with('-') {
            return Err(Error::InvalidLanguage(raw.trim().to_string()));
        }
        Ok(Self(normalized))
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Language {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl<'de> Deserialize<'de> for Language {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Self::parse(&raw).map_err(serde::de::Error::custom)
    }
}
