//! Server Configuration
//!
//! Loads configuration from environment variables.

use anyhow::{Context, Result};
use std::env;
use std::str::FromStr;
use std::time::Duration;

/// Server configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// Server bind address (e.g., "0.0.0.0:8080")
    pub bind_address: String,

    /// Maximum members per room (default: 2, one offer/answer pair)
    pub max_room_members: usize,

    /// Per-connection outbound queue depth (default: 64)
    pub outbound_queue_size: usize,

    /// Caption stream keep-alive interval (default: 15s)
    pub caption_keepalive: Duration,

    /// Longest a relayed message waits for room in a peer's queue (default: 1000ms)
    pub peer_send_timeout: Duration,

    /// Duplex connections silent for longer than this are reaped (default: 60s)
    pub idle_timeout: Duration,

    /// Translation provider endpoint (optional; captions only pass through without it)
    pub translate_url: Option<String>,

    /// Translation provider bearer token (optional)
    pub translate_api_key: Option<String>,

    /// Upper bound for a single translation call (default: 5000ms)
    pub translate_timeout: Duration,

    /// WebRTC STUN server
    pub stun_server: String,

    /// WebRTC TURN server (optional)
    pub turn_server: Option<String>,

    /// WebRTC TURN username (optional)
    pub turn_username: Option<String>,

    /// WebRTC TURN credential (optional)
    pub turn_credential: Option<String>,
}

fn parse_var<T: FromStr>(name: &str, default: T) -> Result<T>
where
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse()
            .with_context(|| format!("{name} has an invalid value: {raw}")),
        Err(_) => Ok(default),
    }
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self> {
        let max_room_members: usize = parse_var("MAX_ROOM_MEMBERS", 2)?;
        anyhow::ensure!(max_room_members >= 2, "MAX_ROOM_MEMBERS must be at least 2");

        let outbound_queue_size: usize = parse_var("OUTBOUND_QUEUE_SIZE", 64)?;
        anyhow::ensure!(outbound_queue_size > 0, "OUTBOUND_QUEUE_SIZE must be positive");

        Ok(Self {
            bind_address: env::var("BIND_ADDRESS").unwrap_or_else(|_| "0.0.0.0:8080".into()),
            max_room_members,
            outbound_queue_size,
            caption_keepalive: Duration::from_secs(parse_var("CAPTION_KEEPALIVE_SECS", 15)?),
            peer_send_timeout: Duration::from_millis(parse_var("PEER_SEND_TIMEOUT_MS", 1000)?),
            idle_timeout: Duration::from_secs(parse_var("IDLE_TIMEOUT_SECS", 60)?),
            translate_url: env::var("TRANSLATE_URL").ok().filter(|v| !v.trim().is_empty()),
            translate_api_key: env::var("TRANSLATE_API_KEY").ok(),
            translate_timeout: Duration::from_millis(parse_var("TRANSLATE_TIMEOUT_MS", 5000)?),
            stun_server: env::var("STUN_SERVER")
                .unwrap_or_else(|_| "stun:stun.l.google.com:19302".into()),
            turn_server: env::var("TURN_SERVER").ok(),
            turn_username: env::var("TURN_USERNAME").ok(),
            turn_credential: env::var("TURN_CREDENTIAL").ok(),
        })
    }

    /// Check if a translation provider is configured.
    #[must_use]
    pub const fn has_translator(&self) -> bool {
        self.translate_url.is_some()
    }

    /// Check if TURN is configured.
    #[must_use]
    pub const fn has_turn(&self) -> bool {
        self.turn_server.is_some()
    }

    /// Create a default configuration for testing.
    #[must_use]
    pub fn default_for_test() -> Self {
        Self {
            bind_address: "127.0.0.1:0".into(),
            max_room_members: 2,
            outbound_queue_size: 64,
            caption_keepalive: Duration::from_secs(15),
            peer_send_timeout: Duration::from_millis(200),
            idle_timeout: Duration::from_secs(60),
            translate_url: None,
            translate_api_key: None,
            translate_timeout: Duration::from_millis(500),
            stun_server: "stun:stun.l.google.com:19302".into(),
            turn_server: None,
            turn_username: None,
            turn_credential: None,
        }
    }
}
