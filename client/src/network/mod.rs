//! Network Transports
//!
//! Signaling channel and caption stream, each driven by the shared reconnect
//! supervisor.

pub mod captions;
pub mod signaling;
pub mod sse;

use parla_common::{Language, RoomId};
use url::Url;

use crate::error::ClientError;

fn base_url(server_url: &str) -> Result<Url, ClientError> {
    let url = Url::parse(server_url)?;
    match url.scheme() {
        "http" | "https" => Ok(url),
        other => Err(ClientError::UnsupportedScheme(other.to_string())),
    }
}

fn with_path(mut url: Url, path: &str) -> Url {
    let base = url.path().trim_end_matches('/').to_string();
    url.set_path(&format!("{base}{path}"));
    url.set_query(None);
    url
}

/// `http(s)://host[/prefix]` to `ws(s)://host[/prefix]/ws`.
pub fn signaling_url(server_url: &str) -> Result<Url, ClientError> {
    let base = base_url(server_url)?;
    let scheme = if base.scheme() == "https" { "wss" } else { "ws" };
    let mut url = with_path(base, "/ws");
    url.set_scheme(scheme)
        .map_err(|()| ClientError::UnsupportedScheme(scheme.to_string()))?;
    Ok(url)
}

/// Caption stream endpoint for one room and display language.
pub fn captions_url(
    server_url: &str,
    room_id: &RoomId,
    language: &Language,
) -> Result<Url, ClientError> {
    let mut url = with_path(base_url(server_url)?, &format!("/api/rooms/{room_id}/captions"));
    url.query_pairs_mut().append_pair("lang", language.as_str());
    Ok(url)
}

/// Caption publish endpoint for one room.
pub fn publish_url(server_url: &str, room_id: &RoomId) -> Result<Url, ClientError> {
    Ok(with_path(
        base_url(server_url)?,
        &format!("/api/rooms/{room_id}/captions"),
    ))
}
