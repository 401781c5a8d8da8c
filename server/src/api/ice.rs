//! ICE Server Configuration

use axum::extract::State;
use axum::Json;
use serde::Serialize;

use super::AppState;

/// ICE server configuration.
#[derive(Debug, Serialize)]
pub struct IceServer {
    /// Server URLs (e.g., "stun:stun.l.google.com:19302")
    pub urls: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub credential: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct IceServersResponse {
    pub ice_servers: Vec<IceServer>,
}

/// Get ICE server configuration.
///
/// GET /api/ice-servers
pub async fn get_ice_servers(State(state): State<AppState>) -> Json<IceServersResponse> {
    let mut servers = vec![IceServer {
        urls: vec![state.config.stun_server.clone()],
        username: None,
        credential: None,
    }];

    if let Some(turn) = &state.config.turn_server {
        servers.push(IceServer {
            urls: vec![turn.clone()],
            username: state.config.turn_username.clone(),
            credential: state.config.turn_credential.clone(),
        });
    }

    Json(IceServersResponse {
        ice_servers: servers,
    })
}
