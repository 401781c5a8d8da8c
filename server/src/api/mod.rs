//! API Router and Application State
//!
//! Central routing configuration and shared state.

mod ice;

use std::sync::Arc;

use axum::{extract::State, routing::get, Json, Router};
use serde::Serialize;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};

use crate::{captions, config::Config, session::SessionHub, ws};

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    /// Server configuration
    pub config: Arc<Config>,
    /// Session coordination (connections, rooms, relay, captions)
    pub hub: Arc<SessionHub>,
}

impl AppState {
    /// Create new application state.
    #[must_use]
    pub fn new(config: Config, hub: Arc<SessionHub>) -> Self {
        Self {
            config: Arc::new(config),
            hub,
        }
    }
}

/// Create the main application router.
pub fn create_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        // Health check
        .route("/health", get(health_check))
        // WebRTC ICE configuration
        .route("/api/ice-servers", get(ice::get_ice_servers))
        // Caption stream and publish
        .nest("/api/rooms", captions::router())
        // WebSocket signaling
        .route("/ws", get(ws::handler))
        // Middleware
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        // State
        .with_state(state)
}

/// Health check response.
#[derive(Serialize)]
struct HealthResponse {
    /// Service status
    status: &'static str,
    /// Live connections (duplex and push-only)
    connections: usize,
    /// Rooms with at least one member
    rooms: usize,
    /// Whether a translation provider is configured
    translator: bool,
}

/// Health check endpoint.
async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        connections: state.hub.connection_count(),
        rooms: state.hub.room_count().await,
        translator: state.config.has_translator(),
    })
}

#[cfg(test)]
mod tests {
    use axum::body::{to_bytes, Body};
    use axum::http::{Request, StatusCode};
    use serde_json::Value;
    use tower::ServiceExt;

    use super::*;
    use crate::captions::UnconfiguredTranslator;

    fn app(config: Config) -> Router {
        let hub = Arc::new(SessionHub::new(&config, Arc::new(UnconfiguredTranslator)));
        create_router(AppState::new(config, hub))
    }

    async fn get_json(router: Router, uri: &str) -> (StatusCode, Value) {
        let response = router
            .oneshot(Request::get(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, serde_json::from_slice(&body).unwrap())
    }

    #[tokio::test]
    async fn test_health_reports_empty_hub() {
        let (status, body) = get_json(app(Config::default_for_test()), "/health").await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ok");
        assert_eq!(body["connections"], 0);
        assert_eq!(body["rooms"], 0);
        assert_eq!(body["translator"], false);
    }

    #[tokio::test]
    async fn test_ice_servers_include_turn_when_configured() {
        let mut config = Config::default_for_test();
        config.turn_server = Some("turn:turn.example.com:3478".into());
        config.turn_username = Some("parla".into());
        config.turn_credential = Some("secret".into());

        let (status, body) = get_json(app(config), "/api/ice-servers").await;

        assert_eq!(status, StatusCode::OK);
        let servers = body["ice_servers"].as_array().unwrap();
        assert_eq!(servers.len(), 2);
        assert_eq!(servers[0]["urls"][0], "stun:stun.l.google.com:19302");
        assert!(servers[0].get("username").is_none());
        assert_eq!(servers[1]["username"], "parla");
    }

    #[tokio::test]
    async fn test_caption_stream_rejects_bad_room_id() {
        let (status, body) =
            get_json(app(Config::default_for_test()), "/api/rooms/bad%20room/captions?lang=it")
                .await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["code"], "INVALID_FIELD");
    }

    async fn post_json(router: Router, uri: &str, body: &str) -> (StatusCode, Value) {
        let request = Request::post(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_owned()))
            .unwrap();
        let response = router.oneshot(request).await.unwrap();
        let status = response.status();
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, serde_json::from_slice(&body).unwrap())
    }

    #[tokio::test]
    async fn test_publish_with_missing_field_is_json_error() {
        let (status, body) = post_json(
            app(Config::default_for_test()),
            "/api/rooms/abc123/captions",
            r#"{"from":"it"}"#,
        )
        .await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["code"], "INVALID_BODY");
        assert!(body["error"].as_str().unwrap().contains("text"));
    }

    #[tokio::test]
    async fn test_publish_with_malformed_json_is_json_error() {
        let (status, body) = post_json(
            app(Config::default_for_test()),
            "/api/rooms/abc123/captions",
            "{not json",
        )
        .await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["code"], "INVALID_BODY");
    }

    #[tokio::test]
    async fn test_caption_stream_opens_event_stream() {
        let response = app(Config::default_for_test())
            .oneshot(
                Request::get("/api/rooms/abc123/captions?lang=it")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers()["content-type"],
            "text/event-stream"
        );
    }
}
