//! WebSocket Handler
//!
//! Duplex signaling channel: room join/leave and negotiation relay.

use std::time::Duration;

use axum::extract::ws::{Message, WebSocket};
use axum::{
    extract::{State, WebSocketUpgrade},
    response::Response,
};
use futures::{SinkExt, StreamExt};
use parla_common::{ClientEvent, ConnectionId, RoomId, ServerEvent};
use tracing::{debug, error, info, warn};

use crate::api::AppState;
use crate::session::{ConnectionHandle, SessionError, SessionHub, TransportKind};

/// How long queued events may take to flush after the connection ends.
const DRAIN_TIMEOUT: Duration = Duration::from_secs(1);

/// WebSocket upgrade handler.
pub async fn handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

/// Handle WebSocket connection.
async fn handle_socket(socket: WebSocket, state: AppState) {
    let (mut ws_sender, mut ws_receiver) = socket.split();

    let ConnectionHandle { id, mut rx, closed } = state.hub.register(TransportKind::Duplex);
    info!(connection_id = %id, "WebSocket connected");

    // Forward queued events to the socket. Ends once the registry drops the
    // connection's queue.
    let mut sender_handle = tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            let msg = match serde_json::to_string(&event) {
                Ok(json) => json,
                Err(e) => {
                    error!("Failed to serialize event: {}", e);
                    continue;
                }
            };

            if ws_sender.send(Message::Text(msg.into())).await.is_err() {
                return;
            }
        }
        let _ = ws_sender.send(Message::Close(None)).await;
    });

    loop {
        let msg = tokio::select! {
            () = closed.cancelled() => {
                debug!(connection_id = %id, "Connection closed by server");
                break;
            }
            msg = ws_receiver.next() => msg,
        };

        match msg {
            Some(Ok(Message::Text(text))) => {
                state.hub.touch(id);
                if let Err(e) = handle_client_message(text.as_str(), id, &state.hub).await {
                    debug!(connection_id = %id, code = e.code(), "Client message rejected: {}", e);
                    state.hub.send_to(id, e.to_event());
                }
            }
            Some(Ok(Message::Binary(_))) => {
                state.hub.touch(id);
                let err = SessionError::InvalidMessage("binary frames are not supported".into());
                state.hub.send_to(id, err.to_event());
            }
            Some(Ok(Message::Ping(_) | Message::Pong(_))) => state.hub.touch(id),
            Some(Ok(Message::Close(_))) | None => break,
            Some(Err(e)) => {
                warn!(connection_id = %id, "WebSocket error: {}", e);
                break;
            }
        }
    }

    state.hub.unregister(id).await;
    if tokio::time::timeout(DRAIN_TIMEOUT, &mut sender_handle)
        .await
        .is_err()
    {
        sender_handle.abort();
    }

    info!(connection_id = %id, "WebSocket disconnected");
}

/// Handle a client message.
async fn handle_client_message(
    text: &str,
    id: ConnectionId,
    hub: &SessionHub,
) -> Result<(), SessionError> {
    let event: ClientEvent =
        serde_json::from_str(text).map_err(|e| SessionError::InvalidMessage(e.to_string()))?;

    match event.into_negotiation() {
        Ok(message) => {
            hub.relay(id, message).await?;
        }
        Err(ClientEvent::Join { room_id }) => {
            let room_id = RoomId::from_field(room_id.as_deref())?;
            hub.join(id, room_id).await?;
        }
        Err(ClientEvent::Leave) => {
            hub.leave(id).await;
        }
        Err(ClientEvent::Ping) => {
            hub.send_to(id, ServerEvent::Pong);
        }
        Err(other) => {
            return Err(SessionError::InvalidMessage(format!(
                "unexpected event: {other:?}"
            )));
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use serde_json::json;

    use super::*;
    use crate::captions::UnconfiguredTranslator;
    use crate::config::Config;

    fn hub() -> SessionHub {
        SessionHub::new(&Config::default_for_test(), Arc::new(UnconfiguredTranslator))
    }

    #[tokio::test]
    async fn test_join_without_room_id_is_usage_error() {
        let hub = hub();
        let a = hub.register(TransportKind::Duplex);

        let err = handle_client_message(r#"{"type":"join"}"#, a.id, &hub)
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "room_id is required");
        assert_eq!(hub.room_count().await, 0);
    }

    #[tokio::test]
    async fn test_malformed_json_is_invalid_message() {
        let hub = hub();
        let a = hub.register(TransportKind::Duplex);

        let err = handle_client_message("{not json", a.id, &hub).await.unwrap_err();
        assert_eq!(err.code(), "INVALID_MESSAGE");
    }

    #[tokio::test]
    async fn test_offer_outside_room_is_not_in_room() {
        let hub = hub();
        let a = hub.register(TransportKind::Duplex);

        let msg = json!({"type": "offer", "payload": {"sdp": "v=0"}}).to_string();
        let err = handle_client_message(&msg, a.id, &hub).await.unwrap_err();
        assert!(matches!(err, SessionError::NotInRoom));
    }

    #[tokio::test]
    async fn test_ping_replies_pong() {
        let hub = hub();
        let mut a = hub.register(TransportKind::Duplex);

        handle_client_message(r#"{"type":"ping"}"#, a.id, &hub)
            .await
            .unwrap();
        assert_eq!(a.rx.recv().await.unwrap(), ServerEvent::Pong);
    }
}
