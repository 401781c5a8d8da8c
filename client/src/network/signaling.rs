//! Signaling Channel
//!
//! WebSocket connection to the server with automatic reconnection. The last
//! joined room is remembered and re-joined after every reconnect.

use std::time::Duration;

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use parla_common::{
    supervise, BackoffPolicy, Classify, ClientEvent, NegotiationMessage, Retryability, RoomId,
    ServerEvent, SupervisorExit, Transport, TransportStatus,
};
use thiserror::Error;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use url::Url;

use super::signaling_url;
use crate::error::ClientError;

/// Keepalive period; well under the server's idle timeout.
const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(20);

const QUEUE_SIZE: usize = 64;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Signaling transport failures.
#[derive(Debug, Error)]
pub enum SignalingError {
    #[error("Handshake rejected with status {0}")]
    Rejected(u16),

    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tungstenite::Error),

    #[error("Connection lost")]
    ConnectionLost,

    #[error("Failed to encode event: {0}")]
    Encode(#[from] serde_json::Error),
}

impl SignalingError {
    fn from_handshake(err: tungstenite::Error) -> Self {
        match err {
            tungstenite::Error::Http(response) => Self::Rejected(response.status().as_u16()),
            other => Self::WebSocket(other),
        }
    }
}

impl Classify for SignalingError {
    fn retryability(&self) -> Retryability {
        match self {
            Self::Rejected(status) if (400..500).contains(status) => Retryability::Permanent,
            Self::Encode(_) => Retryability::Permanent,
            _ => Retryability::Retryable,
        }
    }
}

/// [`Transport`] adapter for the duplex signaling channel.
pub struct SignalingTransport {
    url: Url,
    outgoing: mpsc::Receiver<ClientEvent>,
    incoming: mpsc::Sender<ServerEvent>,
    room: Option<RoomId>,
    stream: Option<WsStream>,
}

impl SignalingTransport {
    pub fn new(
        url: Url,
        outgoing: mpsc::Receiver<ClientEvent>,
        incoming: mpsc::Sender<ServerEvent>,
    ) -> Self {
        Self {
            url,
            outgoing,
            incoming,
            room: None,
            stream: None,
        }
    }

    /// Room that will be re-joined on reconnect.
    #[must_use]
    pub const fn room(&self) -> Option<&RoomId> {
        self.room.as_ref()
    }
}

fn encode(event: &ClientEvent) -> Result<Message, SignalingError> {
    Ok(Message::text(serde_json::to_string(event)?))
}

fn remember(room: &mut Option<RoomId>, event: &ClientEvent) {
    match event {
        ClientEvent::Join { room_id } => {
            *room = room_id.as_deref().and_then(|raw| RoomId::parse(raw).ok());
        }
        ClientEvent::Leave => *room = None,
        _ => {}
    }
}

#[async_trait]
impl Transport for SignalingTransport {
    type Error = SignalingError;

    fn name(&self) -> &'static str {
        "signaling"
    }

    async fn connect(&mut self) -> Result<(), SignalingError> {
        debug!(url = %self.url, "Connecting to signaling server");
        let (mut stream, _) = connect_async(self.url.as_str())
            .await
            .map_err(SignalingError::from_handshake)?;

        if let Some(room) = &self.room {
            info!(room_id = %room, "Re-joining room after reconnect");
            let join = ClientEvent::Join {
                room_id: Some(room.to_string()),
            };
            stream.send(encode(&join)?).await?;
        }

        self.stream = Some(stream);
        Ok(())
    }

    async fn run(&mut self) -> Result<(), SignalingError> {
        let stream = self.stream.take().ok_or(SignalingError::ConnectionLost)?;
        let (mut write, mut read) = stream.split();

        let outgoing = &mut self.outgoing;
        let incoming = &self.incoming;
        let room = &mut self.room;

        let mut heartbeat = tokio::time::interval_at(
            tokio::time::Instant::now() + HEARTBEAT_INTERVAL,
            HEARTBEAT_INTERVAL,
        );

        loop {
            tokio::select! {
                msg = read.next() => {
                    match msg {
                        Some(Ok(Message::Text(text))) => {
                            let event = match serde_json::from_str::<ServerEvent>(text.as_str()) {
                                Ok(event) => event,
                                Err(e) => {
                                    warn!("Failed to parse server message: {} - {}", e, text.as_str());
                                    continue;
                                }
                            };
                            if event == ServerEvent::Pong {
                                continue;
                            }
                            if incoming.send(event).await.is_err() {
                                debug!("Event receiver dropped, closing signaling channel");
                                let _ = write.send(Message::Close(None)).await;
                                return Ok(());
                            }
                        }
                        Some(Ok(Message::Close(frame))) => {
                            info!(?frame, "Server closed signaling channel");
                            return Ok(());
                        }
                        Some(Ok(_)) => {}
                        Some(Err(e)) => return Err(e.into()),
                        None => return Err(SignalingError::ConnectionLost),
                    }
                }

                event = outgoing.recv() => {
                    let Some(event) = event else {
                        debug!("Outgoing channel closed, closing signaling channel");
                        let _ = write.send(Message::Close(None)).await;
                        return Ok(());
                    };
                    remember(room, &event);
                    write.send(encode(&event)?).await?;
                }

                _ = heartbeat.tick() => {
                    write.send(encode(&ClientEvent::Ping)?).await?;
                }
            }
        }
    }
}

/// Handle to a running signaling channel.
pub struct SignalingClient {
    tx: mpsc::Sender<ClientEvent>,
    status: watch::Receiver<TransportStatus>,
    shutdown: CancellationToken,
    task: JoinHandle<SupervisorExit>,
}

impl SignalingClient {
    /// Start connecting to `server_url` (`http(s)://host`). Server events are
    /// delivered on the returned receiver.
    pub fn connect(
        server_url: &str,
        policy: BackoffPolicy,
    ) -> Result<(Self, mpsc::Receiver<ServerEvent>), ClientError> {
        let url = signaling_url(server_url)?;
        let (tx, outgoing) = mpsc::channel(QUEUE_SIZE);
        let (incoming, events) = mpsc::channel(QUEUE_SIZE);
        let (status_tx, status) = watch::channel(TransportStatus::Disconnected);
        let shutdown = CancellationToken::new();

        let mut transport = SignalingTransport::new(url, outgoing, incoming);
        let token = shutdown.clone();
        let task = tokio::spawn(async move {
            let exit = supervise(&mut transport, policy, &status_tx, &token).await;
            info!(%exit, "Signaling channel stopped");
            exit
        });

        Ok((
            Self {
                tx,
                status,
                shutdown,
                task,
            },
            events,
        ))
    }

    /// Queue an event for the server.
    pub async fn send(&self, event: ClientEvent) -> Result<(), ClientError> {
        self.tx.send(event).await.map_err(|_| ClientError::NotRunning)
    }

    pub async fn join(&self, room_id: &RoomId) -> Result<(), ClientError> {
        self.send(ClientEvent::Join {
            room_id: Some(room_id.to_string()),
        })
        .await
    }

    pub async fn leave(&self) -> Result<(), ClientError> {
        self.send(ClientEvent::Leave).await
    }

    /// Send an offer, answer or ICE candidate to the room peer.
    pub async fn negotiate(&self, message: NegotiationMessage) -> Result<(), ClientError> {
        self.send(message.into()).await
    }

    /// Get the current connection status.
    #[must_use]
    pub fn status(&self) -> TransportStatus {
        self.status.borrow().clone()
    }

    /// Watch status changes.
    #[must_use]
    pub fn status_watch(&self) -> watch::Receiver<TransportStatus> {
        self.status.clone()
    }

    /// Stop the channel and wait for the supervisor to exit.
    pub async fn disconnect(self) -> SupervisorExit {
        self.shutdown.cancel();
        self.task.await.unwrap_or(SupervisorExit::Cancelled)
    }

    /// Wait for the supervisor to exit on its own.
    pub async fn closed(self) -> SupervisorExit {
        self.task.await.unwrap_or(SupervisorExit::Cancelled)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_errors_are_permanent() {
        assert_eq!(
            SignalingError::Rejected(404).retryability(),
            Retryability::Permanent
        );
        assert_eq!(
            SignalingError::Rejected(503).retryability(),
            Retryability::Retryable
        );
        assert_eq!(
            SignalingError::ConnectionLost.retryability(),
            Retryability::Retryable
        );
    }

    #[test]
    fn test_join_and_leave_update_remembered_room() {
        let mut room = None;
        remember(
            &mut room,
            &ClientEvent::Join {
                room_id: Some("abc123".into()),
            },
        );
        assert_eq!(room, Some(RoomId::parse("abc123").unwrap()));

        remember(&mut room, &ClientEvent::Ping);
        assert!(room.is_some());

        remember(&mut room, &ClientEvent::Leave);
        assert!(room.is_none());
    }
}
