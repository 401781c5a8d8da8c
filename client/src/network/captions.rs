//! Caption Stream
//!
//! Server-push caption subscription for one room and display language.

use async_trait::async_trait;
use futures::StreamExt;
use parla_common::{
    supervise, BackoffPolicy, Classify, Language, Retryability, RoomId, ServerEvent,
    SupervisorExit, Transport, TransportStatus,
};
use thiserror::Error;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use url::Url;

use super::captions_url;
use super::sse::SseParser;
use crate::error::ClientError;

const QUEUE_SIZE: usize = 64;

/// Caption stream failures.
#[derive(Debug, Error)]
pub enum CaptionStreamError {
    #[error("Caption stream request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Caption stream rejected with status {0}")]
    Status(u16),

    #[error("Caption stream ended unexpectedly")]
    Ended,
}

impl Classify for CaptionStreamError {
    fn retryability(&self) -> Retryability {
        match self {
            Self::Status(status) if (400..500).contains(status) => Retryability::Permanent,
            _ => Retryability::Retryable,
        }
    }
}

/// [`Transport`] adapter for the SSE caption stream.
pub struct CaptionTransport {
    client: reqwest::Client,
    url: Url,
    incoming: mpsc::Sender<ServerEvent>,
    response: Option<reqwest::Response>,
}

impl CaptionTransport {
    pub fn new(url: Url, incoming: mpsc::Sender<ServerEvent>) -> Self {
        Self {
            client: reqwest::Client::new(),
            url,
            incoming,
            response: None,
        }
    }
}

#[async_trait]
impl Transport for CaptionTransport {
    type Error = CaptionStreamError;

    fn name(&self) -> &'static str {
        "captions"
    }

    async fn connect(&mut self) -> Result<(), CaptionStreamError> {
        let response = self
            .client
            .get(self.url.clone())
            .header(reqwest::header::ACCEPT, "text/event-stream")
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(CaptionStreamError::Status(status.as_u16()));
        }

        self.response = Some(response);
        Ok(())
    }

    async fn run(&mut self) -> Result<(), CaptionStreamError> {
        let response = self.response.take().ok_or(CaptionStreamError::Ended)?;
        let mut body = response.bytes_stream();
        let mut parser = SseParser::new();

        while let Some(chunk) = body.next().await {
            for frame in parser.push(&chunk?) {
                let event = match serde_json::from_str::<ServerEvent>(&frame.data) {
                    Ok(event) => event,
                    Err(e) => {
                        warn!(event = ?frame.event, "Failed to parse caption event: {}", e);
                        continue;
                    }
                };
                if self.incoming.send(event).await.is_err() {
                    debug!("Caption receiver dropped, closing stream");
                    return Ok(());
                }
            }
        }

        Err(CaptionStreamError::Ended)
    }
}

/// Handle to a running caption subscription.
pub struct CaptionStreamClient {
    status: watch::Receiver<TransportStatus>,
    shutdown: CancellationToken,
    task: JoinHandle<SupervisorExit>,
}

impl CaptionStreamClient {
    /// Subscribe to captions for `room_id` translated into `language`.
    pub fn open(
        server_url: &str,
        room_id: &RoomId,
        language: &Language,
        policy: BackoffPolicy,
    ) -> Result<(Self, mpsc::Receiver<ServerEvent>), ClientError> {
        let url = captions_url(server_url, room_id, language)?;
        let (incoming, events) = mpsc::channel(QUEUE_SIZE);
        let (status_tx, status) = watch::channel(TransportStatus::Disconnected);
        let shutdown = CancellationToken::new();

        let mut transport = CaptionTransport::new(url, incoming);
        let token = shutdown.clone();
        let task = tokio::spawn(async move {
            let exit = supervise(&mut transport, policy, &status_tx, &token).await;
            info!(%exit, "Caption stream stopped");
            exit
        });

        Ok((
            Self {
                status,
                shutdown,
                task,
            },
            events,
        ))
    }

    #[must_use]
    pub fn status(&self) -> TransportStatus {
        self.status.borrow().clone()
    }

    #[must_use]
    pub fn status_watch(&self) -> watch::Receiver<TransportStatus> {
        self.status.clone()
    }

    /// Stop the stream and wait for the supervisor to exit.
    pub async fn close(self) -> SupervisorExit {
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
    fn test_status_classification() {
        assert_eq!(
            CaptionStreamError::Status(400).retryability(),
            Retryability::Permanent
        );
        assert_eq!(
            CaptionStreamError::Status(502).retryability(),
            Retryability::Retryable
        );
        assert_eq!(CaptionStreamError::Ended.retryability(), Retryability::Retryable);
    }
}
