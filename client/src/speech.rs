//! Speech Capture
//!
//! Keeps an external recognition engine running for the length of a call and
//! publishes each finalized utterance to the room's caption stream.

use std::sync::Arc;

use async_trait::async_trait;
use parla_common::{
    supervise, BackoffPolicy, Classify, Language, Retryability, RoomId, SupervisorExit, Transport,
    TransportStatus,
};
use serde::Serialize;
use thiserror::Error;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::ClientError;
use crate::network::publish_url;

/// Recognition engine failures, named after the engine's error codes.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RecognitionError {
    #[error("no speech detected")]
    NoSpeech,

    #[error("recognition aborted")]
    Aborted,

    #[error("recognition network error: {0}")]
    Network(String),

    #[error("microphone permission denied")]
    NotAllowed,

    #[error("recognition service not allowed")]
    ServiceNotAllowed,

    #[error("recognition failed: {0}")]
    Other(String),
}

impl Classify for RecognitionError {
    fn retryability(&self) -> Retryability {
        match self {
            Self::NoSpeech | Self::Aborted | Self::Network(_) => Retryability::Retryable,
            Self::NotAllowed | Self::ServiceNotAllowed | Self::Other(_) => Retryability::Permanent,
        }
    }
}

/// External speech-to-text capability.
#[async_trait]
pub trait RecognitionEngine: Send {
    /// Begin (or resume) recognition in `language`.
    async fn start(&mut self, language: &Language) -> Result<(), RecognitionError>;

    /// Next finalized utterance. `Ok(None)` means the engine ended its
    /// session on its own and needs restarting.
    async fn next_utterance(&mut self) -> Result<Option<String>, RecognitionError>;

    /// Stop recognition.
    async fn stop(&mut self);
}

/// Where finalized utterances go.
#[async_trait]
pub trait UtteranceSink: Send + Sync {
    async fn publish(
        &self,
        room_id: &RoomId,
        text: &str,
        from: &Language,
    ) -> Result<(), ClientError>;
}

#[derive(Serialize)]
struct PublishBody<'a> {
    text: &'a str,
    from: &'a Language,
}

/// Publishes utterances through the server's caption endpoint.
pub struct HttpCaptionPublisher {
    client: reqwest::Client,
    server_url: String,
}

impl HttpCaptionPublisher {
    pub fn new(server_url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            server_url: server_url.into(),
        }
    }
}

#[async_trait]
impl UtteranceSink for HttpCaptionPublisher {
    async fn publish(
        &self,
        room_id: &RoomId,
        text: &str,
        from: &Language,
    ) -> Result<(), ClientError> {
        let url = publish_url(&self.server_url, room_id)?;
        let response = self
            .client
            .post(url)
            .json(&PublishBody { text, from })
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(ClientError::Rejected {
                status: status.as_u16(),
                message,
            });
        }
        Ok(())
    }
}

/// [`Transport`] adapter around a recognition engine.
pub struct SpeechTransport<E> {
    engine: E,
    sink: Arc<dyn UtteranceSink>,
    room_id: RoomId,
    language: Language,
}

impl<E: RecognitionEngine> SpeechTransport<E> {
    pub fn new(
        engine: E,
        sink: Arc<dyn UtteranceSink>,
        room_id: RoomId,
        language: Language,
    ) -> Self {
        Self {
            engine,
            sink,
            room_id,
            language,
        }
    }
}

#[async_trait]
impl<E: RecognitionEngine> Transport for SpeechTransport<E> {
    type Error = RecognitionError;

    fn name(&self) -> &'static str {
        "speech"
    }

    async fn connect(&mut self) -> Result<(), RecognitionError> {
        self.engine.start(&self.language).await
    }

    async fn run(&mut self) -> Result<(), RecognitionError> {
        loop {
            let result = self.engine.next_utterance().await;
            let text = match result {
                Ok(Some(text)) => text,
                Ok(None) => {
                    debug!("Recognition session ended, restarting");
                    self.engine.start(&self.language).await?;
                    continue;
                }
                Err(e) => {
                    self.engine.stop().await;
                    return Err(e);
                }
            };

            let text = text.trim();
            if text.is_empty() {
                continue;
            }
            // Caption delivery problems never stop recognition.
            if let Err(e) = self.sink.publish(&self.room_id, text, &self.language).await {
                warn!(room_id = %self.room_id, "Failed to publish utterance: {}", e);
            }
        }
    }
}

/// Handle to a running speech capture loop.
pub struct SpeechCaptureLoop {
    status: watch::Receiver<TransportStatus>,
    shutdown: CancellationToken,
    task: JoinHandle<SupervisorExit>,
}

impl SpeechCaptureLoop {
    /// Start recognition in `language`, publishing into `room_id`.
    pub fn start<E>(
        engine: E,
        sink: Arc<dyn UtteranceSink>,
        room_id: RoomId,
        language: Language,
        policy: BackoffPolicy,
    ) -> Self
    where
        E: RecognitionEngine + 'static,
    {
        let (status_tx, status) = watch::channel(TransportStatus::Disconnected);
        let shutdown = CancellationToken::new();

        let mut transport = SpeechTransport::new(engine, sink, room_id, language);
        let token = shutdown.clone();
        let task = tokio::spawn(async move {
            let exit = supervise(&mut transport, policy, &status_tx, &token).await;
            transport.engine.stop().await;
            info!(%exit, "Speech capture stopped");
            exit
        });

        Self {
            status,
            shutdown,
            task,
        }
    }

    #[must_use]
    pub fn status(&self) -> TransportStatus {
        self.status.borrow().clone()
    }

    #[must_use]
    pub fn status_watch(&self) -> watch::Receiver<TransportStatus> {
        self.status.clone()
    }

    /// Stop capturing and wait for the loop to exit.
    pub async fn stop(self) -> SupervisorExit {
        self.shutdown.cancel();
        self.task.await.unwrap_or(SupervisorExit::Cancelled)
    }

    /// Wait for the loop to exit on its own.
    pub async fn stopped(self) -> SupervisorExit {
        self.task.await.unwrap_or(SupervisorExit::Cancelled)
    }
}
