//! Caption HTTP Handlers
//!
//! Server-push caption stream (SSE) and utterance publishing.

use std::convert::Infallible;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use axum::{
    extract::{rejection::JsonRejection, Path, Query, State},
    response::sse::{Event, KeepAlive, Sse},
    Json,
};
use futures::stream::Stream;
use parla_common::{ConnectionId, Language, RoomId, ServerEvent};
use serde::Deserialize;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, error};

use super::error::CaptionError;
use super::fanout::PublishReport;
use crate::api::AppState;
use crate::session::{SessionHub, TransportKind};

/// Query parameters for the caption stream.
#[derive(Debug, Deserialize)]
pub struct SubscribeQuery {
    pub lang: Option<String>,
}

/// Body of a caption publish.
#[derive(Debug, Deserialize)]
pub struct PublishRequest {
    pub text: String,
    pub from: String,
}

/// Open a caption stream.
///
/// GET /api/rooms/{room_id}/captions?lang=xx
pub async fn subscribe(
    State(state): State<AppState>,
    Path(room_id): Path<String>,
    Query(query): Query<SubscribeQuery>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, CaptionError> {
    let room_id = RoomId::parse(&room_id)?;
    let language = Language::parse(
        query
            .lang
            .as_deref()
            .ok_or(parla_common::Error::MissingLanguage)?,
    )?;

    let handle = state.hub.register(TransportKind::PushOnly);
    let id = handle.id;
    let stream = CaptionStream::new(state.hub.clone(), id, handle.rx);

    // Dropping `stream` on the error path unregisters the connection.
    state
        .hub
        .subscribe_captions(id, room_id.clone(), language.clone())
        .await?;
    debug!(connection_id = %id, room_id = %room_id, lang = %language, "Caption stream opened");

    Ok(Sse::new(stream).keep_alive(
        KeepAlive::new()
            .interval(state.config.caption_keepalive)
            .text("keep-alive"),
    ))
}

/// Publish a finalized utterance to the room's caption subscribers.
///
/// POST /api/rooms/{room_id}/captions
pub async fn publish(
    State(state): State<AppState>,
    Path(room_id): Path<String>,
    body: Result<Json<PublishRequest>, JsonRejection>,
) -> Result<Json<PublishReport>, CaptionError> {
    let Json(body) = body?;
    let room_id = RoomId::parse(&room_id)?;
    let from = Language::parse(&body.from)?;

    let report = state.hub.publish_caption(&room_id, &body.text, &from).await?;
    Ok(Json(report))
}

/// Push-only connection's outbound queue as an SSE stream.
///
/// Unregisters the connection when the client goes away.
pub struct CaptionStream {
    inner: ReceiverStream<ServerEvent>,
    hub: Arc<SessionHub>,
    connection_id: ConnectionId,
}

impl CaptionStream {
    fn new(
        hub: Arc<SessionHub>,
        connection_id: ConnectionId,
        rx: tokio::sync::mpsc::Receiver<ServerEvent>,
    ) -> Self {
        Self {
            inner: ReceiverStream::new(rx),
            hub,
            connection_id,
        }
    }
}

impl Stream for CaptionStream {
    type Item = Result<Event, Infallible>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        loop {
            match Pin::new(&mut self.inner).poll_next(cx) {
                Poll::Ready(Some(event)) => match serde_json::to_string(&event) {
                    Ok(json) => {
                        return Poll::Ready(Some(Ok(Event::default().event(event.kind()).data(json))));
                    }
                    Err(e) => {
                        error!(connection_id = %self.connection_id, "Failed to serialize caption event: {}", e);
                    }
                },
                Poll::Ready(None) => {
                    debug!(connection_id = %self.connection_id, "Caption stream closed");
                    return Poll::Ready(None);
                }
                Poll::Pending => return Poll::Pending,
            }
        }
    }
}

impl Drop for CaptionStream {
    fn drop(&mut self) {
        let hub = self.hub.clone();
        let id = self.connection_id;
        if let Ok(runtime) = tokio::runtime::Handle::try_current() {
            runtime.spawn(async move {
                hub.unregister(id).await;
            });
        }
    }
}
