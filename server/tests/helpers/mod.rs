//! Reusable test helpers for HTTP and WebSocket integration tests.
//!
//! Use [`spawn_app()`] to run the full router on an ephemeral port, then
//! drive it with [`connect_ws()`] and [`SseReader`].
#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use parla_common::ServerEvent;
use parla_server::api::{create_router, AppState};
use parla_server::captions::{TranslateError, TranslateRequest, Translator, UnconfiguredTranslator};
use parla_server::config::Config;
use parla_server::session::SessionHub;
use tokio::net::TcpStream;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

/// Upper bound for any single expected event.
pub const EVENT_TIMEOUT: Duration = Duration::from_secs(5);

pub type WsClient = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// A running test server.
pub struct TestServer {
    pub addr: SocketAddr,
    pub url: String,
    pub ws_url: String,
    pub hub: Arc<SessionHub>,
    _handle: JoinHandle<()>,
}

/// Spawn the router with the default test config and no translation provider.
pub async fn spawn_app() -> TestServer {
    spawn_app_with(Config::default_for_test(), Arc::new(UnconfiguredTranslator)).await
}

pub async fn spawn_app_with(config: Config, translator: Arc<dyn Translator>) -> TestServer {
    let hub = Arc::new(SessionHub::new(&config, translator));
    let router = create_router(AppState::new(config, hub.clone()));

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("Failed to bind test server");
    let addr = listener.local_addr().expect("Failed to get local addr");

    let handle = tokio::spawn(async move {
        axum::serve(listener, router)
            .await
            .expect("Test server failed");
    });

    TestServer {
        addr,
        url: format!("http://{addr}"),
        ws_url: format!("ws://{addr}/ws"),
        hub,
        _handle: handle,
    }
}

/// Open a signaling WebSocket.
pub async fn connect_ws(server: &TestServer) -> WsClient {
    let (ws, _) = connect_async(server.ws_url.as_str())
        .await
        .expect("WebSocket handshake failed");
    ws
}

pub async fn send_json(ws: &mut WsClient, value: serde_json::Value) {
    ws.send(Message::text(value.to_string()))
        .await
        .expect("Failed to send frame");
}

/// Next server event, skipping control frames.
pub async fn recv_event(ws: &mut WsClient) -> ServerEvent {
    tokio::time::timeout(EVENT_TIMEOUT, async {
        loop {
            match ws.next().await {
                Some(Ok(Message::Text(text))) => {
                    return serde_json::from_str(text.as_str()).expect("Invalid server event");
                }
                Some(Ok(Message::Close(_))) | None => panic!("Connection closed"),
                Some(Ok(_)) => {}
                Some(Err(e)) => panic!("WebSocket error: {e}"),
            }
        }
    })
    .await
    .expect("Timed out waiting for server event")
}

/// Assert no text frame arrives within `window`.
pub async fn expect_silence(ws: &mut WsClient, window: Duration) {
    let result = tokio::time::timeout(window, async {
        loop {
            match ws.next().await {
                Some(Ok(Message::Text(text))) => return text.as_str().to_string(),
                Some(Ok(_)) => {}
                _ => std::future::pending::<()>().await,
            }
        }
    })
    .await;
    if let Ok(text) = result {
        panic!("Unexpected event: {text}");
    }
}

/// Join `room_id` and return the acknowledged member count.
pub async fn join(ws: &mut WsClient, room_id: &str) -> usize {
    send_json(ws, serde_json::json!({"type": "join", "room_id": room_id})).await;
    match recv_event(ws).await {
        ServerEvent::Joined { member_count, .. } => member_count,
        other => panic!("Expected joined, got {other:?}"),
    }
}

/// Poll `check` until it holds or [`EVENT_TIMEOUT`] elapses.
pub async fn eventually<F, Fut>(mut check: F)
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    tokio::time::timeout(EVENT_TIMEOUT, async {
        while !check().await {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("Condition not reached in time");
}

/// Minimal SSE reader over a streaming response body.
pub struct SseReader {
    stream: futures::stream::BoxStream<'static, reqwest::Result<bytes::Bytes>>,
    buffer: String,
}

impl SseReader {
    /// Open a caption stream for `room_id` in `lang`.
    pub async fn open(server: &TestServer, room_id: &str, lang: &str) -> Self {
        let response = reqwest::get(format!(
            "{}/api/rooms/{room_id}/captions?lang={lang}",
            server.url
        ))
        .await
        .expect("Caption stream request failed");
        assert!(response.status().is_success(), "status: {}", response.status());

        Self {
            stream: response.bytes_stream().boxed(),
            buffer: String::new(),
        }
    }

    /// Next `data:` payload as a server event.
    pub async fn next_event(&mut self) -> ServerEvent {
        tokio::time::timeout(EVENT_TIMEOUT, async {
            loop {
                while let Some(end) = self.buffer.find("\n\n") {
                    let frame: String = self.buffer.drain(..end + 2).collect();
                    let data: Vec<&str> = frame
                        .lines()
                        .filter_map(|line| line.strip_prefix("data:"))
                        .map(str::trim_start)
                        .collect();
                    if !data.is_empty() {
                        return serde_json::from_str(&data.join("\n")).expect("Invalid SSE data");
                    }
                }

                let chunk = self
                    .stream
                    .next()
                    .await
                    .expect("Caption stream ended")
                    .expect("Caption stream failed");
                self.buffer.push_str(&String::from_utf8_lossy(&chunk));
            }
        })
        .await
        .expect("Timed out waiting for caption event")
    }
}

/// Publish an utterance through the HTTP endpoint.
pub async fn publish(
    server: &TestServer,
    room_id: &str,
    text: &str,
    from: &str,
) -> reqwest::Response {
    reqwest::Client::new()
        .post(format!("{}/api/rooms/{room_id}/captions", server.url))
        .json(&serde_json::json!({"text": text, "from": from}))
        .send()
        .await
        .expect("Publish request failed")
}

/// Translator that fails for chosen target languages and tags the rest.
pub struct StubTranslator {
    pub failing: Vec<&'static str>,
}

#[async_trait]
impl Translator for StubTranslator {
    async fn translate(&self, request: &TranslateRequest) -> Result<String, TranslateError> {
        if self.failing.contains(&request.to_language.as_str()) {
            return Err(TranslateError::Provider("language not supported".into()));
        }
        Ok(format!("{}:{}", request.to_language, request.text))
    }
}
