//! Connection Registry
//!
//! Tracks live transport connections, their outbound queues and liveness.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parla_common::{ConnectionId, ServerEvent};
use serde::Serialize;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Transport capability of a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TransportKind {
    /// Bidirectional signaling channel (WebSocket).
    Duplex,
    /// Server-push-only caption stream (SSE).
    PushOnly,
}

impl TransportKind {
    /// Whether the client can send messages on this transport.
    #[must_use]
    pub const fn is_duplex(self) -> bool {
        matches!(self, Self::Duplex)
    }
}

/// A registered connection.
#[derive(Debug)]
pub struct Connection {
    pub id: ConnectionId,
    pub kind: TransportKind,
    pub connected_at: DateTime<Utc>,
    tx: mpsc::Sender<ServerEvent>,
    closed: CancellationToken,
    /// Milliseconds since the registry epoch.
    last_seen_ms: AtomicU64,
}

/// Transport-side half returned by [`ConnectionRegistry::insert`].
#[derive(Debug)]
pub struct ConnectionHandle {
    pub id: ConnectionId,
    pub rx: mpsc::Receiver<ServerEvent>,
    /// Cancelled when the registry drops the connection.
    pub closed: CancellationToken,
}

/// Result of a non-blocking delivery attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    Delivered,
    /// Recipient queue is full; event dropped.
    Lagging,
    /// Recipient is gone; event dropped.
    Gone,
}

/// Live connection table.
pub struct ConnectionRegistry {
    connections: DashMap<ConnectionId, Arc<Connection>>,
    queue_size: usize,
    epoch: Instant,
}

impl ConnectionRegistry {
    /// Create a registry whose outbound queues hold `queue_size` events.
    #[must_use]
    pub fn new(queue_size: usize) -> Self {
        Self {
            connections: DashMap::new(),
            queue_size: queue_size.max(1),
            epoch: Instant::now(),
        }
    }

    fn now_ms(&self) -> u64 {
        self.epoch.elapsed().as_millis() as u64
    }

    /// Assign an identity and start liveness tracking. Never fails.
    pub fn insert(&self, kind: TransportKind) -> ConnectionHandle {
        let id = ConnectionId::new();
        let (tx, rx) = mpsc::channel(self.queue_size);
        let closed = CancellationToken::new();

        let connection = Arc::new(Connection {
            id,
            kind,
            connected_at: Utc::now(),
            tx,
            closed: closed.clone(),
            last_seen_ms: AtomicU64::new(self.now_ms()),
        });
        self.connections.insert(id, connection);
        debug!(connection_id = %id, kind = ?kind, "Connection registered");

        ConnectionHandle { id, rx, closed }
    }

    /// Drop a connection. Idempotent: `None` if it was already gone.
    pub fn remove(&self, id: ConnectionId) -> Option<Arc<Connection>> {
        let (_, connection) = self.connections.remove(&id)?;
        connection.closed.cancel();
        debug!(connection_id = %id, "Connection unregistered");
        Some(connection)
    }

    #[must_use]
    pub fn contains(&self, id: ConnectionId) -> bool {
        self.connections.contains_key(&id)
    }

    #[must_use]
    pub fn kind(&self, id: ConnectionId) -> Option<TransportKind> {
        self.connections.get(&id).map(|c| c.kind)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.connections.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }

    /// Refresh the liveness timestamp.
    pub fn touch(&self, id: ConnectionId) {
        if let Some(connection) = self.connections.get(&id) {
            connection.last_seen_ms.store(self.now_ms(), Ordering::Relaxed);
        }
    }

    /// Time since the connection was last heard from.
    #[must_use]
    pub fn idle_for(&self, id: ConnectionId) -> Option<Duration> {
        self.connections.get(&id).map(|c| {
            let last = c.last_seen_ms.load(Ordering::Relaxed);
            Duration::from_millis(self.now_ms().saturating_sub(last))
        })
    }

    /// Duplex connections silent for longer than `timeout`.
    #[must_use]
    pub fn idle_duplex(&self, timeout: Duration) -> Vec<ConnectionId> {
        let now = self.now_ms();
        let limit = timeout.as_millis() as u64;
        self.connections
            .iter()
            .filter(|entry| entry.kind.is_duplex())
            .filter(|entry| now.saturating_sub(entry.last_seen_ms.load(Ordering::Relaxed)) > limit)
            .map(|entry| entry.id)
            .collect()
    }

    fn sender(&self, id: ConnectionId) -> Option<mpsc::Sender<ServerEvent>> {
        // Clone the handle so no map guard is held across an await.
        self.connections.get(&id).map(|c| c.tx.clone())
    }

    /// Ordered delivery that waits at most `timeout` for queue space. A
    /// recipient still full after that is reported as lagging.
    pub async fn send_timeout(
        &self,
        id: ConnectionId,
        event: ServerEvent,
        timeout: Duration,
    ) -> Delivery {
        let Some(tx) = self.sender(id) else {
            return Delivery::Gone;
        };
        match tx.send_timeout(event, timeout).await {
            Ok(()) => Delivery::Delivered,
            Err(mpsc::error::SendTimeoutError::Timeout(_)) => Delivery::Lagging,
            Err(mpsc::error::SendTimeoutError::Closed(_)) => Delivery::Gone,
        }
    }

    /// Best-effort delivery that never waits.
    pub fn try_send(&self, id: ConnectionId, event: ServerEvent) -> Delivery {
        let Some(tx) = self.sender(id) else {
            return Delivery::Gone;
        };
        match tx.try_send(event) {
            Ok(()) => Delivery::Delivered,
            Err(mpsc::error::TrySendError::Full(_)) => Delivery::Lagging,
            Err(mpsc::error::TrySendError::Closed(_)) => Delivery::Gone,
        }
    }
}
