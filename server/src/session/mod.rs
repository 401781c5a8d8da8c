//! Session Coordination
//!
//! Connection registry, room directory, signaling relay and the hub that ties
//! them to caption fan-out.

pub mod error;
pub mod registry;
pub mod relay;
pub mod rooms;

use std::sync::Arc;
use std::time::Duration;

use parla_common::{ConnectionId, Language, NegotiationMessage, RoomId, ServerEvent};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

pub use error::SessionError;
pub use registry::{ConnectionHandle, ConnectionRegistry, Delivery, TransportKind};
pub use relay::{RelayReport, SignalingRelay};
pub use rooms::{JoinOutcome, LeaveOutcome, RoomDirectory};

use crate::captions::{CaptionError, CaptionFanout, PublishReport, Translator};
use crate::config::Config;

/// Owns all shared session state. One instance per server.
pub struct SessionHub {
    registry: Arc<ConnectionRegistry>,
    directory: Arc<RoomDirectory>,
    relay: SignalingRelay,
    captions: CaptionFanout,
}

impl SessionHub {
    pub fn new(config: &Config, translator: Arc<dyn Translator>) -> Self {
        let registry = Arc::new(ConnectionRegistry::new(config.outbound_queue_size));
        let directory = Arc::new(RoomDirectory::new(config.max_room_members));
        let relay = SignalingRelay::new(
            registry.clone(),
            directory.clone(),
            config.peer_send_timeout,
        );
        let captions = CaptionFanout::new(registry.clone(), translator, config.translate_timeout);

        Self {
            registry,
            directory,
            relay,
            captions,
        }
    }

    #[must_use]
    pub fn registry(&self) -> &ConnectionRegistry {
        &self.registry
    }

    #[must_use]
    pub fn directory(&self) -> &RoomDirectory {
        &self.directory
    }

    #[must_use]
    pub const fn captions(&self) -> &CaptionFanout {
        &self.captions
    }

    /// Register a new connection.
    pub fn register(&self, kind: TransportKind) -> ConnectionHandle {
        let handle = self.registry.insert(kind);
        info!(connection_id = %handle.id, kind = ?kind, "Connection opened");
        handle
    }

    /// Tear down a connection: registry entry, caption subscriptions and room
    /// membership go together. Idempotent.
    pub async fn unregister(&self, id: ConnectionId) -> bool {
        let removed = self.registry.remove(id).is_some();
        let subscriptions = self.captions.unsubscribe(id).await;
        if let Some(outcome) = self.directory.leave(id).await {
            self.notify_peer_left(&outcome);
        }

        if removed {
            info!(connection_id = %id, subscriptions, "Connection closed");
        }
        removed
    }

    /// Refresh liveness for an inbound frame.
    pub fn touch(&self, id: ConnectionId) {
        self.registry.touch(id);
    }

    fn require_duplex(&self, id: ConnectionId) -> Result<(), SessionError> {
        match self.registry.kind(id) {
            None => Err(SessionError::UnknownConnection(id)),
            Some(TransportKind::PushOnly) => Err(SessionError::PushOnly),
            Some(TransportKind::Duplex) => Ok(()),
        }
    }

    /// Join a room, acknowledge the joiner and tell existing members.
    pub async fn join(&self, id: ConnectionId, room_id: RoomId) -> Result<JoinOutcome, SessionError> {
        self.require_duplex(id)?;
        let outcome = self.directory.join(room_id, id).await?;

        // Lost a race with unregister: undo so no stale membership survives.
        if !self.registry.contains(id) {
            if let Some(left) = self.directory.leave(id).await {
                self.notify_peer_left(&left);
            }
            return Err(SessionError::UnknownConnection(id));
        }

        if let Some(previous) = &outcome.previous {
            self.notify_peer_left(previous);
        }

        self.registry.try_send(
            id,
            ServerEvent::Joined {
                room_id: outcome.room_id.clone(),
                member_count: outcome.member_count,
            },
        );

        if !outcome.already_member {
            for peer in &outcome.peers {
                self.notify(
                    *peer,
                    ServerEvent::PeerJoined {
                        member_count: outcome.member_count,
                    },
                );
            }
        }

        Ok(outcome)
    }

    /// Leave the current room, if any.
    pub async fn leave(&self, id: ConnectionId) -> Option<LeaveOutcome> {
        let outcome = self.directory.leave(id).await?;
        self.registry.try_send(
            id,
            ServerEvent::Left {
                room_id: outcome.room_id.clone(),
            },
        );
        self.notify_peer_left(&outcome);
        Some(outcome)
    }

    /// Membership notices never wait on a peer's queue.
    fn notify(&self, peer: ConnectionId, event: ServerEvent) {
        if self.registry.try_send(peer, event) == Delivery::Lagging {
            warn!(connection_id = %peer, "Peer queue full, membership notice dropped");
        }
    }

    fn notify_peer_left(&self, outcome: &LeaveOutcome) {
        let member_count = outcome.remaining.len();
        for peer in &outcome.remaining {
            self.notify(*peer, ServerEvent::PeerLeft { member_count });
        }
    }

    /// Forward a negotiation message to the sender's room peers.
    pub async fn relay(
        &self,
        id: ConnectionId,
        message: NegotiationMessage,
    ) -> Result<RelayReport, SessionError> {
        self.relay.relay(id, message).await
    }

    /// Queue a reply for one connection without waiting. Returns `false` if
    /// the event was dropped.
    pub fn send_to(&self, id: ConnectionId, event: ServerEvent) -> bool {
        self.registry.try_send(id, event) == Delivery::Delivered
    }

    /// Subscribe a registered connection to a room's captions.
    pub async fn subscribe_captions(
        &self,
        id: ConnectionId,
        room_id: RoomId,
        language: Language,
    ) -> Result<(), SessionError> {
        if !self.registry.contains(id) {
            return Err(SessionError::UnknownConnection(id));
        }
        self.captions.subscribe(room_id, language, id).await;

        if !self.registry.contains(id) {
            self.captions.unsubscribe(id).await;
            return Err(SessionError::UnknownConnection(id));
        }
        Ok(())
    }

    pub async fn publish_caption(
        &self,
        room_id: &RoomId,
        text: &str,
        from: &Language,
    ) -> Result<PublishReport, CaptionError> {
        self.captions.publish(room_id, text, from).await
    }

    /// Unregister duplex connections silent for longer than `timeout`.
    pub async fn reap_idle(&self, timeout: Duration) -> usize {
        let idle = self.registry.idle_duplex(timeout);
        let mut reaped = 0;
        for id in idle {
            if self.unregister(id).await {
                info!(connection_id = %id, "Idle connection reaped");
                reaped += 1;
            }
        }
        reaped
    }

    /// Run [`Self::reap_idle`] periodically until `shutdown` fires.
    pub fn spawn_reaper(
        self: Arc<Self>,
        interval: Duration,
        timeout: Duration,
        shutdown: CancellationToken,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    () = shutdown.cancelled() => break,
                    _ = ticker.tick() => {
                        let reaped = self.reap_idle(timeout).await;
                        if reaped > 0 {
                            debug!(reaped, "Idle sweep finished");
                        }
                    }
                }
            }
        })
    }

    pub fn connection_count(&self) -> usize {
        self.registry.len()
    }

    pub async fn room_count(&self) -> usize {
        self.directory.room_count().await
    }
}
