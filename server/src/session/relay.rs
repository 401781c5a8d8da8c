//! Signaling Relay
//!
//! Forwards negotiation messages verbatim from a sender to its room peers.

use std::sync::Arc;
use std::time::Duration;

use parla_common::{ConnectionId, NegotiationMessage, ServerEvent};
use tracing::{debug, warn};

use super::error::SessionError;
use super::registry::{ConnectionRegistry, Delivery};
use super::rooms::RoomDirectory;

/// Outcome of one relay call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RelayReport {
    pub delivered: usize,
    /// Peers that disappeared between lookup and delivery, or whose queue
    /// stayed full past the send timeout.
    pub dropped: usize,
}

/// Routes negotiation messages between room members.
pub struct SignalingRelay {
    registry: Arc<ConnectionRegistry>,
    directory: Arc<RoomDirectory>,
    send_timeout: Duration,
}

impl SignalingRelay {
    #[must_use]
    pub const fn new(
        registry: Arc<ConnectionRegistry>,
        directory: Arc<RoomDirectory>,
        send_timeout: Duration,
    ) -> Self {
        Self {
            registry,
            directory,
            send_timeout,
        }
    }

    /// Forward `message` to every other member of the sender's room.
    ///
    /// Delivery to each peer preserves send order because each connection
    /// drains a single FIFO queue. A peer whose queue stays full for longer
    /// than the send timeout misses the message. The payload is never
    /// inspected.
    pub async fn relay(
        &self,
        sender: ConnectionId,
        message: NegotiationMessage,
    ) -> Result<RelayReport, SessionError> {
        let peers = self.directory.peers_of(sender).await;
        if peers.is_empty() {
            debug!(connection_id = %sender, kind = message.kind(), "Relay rejected: no peers");
            return Err(SessionError::NotInRoom);
        }

        let kind = message.kind();
        let event = ServerEvent::from(message);
        let mut report = RelayReport::default();

        for peer in peers {
            match self
                .registry
                .send_timeout(peer, event.clone(), self.send_timeout)
                .await
            {
                Delivery::Delivered => report.delivered += 1,
                Delivery::Lagging => {
                    report.dropped += 1;
                    warn!(from = %sender, to = %peer, kind, "Peer queue full, relay dropped");
                }
                Delivery::Gone => {
                    report.dropped += 1;
                    debug!(from = %sender, to = %peer, kind, "Peer gone, relay dropped");
                }
            }
        }

        if report.delivered == 0 {
            warn!(connection_id = %sender, kind, "Relay reached no peers");
        } else {
            debug!(
                connection_id = %sender,
                kind,
                delivered = report.delivered,
                "Relayed negotiation message"
            );
        }

        Ok(report)
    }
}
