//! Negotiation State Tracker
//!
//! Mirrors the peer connection's signaling state so incoming relay traffic is
//! applied in an order the media stack accepts. The server relays blindly;
//! glare rollback, stale answers and early ICE candidates are resolved here.

use parla_common::NegotiationMessage;
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;
use tracing::debug;

/// Offer/answer state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum SignalingState {
    Stable,
    HaveLocalOffer,
    HaveRemoteOffer,
}

/// What the caller must do with the peer connection, in order.
#[derive(Debug, Clone, PartialEq)]
pub enum NegotiationAction {
    /// Roll back our pending local offer (glare).
    RollbackLocalOffer,
    /// Apply the remote offer, then create and send an answer.
    ApplyRemoteOffer(Value),
    /// Apply the remote answer.
    ApplyRemoteAnswer(Value),
    /// Add these candidates to the peer connection.
    AddIceCandidates(Vec<Value>),
    /// Candidate held until a remote description is applied.
    BufferedIceCandidate,
    /// Answer without a pending local offer; drop it.
    IgnoreStaleAnswer,
}

/// Local operation attempted in the wrong state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("cannot {operation} in state {state:?}")]
pub struct NegotiationError {
    pub operation: &'static str,
    pub state: SignalingState,
}

/// Client-side offer/answer/ICE state machine.
#[derive(Debug)]
pub struct NegotiationTracker {
    state: SignalingState,
    has_remote_description: bool,
    pending_candidates: Vec<Value>,
}

impl Default for NegotiationTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl NegotiationTracker {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            state: SignalingState::Stable,
            has_remote_description: false,
            pending_candidates: Vec::new(),
        }
    }

    #[must_use]
    pub const fn state(&self) -> SignalingState {
        self.state
    }

    #[must_use]
    pub const fn has_remote_description(&self) -> bool {
        self.has_remote_description
    }

    #[must_use]
    pub fn buffered_candidates(&self) -> usize {
        self.pending_candidates.len()
    }

    /// We created and sent an offer.
    pub fn local_offer_sent(&mut self) -> Result<(), NegotiationError> {
        if self.state != SignalingState::Stable {
            return Err(NegotiationError {
                operation: "send offer",
                state: self.state,
            });
        }
        self.state = SignalingState::HaveLocalOffer;
        Ok(())
    }

    /// We answered the remote offer.
    pub fn local_answer_sent(&mut self) -> Result<(), NegotiationError> {
        if self.state != SignalingState::HaveRemoteOffer {
            return Err(NegotiationError {
                operation: "send answer",
                state: self.state,
            });
        }
        self.state = SignalingState::Stable;
        Ok(())
    }

    /// Process a relayed message.
    pub fn on_remote(&mut self, message: NegotiationMessage) -> Vec<NegotiationAction> {
        match message {
            NegotiationMessage::Offer { payload } => self.on_offer(payload),
            NegotiationMessage::Answer { payload } => self.on_answer(payload),
            NegotiationMessage::IceCandidate { payload } => vec![self.on_candidate(payload)],
        }
    }

    fn on_offer(&mut self, payload: Value) -> Vec<NegotiationAction> {
        let mut actions = Vec::with_capacity(3);
        if self.state == SignalingState::HaveLocalOffer {
            debug!("Offer collision, rolling back local offer");
            actions.push(NegotiationAction::RollbackLocalOffer);
        }
        actions.push(NegotiationAction::ApplyRemoteOffer(payload));
        self.state = SignalingState::HaveRemoteOffer;
        self.remote_description_applied(&mut actions);
        actions
    }

    fn on_answer(&mut self, payload: Value) -> Vec<NegotiationAction> {
        if self.state != SignalingState::HaveLocalOffer {
            debug!(state = ?self.state, "Ignoring stale answer");
            return vec![NegotiationAction::IgnoreStaleAnswer];
        }
        let mut actions = vec![NegotiationAction::ApplyRemoteAnswer(payload)];
        self.state = SignalingState::Stable;
        self.remote_description_applied(&mut actions);
        actions
    }

    fn on_candidate(&mut self, payload: Value) -> NegotiationAction {
        if self.has_remote_description {
            NegotiationAction::AddIceCandidates(vec![payload])
        } else {
            self.pending_candidates.push(payload);
            NegotiationAction::BufferedIceCandidate
        }
    }

    fn remote_description_applied(&mut self, actions: &mut Vec<NegotiationAction>) {
        self.has_remote_description = true;
        if !self.pending_candidates.is_empty() {
            actions.push(NegotiationAction::AddIceCandidates(std::mem::take(
                &mut self.pending_candidates,
            )));
        }
    }

    /// Forget the current peer (it left, or the channel reconnected).
    pub fn reset(&mut self) {
        self.state = SignalingState::Stable;
        self.has_remote_description = false;
        self.pending_candidates.clear();
    }
}
