//! Parla Client
//!
//! Client-side transports for a two-party call: the signaling channel, the
//! caption stream and the speech capture loop, all supervised by the shared
//! reconnection policy. Also hosts the negotiation state tracker that decides
//! how relayed offers, answers and candidates are applied.

pub mod error;
pub mod negotiation;
pub mod network;
pub mod speech;

pub use error::ClientError;
pub use negotiation::{NegotiationAction, NegotiationTracker, SignalingState};
pub use network::captions::CaptionStreamClient;
pub use network::signaling::SignalingClient;
pub use speech::{HttpCaptionPublisher, RecognitionEngine, RecognitionError, SpeechCaptureLoop};
