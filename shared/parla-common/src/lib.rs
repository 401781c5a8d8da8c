//! Parla Common Library
//!
//! Shared types, protocols, and the reconnection policy used by both server and client.

pub mod backoff;
pub mod error;
pub mod protocol;
pub mod reconnect;
pub mod types;

pub use backoff::{Backoff, BackoffDecision, BackoffPolicy, Classify, Retryability};
pub use error::{Error, Result};
pub use protocol::{CaptionEvent, ClientEvent, NegotiationMessage, ServerEvent};
pub use reconnect::{supervise, SupervisorExit, Transport, TransportStatus};
pub use types::*;
