//! Parla Server
//!
//! Realtime session coordination for two-party video calls with live
//! translated captions: connection registry, room directory, signaling relay
//! and caption fan-out.

pub mod api;
pub mod captions;
pub mod config;
pub mod session;
pub mod ws;
