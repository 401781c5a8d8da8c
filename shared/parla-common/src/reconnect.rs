//! Reconnect Supervisor
//!
//! Drives any [`Transport`] through connect / run / backoff cycles using the
//! shared [`BackoffPolicy`]. Each transport adapter only describes how to
//! connect, how to pump its session and how to classify its errors.

use std::fmt;

use async_trait::async_trait;
use serde::Serialize;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::backoff::{Backoff, BackoffDecision, BackoffPolicy, Classify};

/// Transport status as seen by the user interface.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum TransportStatus {
    Disconnected,
    Connecting,
    Connected,
    Reconnecting { attempt: u32, delay_ms: u64 },
    /// Terminal notice, published once per give-up.
    Failed { reason: String },
}

/// A reconnectable session.
#[async_trait]
pub trait Transport: Send {
    type Error: std::error::Error + Classify + Send + Sync + 'static;

    /// Label used in logs.
    fn name(&self) -> &'static str;

    /// Establish the session (handshake complete on `Ok`).
    async fn connect(&mut self) -> Result<(), Self::Error>;

    /// Pump the established session until it ends. `Ok(())` is a clean close.
    async fn run(&mut self) -> Result<(), Self::Error>;
}

/// Why [`supervise`] returned.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SupervisorExit {
    /// The session ended cleanly.
    Closed,
    /// Shutdown was requested.
    Cancelled,
    /// A non-retryable failure was surfaced.
    Rejected(String),
    /// Retries were exhausted.
    GaveUp { attempts: u32, last_error: String },
}

impl fmt::Display for SupervisorExit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Closed => f.write_str("closed"),
            Self::Cancelled => f.write_str("cancelled"),
            Self::Rejected(reason) => write!(f, "rejected: {reason}"),
            Self::GaveUp {
                attempts,
                last_error,
            } => write!(f, "gave up after {attempts} attempts: {last_error}"),
        }
    }
}

async fn session<T: Transport>(
    transport: &mut T,
    backoff: &mut Backoff,
    status: &watch::Sender<TransportStatus>,
) -> Result<(), T::Error> {
    transport.connect().await?;
    backoff.on_success();
    status.send_replace(TransportStatus::Connected);
    info!(transport = transport.name(), "Transport connected");
    transport.run().await
}

/// Run `transport` until it closes cleanly, is cancelled, or fails terminally.
pub async fn supervise<T: Transport>(
    transport: &mut T,
    policy: BackoffPolicy,
    status: &watch::Sender<TransportStatus>,
    shutdown: &CancellationToken,
) -> SupervisorExit {
    let mut backoff = Backoff::new(policy);
    status.send_replace(TransportStatus::Connecting);

    loop {
        let result = tokio::select! {
            biased;
            () = shutdown.cancelled() => {
                status.send_replace(TransportStatus::Disconnected);
                return SupervisorExit::Cancelled;
            }
            result = session(transport, &mut backoff, status) => result,
        };

        let err = match result {
            Ok(()) => {
                info!(transport = transport.name(), "Transport closed cleanly");
                status.send_replace(TransportStatus::Disconnected);
                return SupervisorExit::Closed;
            }
            Err(err) => err,
        };

        match backoff.on_failure(err.retryability()) {
            BackoffDecision::Retry { attempt, delay } => {
                warn!(
                    transport = transport.name(),
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    error = %err,
                    "Transport failed, scheduling reconnect"
                );
                status.send_replace(TransportStatus::Reconnecting {
                    attempt,
                    delay_ms: delay.as_millis() as u64,
                });
                tokio::select! {
                    biased;
                    () = shutdown.cancelled() => {
                        status.send_replace(TransportStatus::Disconnected);
                        return SupervisorExit::Cancelled;
                    }
                    () = tokio::time::sleep(delay) => {}
                }
            }
            decision @ (BackoffDecision::GiveUp { .. } | BackoffDecision::Halted) => {
                let attempts = match decision {
                    BackoffDecision::GiveUp { attempts } => attempts,
                    _ => backoff.attempt(),
                };
                error!(
                    transport = transport.name(),
                    attempts,
                    error = %err,
                    "Transport giving up"
                );
                status.send_replace(TransportStatus::Failed {
                    reason: err.to_string(),
                });
                return SupervisorExit::GaveUp {
                    attempts,
                    last_error: err.to_string(),
                };
            }
            BackoffDecision::Surface => {
                error!(transport = transport.name(), error = %err, "Transport rejected");
                status.send_replace(TransportStatus::Failed {
                    reason: err.to_string(),
                });
                return SupervisorExit::Rejected(err.to_string());
            }
        }
    }
}
