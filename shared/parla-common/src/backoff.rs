//! Reconnection Backoff Policy
//!
//! One capped exponential backoff shared by every transport that retries:
//! the signaling channel, the caption stream and the speech-capture loop.

use std::time::{Duration, Instant};

/// Whether a failure is worth retrying.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Retryability {
    /// Transient: schedule a retry.
    Retryable,
    /// Protocol rejection or clean close: surface immediately, never retry.
    Permanent,
}

/// Errors that know their own retry class.
pub trait Classify {
    fn retryability(&self) -> Retryability;
}

/// Retry parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffPolicy {
    /// Delay before the first retry.
    pub base_delay: Duration,
    /// Upper bound for any single delay.
    pub delay_cap: Duration,
    /// `None` keeps retrying while the owning session is open.
    pub max_attempts: Option<u32>,
}

impl BackoffPolicy {
    /// Unbounded policy with the given delays.
    #[must_use]
    pub const fn new(base_delay: Duration, delay_cap: Duration) -> Self {
        Self {
            base_delay,
            delay_cap,
            max_attempts: None,
        }
    }

    /// Bound the number of consecutive retries.
    #[must_use]
    pub const fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = Some(max_attempts);
        self
    }

    /// Signaling channel: 1s doubling to 10s, give up after 5 attempts.
    #[must_use]
    pub const fn signaling() -> Self {
        Self::new(Duration::from_secs(1), Duration::from_secs(10)).with_max_attempts(5)
    }

    /// Caption stream: 1s doubling to 10s, give up after 8 attempts.
    #[must_use]
    pub const fn captions() -> Self {
        Self::new(Duration::from_secs(1), Duration::from_secs(10)).with_max_attempts(8)
    }

    /// Speech capture restarts for as long as the call is open.
    #[must_use]
    pub const fn speech() -> Self {
        Self::new(Duration::from_millis(250), Duration::from_secs(5))
    }

    /// `min(delay_cap, base_delay * 2^attempt)`.
    #[must_use]
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt);
        self.base_delay.saturating_mul(factor).min(self.delay_cap)
    }
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self::signaling()
    }
}

/// What the owner should do after a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackoffDecision {
    /// Schedule exactly one retry after `delay`. `attempt` is 1-based.
    Retry { attempt: u32, delay: Duration },
    /// Attempts exhausted. Returned once; surface a single failure notice.
    GiveUp { attempts: u32 },
    /// Non-retryable failure: surface it, schedule nothing.
    Surface,
    /// Already gave up; stay silent until [`Backoff::reset`].
    Halted,
}

/// Per-session backoff state.
#[derive(Debug, Clone)]
pub struct Backoff {
    policy: BackoffPolicy,
    attempt: u32,
    last_attempt: Option<Instant>,
    exhausted: bool,
}

impl Backoff {
    #[must_use]
    pub const fn new(policy: BackoffPolicy) -> Self {
        Self {
            policy,
            attempt: 0,
            last_attempt: None,
            exhausted: false,
        }
    }

    #[must_use]
    pub const fn policy(&self) -> &BackoffPolicy {
        &self.policy
    }

    /// Retries scheduled since the last success.
    #[must_use]
    pub const fn attempt(&self) -> u32 {
        self.attempt
    }

    #[must_use]
    pub const fn last_attempt(&self) -> Option<Instant> {
        self.last_attempt
    }

    /// True once the policy gave up.
    #[must_use]
    pub const fn is_exhausted(&self) -> bool {
        self.exhausted
    }

    /// Record a failure and decide what happens next.
    pub fn on_failure(&mut self, retryability: Retryability) -> BackoffDecision {
        if self.exhausted {
            return BackoffDecision::Halted;
        }
        if retryability == Retryability::Permanent {
            return BackoffDecision::Surface;
        }
        if let Some(max) = self.policy.max_attempts {
            if self.attempt >= max {
                self.exhausted = true;
                return BackoffDecision::GiveUp {
                    attempts: self.attempt,
                };
            }
        }

        let delay = self.policy.delay_for(self.attempt);
        self.attempt += 1;
        self.last_attempt = Some(Instant::now());
        BackoffDecision::Retry {
            attempt: self.attempt,
            delay,
        }
    }

    /// A fully successful reconnect clears the attempt counter.
    pub fn on_success(&mut self) {
        self.attempt = 0;
    }

    /// Explicit external reset, the only way out of the give-up state.
    pub fn reset(&mut self) {
        self.attempt = 0;
        self.last_attempt = None;
        self.exhausted = false;
    }
}
