//! Reconnection policy.
//!
//! A pure state machine over [`ReconnectContext`], owned by exactly one
//! transport driver. The driver feeds it connection outcomes and obeys the
//! returned [`ReconnectDecision`]; all timing lives in the driver.
//!
//! ```text
//!   on_open ──────────────► attempts = 0
//!   on_disconnect(Retryable)
//!        attempts < max ──► Retry { attempt, delay }
//!        attempts >= max ─► Stop(Exhausted)
//!   on_disconnect(terminal) ► Stop(Terminal)
//!   disable ──────────────► every later decision is Stop(Disabled)
//! ```

use std::time::Duration;

use crate::constants::{
    CLOSE_NORMAL, CLOSE_POLICY_VIOLATION, CLOSE_SENDER_ENDED, DEFAULT_MAX_RECONNECT_ATTEMPTS,
    DEFAULT_RECONNECT_DELAY,
};

/// How a close code affects reconnection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseDisposition {
    /// `4000`: the remote sender ended its transmission.
    SenderEnded,
    /// `1008`: policy violation, typically a bad or expired credential.
    PolicyViolation,
    /// `1000` initiated by the remote.
    Normal,
    /// Any other close, and every transport error.
    Retryable,
}

impl CloseDisposition {
    /// Classify a close code received from the remote.
    #[must_use]
    pub fn classify(code: u16) -> Self {
        match code {
            CLOSE_SENDER_ENDED => Self::SenderEnded,
            CLOSE_POLICY_VIOLATION => Self::PolicyViolation,
            CLOSE_NORMAL => Self::Normal,
            _ => Self::Retryable,
        }
    }

    /// Whether the close must never be retried.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        !matches!(self, Self::Retryable)
    }
}

/// Attempt budget and delay.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectConfig {
    /// Retries allowed after the initial connection attempt.
    pub max_attempts: u32,
    /// Fixed delay before each retry.
    pub base_delay: Duration,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_RECONNECT_ATTEMPTS,
            base_delay: DEFAULT_RECONNECT_DELAY,
        }
    }
}

/// Why the policy stopped reconnecting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// Reconnection was disabled (explicit close or disposal).
    Disabled,
    /// The remote closed with a non-retryable code.
    Terminal(CloseDisposition),
    /// The attempt budget is spent.
    Exhausted {
        /// Retries made before giving up.
        attempts: u32,
    },
}

/// What the driver should do after a connection ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconnectDecision {
    /// Wait `delay`, then connect again.
    Retry {
        /// 1-based retry number.
        attempt: u32,
        /// Delay before the retry.
        delay: Duration,
    },
    /// Give up; the transport stays closed.
    Stop(StopReason),
}

/// Reconnection state for one transport driver.
#[derive(Debug, Clone)]
pub struct ReconnectContext {
    attempts: u32,
    max_attempts: u32,
    base_delay: Duration,
    should_reconnect: bool,
}

impl ReconnectContext {
    /// Fresh context with zero attempts and reconnection enabled.
    #[must_use]
    pub fn new(config: ReconnectConfig) -> Self {
        Self {
            attempts: 0,
            max_attempts: config.max_attempts,
            base_delay: config.base_delay,
            should_reconnect: true,
        }
    }

    /// A connection reached `Open`.
    pub fn on_open(&mut self) {
        self.attempts = 0;
    }

    /// A connection ended with `disposition`.
    pub fn on_disconnect(&mut self, disposition: CloseDisposition) -> ReconnectDecision {
        if !self.should_reconnect {
            return ReconnectDecision::Stop(StopReason::Disabled);
        }
        if disposition.is_terminal() {
            return ReconnectDecision::Stop(StopReason::Terminal(disposition));
        }
        if self.attempts >= self.max_attempts {
            return ReconnectDecision::Stop(StopReason::Exhausted {
                attempts: self.attempts,
            });
        }
        self.attempts += 1;
        ReconnectDecision::Retry {
            attempt: self.attempts,
            delay: self.base_delay,
        }
    }

    /// Permanently disable reconnection for this context.
    pub fn disable(&mut self) {
        self.should_reconnect = false;
    }

    /// Retries made since the last `Open`.
    #[must_use]
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    /// Whether reconnection is still enabled.
    #[must_use]
    pub fn should_reconnect(&self) -> bool {
        self.should_reconnect
    }
}
