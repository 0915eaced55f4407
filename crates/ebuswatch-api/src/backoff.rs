//! Reconnect backoff shared by every long-running connection loop.
//!
//! The delay starts at [`ReconnectConfig::initial_delay`] and doubles after
//! each consecutive failure until it is clamped at
//! [`ReconnectConfig::max_delay`]. The first failure that finds the delay
//! already at the ceiling is reported as an *escalation* exactly once per
//! outage, so callers can broadcast "everything may be stale" without
//! repeating it on every subsequent retry.

use std::time::Duration;

// ── ReconnectConfig ──────────────────────────────────────────────────

/// Exponential backoff configuration for reconnection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconnectConfig {
    /// Delay before the first reconnection attempt. Default: 1s.
    pub initial_delay: Duration,

    /// Upper bound on backoff delay. Default: 60s.
    pub max_delay: Duration,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(60),
        }
    }
}

// ── BackoffStep ──────────────────────────────────────────────────────

/// Outcome of a single failure, as seen by the owning loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffStep {
    /// How long to sleep before the next connect attempt.
    pub delay: Duration,
    /// `true` on the first failure of an outage that is already at the ceiling.
    pub escalate: bool,
    /// Failures observed while pinned at the ceiling (logging only).
    pub outages: u32,
}

// ── Backoff ──────────────────────────────────────────────────────────

/// Stateful backoff counter owned by one connection loop.
#[derive(Debug, Clone)]
pub struct Backoff {
    config: ReconnectConfig,
    wait: Duration,
    escalated: bool,
    outages: u32,
}

impl Backoff {
    pub fn new(config: ReconnectConfig) -> Self {
        let wait = config.initial_delay;
        Self {
            config,
            wait,
            escalated: false,
            outages: 0,
        }
    }

    /// Record a successful connect: the next failure starts from scratch.
    pub fn reset(&mut self) {
        self.wait = self.config.initial_delay;
        self.escalated = false;
        self.outages = 0;
    }

    /// Record a failure and return the delay to sleep.
    pub fn fail(&mut self) -> BackoffStep {
        if self.at_ceiling() {
            self.outages = self.outages.saturating_add(1);
            let escalate = !self.escalated;
            self.escalated = true;
            return BackoffStep {
                delay: self.config.max_delay,
                escalate,
                outages: self.outages,
            };
        }

        let delay = self.wait;
        self.wait = self.wait.saturating_mul(2).min(self.config.max_delay);
        BackoffStep {
            delay,
            escalate: false,
            outages: 0,
        }
    }

    /// The delay the next failure would produce.
    pub fn current(&self) -> Duration {
        self.wait
    }

    pub fn at_ceiling(&self) -> bool {
        self.wait >= self.config.max_delay
    }
}

impl Default for Backoff {
    fn default() -> Self {
        Self::new(ReconnectConfig::default())
    }
}

// ── Tests ────────────────────────────────────────────────────────────
