//! Circuit breaker guarding the egress client
//!
//! Converts a hung or dead downstream into a fast, observable failure so
//! the egress worker falls back to re-spooling instead of blocking its
//! drain loop on every batch.
//!
//! # State machine
//!
//! ```text
//!            N consecutive failures
//!   Closed ---------------------------> Open
//!     ^                                  |
//!     |  probe success                   | cooldown elapsed
//!     |  (cooldown resets to base)       v
//!     +------------------------------ HalfOpen
//!            probe failure: back to Open, cooldown doubled (capped)
//! ```
//!
//! The worker asks for admission with [`CircuitBreaker::try_acquire`] and
//! reports the call result with `record_success`/`record_failure`; the
//! split lets the worker classify outcomes itself (a permanent schema
//! rejection proves the endpoint is alive and counts as a success).

use std::time::{Duration, Instant};

use parking_lot::Mutex;

/// Breaker tuning knobs
#[derive(Debug, Clone)]
pub struct BreakerSettings {
    /// Consecutive failures that trip `Closed` to `Open`
    pub failure_threshold: u32,

    /// Cooldown after the first trip
    pub base_cooldown: Duration,

    /// Cooldown ceiling for repeated trips
    pub max_cooldown: Duration,

    /// Probe calls admitted while `HalfOpen`
    pub half_open_probes: u32,
}

impl Default for BreakerSettings {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            base_cooldown: Duration::from_secs(30),
            max_cooldown: Duration::from_secs(300),
            half_open_probes: 1,
        }
    }
}

/// Observable breaker state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakerState {
    Closed,
    Open,
    HalfOpen,
}

impl BreakerState {
    pub fn as_str(&self) -> &'static str {
        match self {
            BreakerState::Closed => "closed",
            BreakerState::Open => "open",
            BreakerState::HalfOpen => "half_open",
        }
    }
}

impl std::fmt::Display for BreakerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

struct BreakerInner {
    state: BreakerState,
    consecutive_failures: u32,
    /// Cooldown that applies to the current/next `Open` period
    cooldown: Duration,
    /// When the current state was entered
    state_since: Instant,
    /// Probes admitted during the current `HalfOpen` period
    probes_admitted: u32,
}

/// Failure-aware gate in front of the egress client
///
/// One instance per egress destination. Shared between the worker (which
/// drives it) and the controller (which reports its state on the health
/// surface).
pub struct CircuitBreaker {
    settings: BreakerSettings,
    inner: Mutex<BreakerInner>,
}

impl CircuitBreaker {
    pub fn new(settings: BreakerSettings) -> Self {
        let cooldown = settings.base_cooldown;
        Self {
            settings,
            inner: Mutex::new(BreakerInner {
                state: BreakerState::Closed,
                consecutive_failures: 0,
                cooldown,
                state_since: Instant::now(),
                probes_admitted: 0,
            }),
        }
    }

    /// Ask whether a call may go out
    ///
    /// `false` means fail fast without touching the egress client. An
    /// elapsed cooldown transitions `Open` to `HalfOpen` here, on the
    /// caller's clock; no background timer is involved.
    pub fn try_acquire(&self) -> bool {
        let mut inner = self.inner.lock();
        match inner.state {
            BreakerState::Closed => true,
            BreakerState::Open => {
                if inner.state_since.elapsed() >= inner.cooldown {
                    tracing::info!(
                        cooldown_ms = inner.cooldown.as_millis() as u64,
                        "circuit breaker half-open, admitting probe"
                    );
                    inner.state = BreakerState::HalfOpen;
                    inner.state_since = Instant::now();
                    inner.probes_admitted = 1;
                    true
                } else {
                    false
                }
            }
            BreakerState::HalfOpen => {
                if inner.probes_admitted < self.settings.half_open_probes {
                    inner.probes_admitted += 1;
                    true
                } else {
                    false
                }
            }
        }
    }

    /// Report a successful call
    pub fn record_success(&self) {
        let mut inner = self.inner.lock();
        match inner.state {
            BreakerState::Closed => {
                inner.consecutive_failures = 0;
            }
            BreakerState::HalfOpen => {
                tracing::info!("circuit breaker closed after successful probe");
                inner.state = BreakerState::Closed;
                inner.state_since = Instant::now();
                inner.consecutive_failures = 0;
                inner.probes_admitted = 0;
                inner.cooldown = self.settings.base_cooldown;
            }
            // A success report while Open means the caller raced a
            // transition; harmless to ignore.
            BreakerState::Open => {}
        }
    }

    /// Report a failed call
    pub fn record_failure(&self) {
        let mut inner = self.inner.lock();
        match inner.state {
            BreakerState::Closed => {
                inner.consecutive_failures += 1;
                if inner.consecutive_failures >= self.settings.failure_threshold {
                    tracing::warn!(
                        failures = inner.consecutive_failures,
                        cooldown_ms = inner.cooldown.as_millis() as u64,
                        "circuit breaker opened"
                    );
                    inner.state = BreakerState::Open;
                    inner.state_since = Instant::now();
                }
            }
            BreakerState::HalfOpen => {
                let doubled = inner.cooldown.saturating_mul(2);
                inner.cooldown = doubled.min(self.settings.max_cooldown);
                tracing::warn!(
                    cooldown_ms = inner.cooldown.as_millis() as u64,
                    "circuit breaker reopened after failed probe"
                );
                inner.state = BreakerState::Open;
                inner.state_since = Instant::now();
                inner.probes_admitted = 0;
            }
            BreakerState::Open => {}
        }
    }

    /// Current state
    pub fn state(&self) -> BreakerState {
        self.inner.lock().state
    }

    /// Time spent in the current state
    pub fn time_in_state(&self) -> Duration {
        self.inner.lock().state_since.elapsed()
    }
}

impl std::fmt::Debug for CircuitBreaker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.inner.lock();
        f.debug_struct("CircuitBreaker")
            .field("state", &inner.state)
            .field("consecutive_failures", &inner.consecutive_failures)
            .field("cooldown", &inner.cooldown)
            .finish()
    }
}

#[cfg(test)]
#[path = "breaker_test.rs"]
mod breaker_test;
