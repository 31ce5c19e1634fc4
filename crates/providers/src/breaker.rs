//! Circuit breaker
//!
//! Per-provider failure accounting for the fallback wrappers. Only errors
//! flagged `retryable` count against the breaker; a hard auth failure opens
//! the circuit immediately through the fallback wrapper instead.
//!
//! State machine:
//! - `Closed` → `Open` after `failure_threshold` consecutive retryable
//!   failures within `failure_window`
//! - `Open` → `HalfOpen` after `cooldown` of quiescence
//! - `HalfOpen` → `Closed` on one success, back to `Open` on one failure

use std::time::Duration;

use parking_lot::Mutex;
use tokio::time::Instant;

/// Breaker tuning knobs.
#[derive(Debug, Clone)]
pub struct BreakerConfig {
    /// Consecutive retryable failures that open the circuit
    pub failure_threshold: u32,
    /// Failures older than this no longer count as consecutive
    pub failure_window: Duration,
    /// Time an open circuit waits before allowing a trial call
    pub cooldown: Duration,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 3,
            failure_window: Duration::from_secs(60),
            cooldown: Duration::from_secs(60),
        }
    }
}

/// Observable breaker state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakerState {
    Closed,
    Open,
    HalfOpen,
}

#[derive(Debug)]
struct Inner {
    state: BreakerState,
    consecutive_failures: u32,
    last_failure: Option<Instant>,
    opened_at: Option<Instant>,
    /// A trial call is in flight while half-open
    trial_in_flight: bool,
}

/// Thread-safe circuit breaker. `tokio::time::Instant` is used throughout so
/// breaker timing participates in paused-clock tests.
#[derive(Debug)]
pub struct CircuitBreaker {
    config: BreakerConfig,
    inner: Mutex<Inner>,
}

impl CircuitBreaker {
    pub fn new(config: BreakerConfig) -> Self {
        Self {
            config,
            inner: Mutex::new(Inner {
                state: BreakerState::Closed,
                consecutive_failures: 0,
                last_failure: None,
                opened_at: None,
                trial_in_flight: false,
            }),
        }
    }

    /// Current state, advancing `Open` to `HalfOpen` when the cooldown has
    /// elapsed.
    pub fn state(&self) -> BreakerState {
        let mut inner = self.inner.lock();
        self.advance(&mut inner);
        inner.state
    }

    /// Whether a call may be attempted now. A half-open breaker admits a
    /// single trial at a time.
    pub fn allow(&self) -> bool {
        let mut inner = self.inner.lock();
        self.advance(&mut inner);
        match inner.state {
            BreakerState::Closed => true,
            BreakerState::Open => false,
            BreakerState::HalfOpen => {
                if inner.trial_in_flight {
                    false
                } else {
                    inner.trial_in_flight = true;
                    true
                }
            }
        }
    }

    /// Record a successful call.
    pub fn on_success(&self) {
        let mut inner = self.inner.lock();
        inner.state = BreakerState::Closed;
        inner.consecutive_failures = 0;
        inner.last_failure = None;
        inner.opened_at = None;
        inner.trial_in_flight = false;
    }

    /// Record a retryable failure.
    pub fn on_failure(&self) {
        let now = Instant::now();
        let mut inner = self.inner.lock();

        if inner.state == BreakerState::HalfOpen {
            inner.state = BreakerState::Open;
            inner.opened_at = Some(now);
            inner.trial_in_flight = false;
            inner.consecutive_failures = 0;
            return;
        }

        // Failures outside the window restart the consecutive count
        if let Some(last) = inner.last_failure {
            if now.duration_since(last) > self.config.failure_window {
                inner.consecutive_failures = 0;
            }
        }
        inner.last_failure = Some(now);
        inner.consecutive_failures += 1;

        if inner.consecutive_failures >= self.config.failure_threshold {
            inner.state = BreakerState::Open;
            inner.opened_at = Some(now);
            inner.consecutive_failures = 0;
        }
    }

    /// Open the circuit immediately, bypassing the failure count. Used for
    /// non-retryable provider errors (bad credentials, invalid config).
    pub fn force_open(&self) {
        let mut inner = self.inner.lock();
        inner.state = BreakerState::Open;
        inner.opened_at = Some(Instant::now());
        inner.consecutive_failures = 0;
        inner.trial_in_flight = false;
    }

    fn advance(&self, inner: &mut Inner) {
        if inner.state == BreakerState::Open {
            if let Some(opened) = inner.opened_at {
                if opened.elapsed() >= self.config.cooldown {
                    inner.state = BreakerState::HalfOpen;
                    inner.trial_in_flight = false;
                }
            }
        }
    }
}

impl Default for CircuitBreaker {
    fn default() -> Self {
        Self::new(BreakerConfig::default())
    }
}
