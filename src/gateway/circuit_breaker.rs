//! Per-origin circuit breaker
//!
//! Closed → Open after `threshold` consecutive failures. Once the cooldown
//! has elapsed a single trial request is admitted (Half-Open); its success
//! closes the breaker, its failure re-opens it with a longer cooldown.
//! All transitions happen under one mutex per origin.

use crate::domain::OriginId;
use crate::infrastructure::log_messages::health;
use derive_more::Display;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{info, warn};

/// Cooldown schedule shared by every breaker
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BreakerPolicy {
    pub cooldown: Duration,
    pub backoff_multiplier: f64,
    pub max_cooldown: Duration,
}

impl Default for BreakerPolicy {
    fn default() -> Self {
        Self {
            cooldown: Duration::from_secs(30),
            backoff_multiplier: 2.0,
            max_cooldown: Duration::from_secs(300),
        }
    }
}

impl BreakerPolicy {
    fn next_cooldown(&self, current: Duration) -> Duration {
        current
            .mul_f64(self.backoff_multiplier.max(1.0))
            .min(self.max_cooldown)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum CircuitState {
    #[display("closed")]
    Closed,
    #[display("open")]
    Open,
    #[display("half_open")]
    HalfOpen,
}

#[derive(Debug)]
struct Inner {
    state: CircuitState,
    consecutive_failures: u32,
    cooldown: Duration,
    opened_at: Option<Instant>,
    trial_in_flight: bool,
}

#[derive(Debug)]
pub struct CircuitBreaker {
    origin_id: OriginId,
    policy: BreakerPolicy,
    inner: Mutex<Inner>,
}

impl CircuitBreaker {
    pub fn new(origin_id: OriginId, policy: BreakerPolicy) -> Self {
        Self {
            origin_id,
            policy,
            inner: Mutex::new(Inner {
                state: CircuitState::Closed,
                consecutive_failures: 0,
                cooldown: policy.cooldown,
                opened_at: None,
                trial_in_flight: false,
            }),
        }
    }

    pub fn state(&self) -> CircuitState {
        self.inner.lock().state
    }

    /// Current cooldown applied when the breaker is open
    pub fn cooldown(&self) -> Duration {
        self.inner.lock().cooldown
    }

    fn cooled_down(inner: &Inner, now: Instant) -> bool {
        inner
            .opened_at
            .is_some_and(|opened| now.duration_since(opened) >= inner.cooldown)
    }

    /// Whether [`Self::try_acquire`] would currently admit a request
    pub fn is_available(&self) -> bool {
        let inner = self.inner.lock();
        match inner.state {
            CircuitState::Closed => true,
            CircuitState::Open => Self::cooled_down(&inner, Instant::now()),
            CircuitState::HalfOpen => !inner.trial_in_flight,
        }
    }

    /// Admission check; a Half-Open breaker hands out one trial permit
    pub fn try_acquire(self: &Arc<Self>) -> Option<CircuitPermit> {
        let mut inner = self.inner.lock();
        let trial = match inner.state {
            CircuitState::Closed => false,
            CircuitState::Open if Self::cooled_down(&inner, Instant::now()) => {
                inner.state = CircuitState::HalfOpen;
                inner.trial_in_flight = true;
                info!(origin_id = %self.origin_id, "{}", health::BREAKER_HALF_OPEN);
                true
            }
            CircuitState::Open => return None,
            CircuitState::HalfOpen if inner.trial_in_flight => return None,
            CircuitState::HalfOpen => {
                inner.trial_in_flight = true;
                true
            }
        };
        Some(CircuitPermit {
            breaker: Arc::clone(self),
            trial,
            resolved: false,
        })
    }

    fn on_success(&self, trial: bool) {
        let mut inner = self.inner.lock();
        match inner.state {
            CircuitState::Closed => inner.consecutive_failures = 0,
            CircuitState::HalfOpen if trial => {
                inner.state = CircuitState::Closed;
                inner.consecutive_failures = 0;
                inner.cooldown = self.policy.cooldown;
                inner.opened_at = None;
                inner.trial_in_flight = false;
                info!(origin_id = %self.origin_id, "{}", health::BREAKER_CLOSED);
            }
            // late results of requests admitted before the breaker opened
            CircuitState::Open | CircuitState::HalfOpen => {}
        }
    }

    fn on_failure(&self, trial: bool, threshold: u32) {
        let mut inner = self.inner.lock();
        match inner.state {
            CircuitState::Closed => {
                inner.consecutive_failures = inner.consecutive_failures.saturating_add(1);
                if inner.consecutive_failures >= threshold.max(1) {
                    let from = inner.state;
                    inner.state = CircuitState::Open;
                    inner.opened_at = Some(Instant::now());
                    inner.cooldown = self.policy.cooldown;
                    warn!(
                        origin_id = %self.origin_id,
                        from = %from,
                        failures = inner.consecutive_failures,
                        threshold,
                        cooldown_secs = inner.cooldown.as_secs(),
                        "{}",
                        health::BREAKER_OPENED
                    );
                }
            }
            CircuitState::HalfOpen if trial => {
                let from = inner.state;
                inner.state = CircuitState::Open;
                inner.opened_at = Some(Instant::now());
                inner.cooldown = self.policy.next_cooldown(inner.cooldown);
                inner.trial_in_flight = false;
                warn!(
                    origin_id = %self.origin_id,
                    from = %from,
                    cooldown_secs = inner.cooldown.as_secs(),
                    "{}",
                    health::BREAKER_OPENED
                );
            }
            CircuitState::Open | CircuitState::HalfOpen => {}
        }
    }

    fn release_trial(&self) {
        let mut inner = self.inner.lock();
        if inner.state == CircuitState::HalfOpen {
            inner.trial_in_flight = false;
        }
    }
}

/// Admission granted by a breaker; report the outcome or drop it
#[derive(Debug)]
#[must_use]
pub struct CircuitPermit {
    breaker: Arc<CircuitBreaker>,
    trial: bool,
    resolved: bool,
}

impl CircuitPermit {
    pub fn is_trial(&self) -> bool {
        self.trial
    }

    pub fn success(mut self) {
        self.resolved = true;
        self.breaker.on_success(self.trial);
    }

    pub fn failure(mut self, threshold: u32) {
        self.resolved = true;
        self.breaker.on_failure(self.trial, threshold);
    }
}

impl Drop for CircuitPermit {
    fn drop(&mut self) {
        // a cancelled trial frees the Half-Open slot for the next request
        if self.trial && !self.resolved {
            self.breaker.release_trial();
        }
    }
}
