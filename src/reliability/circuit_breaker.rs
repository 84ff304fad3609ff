//! In-memory circuit breaker (C5)
//!
//! One breaker instance guards one service id. State transitions:
//! `Closed -> Open` once `failure_count` reaches `failure_threshold`;
//! `Open -> HalfOpen` once `recovery_timeout` has elapsed since opening;
//! `HalfOpen -> Closed` on a trial success, `HalfOpen -> Open` on a trial
//! failure. This breaker keeps its state in-process; there is no shared
//! distributed state across machines (see Non-goals).

use std::sync::atomic::{AtomicU32, Ordering};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::config::CircuitBreakerConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

impl std::fmt::Display for CircuitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Closed => write!(f, "closed"),
            Self::Open => write!(f, "open"),
            Self::HalfOpen => write!(f, "half_open"),
        }
    }
}

struct Inner {
    state: CircuitState,
    opened_at: Option<Instant>,
}

/// A permit returned by [`CircuitBreaker::try_acquire`]; the caller must
/// report the outcome of the guarded call through it.
pub struct BreakerPermit<'a> {
    breaker: &'a CircuitBreaker,
}

impl<'a> BreakerPermit<'a> {
    pub fn success(self) {
        self.breaker.record_success();
    }

    pub fn failure(self) {
        self.breaker.record_failure();
    }
}

pub struct CircuitBreaker {
    key: String,
    config: CircuitBreakerConfig,
    inner: Mutex<Inner>,
    failure_count: AtomicU32,
    success_count: AtomicU32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum BreakerError {
    #[error("circuit breaker open")]
    Open,
}

impl CircuitBreaker {
    pub fn new(key: impl Into<String>, config: CircuitBreakerConfig) -> Self {
        Self {
            key: key.into(),
            config,
            inner: Mutex::new(Inner {
                state: CircuitState::Closed,
                opened_at: None,
            }),
            failure_count: AtomicU32::new(0),
            success_count: AtomicU32::new(0),
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn state(&self) -> CircuitState {
        self.inner.lock().state
    }

    /// Try to acquire a permit for a guarded call. Fails with
    /// [`BreakerError::Open`] unless the breaker is closed, or is open but
    /// `recovery_timeout` has elapsed (in which case exactly one trial call
    /// is allowed through and the breaker moves to half-open).
    pub fn try_acquire(&self) -> Result<BreakerPermit<'_>, BreakerError> {
        let mut inner = self.inner.lock();
        match inner.state {
            CircuitState::Closed => Ok(BreakerPermit { breaker: self }),
            CircuitState::HalfOpen => Ok(BreakerPermit { breaker: self }),
            CircuitState::Open => {
                let elapsed = inner
                    .opened_at
                    .map(|at| at.elapsed())
                    .unwrap_or(Duration::ZERO);
                if elapsed >= self.config.recovery_timeout {
                    inner.state = CircuitState::HalfOpen;
                    Ok(BreakerPermit { breaker: self })
                } else {
                    Err(BreakerError::Open)
                }
            }
        }
    }

    fn record_success(&self) {
        let mut inner = self.inner.lock();
        match inner.state {
            CircuitState::HalfOpen => {
                inner.state = CircuitState::Closed;
                inner.opened_at = None;
                self.failure_count.store(0, Ordering::SeqCst);
                self.success_count.store(0, Ordering::SeqCst);
            }
            CircuitState::Closed => {
                self.failure_count.store(0, Ordering::SeqCst);
            }
            CircuitState::Open => {}
        }
    }

    fn record_failure(&self) {
        let mut inner = self.inner.lock();
        match inner.state {
            CircuitState::HalfOpen => {
                inner.state = CircuitState::Open;
                inner.opened_at = Some(Instant::now());
            }
            CircuitState::Closed => {
                let failures = self.failure_count.fetch_add(1, Ordering::SeqCst) + 1;
                if failures >= self.config.failure_threshold {
                    inner.state = CircuitState::Open;
                    inner.opened_at = Some(Instant::now());
                }
            }
            CircuitState::Open => {}
        }
    }
}
