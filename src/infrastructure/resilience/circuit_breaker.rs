//! Circuit breaker shared by the push gateway guard and the storage pools.

use std::future::Future;
use std::sync::atomic::{AtomicI64, AtomicU32, AtomicU8, Ordering};

use serde::Serialize;

use super::current_time_ms;

/// Circuit breaker states
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum CircuitState {
    /// Calls flow through normally
    Closed = 0,
    /// Calls are rejected without reaching the dependency
    Open = 1,
    /// A limited number of probe calls are let through
    HalfOpen = 2,
}

impl From<u8> for CircuitState {
    fn from(value: u8) -> Self {
        match value {
            1 => CircuitState::Open,
            2 => CircuitState::HalfOpen,
            _ => CircuitState::Closed,
        }
    }
}

impl CircuitState {
    /// Numeric value exported as a Prometheus gauge
    pub fn as_gauge(&self) -> i64 {
        *self as u8 as i64
    }
}

/// Circuit breaker configuration
#[derive(Debug, Clone)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures before opening the circuit
    pub failure_threshold: u32,
    /// Successes in half-open state before closing
    pub success_threshold: u32,
    /// Time spent open before probing again (ms)
    pub reset_timeout_ms: u64,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            success_threshold: 2,
            reset_timeout_ms: 30_000,
        }
    }
}

/// Returned by [`CircuitBreaker::call`].
#[derive(Debug)]
pub enum CallError<E> {
    /// The circuit was open and the operation never ran
    Rejected,
    /// The operation ran and failed
    Inner(E),
}

/// Lock-free circuit breaker.
///
/// State lives in atomics so one breaker can be shared behind an `Arc`
/// by every worker and sweeper task calling the same dependency.
pub struct CircuitBreaker {
    name: String,
    state: AtomicU8,
    failure_count: AtomicU32,
    success_count: AtomicU32,
    last_state_change: AtomicI64,
    config: CircuitBreakerConfig,
}

impl CircuitBreaker {
    pub fn new(name: impl Into<String>) -> Self {
        Self::with_config(name, CircuitBreakerConfig::default())
    }

    pub fn with_config(name: impl Into<String>, config: CircuitBreakerConfig) -> Self {
        Self {
            name: name.into(),
            state: AtomicU8::new(CircuitState::Closed as u8),
            failure_count: AtomicU32::new(0),
            success_count: AtomicU32::new(0),
            last_state_change: AtomicI64::new(current_time_ms()),
            config,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Current state, promoting Open to HalfOpen once the reset timeout passed
    pub fn state(&self) -> CircuitState {
        self.check_state_transition();
        CircuitState::from(self.state.load(Ordering::Acquire))
    }

    pub fn allow_request(&self) -> bool {
        !matches!(self.state(), CircuitState::Open)
    }

    /// Run `operation` under the breaker, recording its outcome.
    pub async fn call<T, E, F, Fut>(&self, operation: F) -> Result<T, CallError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        if !self.allow_request() {
            tracing::debug!(breaker = %self.name, "Circuit open, rejecting call");
            return Err(CallError::Rejected);
        }

        match operation().await {
            Ok(value) => {
                self.record_success();
                Ok(value)
            }
            Err(e) => {
                self.record_failure();
                Err(CallError::Inner(e))
            }
        }
    }

    pub fn record_success(&self) {
        match CircuitState::from(self.state.load(Ordering::Acquire)) {
            CircuitState::Closed => {
                self.failure_count.store(0, Ordering::Release);
            }
            CircuitState::HalfOpen => {
                let successes = self.success_count.fetch_add(1, Ordering::AcqRel) + 1;
                if successes >= self.config.success_threshold {
                    self.transition_to(CircuitState::Closed);
                    tracing::info!(breaker = %self.name, "Circuit breaker closed after recovery");
                }
            }
            CircuitState::Open => {}
        }
    }

    pub fn record_failure(&self) {
        match CircuitState::from(self.state.load(Ordering::Acquire)) {
            CircuitState::Closed => {
                let failures = self.failure_count.fetch_add(1, Ordering::AcqRel) + 1;
                if failures >= self.config.failure_threshold {
                    self.transition_to(CircuitState::Open);
                    tracing::warn!(
                        breaker = %self.name,
                        failures = failures,
                        "Circuit breaker opened due to failures"
                    );
                }
            }
            CircuitState::HalfOpen => {
                self.transition_to(CircuitState::Open);
                tracing::warn!(breaker = %self.name, "Circuit breaker reopened after probe failure");
            }
            CircuitState::Open => {
                self.last_state_change
                    .store(current_time_ms(), Ordering::Release);
            }
        }
    }

    fn check_state_transition(&self) {
        if CircuitState::from(self.state.load(Ordering::Acquire)) != CircuitState::Open {
            return;
        }

        let elapsed = current_time_ms() - self.last_state_change.load(Ordering::Acquire);
        if elapsed < self.config.reset_timeout_ms as i64 {
            return;
        }

        if self
            .state
            .compare_exchange(
                CircuitState::Open as u8,
                CircuitState::HalfOpen as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok()
        {
            self.success_count.store(0, Ordering::Release);
            self.last_state_change
                .store(current_time_ms(), Ordering::Release);
            tracing::info!(breaker = %self.name, "Circuit breaker half-open, probing");
        }
    }

    fn transition_to(&self, new_state: CircuitState) {
        self.state.store(new_state as u8, Ordering::Release);
        self.last_state_change
            .store(current_time_ms(), Ordering::Release);
        self.success_count.store(0, Ordering::Release);
        if new_state == CircuitState::Closed {
            self.failure_count.store(0, Ordering::Release);
        }
    }

    pub fn stats(&self) -> CircuitBreakerStats {
        CircuitBreakerStats {
            name: self.name.clone(),
            state: self.state(),
            failure_count: self.failure_count.load(Ordering::Acquire),
            success_count: self.success_count.load(Ordering::Acquire),
            last_state_change_ms: self.last_state_change.load(Ordering::Acquire),
        }
    }
}

/// Circuit breaker statistics
#[derive(Debug, Clone, Serialize)]
pub struct CircuitBreakerStats {
    pub name: String,
    pub state: CircuitState,
    pub failure_count: u32,
    pub success_count: u32,
    pub last_state_change_ms: i64,
}
