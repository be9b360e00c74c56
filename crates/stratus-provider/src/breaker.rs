//! Circuit breaker for provider calls.
//!
//! Repeated transient failures open the circuit so a struggling provider
//! API gets breathing room; after a cooldown the breaker lets probe calls
//! through and closes again on consecutive successes. An open circuit
//! fails fast with a transient error, so the retry and per-scope
//! aggregation paths treat it like any other outage.

use std::sync::Mutex;
use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, warn};

use crate::error::{ProviderError, ProviderResult};

/// Breaker state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    /// Calls flow normally.
    Closed,
    /// Calls are rejected until the cooldown elapses.
    Open,
    /// Probe calls are allowed through.
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

/// Thresholds controlling the breaker.
#[derive(Debug, Clone)]
pub struct CircuitBreakerConfig {
    /// Consecutive transient failures before opening.
    pub failure_threshold: u32,
    /// How long the circuit stays open before probing.
    pub open_duration: Duration,
    /// Consecutive probe successes required to close again.
    pub success_threshold: u32,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            open_duration: Duration::from_secs(30),
            success_threshold: 2,
        }
    }
}

#[derive(Debug)]
struct BreakerState {
    state: CircuitState,
    failures: u32,
    successes: u32,
    opened_at: Option<Instant>,
}

/// Circuit breaker guarding one provider.
#[derive(Debug)]
pub struct CircuitBreaker {
    provider: String,
    config: CircuitBreakerConfig,
    state: Mutex<BreakerState>,
}

impl CircuitBreaker {
    /// Breaker with custom thresholds.
    #[must_use]
    pub fn new(provider: impl Into<String>, config: CircuitBreakerConfig) -> Self {
        Self {
            provider: provider.into(),
            config,
            state: Mutex::new(BreakerState {
                state: CircuitState::Closed,
                failures: 0,
                successes: 0,
                opened_at: None,
            }),
        }
    }

    /// Breaker with default thresholds.
    #[must_use]
    pub fn with_defaults(provider: impl Into<String>) -> Self {
        Self::new(provider, CircuitBreakerConfig::default())
    }

    /// Current state, accounting for an elapsed cooldown.
    pub fn state(&self) -> CircuitState {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        if state.state == CircuitState::Open {
            let cooled = state
                .opened_at
                .is_some_and(|at| at.elapsed() >= self.config.open_duration);
            if cooled {
                debug!(provider = %self.provider, "circuit breaker half-open, probing");
                state.state = CircuitState::HalfOpen;
                state.successes = 0;
            }
        }
        state.state
    }

    /// Whether a call may proceed right now.
    pub fn is_allowed(&self) -> bool {
        self.state() != CircuitState::Open
    }

    /// Record a successful call.
    pub fn record_success(&self) {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        match state.state {
            CircuitState::Closed => state.failures = 0,
            CircuitState::HalfOpen => {
                state.successes += 1;
                if state.successes >= self.config.success_threshold {
                    debug!(provider = %self.provider, "circuit breaker closed");
                    state.state = CircuitState::Closed;
                    state.failures = 0;
                    state.successes = 0;
                    state.opened_at = None;
                }
            }
            CircuitState::Open => {}
        }
    }

    /// Record a failed call (transient failures only).
    pub fn record_failure(&self) {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        match state.state {
            CircuitState::Closed => {
                state.failures += 1;
                if state.failures >= self.config.failure_threshold {
                    warn!(
                        provider = %self.provider,
                        failures = state.failures,
                        "circuit breaker opened"
                    );
                    state.state = CircuitState::Open;
                    state.opened_at = Some(Instant::now());
                }
            }
            CircuitState::HalfOpen => {
                warn!(provider = %self.provider, "probe failed, circuit breaker re-opened");
                state.state = CircuitState::Open;
                state.successes = 0;
                state.opened_at = Some(Instant::now());
            }
            CircuitState::Open => {
                state.opened_at = Some(Instant::now());
            }
        }
    }

    /// Reset to closed, forgetting all counts.
    pub fn reset(&self) {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        *state = BreakerState {
            state: CircuitState::Closed,
            failures: 0,
            successes: 0,
            opened_at: None,
        };
    }

    /// Run one operation under the breaker.
    ///
    /// Only transient errors count as breaker failures; an auth failure
    /// says nothing about the provider's availability.
    pub async fn execute<F, Fut, T>(&self, operation: F) -> ProviderResult<T>
    where
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = ProviderResult<T>>,
    {
        if !self.is_allowed() {
            return Err(ProviderError::CircuitOpen {
                provider: self.provider.clone(),
            });
        }

        match operation().await {
            Ok(value) => {
                self.record_success();
                Ok(value)
            }
            Err(e) => {
                if e.is_transient() {
                    self.record_failure();
                }
                Err(e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tight_config() -> CircuitBreakerConfig {
        CircuitBreakerConfig {
            failure_threshold: 3,
            open_duration: Duration::from_secs(10),
            success_threshold: 2,
        }
    }

    #[tokio::test]
    async fn test_starts_closed() {
        let breaker = CircuitBreaker::with_defaults("aws");
        assert_eq!(breaker.state(), CircuitState::Closed);
        assert!(breaker.is_allowed());
    }

    #[tokio::test]
    async fn test_opens_after_threshold_failures() {
        let breaker = CircuitBreaker::new("aws", tight_config());
        breaker.record_failure();
        breaker.record_failure();
        assert_eq!(breaker.state(), CircuitState::Closed);

        breaker.record_failure();
        assert_eq!(breaker.state(), CircuitState::Open);
        assert!(!breaker.is_allowed());
    }

    #[tokio::test]
    async fn test_success_resets_failure_count() {
        let breaker = CircuitBreaker::new("aws", tight_config());
        breaker.record_failure();
        breaker.record_failure();
        breaker.record_success();
        breaker.record_failure();
        breaker.record_failure();
        assert_eq!(breaker.state(), CircuitState::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cooldown_then_probe_then_close() {
        let breaker = CircuitBreaker::new("aws", tight_config());
        for _ in 0..3 {
            breaker.record_failure();
        }
        assert_eq!(breaker.state(), CircuitState::Open);

        tokio::time::advance(Duration::from_secs(11)).await;
        assert_eq!(breaker.state(), CircuitState::HalfOpen);

        breaker.record_success();
        assert_eq!(breaker.state(), CircuitState::HalfOpen);
        breaker.record_success();
        assert_eq!(breaker.state(), CircuitState::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_probe_failure_reopens() {
        let breaker = CircuitBreaker::new("aws", tight_config());
        for _ in 0..3 {
            breaker.record_failure();
        }
        tokio::time::advance(Duration::from_secs(11)).await;
        assert_eq!(breaker.state(), CircuitState::HalfOpen);

        breaker.record_failure();
        assert_eq!(breaker.state(), CircuitState::Open);
    }

    #[tokio::test]
    async fn test_execute_rejects_when_open() {
        let breaker = CircuitBreaker::new(
            "aws",
            CircuitBreakerConfig {
                failure_threshold: 1,
                open_duration: Duration::from_secs(600),
                success_threshold: 1,
            },
        );

        let _ = breaker
            .execute(|| async { Err::<(), _>(ProviderError::transient("down")) })
            .await;

        let result = breaker.execute(|| async { Ok(1) }).await;
        assert!(matches!(result, Err(ProviderError::CircuitOpen { .. })));
    }

    #[tokio::test]
    async fn test_permanent_errors_do_not_trip_breaker() {
        let breaker = CircuitBreaker::new(
            "aws",
            CircuitBreakerConfig {
                failure_threshold: 1,
                open_duration: Duration::from_secs(600),
                success_threshold: 1,
            },
        );

        let _ = breaker
            .execute(|| async { Err::<(), _>(ProviderError::auth_failed("aws", "bad key")) })
            .await;

        assert_eq!(breaker.state(), CircuitState::Closed);
    }
}
