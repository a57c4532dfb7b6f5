// ABOUTME: Retry with exponential backoff plus a circuit breaker for outbound sandbox calls
// ABOUTME: One user-observed failure records at most one breaker failure, whatever max_retries is

//! # Retry & Circuit Breaking
//!
//! Every outbound sandbox operation flows through [`retry_async`], which
//! combines bounded retries (exponential backoff with optional jitter) with
//! a shared [`CircuitBreaker`].
//!
//! Two properties are load-bearing and covered by tests:
//!
//! 1. While the circuit is **open**, further failures never refresh
//!    `last_failure_time`; otherwise a steady trickle of failures would
//!    keep the circuit open forever.
//! 2. A single user-observed failure that internally consumed N retry
//!    attempts records exactly **one** breaker failure, so retry
//!    amplification cannot trip the circuit on its own.

use rand::Rng;
use std::future::Future;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::sync::Mutex;

/// Classifies errors for the retry loop. Transport-level failures are worth
/// retrying; validation and policy failures are not.
pub trait RetryableError {
    fn is_retryable(&self) -> bool;
}

/// Retry policy for one operation class.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Additional attempts after the first (0 = no retries).
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub exponential_base: f64,
    /// Apply uniform jitter in `[0.5, 1.5) × delay`.
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(10),
            exponential_base: 2.0,
            jitter: true,
        }
    }
}

/// Delay before retry attempt `attempt` (0-based):
/// `min(base × exp_base^attempt, max_delay)`, jittered when configured.
#[must_use]
pub fn backoff_delay(attempt: u32, config: &RetryConfig) -> Duration {
    let exp = config.exponential_base.powi(attempt.min(63) as i32);
    let raw = config.base_delay.as_secs_f64() * exp;
    let capped = raw.min(config.max_delay.as_secs_f64());
    let final_secs = if config.jitter {
        capped * rand::thread_rng().gen_range(0.5..1.5)
    } else {
        capped
    };
    Duration::from_secs_f64(final_secs.min(config.max_delay.as_secs_f64()))
}

/// Circuit breaker states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

impl std::fmt::Display for CircuitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Closed => f.write_str("closed"),
            Self::Open => f.write_str("open"),
            Self::HalfOpen => f.write_str("half_open"),
        }
    }
}

/// Circuit breaker configuration.
#[derive(Debug, Clone)]
pub struct CircuitBreakerConfig {
    /// Failures in `Closed` before opening.
    pub failure_threshold: u32,
    /// Successes in `HalfOpen` before closing.
    pub success_threshold: u32,
    /// How long the circuit stays open before a half-open probe.
    pub timeout: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            success_threshold: 2,
            timeout: Duration::from_secs(30),
        }
    }
}

/// Raised (as an error value) when the circuit is open.
#[derive(Debug, Clone, Error)]
#[error("circuit breaker '{name}' is open; retry after {retry_after:.1?}")]
pub struct CircuitOpen {
    pub name: String,
    /// Time remaining until a half-open probe is permitted.
    pub retry_after: Duration,
}

#[derive(Debug)]
struct BreakerState {
    state: CircuitState,
    failure_count: u32,
    success_count: u32,
    last_failure_time: Option<Instant>,
}

/// Observability snapshot of a breaker.
#[derive(Debug, Clone, serde::Serialize)]
pub struct BreakerSnapshot {
    pub name: String,
    pub state: CircuitState,
    pub failure_count: u32,
    pub success_count: u32,
    pub failure_threshold: u32,
    pub success_threshold: u32,
    pub timeout_secs: f64,
}

/// Async-safe circuit breaker. All transitions happen under one mutex; the
/// mutex is never held across I/O.
pub struct CircuitBreaker {
    name: String,
    config: CircuitBreakerConfig,
    state: Mutex<BreakerState>,
}

impl CircuitBreaker {
    #[must_use]
    pub fn new(name: impl Into<String>, config: CircuitBreakerConfig) -> Self {
        Self {
            name: name.into(),
            config,
            state: Mutex::new(BreakerState {
                state: CircuitState::Closed,
                failure_count: 0,
                success_count: 0,
                last_failure_time: None,
            }),
        }
    }

    /// Gate an invocation. Transitions `Open → HalfOpen` once the timeout
    /// has elapsed; otherwise an open circuit rejects with a `retry_after`
    /// hint.
    ///
    /// # Errors
    ///
    /// Returns [`CircuitOpen`] while the circuit is open.
    pub async fn check(&self) -> Result<(), CircuitOpen> {
        let mut state = self.state.lock().await;
        if state.state != CircuitState::Open {
            return Ok(());
        }

        let elapsed = state
            .last_failure_time
            .map_or(self.config.timeout, |t| t.elapsed());
        if elapsed >= self.config.timeout {
            state.state = CircuitState::HalfOpen;
            state.success_count = 0;
            tracing::info!(breaker = %self.name, "circuit breaker half-open, probing");
            Ok(())
        } else {
            Err(CircuitOpen {
                name: self.name.clone(),
                retry_after: self.config.timeout - elapsed,
            })
        }
    }

    /// Record a successful operation.
    pub async fn record_success(&self) {
        let mut state = self.state.lock().await;
        match state.state {
            CircuitState::HalfOpen => {
                state.success_count += 1;
                if state.success_count >= self.config.success_threshold {
                    state.state = CircuitState::Closed;
                    state.failure_count = 0;
                    state.success_count = 0;
                    state.last_failure_time = None;
                    tracing::info!(breaker = %self.name, "circuit breaker closed");
                }
            }
            CircuitState::Closed => {
                state.failure_count = 0;
            }
            CircuitState::Open => {}
        }
    }

    /// Record one user-observed failure.
    pub async fn record_failure(&self) {
        let mut state = self.state.lock().await;
        match state.state {
            // Failures while already open must not touch the timer or the
            // count; refreshing the timer here would keep the circuit open
            // under any steady failure trickle.
            CircuitState::Open => {}
            CircuitState::HalfOpen => {
                state.state = CircuitState::Open;
                state.success_count = 0;
                state.last_failure_time = Some(Instant::now());
                tracing::warn!(breaker = %self.name, "probe failed, circuit breaker re-opened");
            }
            CircuitState::Closed => {
                state.failure_count += 1;
                if state.failure_count >= self.config.failure_threshold {
                    state.state = CircuitState::Open;
                    state.last_failure_time = Some(Instant::now());
                    tracing::warn!(
                        breaker = %self.name,
                        failures = state.failure_count,
                        "circuit breaker opened"
                    );
                }
            }
        }
    }

    /// Force the breaker back to closed.
    pub async fn reset(&self) {
        let mut state = self.state.lock().await;
        state.state = CircuitState::Closed;
        state.failure_count = 0;
        state.success_count = 0;
        state.last_failure_time = None;
    }

    /// Current state without side effects (open circuits are not probed).
    pub async fn state(&self) -> CircuitState {
        self.state.lock().await.state
    }

    /// Snapshot for observability endpoints.
    pub async fn snapshot(&self) -> BreakerSnapshot {
        let state = self.state.lock().await;
        BreakerSnapshot {
            name: self.name.clone(),
            state: state.state,
            failure_count: state.failure_count,
            success_count: state.success_count,
            failure_threshold: self.config.failure_threshold,
            success_threshold: self.config.success_threshold,
            timeout_secs: self.config.timeout.as_secs_f64(),
        }
    }
}

/// Outcome of [`retry_async`].
#[derive(Debug)]
pub enum RetryError<E> {
    /// The circuit was open; the operation was never attempted.
    CircuitOpen(CircuitOpen),
    /// All attempts failed; carries the final error.
    Exhausted(E),
}

impl<E: std::fmt::Display> std::fmt::Display for RetryError<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::CircuitOpen(open) => open.fmt(f),
            Self::Exhausted(err) => err.fmt(f),
        }
    }
}

impl<E: std::fmt::Debug + std::fmt::Display> std::error::Error for RetryError<E> {}

/// Run `op` with retries and circuit breaking.
///
/// The breaker is consulted once, up front: an open circuit rejects without
/// invoking `op` and without recording a failure. Retries are consumed
/// internally; on final give-up exactly one breaker failure is recorded.
///
/// # Errors
///
/// [`RetryError::CircuitOpen`] when rejected by the breaker,
/// [`RetryError::Exhausted`] with the last error otherwise.
pub async fn retry_async<T, E, F, Fut>(
    mut op: F,
    config: &RetryConfig,
    breaker: &CircuitBreaker,
) -> Result<T, RetryError<E>>
where
    E: RetryableError + std::fmt::Display,
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    breaker.check().await.map_err(RetryError::CircuitOpen)?;

    let mut attempt: u32 = 0;
    loop {
        match op().await {
            Ok(value) => {
                breaker.record_success().await;
                return Ok(value);
            }
            Err(err) => {
                let out_of_attempts = attempt >= config.max_retries;
                if !err.is_retryable() || out_of_attempts {
                    breaker.record_failure().await;
                    return Err(RetryError::Exhausted(err));
                }
                let delay = backoff_delay(attempt, config);
                tracing::debug!(
                    attempt = attempt + 1,
                    max_retries = config.max_retries,
                    delay_ms = delay.as_millis() as u64,
                    error = %err,
                    "retrying after transient failure"
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_grows_exponentially_without_jitter() {
        let config = RetryConfig {
            base_delay: Duration::from_secs(1),
            exponential_base: 2.0,
            jitter: false,
            max_delay: Duration::from_secs(60),
            max_retries: 3,
        };
        assert_eq!(backoff_delay(0, &config), Duration::from_secs(1));
        assert_eq!(backoff_delay(1, &config), Duration::from_secs(2));
        assert_eq!(backoff_delay(2, &config), Duration::from_secs(4));
    }

    #[test]
    fn backoff_caps_at_max_delay() {
        let config = RetryConfig {
            base_delay: Duration::from_secs(1),
            exponential_base: 2.0,
            jitter: false,
            max_delay: Duration::from_secs(5),
            max_retries: 3,
        };
        assert_eq!(backoff_delay(10, &config), Duration::from_secs(5));
    }

    #[test]
    fn jitter_produces_variance() {
        let config = RetryConfig {
            base_delay: Duration::from_secs(1),
            jitter: true,
            ..RetryConfig::default()
        };
        let delays: std::collections::HashSet<u128> = (0..20)
            .map(|_| backoff_delay(0, &config).as_nanos())
            .collect();
        assert!(delays.len() > 1);
    }
}
