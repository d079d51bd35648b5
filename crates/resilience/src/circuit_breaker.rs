//! Per-dependency circuit breaker.

use std::future::Future;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::time::Instant;

use crate::error::CircuitBreakerError;

/// The state of a circuit breaker.
///
/// State transitions:
/// ```text
/// Closed ──(failures >= threshold)──► Open ──(recovery timeout)──► HalfOpen
///   ▲                                  ▲                              │
///   └──────────(trial succeeds)────────┼──────────────────────────────┤
///                                      └───────(trial fails)──────────┘
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CircuitState {
    /// Calls flow through; failures are counted.
    #[default]
    Closed,

    /// Calls are rejected without invoking the operation.
    Open,

    /// A single trial call is admitted to probe the dependency.
    HalfOpen,
}

impl CircuitState {
    /// Returns the state name as a string.
    pub fn as_str(&self) -> &'static str {
        match self {
            CircuitState::Closed => "CLOSED",
            CircuitState::Open => "OPEN",
            CircuitState::HalfOpen => "HALF_OPEN",
        }
    }
}

impl std::fmt::Display for CircuitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Tuning knobs for a circuit breaker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CircuitBreakerConfig {
    /// Number of counted failures that trips the breaker open.
    pub failure_threshold: u32,
    /// Cool-down after the last failure before a trial call is admitted.
    pub recovery_timeout: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            recovery_timeout: Duration::from_secs(30),
        }
    }
}

/// Point-in-time view of a breaker's bookkeeping.
#[derive(Debug, Clone, Serialize)]
pub struct CircuitBreakerStats {
    pub name: String,
    pub state: CircuitState,
    pub failure_count: u64,
    pub success_count: u64,
    pub total_requests: u64,
    pub failure_rate: f64,
    pub last_failure_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Default)]
struct BreakerState {
    state: CircuitState,
    failure_count: u64,
    success_count: u64,
    total_requests: u64,
    last_failure: Option<Instant>,
    last_failure_at: Option<DateTime<Utc>>,
    trial_in_flight: bool,
}

impl BreakerState {
    fn failure_rate(&self) -> f64 {
        if self.total_requests == 0 {
            0.0
        } else {
            self.failure_count as f64 / self.total_requests as f64
        }
    }
}

/// Guards calls to one external dependency.
///
/// The state lock is held only while admitting a call and while recording
/// its outcome, so admitted operations run concurrently.
#[derive(Debug)]
pub struct CircuitBreaker {
    name: String,
    config: CircuitBreakerConfig,
    state: Mutex<BreakerState>,
}

impl CircuitBreaker {
    /// Creates a closed breaker for the named dependency.
    pub fn new(name: impl Into<String>, config: CircuitBreakerConfig) -> Self {
        Self {
            name: name.into(),
            config,
            state: Mutex::new(BreakerState::default()),
        }
    }

    /// Returns the dependency name this breaker protects.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the breaker configuration.
    pub fn config(&self) -> CircuitBreakerConfig {
        self.config
    }

    /// Returns the current state.
    pub fn state(&self) -> CircuitState {
        self.state.lock().state
    }

    /// Returns a consistent snapshot of the breaker's bookkeeping.
    pub fn stats(&self) -> CircuitBreakerStats {
        let s = self.state.lock();
        CircuitBreakerStats {
            name: self.name.clone(),
            state: s.state,
            failure_count: s.failure_count,
            success_count: s.success_count,
            total_requests: s.total_requests,
            failure_rate: s.failure_rate(),
            last_failure_at: s.last_failure_at,
        }
    }

    /// Runs `op` through the breaker. Every `Err` counts as a failure.
    pub async fn execute<T, E, F, Fut>(&self, op: F) -> Result<T, CircuitBreakerError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        self.execute_classified(op, |_| true).await
    }

    /// Runs `op` through the breaker, counting only errors for which
    /// `is_expected` returns true.
    ///
    /// Other errors are returned unchanged and leave the success/failure
    /// bookkeeping untouched.
    pub async fn execute_classified<T, E, F, Fut, C>(
        &self,
        op: F,
        is_expected: C,
    ) -> Result<T, CircuitBreakerError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        C: Fn(&E) -> bool,
    {
        let permit = self.admit()?;

        match op().await {
            Ok(value) => {
                permit.succeed();
                Ok(value)
            }
            Err(err) if is_expected(&err) => {
                permit.fail();
                Err(CircuitBreakerError::Inner(err))
            }
            Err(err) => {
                permit.release();
                Err(CircuitBreakerError::Inner(err))
            }
        }
    }

    /// Runs `op` through the breaker with an upper bound on its duration.
    ///
    /// An elapsed timeout counts as a failure.
    pub async fn execute_with_timeout<T, E, F, Fut>(
        &self,
        timeout: Duration,
        op: F,
    ) -> Result<T, CircuitBreakerError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let permit = self.admit()?;

        match tokio::time::timeout(timeout, op()).await {
            Ok(Ok(value)) => {
                permit.succeed();
                Ok(value)
            }
            Ok(Err(err)) => {
                permit.fail();
                Err(CircuitBreakerError::Inner(err))
            }
            Err(_) => {
                permit.fail();
                tracing::warn!(breaker = %self.name, ?timeout, "guarded call timed out");
                Err(CircuitBreakerError::Timeout {
                    name: self.name.clone(),
                    timeout,
                })
            }
        }
    }

    fn admit<E>(&self) -> Result<Permit<'_>, CircuitBreakerError<E>> {
        let mut s = self.state.lock();
        let trial = match s.state {
            CircuitState::Closed => false,
            CircuitState::Open => {
                let cooled_down = s
                    .last_failure
                    .is_none_or(|at| at.elapsed() >= self.config.recovery_timeout);
                if !cooled_down {
                    drop(s);
                    return Err(self.reject());
                }
                self.transition(&mut s, CircuitState::HalfOpen);
                s.trial_in_flight = true;
                true
            }
            CircuitState::HalfOpen => {
                if s.trial_in_flight {
                    drop(s);
                    return Err(self.reject());
                }
                s.trial_in_flight = true;
                true
            }
        };

        metrics::counter!("circuit_breaker_calls_total", "breaker" => self.name.clone())
            .increment(1);
        Ok(Permit {
            breaker: self,
            trial,
            settled: false,
        })
    }

    fn reject<E>(&self) -> CircuitBreakerError<E> {
        metrics::counter!("circuit_breaker_rejections_total", "breaker" => self.name.clone())
            .increment(1);
        tracing::debug!(breaker = %self.name, "call rejected by open circuit");
        CircuitBreakerError::Open {
            name: self.name.clone(),
        }
    }

    fn on_success(&self, trial: bool) {
        let mut s = self.state.lock();
        s.success_count += 1;
        s.total_requests += 1;

        if trial {
            s.trial_in_flight = false;
            if s.state == CircuitState::HalfOpen {
                self.transition(&mut s, CircuitState::Closed);
                s.failure_count = 0;
                s.success_count = 0;
                s.total_requests = 0;
                s.last_failure = None;
            }
        }
    }

    fn on_failure(&self, trial: bool) {
        let mut s = self.state.lock();
        s.failure_count += 1;
        s.total_requests += 1;
        s.last_failure = Some(Instant::now());
        s.last_failure_at = Some(Utc::now());

        if trial {
            s.trial_in_flight = false;
            if s.state == CircuitState::HalfOpen {
                self.transition(&mut s, CircuitState::Open);
            }
        } else if s.state == CircuitState::Closed
            && s.failure_count >= u64::from(self.config.failure_threshold)
        {
            self.transition(&mut s, CircuitState::Open);
        }
    }

    fn on_release(&self, trial: bool) {
        if trial {
            self.state.lock().trial_in_flight = false;
        }
    }

    fn transition(&self, s: &mut BreakerState, to: CircuitState) {
        let from = s.state;
        if from == to {
            return;
        }
        s.state = to;
        metrics::counter!(
            "circuit_breaker_transitions_total",
            "breaker" => self.name.clone(),
            "to" => to.as_str()
        )
        .increment(1);
        match to {
            CircuitState::Open => {
                tracing::warn!(breaker = %self.name, %from, %to, failures = s.failure_count, "circuit breaker opened")
            }
            _ => tracing::info!(breaker = %self.name, %from, %to, "circuit breaker state changed"),
        }
    }
}

/// Admission ticket for one call.
///
/// Dropping an unsettled permit (the guarded future was cancelled) frees the
/// half-open trial slot without touching the counters.
struct Permit<'a> {
    breaker: &'a CircuitBreaker,
    trial: bool,
    settled: bool,
}

impl Permit<'_> {
    fn succeed(mut self) {
        self.settled = true;
        self.breaker.on_success(self.trial);
    }

    fn fail(mut self) {
        self.settled = true;
        self.breaker.on_failure(self.trial);
    }

    fn release(mut self) {
        self.settled = true;
        self.breaker.on_release(self.trial);
    }
}

impl Drop for Permit<'_> {
    fn drop(&mut self) {
        if !self.settled {
            self.breaker.on_release(self.trial);
        }
    }
}
