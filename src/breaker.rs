//! Circuit breaker around the analyze -> synthesize -> distribute path
//!
//! The breaker opens when the failure ratio over a rolling window reaches the
//! configured threshold (once a minimum number of calls has been seen). While
//! open, calls fail fast with `PipelineUnavailable`. After the cool-down one
//! trial call is admitted in the half-open state; its outcome closes or
//! re-opens the circuit.

use crate::config::BreakerConfig;
use crate::error::AlertError;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::future::Future;
use std::sync::{Mutex, MutexGuard};
use tokio::time::Instant;
use tracing::{info, warn};

/// Circuit breaker states
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CircuitState {
    /// Normal operation
    #[default]
    Closed,
    /// Rejecting calls until the cool-down elapses
    Open,
    /// Admitting a single trial call
    HalfOpen,
}

impl CircuitState {
    pub fn as_str(&self) -> &'static str {
        match self {
            CircuitState::Closed => "CLOSED",
            CircuitState::Open => "OPEN",
            CircuitState::HalfOpen => "HALF_OPEN",
        }
    }
}

#[derive(Debug, Default)]
struct BreakerInner {
    state: CircuitState,
    /// (completed at, succeeded) for calls in the rolling window
    outcomes: VecDeque<(Instant, bool)>,
    opened_at: Option<Instant>,
    trial_in_flight: bool,
}

/// Counters exposed for diagnostics
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BreakerStats {
    pub state: CircuitState,
    pub calls_in_window: usize,
    pub failures_in_window: usize,
}

/// Rolling-window circuit breaker
#[derive(Debug)]
pub struct CircuitBreaker {
    config: BreakerConfig,
    inner: Mutex<BreakerInner>,
}

impl Default for CircuitBreaker {
    fn default() -> Self {
        Self::new(BreakerConfig::default())
    }
}

impl CircuitBreaker {
    pub fn new(config: BreakerConfig) -> Self {
        Self {
            config,
            inner: Mutex::new(BreakerInner::default()),
        }
    }

    pub fn config(&self) -> &BreakerConfig {
        &self.config
    }

    fn lock(&self) -> MutexGuard<'_, BreakerInner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Ask to run a call. Fails fast with `PipelineUnavailable` while open.
    pub fn acquire(&self) -> Result<CallPermit<'_>, AlertError> {
        let mut inner = self.lock();
        match inner.state {
            CircuitState::Closed => Ok(CallPermit::new(self, false)),
            CircuitState::Open => {
                let cooled = inner
                    .opened_at
                    .map(|t| t.elapsed() >= self.config.cool_down())
                    .unwrap_or(true);
                if !cooled {
                    return Err(AlertError::PipelineUnavailable);
                }
                inner.state = CircuitState::HalfOpen;
                inner.trial_in_flight = true;
                info!("circuit half-open, admitting trial call");
                Ok(CallPermit::new(self, true))
            }
            CircuitState::HalfOpen => {
                if inner.trial_in_flight {
                    return Err(AlertError::PipelineUnavailable);
                }
                inner.trial_in_flight = true;
                Ok(CallPermit::new(self, true))
            }
        }
    }

    /// Run `operation` under the breaker and its timeout
    pub async fn call<F, T>(&self, operation: F) -> Result<T, AlertError>
    where
        F: Future<Output = Result<T, AlertError>>,
    {
        let permit = self.acquire()?;
        match tokio::time::timeout(self.config.timeout(), operation).await {
            Ok(Ok(value)) => {
                permit.success();
                Ok(value)
            }
            Ok(Err(err)) => {
                permit.failure();
                Err(err)
            }
            Err(_) => {
                permit.failure();
                warn!(timeout_ms = self.config.timeout_ms, "pipeline call timed out");
                Err(AlertError::PipelineTimeout(self.config.timeout_ms))
            }
        }
    }

    fn record(&self, trial: bool, success: bool) {
        let mut inner = self.lock();
        let now = Instant::now();

        if trial {
            inner.trial_in_flight = false;
            if inner.state == CircuitState::HalfOpen {
                if success {
                    inner.state = CircuitState::Closed;
                    inner.outcomes.clear();
                    inner.opened_at = None;
                    info!("circuit closed after successful trial");
                } else {
                    inner.state = CircuitState::Open;
                    inner.opened_at = Some(now);
                    warn!("trial call failed, circuit re-opened");
                }
                return;
            }
        }

        // Outcomes of calls admitted before the circuit opened are ignored
        if inner.state != CircuitState::Closed {
            return;
        }

        inner.outcomes.push_back((now, success));
        prune(&mut inner.outcomes, now, self.config.rolling_window());

        let calls = inner.outcomes.len();
        let failures = inner.outcomes.iter().filter(|(_, ok)| !ok).count();
        if calls >= self.config.minimum_calls
            && calls > 0
            && failures as f64 / calls as f64 >= self.config.error_rate_threshold
        {
            inner.state = CircuitState::Open;
            inner.opened_at = Some(now);
            warn!(calls, failures, "error rate exceeded, circuit opened");
        }
    }

    pub fn state(&self) -> CircuitState {
        self.lock().state
    }

    pub fn stats(&self) -> BreakerStats {
        let mut inner = self.lock();
        prune(&mut inner.outcomes, Instant::now(), self.config.rolling_window());
        BreakerStats {
            state: inner.state,
            calls_in_window: inner.outcomes.len(),
            failures_in_window: inner.outcomes.iter().filter(|(_, ok)| !ok).count(),
        }
    }

    /// Force the circuit closed and forget recorded outcomes
    pub fn reset(&self) {
        *self.lock() = BreakerInner::default();
    }
}

fn prune(outcomes: &mut VecDeque<(Instant, bool)>, now: Instant, window: std::time::Duration) {
    while let Some((at, _)) = outcomes.front() {
        if now.duration_since(*at) > window {
            outcomes.pop_front();
        } else {
            break;
        }
    }
}

/// Admission to run one call. Dropping it unrecorded counts as a failure.
#[derive(Debug)]
pub struct CallPermit<'a> {
    breaker: &'a CircuitBreaker,
    trial: bool,
    recorded: bool,
}

impl<'a> CallPermit<'a> {
    fn new(breaker: &'a CircuitBreaker, trial: bool) -> Self {
        Self {
            breaker,
            trial,
            recorded: false,
        }
    }

    pub fn is_trial(&self) -> bool {
        self.trial
    }

    pub fn success(mut self) {
        self.recorded = true;
        self.breaker.record(self.trial, true);
    }

    pub fn failure(mut self) {
        self.recorded = true;
        self.breaker.record(self.trial, false);
    }
}

impl Drop for CallPermit<'_> {
    fn drop(&mut self) {
        if !self.recorded {
            self.breaker.record(self.trial, false);
        }
    }
}
