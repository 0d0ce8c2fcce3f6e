use crate::utils::now_ms;
use crate::{Error, Result};
use serde::Serialize;
use std::future::Future;
use std::sync::Mutex;
use std::time::{Duration, Instant};
use tracing::{info, warn};

/// Observable breaker state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    Closed,
    HalfOpen,
    Open,
}

impl CircuitState {
    pub fn as_str(&self) -> &'static str {
        match self {
            CircuitState::Closed => "closed",
            CircuitState::HalfOpen => "half_open",
            CircuitState::Open => "open",
        }
    }
}

impl std::fmt::Display for CircuitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Read-only view of the breaker for observability.
#[derive(Debug, Clone, Serialize)]
pub struct CircuitBreakerSnapshot {
    pub state: CircuitState,
    pub failure_count: u32,
    pub failure_threshold: u32,
    pub last_failure_at_ms: Option<u64>,
    /// Wall-clock time at which an open breaker admits its next probe.
    pub next_retry_at_ms: Option<u64>,
    pub half_open_probes_in_flight: u32,
}

#[derive(Debug, Clone)]
pub struct CircuitBreakerConfig {
    pub failure_threshold: u32,
    pub open_timeout: Duration,
    pub half_open_max_probes: u32,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            open_timeout: Duration::from_secs(60),
            half_open_max_probes: 3,
        }
    }
}

impl CircuitBreakerConfig {
    /// Create a new config with default values
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the failure threshold
    pub fn with_failure_threshold(mut self, threshold: u32) -> Self {
        self.failure_threshold = threshold;
        self
    }

    /// Set how long the breaker stays open after the last failure
    pub fn with_open_timeout(mut self, timeout: Duration) -> Self {
        self.open_timeout = timeout;
        self
    }

    /// Set the number of concurrent probes admitted while half-open
    pub fn with_half_open_max_probes(mut self, probes: u32) -> Self {
        self.half_open_max_probes = probes;
        self
    }
}

#[derive(Debug)]
struct State {
    failure_count: u32,
    last_failure: Option<Instant>,
    last_failure_at_ms: Option<u64>,
    probes_in_flight: u32,
    /// State observed by the previous `execute` admission, for transition logs.
    observed: CircuitState,
}

/// Failure-isolation state machine around the upstream provider.
///
/// The state is never stored on its own: it is derived from the consecutive
/// failure count and the time since the last failure. `execute` evaluates it
/// once at admission and memoizes it in `observed` until the next call.
///
/// - closed: `failure_count < failure_threshold`
/// - open: threshold reached and `open_timeout` not yet elapsed since the last failure
/// - half-open: threshold reached and the timeout elapsed; up to
///   `half_open_max_probes` calls run concurrently. A probe success resets the
///   count, a probe failure re-arms the timer.
///
/// The breaker enforces no timeout of its own. It classifies the settled
/// outcome of whatever future it wraps.
pub struct CircuitBreaker {
    cfg: CircuitBreakerConfig,
    state: Mutex<State>,
}

/// Releases a half-open probe slot if the wrapped future is dropped before settling.
struct ProbeSlot<'a> {
    breaker: &'a CircuitBreaker,
    armed: bool,
}

impl Drop for ProbeSlot<'_> {
    fn drop(&mut self) {
        if self.armed {
            if let Ok(mut st) = self.breaker.state.lock() {
                st.probes_in_flight = st.probes_in_flight.saturating_sub(1);
            }
        }
    }
}

impl CircuitBreaker {
    pub fn new(cfg: CircuitBreakerConfig) -> Self {
        Self {
            cfg,
            state: Mutex::new(State {
                failure_count: 0,
                last_failure: None,
                last_failure_at_ms: None,
                probes_in_flight: 0,
                observed: CircuitState::Closed,
            }),
        }
    }

    pub fn config(&self) -> &CircuitBreakerConfig {
        &self.cfg
    }

    fn derive(cfg: &CircuitBreakerConfig, st: &State, now: Instant) -> CircuitState {
        if st.failure_count < cfg.failure_threshold {
            return CircuitState::Closed;
        }
        match st.last_failure {
            Some(at) if now.duration_since(at) < cfg.open_timeout => CircuitState::Open,
            _ => CircuitState::HalfOpen,
        }
    }

    fn poisoned() -> Error {
        Error::service_unavailable("circuit breaker state poisoned")
    }

    /// Run `op` if the breaker admits it.
    ///
    /// Fails with [`Error::ServiceUnavailable`] without invoking `op` when the
    /// breaker is open, or half-open with every probe slot taken.
    pub async fn execute<F, Fut, T>(&self, op: F) -> Result<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let is_probe = self.admit()?;
        let mut slot = ProbeSlot {
            breaker: self,
            armed: is_probe,
        };

        let outcome = op().await;

        slot.armed = false;
        match &outcome {
            Ok(_) => self.settle(is_probe, true),
            Err(e) if e.is_upstream_failure() => self.settle(is_probe, false),
            Err(_) => self.release_probe(is_probe),
        }
        outcome
    }

    /// Admission check. Returns whether the caller holds a half-open probe slot.
    fn admit(&self) -> Result<bool> {
        let mut st = self.state.lock().map_err(|_| Self::poisoned())?;
        let now = Instant::now();
        let current = Self::derive(&self.cfg, &st, now);
        if current != st.observed {
            info!(from = %st.observed, to = %current, "circuit breaker transition");
            st.observed = current;
        }
        match current {
            CircuitState::Closed => Ok(false),
            CircuitState::Open => Err(Error::service_unavailable("circuit breaker open")),
            CircuitState::HalfOpen => {
                if st.probes_in_flight >= self.cfg.half_open_max_probes {
                    return Err(Error::service_unavailable(
                        "circuit breaker half-open: probe limit reached",
                    ));
                }
                st.probes_in_flight += 1;
                Ok(true)
            }
        }
    }

    fn settle(&self, is_probe: bool, success: bool) {
        if let Ok(mut st) = self.state.lock() {
            if is_probe {
                st.probes_in_flight = st.probes_in_flight.saturating_sub(1);
            }
            if success {
                Self::apply_success(&mut st);
            } else {
                Self::apply_failure(&self.cfg, &mut st);
            }
        }
    }

    fn release_probe(&self, is_probe: bool) {
        if !is_probe {
            return;
        }
        if let Ok(mut st) = self.state.lock() {
            st.probes_in_flight = st.probes_in_flight.saturating_sub(1);
        }
    }

    fn apply_success(st: &mut State) {
        if st.failure_count > 0 {
            info!(previous_failures = st.failure_count, "circuit breaker reset after success");
        }
        st.failure_count = 0;
        st.last_failure = None;
        st.last_failure_at_ms = None;
    }

    fn apply_failure(cfg: &CircuitBreakerConfig, st: &mut State) {
        st.failure_count = st.failure_count.saturating_add(1);
        st.last_failure = Some(Instant::now());
        st.last_failure_at_ms = Some(now_ms());
        if st.failure_count == cfg.failure_threshold {
            warn!(
                failures = st.failure_count,
                open_timeout_ms = cfg.open_timeout.as_millis() as u64,
                "circuit breaker opened"
            );
        }
    }

    /// Record a success observed outside of `execute`.
    pub fn record_success(&self) {
        if let Ok(mut st) = self.state.lock() {
            Self::apply_success(&mut st);
        }
    }

    /// Record a failure observed outside of `execute`.
    pub fn record_failure(&self) {
        if let Ok(mut st) = self.state.lock() {
            Self::apply_failure(&self.cfg, &mut st);
        }
    }

    /// Administrative reset to closed.
    pub fn reset(&self) {
        if let Ok(mut st) = self.state.lock() {
            Self::apply_success(&mut st);
            st.probes_in_flight = 0;
            st.observed = CircuitState::Closed;
        }
    }

    pub fn state(&self) -> CircuitState {
        self.get_status().state
    }

    pub fn get_status(&self) -> CircuitBreakerSnapshot {
        let now = Instant::now();
        match self.state.lock() {
            Ok(st) => {
                let state = Self::derive(&self.cfg, &st, now);
                let next_retry_at_ms = match (state, st.last_failure_at_ms) {
                    (CircuitState::Open, Some(at)) => {
                        Some(at + self.cfg.open_timeout.as_millis() as u64)
                    }
                    _ => None,
                };
                CircuitBreakerSnapshot {
                    state,
                    failure_count: st.failure_count,
                    failure_threshold: self.cfg.failure_threshold,
                    last_failure_at_ms: st.last_failure_at_ms,
                    next_retry_at_ms,
                    half_open_probes_in_flight: st.probes_in_flight,
                }
            }
            Err(_) => CircuitBreakerSnapshot {
                state: CircuitState::Open,
                failure_count: 0,
                failure_threshold: self.cfg.failure_threshold,
                last_failure_at_ms: None,
                next_retry_at_ms: None,
                half_open_probes_in_flight: 0,
            },
        }
    }
}
