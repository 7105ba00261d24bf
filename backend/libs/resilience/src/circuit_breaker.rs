//! Circuit Breaker with a rolling count window
//!
//! State transitions:
//! - Closed → Open: when `requests >= min_requests` and the failure ratio of the
//!   current window reaches `failure_ratio`
//! - Closed → Closed: the count window rolls over every `interval`
//! - Open → HalfOpen: after `timeout` has elapsed since the circuit opened
//! - HalfOpen → Closed: after `max_requests` consecutive successful trial calls
//! - HalfOpen → Open: on any failed trial call
//!
//! Every transition starts a new generation. Results of calls admitted under an
//! older generation are discarded, so a slow call cannot flip a state it did
//! not observe.
use crate::metrics::CircuitBreakerMetrics;
use parking_lot::Mutex;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::time::Instant;
use tracing::{debug, info, warn};

const STATE_CHANGE_CHANNEL_CAPACITY: usize = 32;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    /// Normal operation, requests pass through
    Closed,
    /// Circuit is open, requests fail fast
    Open,
    /// Testing if service recovered, limited requests allowed
    HalfOpen,
}

impl CircuitState {
    pub fn as_str(&self) -> &'static str {
        match self {
            CircuitState::Closed => "closed",
            CircuitState::Open => "open",
            CircuitState::HalfOpen => "half_open",
        }
    }
}

impl fmt::Display for CircuitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone)]
pub struct CircuitBreakerConfig {
    /// Name used in logs, metrics and state-change events
    pub name: String,
    /// Concurrent trial calls admitted in HalfOpen, and the number of
    /// consecutive successes needed to close the circuit again
    pub max_requests: u32,
    /// Rolling window length in Closed state (zero disables rollover)
    pub interval: Duration,
    /// Duration to wait before transitioning from Open to HalfOpen
    pub timeout: Duration,
    /// Minimum completed calls in the window before the ratio is evaluated
    pub min_requests: u32,
    /// Failure ratio (0.0 - 1.0] that trips the circuit
    pub failure_ratio: f64,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            name: "default".to_string(),
            max_requests: 3,
            interval: Duration::from_secs(10),
            timeout: Duration::from_secs(60),
            min_requests: 3,
            failure_ratio: 0.6,
        }
    }
}

/// Outcome counts for the current window
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Counts {
    pub requests: u32,
    pub total_successes: u32,
    pub total_failures: u32,
    pub consecutive_successes: u32,
    pub consecutive_failures: u32,
}

impl Counts {
    fn on_success(&mut self) {
        self.requests += 1;
        self.total_successes += 1;
        self.consecutive_successes += 1;
        self.consecutive_failures = 0;
    }

    fn on_failure(&mut self) {
        self.requests += 1;
        self.total_failures += 1;
        self.consecutive_failures += 1;
        self.consecutive_successes = 0;
    }

    fn failure_ratio(&self) -> f64 {
        if self.requests == 0 {
            return 0.0;
        }
        f64::from(self.total_failures) / f64::from(self.requests)
    }
}

/// Emitted on every state transition
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StateChange {
    pub name: String,
    pub from: CircuitState,
    pub to: CircuitState,
}

#[derive(Debug, thiserror::Error)]
pub enum CircuitBreakerError<E> {
    #[error("Circuit breaker is open - failing fast")]
    Open,
    #[error("Call failed: {0}")]
    CallFailed(E),
}

impl<E> CircuitBreakerError<E> {
    pub fn is_open(&self) -> bool {
        matches!(self, CircuitBreakerError::Open)
    }
}

#[derive(Clone)]
pub struct CircuitBreaker {
    config: Arc<CircuitBreakerConfig>,
    state: Arc<Mutex<CircuitBreakerState>>,
    events: broadcast::Sender<StateChange>,
}

struct CircuitBreakerState {
    current: CircuitState,
    generation: u64,
    counts: Counts,
    /// Closed: end of the current window. Open: when HalfOpen becomes possible.
    expiry: Option<Instant>,
    opened_at: Option<Instant>,
    half_open_in_flight: u32,
}

/// Admission ticket for one call. Dropping it without settling releases the
/// HalfOpen slot and records nothing.
struct Permit<'a> {
    breaker: &'a CircuitBreaker,
    generation: u64,
    settled: bool,
}

impl Permit<'_> {
    fn settle(mut self, failed: bool) {
        self.settled = true;
        self.breaker.after_request(self.generation, failed);
    }
}

impl Drop for Permit<'_> {
    fn drop(&mut self) {
        if !self.settled {
            self.breaker.release(self.generation);
        }
    }
}

impl CircuitBreaker {
    pub fn new(config: CircuitBreakerConfig) -> Self {
        let (events, _) = broadcast::channel(STATE_CHANGE_CHANNEL_CAPACITY);
        let expiry = window_end(Instant::now(), config.interval);

        Self {
            state: Arc::new(Mutex::new(CircuitBreakerState {
                current: CircuitState::Closed,
                generation: 0,
                counts: Counts::default(),
                expiry,
                opened_at: None,
                half_open_in_flight: 0,
            })),
            config: Arc::new(config),
            events,
        }
    }

    pub fn name(&self) -> &str {
        &self.config.name
    }

    /// Execute a future with circuit breaker protection. Every `Err` counts
    /// as a failure.
    pub async fn call<F, Fut, T, E>(&self, f: F) -> Result<T, CircuitBreakerError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        self.call_classified(f, |_| true).await
    }

    /// Execute a future with circuit breaker protection, letting the caller
    /// decide which errors reflect backend health. Errors for which
    /// `is_failure` returns false are surfaced unchanged but counted as
    /// successes.
    pub async fn call_classified<F, Fut, T, E, C>(
        &self,
        f: F,
        is_failure: C,
    ) -> Result<T, CircuitBreakerError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        C: FnOnce(&E) -> bool,
    {
        let permit = self.before_request()?;

        match f().await {
            Ok(result) => {
                permit.settle(false);
                Ok(result)
            }
            Err(e) => {
                permit.settle(is_failure(&e));
                Err(CircuitBreakerError::CallFailed(e))
            }
        }
    }

    /// Get current circuit state (for monitoring). Applies any pending
    /// time-based transition first.
    pub fn state(&self) -> CircuitState {
        let mut state = self.state.lock();
        self.current_state(&mut state, Instant::now())
    }

    /// Snapshot of the current window counts
    pub fn counts(&self) -> Counts {
        let mut state = self.state.lock();
        self.current_state(&mut state, Instant::now());
        state.counts
    }

    /// Receive state-change events. Transitions never wait on subscribers.
    pub fn subscribe(&self) -> broadcast::Receiver<StateChange> {
        self.events.subscribe()
    }

    fn before_request<E>(&self) -> Result<Permit<'_>, CircuitBreakerError<E>> {
        let mut state = self.state.lock();
        let now = Instant::now();

        match self.current_state(&mut state, now) {
            CircuitState::Open => {
                CircuitBreakerMetrics::record_call(&self.config.name, "open", "rejected");
                return Err(CircuitBreakerError::Open);
            }
            CircuitState::HalfOpen => {
                if state.half_open_in_flight >= self.config.max_requests {
                    debug!(breaker = %self.config.name, "Circuit breaker: HalfOpen trial cap reached");
                    CircuitBreakerMetrics::record_call(&self.config.name, "half_open", "rejected");
                    return Err(CircuitBreakerError::Open);
                }
                state.half_open_in_flight += 1;
            }
            CircuitState::Closed => {}
        }

        Ok(Permit {
            breaker: self,
            generation: state.generation,
            settled: false,
        })
    }

    fn after_request(&self, generation: u64, failed: bool) {
        let mut state = self.state.lock();
        let now = Instant::now();
        let current = self.current_state(&mut state, now);

        if generation != state.generation {
            debug!(breaker = %self.config.name, "Circuit breaker: discarding result from previous generation");
            return;
        }

        let result = if failed { "failure" } else { "success" };
        CircuitBreakerMetrics::record_call(&self.config.name, current.as_str(), result);

        match current {
            CircuitState::Closed => {
                if failed {
                    state.counts.on_failure();
                } else {
                    state.counts.on_success();
                }

                if self.ready_to_trip(&state.counts) {
                    warn!(
                        breaker = %self.config.name,
                        requests = state.counts.requests,
                        failures = state.counts.total_failures,
                        "Circuit breaker: Closed → Open (failure ratio {:.2}%)",
                        state.counts.failure_ratio() * 100.0
                    );
                    self.set_state(&mut state, CircuitState::Open, now);
                }
            }
            CircuitState::HalfOpen => {
                state.half_open_in_flight = state.half_open_in_flight.saturating_sub(1);

                if failed {
                    state.counts.on_failure();
                    warn!(breaker = %self.config.name, "Circuit breaker: HalfOpen → Open (trial failed)");
                    self.set_state(&mut state, CircuitState::Open, now);
                } else {
                    state.counts.on_success();
                    if state.counts.consecutive_successes >= self.config.max_requests {
                        info!(breaker = %self.config.name, "Circuit breaker: HalfOpen → Closed");
                        self.set_state(&mut state, CircuitState::Closed, now);
                    }
                }
            }
            CircuitState::Open => {}
        }
    }

    fn release(&self, generation: u64) {
        let mut state = self.state.lock();
        let current = self.current_state(&mut state, Instant::now());

        if generation == state.generation && current == CircuitState::HalfOpen {
            state.half_open_in_flight = state.half_open_in_flight.saturating_sub(1);
        }
        debug!(breaker = %self.config.name, "Circuit breaker: call cancelled, not counted");
        CircuitBreakerMetrics::record_call(&self.config.name, current.as_str(), "cancelled");
    }

    fn ready_to_trip(&self, counts: &Counts) -> bool {
        counts.requests >= self.config.min_requests
            && counts.failure_ratio() >= self.config.failure_ratio
    }

    fn current_state(&self, state: &mut CircuitBreakerState, now: Instant) -> CircuitState {
        match state.current {
            CircuitState::Closed => {
                if matches!(state.expiry, Some(expiry) if expiry <= now) {
                    self.new_generation(state, now);
                }
            }
            CircuitState::Open => {
                if matches!(state.expiry, Some(expiry) if expiry <= now) {
                    info!(breaker = %self.config.name, "Circuit breaker: Open → HalfOpen");
                    self.set_state(state, CircuitState::HalfOpen, now);
                }
            }
            CircuitState::HalfOpen => {}
        }
        state.current
    }

    fn set_state(&self, state: &mut CircuitBreakerState, to: CircuitState, now: Instant) {
        let from = state.current;
        if from == to {
            return;
        }

        if from == CircuitState::Open {
            if let Some(opened_at) = state.opened_at.take() {
                CircuitBreakerMetrics::record_open_duration(
                    &self.config.name,
                    now.duration_since(opened_at).as_secs_f64(),
                );
            }
        }
        if to == CircuitState::Open {
            state.opened_at = Some(now);
        }

        state.current = to;
        self.new_generation(state, now);

        CircuitBreakerMetrics::record_state_transition(&self.config.name, from.as_str(), to.as_str());
        info!(breaker = %self.config.name, from = %from, to = %to, "Circuit breaker state changed");

        // No subscribers is fine
        let _ = self.events.send(StateChange {
            name: self.config.name.clone(),
            from,
            to,
        });
    }

    fn new_generation(&self, state: &mut CircuitBreakerState, now: Instant) {
        state.generation += 1;
        state.counts = Counts::default();
        state.half_open_in_flight = 0;
        state.expiry = match state.current {
            CircuitState::Closed => window_end(now, self.config.interval),
            CircuitState::Open => Some(now + self.config.timeout),
            CircuitState::HalfOpen => None,
        };
    }
}

fn window_end(now: Instant, interval: Duration) -> Option<Instant> {
    if interval.is_zero() {
        None
    } else {
        Some(now + interval)
    }
}
