//! Prometheus metrics for resilience patterns
#[cfg(feature = "metrics")]
use prometheus::{register_histogram_vec, register_int_counter_vec, HistogramVec, IntCounterVec};

#[cfg(feature = "metrics")]
use once_cell::sync::Lazy;

#[cfg(feature = "metrics")]
static CIRCUIT_BREAKER_STATE_TRANSITIONS: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "resilience_circuit_breaker_state_transitions_total",
        "Total number of circuit breaker state transitions",
        &["breaker", "from", "to"]
    )
    .expect("Failed to register circuit breaker state transitions metric")
});

#[cfg(feature = "metrics")]
static CIRCUIT_BREAKER_CALLS: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "resilience_circuit_breaker_calls_total",
        "Total number of circuit breaker calls",
        &["breaker", "state", "result"]
    )
    .expect("Failed to register circuit breaker calls metric")
});

#[cfg(feature = "metrics")]
static CIRCUIT_BREAKER_OPEN_DURATION: Lazy<HistogramVec> = Lazy::new(|| {
    register_histogram_vec!(
        "resilience_circuit_breaker_open_duration_seconds",
        "Duration circuit breaker remained open",
        &["breaker"]
    )
    .expect("Failed to register circuit breaker open duration metric")
});

#[cfg(feature = "metrics")]
static DEADLINE_OPERATIONS: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "resilience_deadline_operations_total",
        "Total number of deadline-bounded operations",
        &["result"]
    )
    .expect("Failed to register deadline operations metric")
});

/// Metrics collector for circuit breaker
#[cfg(feature = "metrics")]
pub struct CircuitBreakerMetrics;

#[cfg(feature = "metrics")]
impl CircuitBreakerMetrics {
    pub fn record_state_transition(breaker: &str, from: &str, to: &str) {
        CIRCUIT_BREAKER_STATE_TRANSITIONS
            .with_label_values(&[breaker, from, to])
            .inc();
    }

    pub fn record_call(breaker: &str, state: &str, result: &str) {
        CIRCUIT_BREAKER_CALLS
            .with_label_values(&[breaker, state, result])
            .inc();
    }

    pub fn record_open_duration(breaker: &str, duration_secs: f64) {
        CIRCUIT_BREAKER_OPEN_DURATION
            .with_label_values(&[breaker])
            .observe(duration_secs);
    }
}

/// Metrics collector for deadline-bounded operations
#[cfg(feature = "metrics")]
pub struct DeadlineMetrics;

#[cfg(feature = "metrics")]
impl DeadlineMetrics {
    pub fn record_operation(result: &str) {
        DEADLINE_OPERATIONS.with_label_values(&[result]).inc();
    }
}

// No-op implementations when metrics feature is disabled
#[cfg(not(feature = "metrics"))]
pub struct CircuitBreakerMetrics;

#[cfg(not(feature = "metrics"))]
impl CircuitBreakerMetrics {
    pub fn record_state_transition(_breaker: &str, _from: &str, _to: &str) {}
    pub fn record_call(_breaker: &str, _state: &str, _result: &str) {}
    pub fn record_open_duration(_breaker: &str, _duration_secs: f64) {}
}

#[cfg(not(feature = "metrics"))]
pub struct DeadlineMetrics;

#[cfg(not(feature = "metrics"))]
impl DeadlineMetrics {
    pub fn record_operation(_result: &str) {}
}
