/// Resilience patterns for the edge gateway
///
/// This library provides the failure-isolation building blocks used by outbound clients:
/// - **Circuit Breaker**: Fails fast when the failure ratio of a rolling window trips,
///   probes recovery with a bounded number of HalfOpen trial calls
/// - **Deadlines**: Bounds every outbound call by a caller-supplied instant
/// - **Metrics**: Optional Prometheus counters (enable the `metrics` feature)
///
/// # Example: HTTP call with Circuit Breaker and deadline
///
/// ```rust,no_run
/// use resilience::{with_deadline_result, CircuitBreaker, CircuitBreakerConfig};
/// use std::time::Duration;
/// use tokio::time::Instant;
///
/// #[tokio::main]
/// async fn main() {
///     let circuit_breaker = CircuitBreaker::new(CircuitBreakerConfig::default());
///     let deadline = Instant::now() + Duration::from_secs(2);
///
///     let result = circuit_breaker
///         .call(|| with_deadline_result(deadline, async {
///             // Your outbound call here
///             Ok::<_, String>(())
///         }))
///         .await;
/// }
/// ```

pub mod circuit_breaker;
pub mod metrics;
pub mod timeout;

// Re-export main types for convenience
pub use circuit_breaker::{
    CircuitBreaker, CircuitBreakerConfig, CircuitBreakerError, CircuitState, Counts, StateChange,
};
pub use timeout::{with_deadline, with_deadline_result, TimeoutError};
