//! Deadline wrappers for outbound async operations
use crate::metrics::DeadlineMetrics;
use std::future::Future;
use tokio::time::{timeout_at, Instant};

#[derive(Debug, thiserror::Error)]
pub enum TimeoutError<E> {
    #[error("Deadline exceeded")]
    Elapsed,
    #[error("Operation failed: {0}")]
    OperationFailed(E),
}

/// Execute a future, giving up at `deadline`
pub async fn with_deadline<F, T>(deadline: Instant, future: F) -> Result<T, TimeoutError<()>>
where
    F: Future<Output = T>,
{
    match timeout_at(deadline, future).await {
        Ok(value) => {
            DeadlineMetrics::record_operation("completed");
            Ok(value)
        }
        Err(_) => {
            DeadlineMetrics::record_operation("elapsed");
            Err(TimeoutError::Elapsed)
        }
    }
}

/// Execute a fallible future, giving up at `deadline`
pub async fn with_deadline_result<F, T, E>(deadline: Instant, future: F) -> Result<T, TimeoutError<E>>
where
    F: Future<Output = Result<T, E>>,
{
    match timeout_at(deadline, future).await {
        Ok(Ok(result)) => {
            DeadlineMetrics::record_operation("success");
            Ok(result)
        }
        Ok(Err(e)) => {
            DeadlineMetrics::record_operation("failed");
            Err(TimeoutError::OperationFailed(e))
        }
        Err(_) => {
            DeadlineMetrics::record_operation("elapsed");
            Err(TimeoutError::Elapsed)
        }
    }
}
