//! Client for the core backend API
//!
//! Batch forwards go through a circuit breaker; health probes do not, so a
//! tripped breaker never masks the backend's real health and probe traffic
//! never counts towards tripping it.

use resilience::{
    with_deadline_result, CircuitBreaker, CircuitBreakerError, CircuitState, TimeoutError,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{error, warn};

#[derive(Debug, thiserror::Error)]
pub enum BackendError {
    #[error("circuit breaker is open")]
    CircuitOpen,

    #[error("backend unavailable: {0}")]
    Unavailable(String),

    #[error("backend rejected request with status {status}")]
    Rejected { status: u16 },
}

impl BackendError {
    /// Whether this outcome reflects backend health for breaker accounting
    fn counts_as_failure(&self) -> bool {
        !matches!(self, BackendError::Rejected { .. })
    }
}

/// Body sent to `POST /sync/batch`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchSyncRequest {
    pub tenant_id: String,
    pub items: Vec<Value>,
}

/// Body returned by `POST /sync/batch`
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BatchSyncResponse {
    pub status: String,
    pub processed_count: i64,
}

#[derive(Clone)]
pub struct BackendClient {
    http: reqwest::Client,
    base_url: String,
    breaker: CircuitBreaker,
}

impl BackendClient {
    pub fn new(
        base_url: impl Into<String>,
        http_timeout: Duration,
        breaker: CircuitBreaker,
    ) -> Result<Self, BackendError> {
        let http = reqwest::Client::builder()
            .timeout(http_timeout)
            .build()
            .map_err(|e| BackendError::Unavailable(e.to_string()))?;

        Ok(Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            breaker,
        })
    }

    pub fn breaker(&self) -> &CircuitBreaker {
        &self.breaker
    }

    pub fn breaker_state(&self) -> CircuitState {
        self.breaker.state()
    }

    /// Probe `GET /health`, bypassing the breaker
    pub async fn health_check(&self, deadline: Instant) -> Result<(), BackendError> {
        let url = format!("{}/health", self.base_url);

        let probe = async {
            let response = self
                .http
                .get(&url)
                .send()
                .await
                .map_err(|e| BackendError::Unavailable(e.to_string()))?;

            let status = response.status();
            if status.is_success() {
                Ok(())
            } else {
                Err(BackendError::Unavailable(format!(
                    "health check failed with status {}",
                    status.as_u16()
                )))
            }
        };

        match with_deadline_result(deadline, probe).await {
            Ok(()) => Ok(()),
            Err(TimeoutError::Elapsed) => Err(BackendError::Unavailable(
                "health check deadline exceeded".to_string(),
            )),
            Err(TimeoutError::OperationFailed(e)) => Err(e),
        }
    }

    /// Forward a batch to `POST /sync/batch` through the breaker
    pub async fn forward_batch(
        &self,
        deadline: Instant,
        bearer_token: &str,
        tenant_id: &str,
        items: Vec<Value>,
    ) -> Result<BatchSyncResponse, BackendError> {
        let url = format!("{}/sync/batch", self.base_url);
        let payload = BatchSyncRequest {
            tenant_id: tenant_id.to_string(),
            items,
        };

        let result = self
            .breaker
            .call_classified(
                || with_deadline_result(deadline, self.send_batch(&url, bearer_token, &payload)),
                |e: &TimeoutError<BackendError>| match e {
                    TimeoutError::Elapsed => true,
                    TimeoutError::OperationFailed(inner) => inner.counts_as_failure(),
                },
            )
            .await;

        match result {
            Ok(response) => Ok(response),
            Err(CircuitBreakerError::Open) => {
                warn!(breaker = self.breaker.name(), "Batch rejected, circuit open");
                Err(BackendError::CircuitOpen)
            }
            Err(CircuitBreakerError::CallFailed(TimeoutError::Elapsed)) => {
                error!("Batch forward deadline exceeded");
                Err(BackendError::Unavailable("deadline exceeded".to_string()))
            }
            Err(CircuitBreakerError::CallFailed(TimeoutError::OperationFailed(e))) => Err(e),
        }
    }

    async fn send_batch(
        &self,
        url: &str,
        bearer_token: &str,
        payload: &BatchSyncRequest,
    ) -> Result<BatchSyncResponse, BackendError> {
        let response = self
            .http
            .post(url)
            .bearer_auth(bearer_token)
            .header("X-Tenant-Id", &payload.tenant_id)
            .json(payload)
            .send()
            .await
            .map_err(|e| {
                error!(error = %e, "Request to core API failed");
                BackendError::Unavailable(e.to_string())
            })?;

        let status = response.status();
        if status.is_server_error() {
            let body = response.text().await.unwrap_or_default();
            error!(status = status.as_u16(), body = %body, "Core API server error");
            return Err(BackendError::Unavailable(format!(
                "server error {}",
                status.as_u16()
            )));
        }

        if status.is_client_error() {
            let body = response.text().await.unwrap_or_default();
            warn!(status = status.as_u16(), body = %body, "Core API rejected batch");
            return Err(BackendError::Rejected {
                status: status.as_u16(),
            });
        }

        if !status.is_success() {
            return Err(BackendError::Unavailable(format!(
                "unexpected status {}",
                status.as_u16()
            )));
        }

        response
            .json::<BatchSyncResponse>()
            .await
            .map_err(|e| BackendError::Unavailable(format!("failed to decode response: {}", e)))
    }
}
