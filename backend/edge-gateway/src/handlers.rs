//! HTTP handlers and route table for the Edge Gateway

use actix_web::{web, HttpRequest, HttpResponse};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{error, info, warn};

use crate::clients::BackendClient;
use crate::error::{GatewayError, Result};
use crate::middleware::jwt::{BearerToken, JwtMiddleware, ResolvedClaims, TokenValidator};
use crate::webhook::{VerifyOutcome, WebhookVerifier};

pub const WHATSAPP_SIGNATURE_HEADER: &str = "X-Hub-Signature-256";

/// Shared state for all handlers
pub struct AppState {
    pub backend: BackendClient,
    pub whatsapp: WebhookVerifier,
    pub forward_deadline: Duration,
    pub health_deadline: Duration,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct CoreHealth {
    pub healthy: bool,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub edge: String,
    pub core: CoreHealth,
    pub uptime: i64,
}

#[derive(Debug, Deserialize)]
struct SyncBatchBody {
    items: Vec<Map<String, Value>>,
}

/// GET /health
pub async fn health(state: web::Data<AppState>) -> HttpResponse {
    let deadline = Instant::now() + state.health_deadline;
    let healthy = match state.backend.health_check(deadline).await {
        Ok(()) => true,
        Err(e) => {
            warn!(error = %e, "Core API health check failed");
            false
        }
    };

    let body = HealthResponse {
        edge: "OK".to_string(),
        core: CoreHealth { healthy },
        uptime: chrono::Utc::now().timestamp(),
    };

    if healthy {
        HttpResponse::Ok().json(body)
    } else {
        HttpResponse::ServiceUnavailable().json(body)
    }
}

/// POST /sync/batch
pub async fn sync_batch(
    state: web::Data<AppState>,
    claims: web::ReqData<ResolvedClaims>,
    token: web::ReqData<BearerToken>,
    body: web::Bytes,
) -> Result<HttpResponse> {
    let payload: SyncBatchBody = serde_json::from_slice(&body).map_err(|e| {
        warn!(error = %e, "Invalid batch body");
        GatewayError::InvalidRequestBody
    })?;

    if claims.tenant_id.is_empty() {
        warn!(sub = %claims.subject, "Token carries no tenant");
        return Err(GatewayError::MissingTenant);
    }

    let items: Vec<Value> = payload.items.into_iter().map(Value::Object).collect();
    let item_count = items.len();
    let deadline = Instant::now() + state.forward_deadline;

    let response = state
        .backend
        .forward_batch(deadline, &token.0, &claims.tenant_id, items)
        .await
        .map_err(|e| {
            error!(error = %e, tenant_id = %claims.tenant_id, "Batch sync failed");
            GatewayError::from(e)
        })?;

    info!(
        tenant_id = %claims.tenant_id,
        items = item_count,
        processed = response.processed_count,
        "Batch forwarded"
    );
    Ok(HttpResponse::Accepted().json(response))
}

/// POST /webhooks/whatsapp
pub async fn whatsapp_webhook(
    state: web::Data<AppState>,
    req: HttpRequest,
    body: web::Bytes,
) -> Result<HttpResponse> {
    let signature = req
        .headers()
        .get(WHATSAPP_SIGNATURE_HEADER)
        .map(|value| value.as_bytes());

    match state.whatsapp.verify_raw(&body, signature) {
        Ok(VerifyOutcome::Verified) => {
            info!(bytes = body.len(), "WhatsApp webhook received and verified");
        }
        Ok(VerifyOutcome::Skipped) => {
            info!(bytes = body.len(), "WhatsApp webhook received without verification");
        }
        Err(e) => {
            warn!(error = %e, "Rejected WhatsApp webhook");
            return Err(e.into());
        }
    }

    Ok(HttpResponse::NoContent().finish())
}

/// Register all routes; only `/sync/*` requires a bearer token
pub fn configure(cfg: &mut web::ServiceConfig, validator: Arc<TokenValidator>, key_deadline: Duration) {
    cfg.route("/health", web::get().to(health))
        .route("/webhooks/whatsapp", web::post().to(whatsapp_webhook))
        .service(
            web::scope("/sync")
                .wrap(JwtMiddleware::new(validator, key_deadline))
                .route("/batch", web::post().to(sync_batch)),
        );
}
