/// Error types for the Edge Gateway
///
/// Every failure the pipeline can produce is recovered where it is detected and
/// surfaced as one of these variants. Each maps to a stable HTTP status and a
/// stable machine-readable code; backend response bodies are never included.
use actix_web::{error::ResponseError, http::StatusCode, HttpResponse};
use serde::Serialize;

use crate::clients::BackendError;
use crate::middleware::jwt::AuthError;
use crate::webhook::WebhookError;

/// Result type for gateway operations
pub type Result<T> = std::result::Result<T, GatewayError>;

#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    #[error("rate limit exceeded")]
    AdmissionRejected,

    #[error("missing or malformed authorization header")]
    MissingOrMalformedHeader,

    #[error("unsupported token algorithm")]
    UnsupportedAlgorithm,

    #[error("missing kid in token header")]
    MissingKeyId,

    #[error("signing key not found")]
    KeyNotFound,

    #[error("invalid token")]
    InvalidSignatureOrClaims,

    #[error("invalid issuer")]
    IssuerMismatch,

    #[error("tenant_id missing from token")]
    MissingTenant,

    #[error("invalid request body")]
    InvalidRequestBody,

    #[error("backend temporarily unavailable")]
    CircuitOpen,

    #[error("failed to reach backend")]
    BackendUnavailable,

    #[error("backend rejected the request")]
    BackendRejected,

    #[error("missing signature")]
    MissingSignature,

    #[error("invalid signature")]
    SignatureMismatch,
}

#[derive(Debug, Serialize)]
struct ErrorBody<'a> {
    error: String,
    code: &'a str,
}

impl GatewayError {
    /// Stable code clients can match on
    pub fn code(&self) -> &'static str {
        match self {
            GatewayError::AdmissionRejected => "RATE_LIMITED",
            GatewayError::MissingOrMalformedHeader => "MISSING_OR_MALFORMED_HEADER",
            GatewayError::UnsupportedAlgorithm => "UNSUPPORTED_ALGORITHM",
            GatewayError::MissingKeyId => "MISSING_KEY_ID",
            GatewayError::KeyNotFound => "KEY_NOT_FOUND",
            GatewayError::InvalidSignatureOrClaims => "INVALID_TOKEN",
            GatewayError::IssuerMismatch => "ISSUER_MISMATCH",
            GatewayError::MissingTenant => "TENANT_MISSING",
            GatewayError::InvalidRequestBody => "INVALID_REQUEST_BODY",
            GatewayError::CircuitOpen => "CIRCUIT_OPEN",
            GatewayError::BackendUnavailable => "BACKEND_UNAVAILABLE",
            GatewayError::BackendRejected => "BACKEND_REJECTED",
            GatewayError::MissingSignature => "MISSING_SIGNATURE",
            GatewayError::SignatureMismatch => "INVALID_SIGNATURE",
        }
    }
}

impl ResponseError for GatewayError {
    fn status_code(&self) -> StatusCode {
        match self {
            GatewayError::AdmissionRejected => StatusCode::TOO_MANY_REQUESTS,
            GatewayError::MissingOrMalformedHeader
            | GatewayError::UnsupportedAlgorithm
            | GatewayError::MissingKeyId
            | GatewayError::KeyNotFound
            | GatewayError::InvalidSignatureOrClaims
            | GatewayError::IssuerMismatch
            | GatewayError::MissingSignature
            | GatewayError::SignatureMismatch => StatusCode::UNAUTHORIZED,
            GatewayError::MissingTenant | GatewayError::InvalidRequestBody => {
                StatusCode::BAD_REQUEST
            }
            GatewayError::CircuitOpen => StatusCode::SERVICE_UNAVAILABLE,
            GatewayError::BackendUnavailable | GatewayError::BackendRejected => {
                StatusCode::BAD_GATEWAY
            }
        }
    }

    fn error_response(&self) -> HttpResponse {
        HttpResponse::build(self.status_code()).json(ErrorBody {
            error: self.to_string(),
            code: self.code(),
        })
    }
}

impl From<AuthError> for GatewayError {
    fn from(err: AuthError) -> Self {
        match err {
            AuthError::MissingOrMalformedHeader => GatewayError::MissingOrMalformedHeader,
            AuthError::UnsupportedAlgorithm(_) => GatewayError::UnsupportedAlgorithm,
            AuthError::MissingKeyId => GatewayError::MissingKeyId,
            AuthError::KeyNotFound(_) => GatewayError::KeyNotFound,
            AuthError::InvalidSignatureOrClaims(_) => GatewayError::InvalidSignatureOrClaims,
            AuthError::IssuerMismatch => GatewayError::IssuerMismatch,
        }
    }
}

impl From<BackendError> for GatewayError {
    fn from(err: BackendError) -> Self {
        match err {
            BackendError::CircuitOpen => GatewayError::CircuitOpen,
            BackendError::Unavailable(_) => GatewayError::BackendUnavailable,
            BackendError::Rejected { .. } => GatewayError::BackendRejected,
        }
    }
}

impl From<WebhookError> for GatewayError {
    fn from(err: WebhookError) -> Self {
        match err {
            WebhookError::MissingSignature => GatewayError::MissingSignature,
            WebhookError::SignatureMismatch => GatewayError::SignatureMismatch,
        }
    }
}
