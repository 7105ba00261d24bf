//! Bearer token authentication for the Edge Gateway
//!
//! Tokens are RSA-signed JWTs issued by the identity provider. The verifying
//! key is selected by the `kid` header and resolved through the [`KeyStore`].
//! Only the RSA algorithm family is accepted; symmetric and `none` tokens are
//! rejected before any key lookup happens.

use actix_web::{
    dev::{forward_ready, Service, ServiceRequest, ServiceResponse, Transform},
    http::header::AUTHORIZATION,
    Error, HttpMessage,
};
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use futures_util::future::LocalBoxFuture;
use jsonwebtoken::{decode, Algorithm, Validation};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::future::{ready, Ready};
use std::rc::Rc;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::error::GatewayError;
use crate::jwks::{JwksError, KeyStore};

#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("missing or malformed authorization header")]
    MissingOrMalformedHeader,

    #[error("unsupported token algorithm: {0}")]
    UnsupportedAlgorithm(String),

    #[error("missing kid in token header")]
    MissingKeyId,

    #[error("signing key not found: {0}")]
    KeyNotFound(String),

    #[error("invalid token: {0}")]
    InvalidSignatureOrClaims(String),

    #[error("invalid issuer")]
    IssuerMismatch,
}

/// Token claims the gateway understands; everything else is kept in `extra`
#[derive(Debug, Serialize, Deserialize, Clone, Default)]
pub struct TokenClaims {
    pub iss: Option<Value>,
    pub sub: Option<Value>,
    pub exp: Option<i64>,
    pub tenant_id: Option<Value>,
    #[serde(rename = "tenantId")]
    pub tenant_id_camel: Option<Value>,
    pub tid: Option<Value>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, Value>,
}

impl TokenClaims {
    /// `iss` when it is a string
    pub fn issuer(&self) -> Option<&str> {
        self.iss.as_ref().and_then(Value::as_str)
    }

    /// `sub` when it is a string, empty otherwise
    pub fn subject(&self) -> String {
        self.sub
            .as_ref()
            .and_then(Value::as_str)
            .map(str::to_string)
            .unwrap_or_default()
    }

    /// Tenant identity by claim priority: `tenant_id`, `tenantId`, then `tid`.
    /// Only non-empty string values count; returns an empty string otherwise.
    pub fn resolve_tenant(&self) -> String {
        [&self.tenant_id, &self.tenant_id_camel, &self.tid]
            .into_iter()
            .find_map(|candidate| match candidate {
                Some(Value::String(s)) if !s.is_empty() => Some(s.clone()),
                _ => None,
            })
            .unwrap_or_default()
    }
}

/// Identity attached to the request after successful validation
#[derive(Debug, Clone)]
pub struct ResolvedClaims {
    pub subject: String,
    pub tenant_id: String,
    pub claims: TokenClaims,
}

/// Raw bearer token, kept for forwarding to the backend
#[derive(Debug, Clone)]
pub struct BearerToken(pub String);

#[derive(Deserialize)]
struct RawHeader {
    alg: String,
    kid: Option<String>,
}

fn accepted_algorithm(alg: &str) -> Option<Algorithm> {
    match alg {
        "RS256" => Some(Algorithm::RS256),
        "RS384" => Some(Algorithm::RS384),
        "RS512" => Some(Algorithm::RS512),
        "PS256" => Some(Algorithm::PS256),
        "PS384" => Some(Algorithm::PS384),
        "PS512" => Some(Algorithm::PS512),
        _ => None,
    }
}

/// Extract the token from `Bearer <token>`
pub fn extract_bearer(authorization: &str) -> Result<&str, AuthError> {
    match authorization.strip_prefix("Bearer ") {
        Some(token) if !token.is_empty() => Ok(token),
        _ => Err(AuthError::MissingOrMalformedHeader),
    }
}

fn parse_header(token: &str) -> Result<RawHeader, AuthError> {
    let mut segments = token.split('.');
    let (Some(header), Some(_), Some(_), None) =
        (segments.next(), segments.next(), segments.next(), segments.next())
    else {
        return Err(AuthError::InvalidSignatureOrClaims(
            "token is not three dot-separated segments".to_string(),
        ));
    };

    let bytes = URL_SAFE_NO_PAD
        .decode(header)
        .map_err(|e| AuthError::InvalidSignatureOrClaims(format!("header encoding: {}", e)))?;

    serde_json::from_slice(&bytes)
        .map_err(|e| AuthError::InvalidSignatureOrClaims(format!("header json: {}", e)))
}

/// Verifies bearer tokens against the identity provider's published keys
pub struct TokenValidator {
    keys: Arc<KeyStore>,
    issuer: String,
    leeway_secs: u64,
}

impl TokenValidator {
    pub fn new(keys: Arc<KeyStore>, issuer: impl Into<String>, leeway_secs: u64) -> Self {
        Self {
            keys,
            issuer: issuer.into(),
            leeway_secs,
        }
    }

    pub fn issuer(&self) -> &str {
        &self.issuer
    }

    /// Validate an `Authorization` header value
    pub async fn validate(
        &self,
        authorization: &str,
        deadline: Instant,
    ) -> Result<ResolvedClaims, AuthError> {
        let token = extract_bearer(authorization)?;
        let header = parse_header(token)?;

        let algorithm = accepted_algorithm(&header.alg)
            .ok_or_else(|| AuthError::UnsupportedAlgorithm(header.alg.clone()))?;

        let kid = header
            .kid
            .filter(|kid| !kid.is_empty())
            .ok_or(AuthError::MissingKeyId)?;

        let resolved = self
            .keys
            .lookup_key(&kid, false, deadline)
            .await
            .map_err(|e| match e {
                JwksError::KeyNotFound(kid) => AuthError::KeyNotFound(kid),
                other => AuthError::KeyNotFound(format!("{} ({})", kid, other)),
            })?;

        let mut validation = Validation::new(algorithm);
        validation.validate_aud = false;
        validation.leeway = self.leeway_secs;

        let data = decode::<TokenClaims>(token, &resolved.key, &validation)
            .map_err(|e| AuthError::InvalidSignatureOrClaims(e.to_string()))?;
        let claims = data.claims;

        if claims.issuer() != Some(self.issuer.as_str()) {
            return Err(AuthError::IssuerMismatch);
        }

        let tenant_id = claims.resolve_tenant();
        let subject = claims.subject();
        debug!(kid = %kid, sub = %subject, tenant_id = %tenant_id, "Token validated");

        Ok(ResolvedClaims {
            subject,
            tenant_id,
            claims,
        })
    }
}

/// JWT authentication middleware
pub struct JwtMiddleware {
    validator: Arc<TokenValidator>,
    key_deadline: Duration,
}

impl JwtMiddleware {
    pub fn new(validator: Arc<TokenValidator>, key_deadline: Duration) -> Self {
        Self {
            validator,
            key_deadline,
        }
    }
}

impl<S, B> Transform<S, ServiceRequest> for JwtMiddleware
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<B>;
    type Error = Error;
    type InitError = ();
    type Transform = JwtMiddlewareService<S>;
    type Future = Ready<Result<Self::Transform, Self::InitError>>;

    fn new_transform(&self, service: S) -> Self::Future {
        ready(Ok(JwtMiddlewareService {
            service: Rc::new(service),
            validator: self.validator.clone(),
            key_deadline: self.key_deadline,
        }))
    }
}

pub struct JwtMiddlewareService<S> {
    service: Rc<S>,
    validator: Arc<TokenValidator>,
    key_deadline: Duration,
}

impl<S, B> Service<ServiceRequest> for JwtMiddlewareService<S>
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<B>;
    type Error = Error;
    type Future = LocalBoxFuture<'static, Result<Self::Response, Self::Error>>;

    forward_ready!(service);

    fn call(&self, req: ServiceRequest) -> Self::Future {
        let service = self.service.clone();
        let validator = self.validator.clone();
        let deadline = Instant::now() + self.key_deadline;

        Box::pin(async move {
            let authorization = req
                .headers()
                .get(AUTHORIZATION)
                .and_then(|value| value.to_str().ok())
                .unwrap_or_default()
                .to_string();

            let resolved = match validator.validate(&authorization, deadline).await {
                Ok(resolved) => resolved,
                Err(e) => {
                    warn!(error = %e, path = req.path(), "Token validation failed");
                    return Err(GatewayError::from(e).into());
                }
            };

            if let Ok(token) = extract_bearer(&authorization) {
                req.extensions_mut().insert(BearerToken(token.to_string()));
            }
            req.extensions_mut().insert(resolved);

            service.call(req).await
        })
    }
}
