//! Inbound webhook signature verification
//!
//! Signatures are HMAC-SHA256 over the raw request body, hex encoded, sent as
//! `sha256=<hex>` or bare `<hex>`. Verification only borrows the body, so the
//! same bytes stay available to the handler afterwards.

use hmac::{Hmac, Mac};
use sha2::Sha256;
use subtle::ConstantTimeEq;

type HmacSha256 = Hmac<Sha256>;

const SIGNATURE_PREFIX: &str = "sha256=";

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum WebhookError {
    #[error("missing signature")]
    MissingSignature,

    #[error("signature mismatch")]
    SignatureMismatch,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VerifyOutcome {
    /// Signature checked and valid
    Verified,
    /// No secret configured; accepted unauthenticated
    Skipped,
}

#[derive(Clone)]
pub struct WebhookVerifier {
    secret: Option<Vec<u8>>,
}

impl WebhookVerifier {
    /// An empty or absent secret disables verification
    pub fn new(secret: Option<&str>) -> Self {
        Self {
            secret: secret
                .filter(|s| !s.is_empty())
                .map(|s| s.as_bytes().to_vec()),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.secret.is_some()
    }

    pub fn verify(
        &self,
        body: &[u8],
        signature: Option<&str>,
    ) -> Result<VerifyOutcome, WebhookError> {
        self.verify_raw(body, signature.map(str::as_bytes))
    }

    /// Verify a signature taken straight from header bytes, which need not be UTF-8
    pub fn verify_raw(
        &self,
        body: &[u8],
        signature: Option<&[u8]>,
    ) -> Result<VerifyOutcome, WebhookError> {
        let Some(secret) = self.secret.as_deref() else {
            return Ok(VerifyOutcome::Skipped);
        };

        let provided = match signature {
            Some(value) if !value.is_empty() => value,
            _ => return Err(WebhookError::MissingSignature),
        };
        let provided = provided
            .strip_prefix(SIGNATURE_PREFIX.as_bytes())
            .unwrap_or(provided);

        let expected = sign(secret, body)?;
        if bool::from(expected.as_bytes().ct_eq(provided)) {
            Ok(VerifyOutcome::Verified)
        } else {
            Err(WebhookError::SignatureMismatch)
        }
    }
}

/// Hex-encoded HMAC-SHA256 of `body`
pub fn sign(secret: &[u8], body: &[u8]) -> Result<String, WebhookError> {
    let mut mac =
        HmacSha256::new_from_slice(secret).map_err(|_| WebhookError::SignatureMismatch)?;
    mac.update(body);
    Ok(hex::encode(mac.finalize().into_bytes()))
}
