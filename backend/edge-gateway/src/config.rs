//! Configuration for the Edge Gateway
//!
//! Loads settings from:
//! 1. Environment variables
//! 2. .env file (local development)
//!
//! Every value has a development default; only out-of-range values are errors.

use anyhow::{bail, Context, Result};
use resilience::CircuitBreakerConfig;

use crate::middleware::rate_limit::MAX_RATE_PER_SECOND;
use serde::{Deserialize, Serialize};
use std::env;
use std::str::FromStr;
use std::time::Duration;

const DEFAULT_ISSUER: &str = "http://localhost:8085/realms/jtoye-dev";
const JWKS_PATH: &str = "/protocol/openid-connect/certs";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Server configuration
    pub server: ServerConfig,

    /// Backend (core API) endpoint and deadlines
    pub backend: BackendConfig,

    /// Bearer token validation
    pub auth: AuthConfig,

    /// Admission limiter
    pub rate_limit: RateLimitConfig,

    /// Backend circuit breaker
    pub circuit_breaker: CircuitBreakerSettings,

    /// Inbound webhooks
    pub webhook: WebhookConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackendConfig {
    pub base_url: String,
    /// Upper bound applied by the HTTP client itself
    pub http_timeout: Duration,
    /// Deadline given to each forwarded batch
    pub forward_deadline: Duration,
    /// Deadline given to each health probe
    pub health_deadline: Duration,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthConfig {
    pub issuer: String,
    pub jwks_url: String,
    pub jwks_cache_ttl: Duration,
    pub jwks_fetch_timeout: Duration,
    /// Clock skew tolerated on `exp`, in seconds
    pub leeway_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitConfig {
    /// Sustained requests per second
    pub rate_per_second: u32,
    /// Burst capacity (how many requests can be made at once)
    pub capacity: u32,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            rate_per_second: 20,
            capacity: 40,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CircuitBreakerSettings {
    pub max_requests: u32,
    pub interval: Duration,
    pub timeout: Duration,
    pub min_requests: u32,
    pub failure_ratio: f64,
}

impl CircuitBreakerSettings {
    pub fn to_breaker_config(&self, name: &str) -> CircuitBreakerConfig {
        CircuitBreakerConfig {
            name: name.to_string(),
            max_requests: self.max_requests,
            interval: self.interval,
            timeout: self.timeout,
            min_requests: self.min_requests,
            failure_ratio: self.failure_ratio,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WebhookConfig {
    /// Shared secret for WhatsApp webhooks; `None` disables verification
    pub whatsapp_app_secret: Option<String>,
}

impl Config {
    /// Load configuration from the process environment (and `.env`)
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Load configuration from an arbitrary key lookup
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.is_empty());

        let issuer = get("KC_ISSUER_URI").unwrap_or_else(|| DEFAULT_ISSUER.to_string());
        let jwks_url = get("JWKS_URL")
            .unwrap_or_else(|| format!("{}{}", issuer.trim_end_matches('/'), JWKS_PATH));

        let config = Self {
            server: ServerConfig {
                host: get("SERVER_HOST").unwrap_or_else(|| "0.0.0.0".to_string()),
                port: parse_or(&get, "PORT", 8080)?,
            },
            backend: BackendConfig {
                base_url: get("CORE_API_URL")
                    .unwrap_or_else(|| "http://localhost:9090".to_string())
                    .trim_end_matches('/')
                    .to_string(),
                http_timeout: Duration::from_secs(parse_or(&get, "BACKEND_HTTP_TIMEOUT_SECS", 30)?),
                forward_deadline: Duration::from_secs(parse_or(&get, "FORWARD_DEADLINE_SECS", 30)?),
                health_deadline: Duration::from_millis(parse_or(&get, "HEALTH_DEADLINE_MS", 2000)?),
            },
            auth: AuthConfig {
                issuer,
                jwks_url,
                jwks_cache_ttl: Duration::from_secs(parse_or(&get, "JWKS_CACHE_TTL_SECS", 300)?),
                jwks_fetch_timeout: Duration::from_millis(parse_or(
                    &get,
                    "JWKS_FETCH_TIMEOUT_MS",
                    5000,
                )?),
                leeway_secs: parse_or(&get, "JWT_LEEWAY_SECS", 0)?,
            },
            rate_limit: RateLimitConfig {
                rate_per_second: parse_or(&get, "RATE_LIMIT_RPS", 20)?,
                capacity: parse_or(&get, "RATE_LIMIT_BURST", 40)?,
            },
            circuit_breaker: CircuitBreakerSettings {
                max_requests: parse_or(&get, "CB_MAX_REQUESTS", 3)?,
                interval: Duration::from_secs(parse_or(&get, "CB_INTERVAL_SECS", 10)?),
                timeout: Duration::from_secs(parse_or(&get, "CB_TIMEOUT_SECS", 60)?),
                min_requests: parse_or(&get, "CB_MIN_REQUESTS", 3)?,
                failure_ratio: parse_or(&get, "CB_FAILURE_RATIO", 0.6)?,
            },
            webhook: WebhookConfig {
                whatsapp_app_secret: get("WHATSAPP_APP_SECRET"),
            },
        };

        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.rate_limit.rate_per_second == 0 {
            bail!("RATE_LIMIT_RPS must be > 0");
        }
        if self.rate_limit.rate_per_second > MAX_RATE_PER_SECOND {
            bail!(
                "RATE_LIMIT_RPS must be <= {}, got {}",
                MAX_RATE_PER_SECOND,
                self.rate_limit.rate_per_second
            );
        }
        if self.rate_limit.capacity == 0 {
            bail!("RATE_LIMIT_BURST must be > 0");
        }
        if self.circuit_breaker.max_requests == 0 {
            bail!("CB_MAX_REQUESTS must be > 0");
        }
        let ratio = self.circuit_breaker.failure_ratio;
        if !(ratio > 0.0 && ratio <= 1.0) {
            bail!("CB_FAILURE_RATIO must be in (0, 1], got {}", ratio);
        }
        Ok(())
    }
}

fn parse_or<T, G>(get: &G, key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
    G: Fn(&str) -> Option<String>,
{
    match get(key) {
        Some(raw) => raw
            .trim()
            .parse()
            .with_context(|| format!("Invalid {}: {:?}", key, raw)),
        None => Ok(default),
    }
}
