use actix_web::{middleware::Logger, web, App, HttpServer};
use anyhow::{Context, Result};
use resilience::CircuitBreaker;
use std::sync::Arc;
use tracing::{error, info, warn};
use tracing_subscriber::prelude::*;

use edge_gateway::clients::BackendClient;
use edge_gateway::config::Config;
use edge_gateway::handlers::{self, AppState};
use edge_gateway::jwks::{HttpJwksSource, KeyStore};
use edge_gateway::middleware::{RateLimitMiddleware, TokenBucket, TokenValidator};
use edge_gateway::webhook::WebhookVerifier;

#[actix_web::main]
async fn main() -> Result<()> {
    // Container healthcheck: `edge-gateway health-check`
    if std::env::args().nth(1).as_deref() == Some("health-check") {
        return run_health_check().await;
    }

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,edge_gateway=debug".into()),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .json()
                .with_current_span(true)
                .with_span_list(true)
                .with_thread_ids(true)
                .with_thread_names(true)
                .with_line_number(true)
                .with_file(true)
                .with_target(true),
        )
        .init();

    info!("Starting Edge Gateway...");

    let config = Config::from_env().context("Failed to load configuration")?;

    let bucket = Arc::new(TokenBucket::start(&config.rate_limit));
    info!(
        rate_per_second = config.rate_limit.rate_per_second,
        burst = config.rate_limit.capacity,
        "Rate limiting enabled"
    );

    let source = HttpJwksSource::new(&config.auth.jwks_url, config.auth.jwks_fetch_timeout)
        .context("Failed to build JWKS client")?;
    let key_store = Arc::new(KeyStore::new(
        Arc::new(source),
        config.auth.jwks_cache_ttl,
        config.auth.jwks_fetch_timeout,
    ));
    let validator = Arc::new(TokenValidator::new(
        key_store.clone(),
        config.auth.issuer.clone(),
        config.auth.leeway_secs,
    ));

    // Warm the key cache; failure here is not fatal, lookups refresh on demand
    let warmup_deadline = tokio::time::Instant::now() + config.auth.jwks_fetch_timeout;
    match key_store.refresh(warmup_deadline).await {
        Ok(count) => info!(key_count = count, jwks_url = %config.auth.jwks_url, "JWKS loaded"),
        Err(e) => warn!(error = %e, jwks_url = %config.auth.jwks_url, "Initial JWKS fetch failed"),
    }

    let breaker = CircuitBreaker::new(config.circuit_breaker.to_breaker_config("core-api"));
    let mut transitions = breaker.subscribe();
    actix_web::rt::spawn(async move {
        while let Ok(change) = transitions.recv().await {
            info!(
                breaker = %change.name,
                from = %change.from,
                to = %change.to,
                "Circuit breaker state changed"
            );
        }
    });

    let backend = BackendClient::new(
        config.backend.base_url.clone(),
        config.backend.http_timeout,
        breaker,
    )
    .context("Failed to build core API client")?;

    let state = web::Data::new(AppState {
        backend,
        whatsapp: WebhookVerifier::new(config.webhook.whatsapp_app_secret.as_deref()),
        forward_deadline: config.backend.forward_deadline,
        health_deadline: config.backend.health_deadline,
    });
    if !state.whatsapp.is_enabled() {
        warn!("WHATSAPP_APP_SECRET not set, webhook signatures will not be verified");
    }

    let bind_addr = format!("{}:{}", config.server.host, config.server.port);
    info!(
        bind_addr = %bind_addr,
        core_api = %config.backend.base_url,
        issuer = %config.auth.issuer,
        "Edge Gateway starting"
    );

    let key_deadline = config.auth.jwks_fetch_timeout;
    let server_bucket = bucket.clone();
    let result = HttpServer::new(move || {
        let validator = validator.clone();
        App::new()
            .wrap(RateLimitMiddleware::new(server_bucket.clone()))
            .wrap(Logger::default())
            .app_data(state.clone())
            .configure(|cfg| handlers::configure(cfg, validator, key_deadline))
    })
    .bind(&bind_addr)
    .with_context(|| format!("Failed to bind {}", bind_addr))?
    .run()
    .await;

    bucket.shutdown();

    if let Err(e) = &result {
        error!(error = %e, "Server exited with error");
    }
    info!("Edge Gateway stopped");
    result.context("HTTP server failed")
}

async fn run_health_check() -> Result<()> {
    let port = std::env::var("PORT")
        .ok()
        .filter(|p| !p.is_empty())
        .unwrap_or_else(|| "8080".to_string());
    let url = format!("http://localhost:{}/health", port);

    let response = reqwest::Client::new()
        .get(&url)
        .send()
        .await
        .with_context(|| format!("healthcheck request to {} failed", url))?;

    if !response.status().is_success() {
        anyhow::bail!("healthcheck HTTP status: {}", response.status());
    }
    Ok(())
}
