//! Rate limiting middleware for the Edge Gateway
//!
//! A single process-wide token bucket gates every request before any other
//! work is done.
//!
//! **Design:**
//! - The bucket starts full (`available = capacity`)
//! - `try_acquire` is lock-free and never waits: it takes a token or rejects
//! - A background task adds one token every `1 / rate_per_second` seconds,
//!   never raising `available` above `capacity`
//! - The refill task is owned by the bucket and stops on `shutdown` or drop
//! - Limiting is local to this process; there is no cross-instance coordination

use actix_web::{
    dev::{forward_ready, Service, ServiceRequest, ServiceResponse, Transform},
    Error,
};
use futures_util::future::LocalBoxFuture;
use parking_lot::Mutex;
use std::future::{ready, Ready};
use std::net::IpAddr;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, warn};

use crate::config::RateLimitConfig;
use crate::error::GatewayError;

const NANOS_PER_SECOND: u64 = 1_000_000_000;

/// Highest rate the refill task can honour with one token per tick
pub const MAX_RATE_PER_SECOND: u32 = NANOS_PER_SECOND as u32;

/// Result of a single admission attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    Admitted,
    Rejected,
}

struct BucketState {
    capacity: u32,
    available: AtomicU32,
}

impl BucketState {
    fn try_take(&self) -> Admission {
        match self
            .available
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1))
        {
            Ok(_) => Admission::Admitted,
            Err(_) => Admission::Rejected,
        }
    }

    fn refill_one(&self) {
        let capacity = self.capacity;
        let _ = self
            .available
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| {
                (n < capacity).then_some(n + 1)
            });
    }
}

/// Process-wide token bucket with a background refill task
pub struct TokenBucket {
    state: Arc<BucketState>,
    refill_interval: Duration,
    refill_task: Mutex<Option<JoinHandle<()>>>,
}

impl TokenBucket {
    /// Create a full bucket and spawn its refill task.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn start(config: &RateLimitConfig) -> Self {
        let bucket = Self::without_refill(config);
        let state = bucket.state.clone();
        let period = bucket.refill_interval;

        let handle = tokio::spawn(async move {
            let mut ticker = interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;
                state.refill_one();
            }
        });
        *bucket.refill_task.lock() = Some(handle);

        debug!(
            capacity = config.capacity,
            rate_per_second = config.rate_per_second,
            refill_interval_nanos = period.as_nanos() as u64,
            "Token bucket started"
        );
        bucket
    }

    /// Create a full bucket whose refill is driven manually via `refill_tick`
    pub fn without_refill(config: &RateLimitConfig) -> Self {
        let rate = u64::from(config.rate_per_second.max(1));
        Self {
            state: Arc::new(BucketState {
                capacity: config.capacity,
                available: AtomicU32::new(config.capacity),
            }),
            refill_interval: Duration::from_nanos((NANOS_PER_SECOND / rate).max(1)),
            refill_task: Mutex::new(None),
        }
    }

    /// Take one token if available. Never blocks.
    pub fn try_acquire(&self) -> Admission {
        self.state.try_take()
    }

    /// Add one token unless the bucket is full
    pub fn refill_tick(&self) {
        self.state.refill_one();
    }

    pub fn available(&self) -> u32 {
        self.state.available.load(Ordering::Acquire)
    }

    pub fn capacity(&self) -> u32 {
        self.state.capacity
    }

    pub fn refill_interval(&self) -> Duration {
        self.refill_interval
    }

    /// Stop the refill task. Tokens already in the bucket stay usable.
    pub fn shutdown(&self) {
        if let Some(handle) = self.refill_task.lock().take() {
            handle.abort();
            debug!("Token bucket refill task stopped");
        }
    }
}

impl Drop for TokenBucket {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Rate limit middleware factory
#[derive(Clone)]
pub struct RateLimitMiddleware {
    bucket: Arc<TokenBucket>,
}

impl RateLimitMiddleware {
    pub fn new(bucket: Arc<TokenBucket>) -> Self {
        Self { bucket }
    }
}

impl<S, B> Transform<S, ServiceRequest> for RateLimitMiddleware
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<B>;
    type Error = Error;
    type InitError = ();
    type Transform = RateLimitMiddlewareService<S>;
    type Future = Ready<Result<Self::Transform, Self::InitError>>;

    fn new_transform(&self, service: S) -> Self::Future {
        ready(Ok(RateLimitMiddlewareService {
            service,
            bucket: self.bucket.clone(),
        }))
    }
}

pub struct RateLimitMiddlewareService<S> {
    service: S,
    bucket: Arc<TokenBucket>,
}

impl<S, B> Service<ServiceRequest> for RateLimitMiddlewareService<S>
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
        if self.bucket.try_acquire() == Admission::Rejected {
            warn!(client_ip = %extract_client_ip(&req), path = req.path(), "Rate limit exceeded");
            return Box::pin(async move { Err(GatewayError::AdmissionRejected.into()) });
        }

        let fut = self.service.call(req);
        Box::pin(async move { fut.await })
    }
}

/// Extract client IP from request, respecting X-Forwarded-For header
fn extract_client_ip(req: &ServiceRequest) -> IpAddr {
    if let Some(x_forwarded_for) = req.headers().get("X-Forwarded-For") {
        if let Ok(header_value) = x_forwarded_for.to_str() {
            // X-Forwarded-For can contain multiple IPs; take the first one
            if let Some(first_ip) = header_value.split(',').next() {
                if let Ok(ip) = first_ip.trim().parse::<IpAddr>() {
                    return ip;
                }
            }
        }
    }

    req.peer_addr()
        .map(|addr| addr.ip())
        .unwrap_or(IpAddr::from([127, 0, 0, 1]))
}
