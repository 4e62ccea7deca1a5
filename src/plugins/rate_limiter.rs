//! Rate limiting plugin using a token bucket per tenant.
//!
//! Buckets are keyed by the caller's `x-tenant-id` header, falling back to
//! the peer IP for anonymous callers. A background task replenishes tokens
//! and purges buckets that have been idle for several minutes. Exhausted
//! buckets answer 429 with the JSON error shape the completion API uses.
//!
//! This limiter is the in-process gate; it is distinct from quota accounting,
//! which tracks successful forwards per rolling window.

use std::{
    net::SocketAddr,
    sync::Arc,
    time::{Duration, Instant},
};

use anyhow::Result;
use dashmap::DashMap;
use http::StatusCode;
use tokio::time;

use crate::{
    middleware::Next, plugins::CloakPlugin, responder::json_response, responder::Responder,
    router::Router, types::Request,
};

/// Rate limiter configuration using token bucket parameters.
#[derive(Clone)]
pub struct Config {
    /// Maximum number of tokens that can be accumulated in a bucket.
    pub burst_size: u32,
    /// Rate at which tokens are added to a bucket per second.
    pub per_second: u32,
    /// Interval in seconds at which tokens are replenished.
    pub tick_secs: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            burst_size: 60,
            per_second: 60,
            tick_secs: 1,
        }
    }
}

/// Builder for configuring rate limiter settings.
pub struct RateLimiterBuilder(Config);

impl RateLimiterBuilder {
    /// Start with sensible defaults.
    pub fn new() -> Self {
        Self(Config::default())
    }

    /// Sets the maximum burst size for the token bucket.
    pub fn burst_size(mut self, n: u32) -> Self {
        self.0.burst_size = n;
        self
    }

    /// Sets the token replenishment rate per second.
    pub fn per_second(mut self, n: u32) -> Self {
        self.0.per_second = n;
        self
    }

    /// Sets the token replenishment interval in seconds (minimum 1).
    pub fn tick_secs(mut self, s: u64) -> Self {
        self.0.tick_secs = s.max(1);
        self
    }

    /// Builds the rate limiter plugin with the configured settings.
    pub fn build(self) -> RateLimiterPlugin {
        RateLimiterPlugin {
            cfg: self.0,
            store: Arc::new(DashMap::new()),
        }
    }
}

impl Default for RateLimiterBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Token bucket tracking request allowance for one caller.
#[derive(Clone)]
struct Bucket {
    /// Current number of tokens available for requests.
    tokens: f64,
    /// Last time this bucket was accessed, for cleanup.
    last_seen: Instant,
}

/// Rate limiting plugin with per-tenant token buckets.
#[derive(Clone)]
pub struct RateLimiterPlugin {
    cfg: Config,
    store: Arc<DashMap<String, Bucket>>,
}

impl CloakPlugin for RateLimiterPlugin {
    fn name(&self) -> &'static str {
        "RateLimiterPlugin"
    }

    /// Registers the limiting middleware and starts the replenisher task.
    fn setup(&self, router: &Router) -> Result<()> {
        let cfg = self.cfg.clone();
        let store = self.store.clone();

        router.middleware(move |req, next| {
            let cfg = cfg.clone();
            let store = store.clone();
            async move { retain(req, next, cfg, store).await }
        });

        let cfg = self.cfg.clone();
        let store = self.store.clone();

        tokio::spawn(async move {
            let mut tick = time::interval(Duration::from_secs(cfg.tick_secs));
            let add_per_tick = cfg.per_second as f64 * cfg.tick_secs as f64;
            let purge_after = Duration::from_secs(300);
            loop {
                tick.tick().await;
                let now = Instant::now();
                store.retain(|_, b| {
                    b.tokens = (b.tokens + add_per_tick).min(cfg.burst_size as f64);
                    now.duration_since(b.last_seen) < purge_after
                });
            }
        });

        Ok(())
    }
}

/// Identifies the bucket a request draws from.
fn bucket_key(req: &Request) -> String {
    if let Some(tenant) = req
        .headers()
        .get("x-tenant-id")
        .and_then(|v| v.to_str().ok())
        && !tenant.is_empty()
    {
        return tenant.to_string();
    }

    req.extensions()
        .get::<SocketAddr>()
        .map(|sa| sa.ip().to_string())
        .unwrap_or_else(|| "unknown".to_string())
}

/// Middleware function that enforces the token bucket.
async fn retain(
    req: Request,
    next: Next,
    cfg: Config,
    store: Arc<DashMap<String, Bucket>>,
) -> impl Responder {
    let key = bucket_key(&req);

    let mut entry = store.entry(key).or_insert_with(|| Bucket {
        tokens: cfg.burst_size as f64,
        last_seen: Instant::now(),
    });

    if entry.tokens < 1.0 {
        drop(entry);
        return json_response(
            StatusCode::TOO_MANY_REQUESTS,
            &serde_json::json!({
                "error": {
                    "message": "rate limit exceeded, retry later",
                    "type": "rate_limit_error",
                    "code": "rate_limited",
                }
            }),
        );
    }
    entry.tokens -= 1.0;
    entry.last_seen = Instant::now();
    drop(entry);

    next.run(req).await
}
