//! API rate limiting middleware.
//!
//! Fixed-window, per-IP limits, kept in memory. Each route group has its own
//! budget on top of the global one.

#![allow(missing_docs)]

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::{
    body::Body,
    extract::{ConnectInfo, State},
    http::{HeaderValue, Request},
    middleware::Next,
    response::{IntoResponse, Response},
};
use tempforms_common::AppError;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;

use crate::extractors::client_ip;
use crate::middleware::AppState;

/// Rate limit configuration for one route group.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitConfig {
    /// Key namespace, so groups do not share counters.
    pub name: &'static str,
    /// Maximum requests per window.
    pub max_requests: u32,
    /// Time window duration in seconds.
    pub window_secs: u64,
}

impl RateLimitConfig {
    /// Create a new rate limit config.
    pub const fn new(name: &'static str, max_requests: u32, window_secs: u64) -> Self {
        Self {
            name,
            max_requests,
            window_secs,
        }
    }
}

/// Limits per route group.
pub mod limits {
    use super::RateLimitConfig;

    /// Every API request.
    pub const GLOBAL: RateLimitConfig = RateLimitConfig::new("global", 100, 15 * 60);

    /// Form creation.
    pub const CREATE_FORM: RateLimitConfig = RateLimitConfig::new("create", 10, 60 * 60);

    /// Response submission.
    pub const SUBMIT: RateLimitConfig = RateLimitConfig::new("submit", 20, 5 * 60);

    /// Response viewing and export.
    pub const VIEW: RateLimitConfig = RateLimitConfig::new("view", 50, 10 * 60);

    /// Longest window in use; stale entries older than twice this are purged.
    pub const LONGEST_WINDOW_SECS: u64 = 60 * 60;
}

#[derive(Debug, Clone)]
struct WindowState {
    count: u32,
    window_start: Instant,
}

impl WindowState {
    fn new() -> Self {
        Self {
            count: 0,
            window_start: Instant::now(),
        }
    }
}

/// In-memory fixed-window limiter.
#[derive(Clone, Default)]
pub struct ApiRateLimiter {
    states: Arc<RwLock<HashMap<String, WindowState>>>,
}

impl ApiRateLimiter {
    /// Create a new rate limiter.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Check if a request is allowed and record it.
    pub async fn check(&self, key: &str, config: &RateLimitConfig) -> RateLimitResult {
        let mut states = self.states.write().await;
        let now = Instant::now();
        let window = Duration::from_secs(config.window_secs);

        let state = states
            .entry(format!("{}:{key}", config.name))
            .or_insert_with(WindowState::new);

        if now.duration_since(state.window_start) >= window {
            state.count = 0;
            state.window_start = now;
        }

        let reset = window
            .saturating_sub(now.duration_since(state.window_start))
            .as_secs();

        if state.count >= config.max_requests {
            return RateLimitResult::Limited {
                retry_after: reset.max(1),
                limit: config.max_requests,
            };
        }

        state.count += 1;
        RateLimitResult::Allowed {
            remaining: config.max_requests.saturating_sub(state.count),
            limit: config.max_requests,
            reset,
        }
    }

    /// Drop windows that ended long ago.
    pub async fn cleanup(&self, max_window_secs: u64) {
        let mut states = self.states.write().await;
        let now = Instant::now();
        let max_window = Duration::from_secs(max_window_secs * 2);

        let before = states.len();
        states.retain(|_, state| now.duration_since(state.window_start) < max_window);
        let purged = before - states.len();
        if purged > 0 {
            tracing::debug!(purged, "Purged stale rate limit windows");
        }
    }

    /// Get the number of tracked keys.
    pub async fn key_count(&self) -> usize {
        self.states.read().await.len()
    }

    /// Purge stale windows every `every` in the background.
    #[must_use]
    pub fn spawn_cleanup(&self, every: Duration) -> JoinHandle<()> {
        let limiter = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            loop {
                ticker.tick().await;
                limiter.cleanup(limits::LONGEST_WINDOW_SECS).await;
            }
        })
    }
}

/// Rate limit check result.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RateLimitResult {
    Allowed {
        remaining: u32,
        limit: u32,
        /// Seconds until window reset.
        reset: u64,
    },
    Limited {
        /// Seconds until the window resets.
        retry_after: u64,
        limit: u32,
    },
}

/// Rate limit error response.
#[derive(Debug)]
pub struct RateLimitError {
    pub retry_after: u64,
    pub limit: u32,
}

impl IntoResponse for RateLimitError {
    fn into_response(self) -> Response {
        let mut response = AppError::RateLimited {
            retry_after: self.retry_after,
        }
        .into_response();
        let headers = response.headers_mut();
        headers.insert("Retry-After", HeaderValue::from(self.retry_after));
        headers.insert("X-RateLimit-Limit", HeaderValue::from(self.limit));
        headers.insert("X-RateLimit-Remaining", HeaderValue::from(0u32));
        headers.insert("X-RateLimit-Reset", HeaderValue::from(self.retry_after));
        response
    }
}

/// Global limit, applied to every API route.
pub async fn global_rate_limit(
    State(state): State<AppState>,
    req: Request<Body>,
    next: Next,
) -> Result<Response, RateLimitError> {
    rate_limit_with_config(state, req, next, &limits::GLOBAL).await
}

/// Limit for form creation.
pub async fn create_form_rate_limit(
    State(state): State<AppState>,
    req: Request<Body>,
    next: Next,
) -> Result<Response, RateLimitError> {
    rate_limit_with_config(state, req, next, &limits::CREATE_FORM).await
}

/// Limit for response submission.
pub async fn submit_rate_limit(
    State(state): State<AppState>,
    req: Request<Body>,
    next: Next,
) -> Result<Response, RateLimitError> {
    rate_limit_with_config(state, req, next, &limits::SUBMIT).await
}

/// Limit for viewing and exporting responses.
pub async fn view_rate_limit(
    State(state): State<AppState>,
    req: Request<Body>,
    next: Next,
) -> Result<Response, RateLimitError> {
    rate_limit_with_config(state, req, next, &limits::VIEW).await
}

async fn rate_limit_with_config(
    state: AppState,
    req: Request<Body>,
    next: Next,
    config: &RateLimitConfig,
) -> Result<Response, RateLimitError> {
    if !state.rate_limit_enabled {
        return Ok(next.run(req).await);
    }

    let socket = req
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| *addr);
    let key = client_ip(req.headers(), socket, state.trust_proxy_headers)
        .map_or_else(|| "unknown".to_string(), |ip| ip.to_string());

    match state.rate_limiter.check(&key, config).await {
        RateLimitResult::Allowed {
            remaining,
            limit,
            reset,
        } => {
            let mut response = next.run(req).await;

            let headers = response.headers_mut();
            headers.insert("X-RateLimit-Limit", limit.into());
            headers.insert("X-RateLimit-Remaining", remaining.into());
            headers.insert("X-RateLimit-Reset", reset.into());

            Ok(response)
        }
        RateLimitResult::Limited { retry_after, limit } => {
            tracing::debug!(client = %key, group = config.name, "Rate limited");
            Err(RateLimitError { retry_after, limit })
        }
    }
}
