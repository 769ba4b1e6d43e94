//! HTTP API layer for tempforms.
//!
//! - **Endpoints**: form creation, filling, response viewing and export
//! - **Extractors**: client address, JSON bodies with uniform rejections
//! - **Rate limiting**: fixed-window, per-IP, per route group
//!
//! Built on Axum 0.8 with Tower middleware stack.

pub mod endpoints;
pub mod extractors;
pub mod middleware;
pub mod rate_limit;
pub mod response;

pub use endpoints::{health_router, router};
pub use middleware::AppState;
pub use rate_limit::{ApiRateLimiter, RateLimitConfig, global_rate_limit, limits};
