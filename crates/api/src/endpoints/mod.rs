//! API endpoints.

mod forms;
mod health;
mod responses;

use axum::Router;
use tempforms_common::AppError;

use crate::middleware::AppState;

pub use health::router as health_router;

async fn route_not_found() -> AppError {
    AppError::NotFound("Route".to_string())
}

/// Create the API router.
///
/// Per-group rate limits are attached here; the global limit is applied by
/// the caller around the whole API.
pub fn router(state: &AppState) -> Router<AppState> {
    Router::new()
        .merge(forms::router(state))
        .merge(responses::router(state))
        .fallback(route_not_found)
}
