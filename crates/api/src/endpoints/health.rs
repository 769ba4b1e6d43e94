//! Health check endpoint.

use axum::{Json, Router, extract::State, routing::get};
use serde_json::{Value, json};

use crate::middleware::AppState;

async fn health(State(state): State<AppState>) -> Json<Value> {
    let reclamation = match &state.scheduler {
        Some(scheduler) => Some(scheduler.state().await),
        None => None,
    };

    Json(json!({
        "status": "healthy",
        "timestamp": state.clock.now(),
        "uptime": state.started_at.elapsed().as_secs(),
        "storage": {
            "backend": state.store.backend_name(),
            "nativeExpiry": state.store.has_native_expiry(),
        },
        "reclamation": reclamation,
    }))
}

/// `GET /health`.
pub fn router() -> Router<AppState> {
    Router::new().route("/health", get(health))
}
