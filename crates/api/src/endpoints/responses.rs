//! Response viewing and cleanup endpoints.

use axum::{
    Json, Router,
    extract::{Path, Query, State},
    middleware::from_fn_with_state,
    routing::{get, post},
};
use serde::Deserialize;
use serde_json::{Value, json};
use tempforms_common::{AppError, AppResult};
use tempforms_core::ExportFormat;

use crate::extractors::JsonBody;
use crate::middleware::AppState;
use crate::rate_limit::view_rate_limit;
use crate::response::Attachment;

#[derive(Debug, Default, Deserialize)]
pub struct PasswordQuery {
    pub password: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct ExportQuery {
    pub format: Option<String>,
    pub password: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct VerifyPasswordRequest {
    pub password: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeleteResponsesRequest {
    pub response_ids: Option<Vec<String>>,
    pub password: Option<String>,
}

/// `GET /responses/{response_link}?password=`
async fn view_responses(
    State(state): State<AppState>,
    Path(response_link): Path<String>,
    Query(query): Query<PasswordQuery>,
) -> AppResult<Json<Value>> {
    let view = state
        .response_service
        .view(&response_link, query.password.as_deref())
        .await?;

    Ok(Json(json!({
        "success": true,
        "form": view.form,
        "responses": view.responses,
        "statistics": view.statistics,
    })))
}

/// `DELETE /responses/{response_link}`
async fn delete_responses(
    State(state): State<AppState>,
    Path(response_link): Path<String>,
    JsonBody(body): JsonBody<DeleteResponsesRequest>,
) -> AppResult<Json<Value>> {
    let ids = body.response_ids.unwrap_or_default();
    let deleted = state
        .response_service
        .delete_selected(&response_link, &ids, body.password.as_deref())
        .await?;

    Ok(Json(json!({
        "success": true,
        "message": format!("{deleted} response(s) deleted successfully"),
        "deletedCount": deleted,
    })))
}

/// `POST /responses/{response_link}/verify-password`
async fn verify_password(
    State(state): State<AppState>,
    Path(response_link): Path<String>,
    JsonBody(body): JsonBody<VerifyPasswordRequest>,
) -> AppResult<Json<Value>> {
    let password = body
        .password
        .filter(|p| !p.is_empty())
        .ok_or_else(|| AppError::Validation("Password is required".to_string()))?;
    let valid = state
        .response_service
        .verify_password(&response_link, &password)
        .await?;

    Ok(Json(json!({
        "success": true,
        "passwordValid": valid,
        "message": if valid { "Password is correct" } else { "Password is incorrect" },
    })))
}

/// `GET /responses/{response_link}/export?format=csv|json&password=`
async fn export_responses(
    State(state): State<AppState>,
    Path(response_link): Path<String>,
    Query(query): Query<ExportQuery>,
) -> AppResult<Attachment> {
    let format = ExportFormat::parse(query.format.as_deref());
    let file = state
        .response_service
        .export(&response_link, query.password.as_deref(), format)
        .await?;
    Ok(Attachment(file))
}

pub fn router(state: &AppState) -> Router<AppState> {
    let limited = || from_fn_with_state(state.clone(), view_rate_limit);

    Router::new()
        .route(
            "/responses/{response_link}",
            get(view_responses)
                .delete(delete_responses)
                .layer(limited()),
        )
        .route(
            "/responses/{response_link}/verify-password",
            post(verify_password).layer(limited()),
        )
        .route(
            "/responses/{response_link}/export",
            get(export_responses).layer(limited()),
        )
}
