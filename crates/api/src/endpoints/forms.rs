//! Form endpoints.

use axum::{
    Json, Router,
    extract::{Path, State},
    middleware::from_fn_with_state,
    response::Response,
    routing::{get, post},
};
use serde::Deserialize;
use serde_json::{Map, Value, json};
use tempforms_common::{AppError, AppResult};
use tempforms_core::{CreateFormInput, DeleteFormInput};

use crate::extractors::{JsonBody, Submitter};
use crate::middleware::AppState;
use crate::rate_limit::{create_form_rate_limit, submit_rate_limit};
use crate::response::created;

/// Submit response request.
#[derive(Debug, Deserialize)]
pub struct SubmitRequest {
    pub answers: Option<Map<String, Value>>,
}

/// `POST /forms`
async fn create_form(
    State(state): State<AppState>,
    JsonBody(input): JsonBody<CreateFormInput>,
) -> AppResult<Response> {
    let form = state.form_service.create(input).await?;

    Ok(created(json!({
        "success": true,
        "message": "Form created successfully",
        "form": form,
    })))
}

/// `GET /forms/{fill_link}`
async fn get_form(
    State(state): State<AppState>,
    Path(fill_link): Path<String>,
) -> AppResult<Json<Value>> {
    let form = state.form_service.get_for_filling(&fill_link).await?;
    Ok(Json(json!({ "success": true, "form": form })))
}

/// `GET /forms/{fill_link}/info`
async fn form_info(
    State(state): State<AppState>,
    Path(fill_link): Path<String>,
) -> AppResult<Json<Value>> {
    let info = state.form_service.info(&fill_link).await?;
    Ok(Json(json!({ "success": true, "info": info })))
}

/// `DELETE /forms/{fill_link}`
async fn delete_form(
    State(state): State<AppState>,
    Path(fill_link): Path<String>,
    JsonBody(input): JsonBody<DeleteFormInput>,
) -> AppResult<Json<Value>> {
    state.form_service.delete(&fill_link, input).await?;
    Ok(Json(json!({
        "success": true,
        "message": "Form and all responses have been deleted successfully.",
    })))
}

/// `POST /forms/{fill_link}/responses`
async fn submit_response(
    State(state): State<AppState>,
    Path(fill_link): Path<String>,
    Submitter(submitter): Submitter,
    JsonBody(body): JsonBody<SubmitRequest>,
) -> AppResult<Response> {
    let answers = body
        .answers
        .ok_or_else(|| AppError::Validation("Answers are required".to_string()))?;
    let receipt = state
        .response_service
        .submit(&fill_link, answers, submitter)
        .await?;

    Ok(created(json!({
        "success": true,
        "message": "Response submitted successfully",
        "response": receipt.response,
        "form": receipt.form,
    })))
}

pub fn router(state: &AppState) -> Router<AppState> {
    Router::new()
        .route(
            "/forms",
            post(create_form).layer(from_fn_with_state(state.clone(), create_form_rate_limit)),
        )
        .route("/forms/{fill_link}", get(get_form).delete(delete_form))
        .route("/forms/{fill_link}/info", get(form_info))
        .route(
            "/forms/{fill_link}/responses",
            post(submit_response).layer(from_fn_with_state(state.clone(), submit_rate_limit)),
        )
}
