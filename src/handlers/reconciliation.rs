use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::Json,
};
use serde::Deserialize;

use crate::error::ApiError;
use crate::middleware::UserContext;
use crate::models::ids::parse_uuid;
use crate::services::reconciliation;
use crate::AppState;

fn bad_request(msg: String) -> ApiError {
    (
        StatusCode::BAD_REQUEST,
        Json(serde_json::json!({"error": msg})),
    )
}

/// Suggested matches awaiting confirmation plus recently auto-matched
/// transactions.
pub async fn get_review(
    State(state): State<AppState>,
    ctx: UserContext,
) -> Result<Json<reconciliation::ReviewList>, ApiError> {
    let review = reconciliation::list_review(
        &state.db_pool,
        ctx.user_id,
        state.config.matching.suggest_threshold,
    )
    .await
    .map_err(|e| e.into_api_error())?;
    Ok(Json(review))
}

#[derive(Deserialize)]
pub struct ConfirmMatchRequest {
    pub invoice_id: String,
}

pub async fn confirm_match(
    Path(transaction_id): Path<String>,
    State(state): State<AppState>,
    ctx: UserContext,
    Json(payload): Json<ConfirmMatchRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let transaction_id = parse_uuid(&transaction_id, "transaction_id").map_err(bad_request)?;
    let invoice_id = parse_uuid(&payload.invoice_id, "invoice_id").map_err(bad_request)?;

    reconciliation::confirm_match(&state.db_pool, transaction_id, invoice_id, ctx.user_id)
        .await
        .map_err(|e| e.into_api_error())?;

    Ok(Json(serde_json::json!({
        "id": transaction_id.to_string(),
        "message": "Match confirmed"
    })))
}

pub async fn ignore_transaction(
    Path(transaction_id): Path<String>,
    State(state): State<AppState>,
    ctx: UserContext,
) -> Result<Json<serde_json::Value>, ApiError> {
    let transaction_id = parse_uuid(&transaction_id, "transaction_id").map_err(bad_request)?;

    reconciliation::ignore_transaction(&state.db_pool, transaction_id, ctx.user_id)
        .await
        .map_err(|e| e.into_api_error())?;

    Ok(Json(serde_json::json!({
        "id": transaction_id.to_string(),
        "message": "Transaction ignored"
    })))
}
