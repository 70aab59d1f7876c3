use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::Json,
};
use serde::{Deserialize, Serialize};

use crate::error::ApiError;
use crate::middleware::UserContext;
use crate::models::ids::parse_uuid;
use crate::models::Payment;
use crate::services::payments;
use crate::AppState;

fn bad_request(msg: String) -> ApiError {
    (
        StatusCode::BAD_REQUEST,
        Json(serde_json::json!({"error": msg})),
    )
}

#[derive(Deserialize)]
pub struct RecordPaymentRequest {
    /// Minor units.
    pub amount: i64,
    pub method: String,
    pub note: Option<String>,
    /// RFC 3339; defaults to now.
    pub paid_at: Option<chrono::DateTime<chrono::Utc>>,
}

#[derive(Serialize)]
pub struct RecordPaymentResponse {
    pub id: String,
    pub invoice_id: String,
    pub amount: i64,
}

pub async fn record_payment(
    Path(invoice_id): Path<String>,
    State(state): State<AppState>,
    ctx: UserContext,
    Json(payload): Json<RecordPaymentRequest>,
) -> Result<(StatusCode, Json<RecordPaymentResponse>), ApiError> {
    let invoice_id = parse_uuid(&invoice_id, "invoice_id").map_err(bad_request)?;

    let payment = payments::record_payment(
        &state.db_pool,
        invoice_id,
        ctx.user_id,
        payload.amount,
        &payload.method,
        payload.note.as_deref(),
        payload.paid_at,
    )
    .await
    .map_err(|e| e.into_api_error())?;

    Ok((
        StatusCode::CREATED,
        Json(RecordPaymentResponse {
            id: payment.id.to_string(),
            invoice_id: invoice_id.to_string(),
            amount: payment.amount,
        }),
    ))
}

pub async fn get_payments(
    Path(invoice_id): Path<String>,
    State(state): State<AppState>,
    ctx: UserContext,
) -> Result<Json<Vec<Payment>>, ApiError> {
    let invoice_id = parse_uuid(&invoice_id, "invoice_id").map_err(bad_request)?;

    let list = payments::list_payments(&state.db_pool, invoice_id, ctx.user_id)
        .await
        .map_err(|e| e.into_api_error())?;
    Ok(Json(list))
}

pub async fn delete_payment(
    Path(payment_id): Path<String>,
    State(state): State<AppState>,
    ctx: UserContext,
) -> Result<Json<serde_json::Value>, ApiError> {
    let payment_id = parse_uuid(&payment_id, "payment_id").map_err(bad_request)?;

    payments::delete_payment(&state.db_pool, payment_id, ctx.user_id)
        .await
        .map_err(|e| e.into_api_error())?;

    Ok(Json(serde_json::json!({
        "id": payment_id.to_string(),
        "message": "Payment deleted"
    })))
}
