use axum::{
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    response::Json,
};
use serde::Serialize;

use crate::error::ApiError;
use crate::middleware::UserContext;
use crate::models::ids::parse_uuid;
use crate::services::aggregator::CallbackNotification;
use crate::services::{connections, importer};
use crate::AppState;

fn bad_request(msg: String) -> ApiError {
    (
        StatusCode::BAD_REQUEST,
        Json(serde_json::json!({"error": msg})),
    )
}

pub async fn get_connections(
    State(state): State<AppState>,
    ctx: UserContext,
) -> Result<Json<Vec<connections::ConnectionSummary>>, ApiError> {
    let list = connections::list_connections(&state.db_pool, ctx.user_id)
        .await
        .map_err(|e| e.into_api_error())?;
    Ok(Json(list))
}

#[derive(Serialize)]
pub struct ConnectSessionResponse {
    pub url: String,
    pub expires_at: chrono::DateTime<chrono::Utc>,
}

pub async fn create_connect_session(
    State(state): State<AppState>,
    ctx: UserContext,
) -> Result<(StatusCode, Json<ConnectSessionResponse>), ApiError> {
    let session =
        connections::create_connect_session(&state.db_pool, &*state.aggregator, ctx.user_id)
            .await
            .map_err(|e| e.into_api_error())?;
    Ok((
        StatusCode::CREATED,
        Json(ConnectSessionResponse {
            url: session.url,
            expires_at: session.expires_at,
        }),
    ))
}

pub async fn delete_connection(
    Path(connection_id): Path<String>,
    State(state): State<AppState>,
    ctx: UserContext,
) -> Result<Json<serde_json::Value>, ApiError> {
    let connection_id = parse_uuid(&connection_id, "connection_id").map_err(bad_request)?;

    connections::delete_connection(&state.db_pool, &*state.aggregator, ctx.user_id, connection_id)
        .await
        .map_err(|e| e.into_api_error())?;

    Ok(Json(serde_json::json!({
        "id": connection_id.to_string(),
        "message": "Connection deleted"
    })))
}

/// Manual sync trigger for one connection. Unlike the periodic pass, a
/// failure here surfaces to the caller, though the connection is still
/// marked errored.
pub async fn sync_connection(
    Path(connection_id): Path<String>,
    State(state): State<AppState>,
    ctx: UserContext,
) -> Result<Json<importer::SyncSummary>, ApiError> {
    let connection_id = parse_uuid(&connection_id, "connection_id").map_err(bad_request)?;

    let connection = connections::owned_connection(&state.db_pool, connection_id, ctx.user_id)
        .await
        .map_err(|e| e.into_api_error())?;

    match importer::sync_connection(
        &state.db_pool,
        &*state.aggregator,
        &state.config,
        &connection,
    )
    .await
    {
        Ok(summary) => Ok(Json(summary)),
        Err(e) => {
            if let Err(db_err) = sqlx::query("UPDATE connections SET status = 'error' WHERE id = $1")
                .bind(connection_id)
                .execute(&*state.db_pool)
                .await
            {
                tracing::error!("Error marking connection errored: {:?}", db_err);
            }
            Err(e.into_api_error())
        }
    }
}

/// Aggregator webhook. Authenticated with the shared callback secret rather
/// than a user context.
pub async fn aggregator_callback(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(notification): Json<CallbackNotification>,
) -> Result<StatusCode, ApiError> {
    let secret = headers
        .get("X-Callback-Secret")
        .and_then(|h| h.to_str().ok())
        .unwrap_or_default();
    if state.config.aggregator_callback_secret.is_empty()
        || secret != state.config.aggregator_callback_secret
    {
        tracing::warn!("Callback with missing or invalid secret");
        return Err((
            StatusCode::UNAUTHORIZED,
            Json(serde_json::json!({"error": "Invalid callback secret"})),
        ));
    }

    connections::handle_callback(
        &state.db_pool,
        &*state.aggregator,
        &state.config,
        &notification,
    )
    .await
    .map_err(|e| e.into_api_error())?;

    Ok(StatusCode::OK)
}
