//! Caller identity middleware.
//!
//! Authentication itself happens upstream; the gateway forwards the
//! authenticated user's id in the `X-User-Id` header. This middleware
//! validates the header against the users table and attaches a `UserContext`
//! extension. The aggregator callback webhook is exempt; it authenticates
//! with the shared callback secret instead.

use axum::{
    async_trait,
    extract::{FromRequestParts, Request, State},
    http::StatusCode,
    middleware::Next,
    response::Response,
};
use uuid::Uuid;

use crate::AppState;

#[derive(Clone, Debug)]
pub struct UserContext {
    pub user_id: Uuid,
}

pub async fn user_context_middleware(
    State(state): State<AppState>,
    mut req: Request,
    next: Next,
) -> Result<Response, StatusCode> {
    let path = req.uri().path();
    if path == "/health" || path == "/api/bank/callback" {
        return Ok(next.run(req).await);
    }

    let user_id_str = req
        .headers()
        .get("X-User-Id")
        .and_then(|h| h.to_str().ok())
        .ok_or_else(|| {
            tracing::warn!("Request without X-User-Id header");
            StatusCode::UNAUTHORIZED
        })?;

    let user_id = Uuid::parse_str(user_id_str).map_err(|_| {
        tracing::warn!("Invalid X-User-Id header: {}", user_id_str);
        StatusCode::UNAUTHORIZED
    })?;

    let user_exists = sqlx::query_scalar::<_, bool>(
        "SELECT EXISTS(SELECT 1 FROM users WHERE id = $1)",
    )
    .bind(user_id)
    .fetch_one(&*state.db_pool)
    .await
    .map_err(|e| {
        tracing::error!("Error checking user: {:?}", e);
        StatusCode::INTERNAL_SERVER_ERROR
    })?;

    if !user_exists {
        return Err(StatusCode::UNAUTHORIZED);
    }

    req.extensions_mut().insert(UserContext { user_id });
    Ok(next.run(req).await)
}

#[async_trait]
impl<S> FromRequestParts<S> for UserContext
where
    S: Send + Sync,
{
    type Rejection = StatusCode;

    async fn from_request_parts(
        parts: &mut axum::http::request::Parts,
        _state: &S,
    ) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<UserContext>()
            .cloned()
            .ok_or(StatusCode::UNAUTHORIZED)
    }
}
