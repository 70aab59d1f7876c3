//! Service-layer error taxonomy.
//!
//! Expected business conditions come back as `NotFound` or `Rejected` and the
//! HTTP layer maps them to 404/422; they are never raised as panics. Database
//! and provider failures propagate as 5xx. The matcher's compensating
//! rollback re-raises the original recording error after reverting, so the
//! importer knows ingestion of that transaction did not fully succeed.

use axum::{http::StatusCode, response::Json};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ServiceError {
    /// Entity missing or not owned by the caller. Deliberately the same
    /// variant for both so ownership probes cannot distinguish them.
    #[error("not found")]
    NotFound,

    /// Business-rule rejection (overpayment, DRAFT invoice, reversing a
    /// fully-paid invoice, wrong transaction state, ...).
    #[error("{0}")]
    Rejected(String),

    /// Bank-data aggregator call failed.
    #[error("aggregator error: {0}")]
    Provider(String),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

impl ServiceError {
    pub fn rejected(msg: impl Into<String>) -> Self {
        ServiceError::Rejected(msg.into())
    }
}

impl From<reqwest::Error> for ServiceError {
    fn from(e: reqwest::Error) -> Self {
        ServiceError::Provider(e.to_string())
    }
}

pub type ServiceResult<T> = Result<T, ServiceError>;

/// Handler-facing error tuple, matching the response shape used everywhere
/// in this API.
pub type ApiError = (StatusCode, Json<serde_json::Value>);

impl ServiceError {
    pub fn into_api_error(self) -> ApiError {
        match self {
            ServiceError::NotFound => (
                StatusCode::NOT_FOUND,
                Json(serde_json::json!({"error": "Not found"})),
            ),
            ServiceError::Rejected(msg) => (
                StatusCode::UNPROCESSABLE_ENTITY,
                Json(serde_json::json!({"error": msg})),
            ),
            ServiceError::Provider(msg) => {
                tracing::error!("Aggregator error: {}", msg);
                (
                    StatusCode::BAD_GATEWAY,
                    Json(serde_json::json!({"error": "Bank provider unavailable"})),
                )
            }
            ServiceError::Database(e) => {
                tracing::error!("Database error: {:?}", e);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    Json(serde_json::json!({"error": "Database error"})),
                )
            }
        }
    }
}
