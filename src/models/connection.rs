//! Bank-data aggregator connection owned by a user.

use serde::{Deserialize, Serialize};
use sqlx::{postgres::PgRow, FromRow, Row};
use uuid::Uuid;

/// Lifecycle of an aggregator connection. `Error` is set when a sync pass
/// fails and cleared when the next one succeeds.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionStatus {
    Active,
    Error,
    Inactive,
    Disabled,
}

impl ConnectionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectionStatus::Active => "active",
            ConnectionStatus::Error => "error",
            ConnectionStatus::Inactive => "inactive",
            ConnectionStatus::Disabled => "disabled",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "active" => Some(ConnectionStatus::Active),
            "error" => Some(ConnectionStatus::Error),
            "inactive" => Some(ConnectionStatus::Inactive),
            "disabled" => Some(ConnectionStatus::Disabled),
            _ => None,
        }
    }
}

impl std::fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Connection {
    pub id: Uuid,
    pub user_id: Uuid,
    /// Aggregator-side connection id.
    pub provider_id: String,
    pub display_name: String,
    pub country: String,
    pub status: ConnectionStatus,
    pub last_synced_at: Option<chrono::DateTime<chrono::Utc>>,
    pub created_at: chrono::DateTime<chrono::Utc>,
}

impl<'r> FromRow<'r, PgRow> for Connection {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        let status_str: String = row.try_get("status")?;
        let status = ConnectionStatus::from_str(&status_str).ok_or_else(|| {
            sqlx::Error::Decode(format!("unknown connection status: {}", status_str).into())
        })?;
        Ok(Connection {
            id: row.try_get("id")?,
            user_id: row.try_get("user_id")?,
            provider_id: row.try_get("provider_id")?,
            display_name: row.try_get("display_name")?,
            country: row.try_get("country")?,
            status,
            last_synced_at: row.try_get("last_synced_at")?,
            created_at: row.try_get("created_at")?,
        })
    }
}
