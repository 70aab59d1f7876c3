//! Bank account under a connection. `external_id` is the aggregator-side
//! identifier and never changes; sync windows key off it.

use serde::Serialize;
use sqlx::{postgres::PgRow, FromRow, Row};
use uuid::Uuid;

#[derive(Debug, Clone, Serialize)]
pub struct Account {
    pub id: Uuid,
    pub connection_id: Uuid,
    pub external_id: String,
    pub name: String,
    /// Balance snapshot in minor units, refreshed on sync.
    pub balance: i64,
    pub currency: String,
    pub created_at: chrono::DateTime<chrono::Utc>,
}

impl<'r> FromRow<'r, PgRow> for Account {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        Ok(Account {
            id: row.try_get("id")?,
            connection_id: row.try_get("connection_id")?,
            external_id: row.try_get("external_id")?,
            name: row.try_get("name")?,
            balance: row.try_get("balance")?,
            currency: row.try_get("currency")?,
            created_at: row.try_get("created_at")?,
        })
    }
}
