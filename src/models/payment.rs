//! Payment ledger row. Append-only except reversal through the payment
//! recorder's delete path.

use serde::Serialize;
use sqlx::{postgres::PgRow, FromRow, Row};
use uuid::Uuid;

#[derive(Debug, Clone, Serialize)]
pub struct Payment {
    pub id: Uuid,
    pub invoice_id: Uuid,
    pub amount: i64,
    pub method: String,
    pub note: Option<String>,
    pub paid_at: chrono::DateTime<chrono::Utc>,
    pub created_at: chrono::DateTime<chrono::Utc>,
}

impl<'r> FromRow<'r, PgRow> for Payment {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        Ok(Payment {
            id: row.try_get("id")?,
            invoice_id: row.try_get("invoice_id")?,
            amount: row.try_get("amount")?,
            method: row.try_get("method")?,
            note: row.try_get("note")?,
            paid_at: row.try_get("paid_at")?,
            created_at: row.try_get("created_at")?,
        })
    }
}
