//! Externally-reported bank transaction, the unit under reconciliation.
//! Created by the importer, mutated only by the matcher and the confirmation
//! workflow, never deleted.

use serde::{Deserialize, Serialize};
use sqlx::{postgres::PgRow, FromRow, Row};
use uuid::Uuid;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TransactionStatus {
    Pending,
    AutoMatched,
    Confirmed,
    Ignored,
}

impl TransactionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionStatus::Pending => "PENDING",
            TransactionStatus::AutoMatched => "AUTO_MATCHED",
            TransactionStatus::Confirmed => "CONFIRMED",
            TransactionStatus::Ignored => "IGNORED",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "PENDING" => Some(TransactionStatus::Pending),
            "AUTO_MATCHED" => Some(TransactionStatus::AutoMatched),
            "CONFIRMED" => Some(TransactionStatus::Confirmed),
            "IGNORED" => Some(TransactionStatus::Ignored),
            _ => None,
        }
    }
}

impl std::fmt::Display for TransactionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct BankTransaction {
    pub id: Uuid,
    pub account_id: Uuid,
    pub external_id: String,
    /// Signed amount in minor units; positive means an inbound credit.
    pub amount: i64,
    pub currency: String,
    pub description: String,
    pub transaction_date: chrono::NaiveDate,
    pub status: TransactionStatus,
    pub matched_invoice_id: Option<Uuid>,
    /// Confidence score in [0, 1] when a match has been proposed or made.
    pub confidence: Option<f64>,
    pub created_at: chrono::DateTime<chrono::Utc>,
}

impl BankTransaction {
    /// Credits are the only transactions the matcher ever considers.
    pub fn is_credit(&self) -> bool {
        self.amount > 0
    }
}

impl<'r> FromRow<'r, PgRow> for BankTransaction {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        let status_str: String = row.try_get("status")?;
        let status = TransactionStatus::from_str(&status_str).ok_or_else(|| {
            sqlx::Error::Decode(format!("unknown transaction status: {}", status_str).into())
        })?;
        Ok(BankTransaction {
            id: row.try_get("id")?,
            account_id: row.try_get("account_id")?,
            external_id: row.try_get("external_id")?,
            amount: row.try_get("amount")?,
            currency: row.try_get("currency")?,
            description: row.try_get("description")?,
            transaction_date: row.try_get("transaction_date")?,
            status,
            matched_invoice_id: row.try_get("matched_invoice_id")?,
            confidence: row.try_get("confidence")?,
            created_at: row.try_get("created_at")?,
        })
    }
}
