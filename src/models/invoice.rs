//! Payment-relevant view of an invoice. Only states reached through real
//! transitions are persisted; OVERDUE is computed at read time and never
//! written back.

use chrono::{NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{postgres::PgRow, FromRow, Row};
use uuid::Uuid;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum InvoiceStatus {
    Draft,
    Sent,
    Viewed,
    PartiallyPaid,
    Paid,
    /// Derived only. The payment recorder never persists this value.
    Overdue,
}

impl InvoiceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            InvoiceStatus::Draft => "DRAFT",
            InvoiceStatus::Sent => "SENT",
            InvoiceStatus::Viewed => "VIEWED",
            InvoiceStatus::PartiallyPaid => "PARTIALLY_PAID",
            InvoiceStatus::Paid => "PAID",
            InvoiceStatus::Overdue => "OVERDUE",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "DRAFT" => Some(InvoiceStatus::Draft),
            "SENT" => Some(InvoiceStatus::Sent),
            "VIEWED" => Some(InvoiceStatus::Viewed),
            "PARTIALLY_PAID" => Some(InvoiceStatus::PartiallyPaid),
            "PAID" => Some(InvoiceStatus::Paid),
            "OVERDUE" => Some(InvoiceStatus::Overdue),
            _ => None,
        }
    }
}

impl std::fmt::Display for InvoiceStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Pure OVERDUE view: an outstanding invoice whose due date has passed reads
/// as OVERDUE without any persisted transition.
pub fn effective_status(
    persisted: InvoiceStatus,
    due_date: Option<NaiveDate>,
    today: NaiveDate,
) -> InvoiceStatus {
    match persisted {
        InvoiceStatus::Sent | InvoiceStatus::Viewed | InvoiceStatus::PartiallyPaid => {
            match due_date {
                Some(due) if due < today => InvoiceStatus::Overdue,
                _ => persisted,
            }
        }
        other => other,
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Invoice {
    pub id: Uuid,
    pub user_id: Uuid,
    pub currency: String,
    /// Total in minor units.
    pub total: i64,
    /// Monotonically non-decreasing except through payment deletion.
    pub paid_amount: i64,
    pub payment_reference: Option<String>,
    pub status: InvoiceStatus,
    pub sent_at: Option<chrono::DateTime<Utc>>,
    pub viewed_at: Option<chrono::DateTime<Utc>>,
    pub due_date: Option<NaiveDate>,
    pub paid_at: Option<chrono::DateTime<Utc>>,
    pub payment_method: Option<String>,
    pub created_at: chrono::DateTime<Utc>,
}

impl Invoice {
    pub fn remaining_balance(&self) -> i64 {
        self.total - self.paid_amount
    }

    /// Persisted status overlaid with the derived OVERDUE view.
    pub fn status_as_of(&self, today: NaiveDate) -> InvoiceStatus {
        effective_status(self.status, self.due_date, today)
    }
}

impl<'r> FromRow<'r, PgRow> for Invoice {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        let status_str: String = row.try_get("status")?;
        let status = InvoiceStatus::from_str(&status_str).ok_or_else(|| {
            sqlx::Error::Decode(format!("unknown invoice status: {}", status_str).into())
        })?;
        Ok(Invoice {
            id: row.try_get("id")?,
            user_id: row.try_get("user_id")?,
            currency: row.try_get("currency")?,
            total: row.try_get("total")?,
            paid_amount: row.try_get("paid_amount")?,
            payment_reference: row.try_get("payment_reference")?,
            status,
            sent_at: row.try_get("sent_at")?,
            viewed_at: row.try_get("viewed_at")?,
            due_date: row.try_get("due_date")?,
            paid_at: row.try_get("paid_at")?,
            payment_method: row.try_get("payment_method")?,
            created_at: row.try_get("created_at")?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn d(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    #[test]
    fn overdue_is_derived_for_outstanding_invoices() {
        let today = d("2026-03-15");
        assert_eq!(
            effective_status(InvoiceStatus::Sent, Some(d("2026-03-01")), today),
            InvoiceStatus::Overdue
        );
        assert_eq!(
            effective_status(InvoiceStatus::PartiallyPaid, Some(d("2026-03-01")), today),
            InvoiceStatus::Overdue
        );
    }

    #[test]
    fn due_today_is_not_overdue() {
        let today = d("2026-03-15");
        assert_eq!(
            effective_status(InvoiceStatus::Viewed, Some(today), today),
            InvoiceStatus::Viewed
        );
    }

    #[test]
    fn paid_and_draft_never_read_overdue() {
        let today = d("2026-03-15");
        assert_eq!(
            effective_status(InvoiceStatus::Paid, Some(d("2020-01-01")), today),
            InvoiceStatus::Paid
        );
        assert_eq!(
            effective_status(InvoiceStatus::Draft, Some(d("2020-01-01")), today),
            InvoiceStatus::Draft
        );
    }

    #[test]
    fn missing_due_date_stays_as_persisted() {
        let today = d("2026-03-15");
        assert_eq!(
            effective_status(InvoiceStatus::Sent, None, today),
            InvoiceStatus::Sent
        );
    }
}
