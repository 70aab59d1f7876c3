//! Payment recorder: the only writer of payment rows and the only driver of
//! the invoice payment state machine.
//!
//! Both mutations run in a single database transaction with the invoice row
//! locked (`SELECT ... FOR UPDATE`), so the balance check and the update are
//! atomic and `paid_amount` can never exceed `total` under concurrency.

use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use crate::error::{ServiceError, ServiceResult};
use crate::models::{Invoice, InvoiceStatus, Payment};

/// Record a payment against an invoice.
///
/// Rejections (not owned, DRAFT invoice, non-positive amount, amount above
/// the remaining balance) come back as sentinel errors and leave the invoice
/// untouched. On success the payment row is appended, `paid_amount` is
/// bumped, the invoice transitions to PAID (stamping `paid_at` and
/// `payment_method`, cancelling pending reminder jobs) or PARTIALLY_PAID,
/// and a PAYMENT_RECORDED event is written.
pub async fn record_payment(
    pool: &PgPool,
    invoice_id: Uuid,
    user_id: Uuid,
    amount: i64,
    method: &str,
    note: Option<&str>,
    paid_at: Option<DateTime<Utc>>,
) -> ServiceResult<Payment> {
    let mut txn = pool.begin().await?;

    let invoice = sqlx::query_as::<_, Invoice>(
        "SELECT * FROM invoices WHERE id = $1 AND user_id = $2 FOR UPDATE",
    )
    .bind(invoice_id)
    .bind(user_id)
    .fetch_optional(&mut *txn)
    .await?
    .ok_or(ServiceError::NotFound)?;

    if invoice.status == InvoiceStatus::Draft {
        return Err(ServiceError::rejected(
            "Cannot record a payment on a draft invoice",
        ));
    }
    if amount <= 0 {
        return Err(ServiceError::rejected("Payment amount must be positive"));
    }
    if amount > invoice.remaining_balance() {
        return Err(ServiceError::rejected(format!(
            "Payment of {} exceeds remaining balance of {}",
            amount,
            invoice.remaining_balance()
        )));
    }

    let payment_id = Uuid::new_v4();
    let paid_at = paid_at.unwrap_or_else(Utc::now);

    let payment = sqlx::query_as::<_, Payment>(
        r#"
        INSERT INTO payments (id, invoice_id, amount, method, note, paid_at)
        VALUES ($1, $2, $3, $4, $5, $6)
        RETURNING *
        "#,
    )
    .bind(payment_id)
    .bind(invoice_id)
    .bind(amount)
    .bind(method)
    .bind(note)
    .bind(paid_at)
    .fetch_one(&mut *txn)
    .await?;

    let new_paid = invoice.paid_amount + amount;
    if new_paid >= invoice.total {
        sqlx::query(
            r#"
            UPDATE invoices
            SET paid_amount = $2, status = 'PAID', paid_at = $3, payment_method = $4
            WHERE id = $1
            "#,
        )
        .bind(invoice_id)
        .bind(new_paid)
        .bind(paid_at)
        .bind(method)
        .execute(&mut *txn)
        .await?;

        // Fully paid invoices need no further follow-ups.
        let cancelled = sqlx::query(
            "UPDATE reminder_jobs SET status = 'cancelled' WHERE invoice_id = $1 AND status = 'pending'",
        )
        .bind(invoice_id)
        .execute(&mut *txn)
        .await?;
        if cancelled.rows_affected() > 0 {
            tracing::info!(
                invoice_id = %invoice_id,
                "Cancelled {} pending reminder(s)",
                cancelled.rows_affected()
            );
        }
    } else {
        sqlx::query("UPDATE invoices SET paid_amount = $2, status = 'PARTIALLY_PAID' WHERE id = $1")
            .bind(invoice_id)
            .bind(new_paid)
            .execute(&mut *txn)
            .await?;
    }

    sqlx::query(
        r#"
        INSERT INTO invoice_events (invoice_id, event_type, event_data)
        VALUES ($1, 'PAYMENT_RECORDED', $2)
        "#,
    )
    .bind(invoice_id)
    .bind(serde_json::json!({
        "payment_id": payment_id,
        "amount": amount,
        "method": method,
    }))
    .execute(&mut *txn)
    .await?;

    txn.commit().await?;

    tracing::info!(
        invoice_id = %invoice_id,
        payment_id = %payment_id,
        amount,
        "Payment recorded"
    );
    Ok(payment)
}

/// Reverse a payment. Rejected once the invoice is fully PAID; otherwise the
/// payment row is deleted, `paid_amount` decremented, and the status
/// recomputed: PARTIALLY_PAID while anything remains paid, else VIEWED if
/// the invoice was ever viewed, else SENT.
pub async fn delete_payment(pool: &PgPool, payment_id: Uuid, user_id: Uuid) -> ServiceResult<()> {
    let mut txn = pool.begin().await?;

    // Lock the invoice through the payment's ownership chain before touching
    // either row.
    let invoice = sqlx::query_as::<_, Invoice>(
        r#"
        SELECT i.* FROM invoices i
        JOIN payments p ON p.invoice_id = i.id
        WHERE p.id = $1 AND i.user_id = $2
        FOR UPDATE OF i
        "#,
    )
    .bind(payment_id)
    .bind(user_id)
    .fetch_optional(&mut *txn)
    .await?
    .ok_or(ServiceError::NotFound)?;

    if invoice.status == InvoiceStatus::Paid {
        return Err(ServiceError::rejected(
            "A payment on a fully paid invoice cannot be reversed",
        ));
    }

    let amount = sqlx::query_scalar::<_, i64>(
        "DELETE FROM payments WHERE id = $1 RETURNING amount",
    )
    .bind(payment_id)
    .fetch_optional(&mut *txn)
    .await?
    .ok_or(ServiceError::NotFound)?;

    let new_paid = (invoice.paid_amount - amount).max(0);
    let new_status = if new_paid > 0 {
        InvoiceStatus::PartiallyPaid
    } else if invoice.viewed_at.is_some() {
        InvoiceStatus::Viewed
    } else {
        InvoiceStatus::Sent
    };

    sqlx::query("UPDATE invoices SET paid_amount = $2, status = $3 WHERE id = $1")
        .bind(invoice.id)
        .bind(new_paid)
        .bind(new_status.as_str())
        .execute(&mut *txn)
        .await?;

    sqlx::query(
        r#"
        INSERT INTO invoice_events (invoice_id, event_type, event_data)
        VALUES ($1, 'PAYMENT_DELETED', $2)
        "#,
    )
    .bind(invoice.id)
    .bind(serde_json::json!({
        "payment_id": payment_id,
        "amount": amount,
    }))
    .execute(&mut *txn)
    .await?;

    txn.commit().await?;

    tracing::info!(
        invoice_id = %invoice.id,
        payment_id = %payment_id,
        "Payment deleted, invoice now {}",
        new_status
    );
    Ok(())
}

/// List an invoice's payments, newest first.
pub async fn list_payments(
    pool: &PgPool,
    invoice_id: Uuid,
    user_id: Uuid,
) -> ServiceResult<Vec<Payment>> {
    let owned = sqlx::query_scalar::<_, bool>(
        "SELECT EXISTS(SELECT 1 FROM invoices WHERE id = $1 AND user_id = $2)",
    )
    .bind(invoice_id)
    .bind(user_id)
    .fetch_one(pool)
    .await?;
    if !owned {
        return Err(ServiceError::NotFound);
    }

    let payments = sqlx::query_as::<_, Payment>(
        "SELECT * FROM payments WHERE invoice_id = $1 ORDER BY paid_at DESC",
    )
    .bind(invoice_id)
    .fetch_all(pool)
    .await?;
    Ok(payments)
}
