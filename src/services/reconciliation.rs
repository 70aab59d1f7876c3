//! Confirmation workflow: the human-in-the-loop side of matching.
//!
//! All operations authorize through the transaction -> account -> connection
//! ownership chain; a transaction the caller does not own reads as not found.

use serde::Serialize;
use sqlx::PgPool;
use uuid::Uuid;

use crate::error::{ServiceError, ServiceResult};
use crate::models::{BankTransaction, TransactionStatus};
use crate::services::payments;

/// Load a transaction only if it is owned by `user_id`.
async fn owned_transaction(
    pool: &PgPool,
    transaction_id: Uuid,
    user_id: Uuid,
) -> ServiceResult<BankTransaction> {
    sqlx::query_as::<_, BankTransaction>(
        r#"
        SELECT bt.* FROM bank_transactions bt
        JOIN accounts a ON a.id = bt.account_id
        JOIN connections c ON c.id = a.connection_id
        WHERE bt.id = $1 AND c.user_id = $2
        "#,
    )
    .bind(transaction_id)
    .bind(user_id)
    .fetch_optional(pool)
    .await?
    .ok_or(ServiceError::NotFound)
}

/// Finalize a match against `invoice_id`.
///
/// Valid from PENDING (a suggestion: the payment is recorded now) or
/// AUTO_MATCHED (already paid by the matcher: confirming is idempotent and
/// never records a second payment). If recording fails the transaction
/// reverts to PENDING with cleared match fields and the error propagates.
pub async fn confirm_match(
    pool: &PgPool,
    transaction_id: Uuid,
    invoice_id: Uuid,
    user_id: Uuid,
) -> ServiceResult<()> {
    let tx = owned_transaction(pool, transaction_id, user_id).await?;

    let prior = tx.status;
    if prior != TransactionStatus::Pending && prior != TransactionStatus::AutoMatched {
        return Err(ServiceError::rejected(format!(
            "Transaction in status {} cannot be confirmed",
            prior
        )));
    }

    // The invoice must be the caller's as well.
    let invoice_owned = sqlx::query_scalar::<_, bool>(
        "SELECT EXISTS(SELECT 1 FROM invoices WHERE id = $1 AND user_id = $2)",
    )
    .bind(invoice_id)
    .bind(user_id)
    .fetch_one(pool)
    .await?;
    if !invoice_owned {
        return Err(ServiceError::NotFound);
    }

    // Conditional on the observed status so a concurrent matcher or confirm
    // cannot double-finalize.
    let updated = sqlx::query(
        r#"
        UPDATE bank_transactions
        SET status = 'CONFIRMED', matched_invoice_id = $2, confidence = 1.0
        WHERE id = $1 AND status = $3
        "#,
    )
    .bind(transaction_id)
    .bind(invoice_id)
    .bind(prior.as_str())
    .execute(pool)
    .await?;
    if updated.rows_affected() == 0 {
        return Err(ServiceError::rejected(
            "Transaction changed state, reload and retry",
        ));
    }

    if prior == TransactionStatus::Pending {
        let paid_at = tx
            .transaction_date
            .and_hms_opt(0, 0, 0)
            .map(|dt| dt.and_utc());
        let recorded = payments::record_payment(
            pool,
            invoice_id,
            user_id,
            tx.amount,
            "bank_transfer",
            Some(&format!("Confirmed bank transaction {}", tx.external_id)),
            paid_at,
        )
        .await;

        if let Err(e) = recorded {
            tracing::warn!(
                transaction_id = %transaction_id,
                invoice_id = %invoice_id,
                "Payment recording failed on confirm, reverting: {}",
                e
            );
            sqlx::query(
                r#"
                UPDATE bank_transactions
                SET status = 'PENDING', matched_invoice_id = NULL, confidence = NULL
                WHERE id = $1
                "#,
            )
            .bind(transaction_id)
            .execute(pool)
            .await?;
            return Err(e);
        }
    }

    tracing::info!(
        transaction_id = %transaction_id,
        invoice_id = %invoice_id,
        "Match confirmed"
    );
    Ok(())
}

/// Mark a transaction as ignored, clearing any recorded match. Valid from
/// any status; only support tooling can bring it back.
pub async fn ignore_transaction(
    pool: &PgPool,
    transaction_id: Uuid,
    user_id: Uuid,
) -> ServiceResult<()> {
    owned_transaction(pool, transaction_id, user_id).await?;

    sqlx::query(
        r#"
        UPDATE bank_transactions
        SET status = 'IGNORED', matched_invoice_id = NULL, confidence = NULL
        WHERE id = $1
        "#,
    )
    .bind(transaction_id)
    .execute(pool)
    .await?;

    tracing::info!(transaction_id = %transaction_id, "Transaction ignored");
    Ok(())
}

/// Payload for the review surface.
#[derive(Debug, Serialize)]
pub struct ReviewList {
    pub suggestions: Vec<BankTransaction>,
    pub auto_matched: Vec<BankTransaction>,
}

/// Everything awaiting or recently resolved by reconciliation for a user:
/// pending suggestions at/above the suggest threshold and the most recent
/// automatic matches.
pub async fn list_review(
    pool: &PgPool,
    user_id: Uuid,
    suggest_threshold: f64,
) -> ServiceResult<ReviewList> {
    let suggestions = sqlx::query_as::<_, BankTransaction>(
        r#"
        SELECT bt.* FROM bank_transactions bt
        JOIN accounts a ON a.id = bt.account_id
        JOIN connections c ON c.id = a.connection_id
        WHERE c.user_id = $1
          AND bt.status = 'PENDING'
          AND bt.amount > 0
          AND bt.matched_invoice_id IS NOT NULL
          AND bt.confidence >= $2
        ORDER BY bt.transaction_date DESC
        "#,
    )
    .bind(user_id)
    .bind(suggest_threshold)
    .fetch_all(pool)
    .await?;

    let auto_matched = sqlx::query_as::<_, BankTransaction>(
        r#"
        SELECT bt.* FROM bank_transactions bt
        JOIN accounts a ON a.id = bt.account_id
        JOIN connections c ON c.id = a.connection_id
        WHERE c.user_id = $1 AND bt.status = 'AUTO_MATCHED'
        ORDER BY bt.created_at DESC
        LIMIT 50
        "#,
    )
    .bind(user_id)
    .fetch_all(pool)
    .await?;

    Ok(ReviewList {
        suggestions,
        auto_matched,
    })
}
