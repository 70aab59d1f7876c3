//! Scores pending bank transactions against a user's outstanding invoices
//! and decides between no match, a suggestion for human review, and an
//! automatic match-and-pay.

use sqlx::PgPool;
use uuid::Uuid;

use crate::config::MatchConfig;
use crate::error::{ServiceError, ServiceResult};
use crate::models::{BankTransaction, Invoice, TransactionStatus};
use crate::services::payments;

/// What the matcher decided for one transaction.
#[derive(Debug, Clone, PartialEq)]
pub enum MatchOutcome {
    /// Transaction was not PENDING, not a credit, or lost the status race.
    Skipped,
    /// No candidate reached the suggest threshold; transaction stays PENDING.
    NoMatch,
    /// Candidate recorded on the transaction, awaiting human confirmation.
    Suggested { invoice_id: Uuid, score: f64 },
    /// Matched and paid in full.
    AutoMatched { invoice_id: Uuid, score: f64 },
}

/// Score one invoice as a candidate for one transaction. Pure; `None` means
/// the invoice is not a candidate at all (currency mismatch).
///
/// Signals are granted in full or not at all:
/// currency match, payment reference found in the description
/// (case-insensitive), amount within tolerance of the remaining balance or
/// the total, and transaction dated on/after the invoice was sent.
pub fn score_candidate(tx: &BankTransaction, invoice: &Invoice, cfg: &MatchConfig) -> Option<f64> {
    if tx.currency != invoice.currency {
        return None;
    }
    let mut score = cfg.weight_currency;

    if let Some(reference) = invoice.payment_reference.as_deref() {
        if !reference.is_empty()
            && tx
                .description
                .to_lowercase()
                .contains(&reference.to_lowercase())
        {
            score += cfg.weight_reference;
        }
    }

    if amount_within_tolerance(tx.amount, invoice.remaining_balance(), cfg.amount_tolerance)
        || amount_within_tolerance(tx.amount, invoice.total, cfg.amount_tolerance)
    {
        score += cfg.weight_amount;
    }

    if let Some(sent_at) = invoice.sent_at {
        if tx.transaction_date >= sent_at.date_naive() {
            score += cfg.weight_timing;
        }
    }

    Some(score)
}

fn amount_within_tolerance(amount: i64, target: i64, tolerance: f64) -> bool {
    if target <= 0 {
        return false;
    }
    (amount - target).abs() as f64 <= target as f64 * tolerance
}

/// Pick the best candidate deterministically: highest score, then earliest
/// due date (undated last), then lowest invoice id.
fn best_candidate(mut scored: Vec<(Invoice, f64)>) -> Option<(Invoice, f64)> {
    scored.sort_by(|(a, sa), (b, sb)| {
        sb.partial_cmp(sa)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| match (a.due_date, b.due_date) {
                (Some(da), Some(db)) => da.cmp(&db),
                (Some(_), None) => std::cmp::Ordering::Less,
                (None, Some(_)) => std::cmp::Ordering::Greater,
                (None, None) => std::cmp::Ordering::Equal,
            })
            .then_with(|| a.id.cmp(&b.id))
    });
    scored.into_iter().next()
}

/// Run the matcher for one transaction.
///
/// Idempotent: only PENDING credit transactions are considered, and the
/// PENDING -> AUTO_MATCHED transition is a conditional update so concurrent
/// invocations commit at most one match decision. If automatic payment
/// recording fails, the transaction is reverted to PENDING with cleared match
/// fields and the recording error propagates to the caller.
pub async fn match_transaction(
    pool: &PgPool,
    cfg: &MatchConfig,
    transaction_id: Uuid,
) -> ServiceResult<MatchOutcome> {
    let tx = sqlx::query_as::<_, BankTransaction>(
        "SELECT * FROM bank_transactions WHERE id = $1",
    )
    .bind(transaction_id)
    .fetch_optional(pool)
    .await?
    .ok_or(ServiceError::NotFound)?;

    if tx.status != TransactionStatus::Pending {
        return Ok(MatchOutcome::Skipped);
    }
    if !tx.is_credit() {
        return Ok(MatchOutcome::Skipped);
    }

    // Owner of the account the transaction arrived on.
    let user_id = sqlx::query_scalar::<_, Uuid>(
        r#"
        SELECT c.user_id
        FROM accounts a
        JOIN connections c ON c.id = a.connection_id
        WHERE a.id = $1
        "#,
    )
    .bind(tx.account_id)
    .fetch_one(pool)
    .await?;

    // Outstanding invoices in the transaction's currency. The derived OVERDUE
    // view maps onto these persisted statuses, so filtering on them covers it.
    let candidates = sqlx::query_as::<_, Invoice>(
        r#"
        SELECT * FROM invoices
        WHERE user_id = $1
          AND status IN ('SENT', 'VIEWED', 'PARTIALLY_PAID')
          AND currency = $2
        "#,
    )
    .bind(user_id)
    .bind(&tx.currency)
    .fetch_all(pool)
    .await?;

    let scored: Vec<(Invoice, f64)> = candidates
        .into_iter()
        .filter_map(|inv| {
            score_candidate(&tx, &inv, cfg)
                .filter(|s| *s >= cfg.suggest_threshold)
                .map(|s| (inv, s))
        })
        .collect();

    let Some((invoice, score)) = best_candidate(scored) else {
        tracing::debug!(transaction_id = %tx.id, "No match candidate above suggest threshold");
        return Ok(MatchOutcome::NoMatch);
    };

    if score >= cfg.auto_threshold {
        // Conditional transition closes the double-matching race: whichever
        // invocation flips the row first wins, the other sees zero rows.
        let updated = sqlx::query(
            r#"
            UPDATE bank_transactions
            SET status = 'AUTO_MATCHED', matched_invoice_id = $2, confidence = $3
            WHERE id = $1 AND status = 'PENDING'
            "#,
        )
        .bind(tx.id)
        .bind(invoice.id)
        .bind(score)
        .execute(pool)
        .await?;

        if updated.rows_affected() == 0 {
            tracing::info!(transaction_id = %tx.id, "Lost match race, skipping");
            return Ok(MatchOutcome::Skipped);
        }

        let paid_at = tx
            .transaction_date
            .and_hms_opt(0, 0, 0)
            .map(|dt| dt.and_utc());

        let recorded = payments::record_payment(
            pool,
            invoice.id,
            user_id,
            tx.amount,
            "bank_transfer",
            Some(&format!("Matched bank transaction {}", tx.external_id)),
            paid_at,
        )
        .await;

        if let Err(e) = recorded {
            // Compensate: the transaction must never sit in AUTO_MATCHED
            // without a corresponding payment row.
            tracing::warn!(
                transaction_id = %tx.id,
                invoice_id = %invoice.id,
                "Payment recording failed after auto-match, reverting: {}",
                e
            );
            sqlx::query(
                r#"
                UPDATE bank_transactions
                SET status = 'PENDING', matched_invoice_id = NULL, confidence = NULL
                WHERE id = $1
                "#,
            )
            .bind(tx.id)
            .execute(pool)
            .await?;
            return Err(e);
        }

        tracing::info!(
            transaction_id = %tx.id,
            invoice_id = %invoice.id,
            score,
            "Transaction auto-matched and paid"
        );
        return Ok(MatchOutcome::AutoMatched {
            invoice_id: invoice.id,
            score,
        });
    }

    // Suggestion: record the candidate but leave the transaction PENDING for
    // human confirmation. Conditional for the same race reason as above.
    let updated = sqlx::query(
        r#"
        UPDATE bank_transactions
        SET matched_invoice_id = $2, confidence = $3
        WHERE id = $1 AND status = 'PENDING'
        "#,
    )
    .bind(tx.id)
    .bind(invoice.id)
    .bind(score)
    .execute(pool)
    .await?;

    if updated.rows_affected() == 0 {
        tracing::info!(transaction_id = %tx.id, "Lost match race, skipping");
        return Ok(MatchOutcome::Skipped);
    }

    tracing::info!(
        transaction_id = %tx.id,
        invoice_id = %invoice.id,
        score,
        "Match suggested for review"
    );
    Ok(MatchOutcome::Suggested {
        invoice_id: invoice.id,
        score,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::InvoiceStatus;
    use chrono::{NaiveDate, TimeZone, Utc};

    fn cfg() -> MatchConfig {
        MatchConfig::default()
    }

    fn date(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    fn invoice(total: i64, paid: i64, reference: Option<&str>) -> Invoice {
        Invoice {
            id: Uuid::new_v4(),
            user_id: Uuid::new_v4(),
            currency: "USD".to_string(),
            total,
            paid_amount: paid,
            payment_reference: reference.map(|s| s.to_string()),
            status: InvoiceStatus::Sent,
            sent_at: Some(Utc.with_ymd_and_hms(2026, 1, 10, 9, 0, 0).unwrap()),
            viewed_at: None,
            due_date: Some(date("2026-02-10")),
            paid_at: None,
            payment_method: None,
            created_at: Utc::now(),
        }
    }

    fn transaction(amount: i64, description: &str) -> BankTransaction {
        BankTransaction {
            id: Uuid::new_v4(),
            account_id: Uuid::new_v4(),
            external_id: "ext-1".to_string(),
            amount,
            currency: "USD".to_string(),
            description: description.to_string(),
            transaction_date: date("2026-01-20"),
            status: TransactionStatus::Pending,
            matched_invoice_id: None,
            confidence: None,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn full_signal_score_is_095() {
        // Reference in description, exact amount, dated after sending.
        let inv = invoice(10_000, 0, Some("INV-2026-001"));
        let tx = transaction(10_000, "payment for inv-2026-001 thanks");
        let score = score_candidate(&tx, &inv, &cfg()).unwrap();
        assert!((score - 0.95).abs() < 1e-9);
    }

    #[test]
    fn weak_signals_stay_below_suggest_threshold() {
        // Half the remaining balance, no reference: currency + timing only.
        let inv = invoice(10_000, 0, None);
        let tx = transaction(5_000, "wire transfer");
        let score = score_candidate(&tx, &inv, &cfg()).unwrap();
        assert!((score - 0.15).abs() < 1e-9);
        assert!(score < cfg().suggest_threshold);
    }

    #[test]
    fn currency_mismatch_is_not_a_candidate() {
        let inv = invoice(10_000, 0, Some("INV-1"));
        let mut tx = transaction(10_000, "INV-1");
        tx.currency = "EUR".to_string();
        assert_eq!(score_candidate(&tx, &inv, &cfg()), None);
    }

    #[test]
    fn amount_matches_total_of_partially_paid_invoice() {
        // paid 4000 of 10000; a transaction for the full total still grants
        // the amount signal via the total comparison.
        let inv = invoice(10_000, 4_000, None);
        let tx = transaction(10_000, "settling up");
        let score = score_candidate(&tx, &inv, &cfg()).unwrap();
        assert!((score - 0.45).abs() < 1e-9);
    }

    #[test]
    fn amount_within_one_percent_counts() {
        let inv = invoice(10_000, 0, None);
        let tx = transaction(10_099, "close enough");
        let score = score_candidate(&tx, &inv, &cfg()).unwrap();
        assert!((score - 0.45).abs() < 1e-9);

        let tx = transaction(10_101, "too far");
        let score = score_candidate(&tx, &inv, &cfg()).unwrap();
        assert!((score - 0.15).abs() < 1e-9);
    }

    #[test]
    fn timing_not_granted_before_sent_date() {
        let inv = invoice(10_000, 0, None);
        let mut tx = transaction(10_000, "early bird");
        tx.transaction_date = date("2026-01-05");
        let score = score_candidate(&tx, &inv, &cfg()).unwrap();
        assert!((score - 0.40).abs() < 1e-9);
    }

    #[test]
    fn scoring_is_deterministic() {
        let inv = invoice(10_000, 0, Some("REF-7"));
        let tx = transaction(10_000, "REF-7");
        let a = score_candidate(&tx, &inv, &cfg());
        let b = score_candidate(&tx, &inv, &cfg());
        assert_eq!(a, b);
    }

    #[test]
    fn tie_break_prefers_earliest_due_date_then_lowest_id() {
        let mut a = invoice(10_000, 0, None);
        a.due_date = Some(date("2026-03-01"));
        let mut b = invoice(10_000, 0, None);
        b.due_date = Some(date("2026-02-01"));
        let earliest = b.id;
        let picked = best_candidate(vec![(a, 0.45), (b, 0.45)]).unwrap();
        assert_eq!(picked.0.id, earliest);

        let mut c = invoice(10_000, 0, None);
        c.due_date = Some(date("2026-02-01"));
        let mut d = invoice(10_000, 0, None);
        d.due_date = Some(date("2026-02-01"));
        let lowest = c.id.min(d.id);
        let picked = best_candidate(vec![(c, 0.45), (d, 0.45)]).unwrap();
        assert_eq!(picked.0.id, lowest);
    }
}
