//! Transaction importer and sync orchestrator.
//!
//! Pulls externally-reported transactions for a connection's accounts since
//! the last successful sync, persists unseen ones idempotently, and hands
//! each new credit to the matcher. The orchestrator walks connections
//! sequentially and isolates failures per connection.

use chrono::{Duration, NaiveDate, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use crate::config::Config;
use crate::error::ServiceResult;
use crate::models::{Account, Connection};
use crate::services::aggregator::BankAggregator;
use crate::services::{connections, matcher};

#[derive(Debug, Default, Clone, serde::Serialize)]
pub struct SyncSummary {
    pub imported: usize,
    pub auto_matched: usize,
    pub suggested: usize,
}

/// Import all new transactions for one connection and stamp
/// `last_synced_at` on success.
///
/// Idempotent against overlapping windows: a transaction whose external id
/// already exists locally is skipped. Every newly-seen credit goes through
/// the matcher immediately; a matcher error aborts the pass so the caller
/// knows ingestion did not fully succeed.
pub async fn sync_connection(
    pool: &PgPool,
    aggregator: &dyn BankAggregator,
    config: &Config,
    connection: &Connection,
) -> ServiceResult<SyncSummary> {
    let from = sync_window_start(connection, config.sync_lookback_days);
    tracing::info!(
        connection_id = %connection.id,
        %from,
        "Syncing connection"
    );

    // Refresh the account set and balance snapshots first; new accounts can
    // appear on an existing connection.
    let provider_accounts = aggregator.list_accounts(&connection.provider_id).await?;
    connections::upsert_accounts(pool, connection.id, &provider_accounts).await?;

    let accounts = sqlx::query_as::<_, Account>(
        "SELECT * FROM accounts WHERE connection_id = $1",
    )
    .bind(connection.id)
    .fetch_all(pool)
    .await?;

    let mut summary = SyncSummary::default();
    for account in &accounts {
        let fetched = aggregator
            .get_transactions(&account.external_id, Some(from))
            .await?;

        for tx in fetched {
            let id = Uuid::new_v4();
            let inserted = sqlx::query(
                r#"
                INSERT INTO bank_transactions
                    (id, account_id, external_id, amount, currency, description, transaction_date, status)
                VALUES ($1, $2, $3, $4, $5, $6, $7, 'PENDING')
                ON CONFLICT (external_id) DO NOTHING
                "#,
            )
            .bind(id)
            .bind(account.id)
            .bind(&tx.id)
            .bind(tx.amount)
            .bind(&tx.currency)
            .bind(&tx.description)
            .bind(tx.date)
            .execute(pool)
            .await?;

            if inserted.rows_affected() == 0 {
                continue; // already ingested
            }
            summary.imported += 1;

            if tx.amount > 0 {
                match matcher::match_transaction(pool, &config.matching, id).await? {
                    matcher::MatchOutcome::AutoMatched { .. } => summary.auto_matched += 1,
                    matcher::MatchOutcome::Suggested { .. } => summary.suggested += 1,
                    _ => {}
                }
            }
        }
    }

    sqlx::query(
        "UPDATE connections SET last_synced_at = NOW(), status = 'active' WHERE id = $1",
    )
    .bind(connection.id)
    .execute(pool)
    .await?;

    tracing::info!(
        connection_id = %connection.id,
        imported = summary.imported,
        auto_matched = summary.auto_matched,
        suggested = summary.suggested,
        "Connection synced"
    );
    Ok(summary)
}

fn sync_window_start(connection: &Connection, lookback_days: i64) -> NaiveDate {
    match connection.last_synced_at {
        Some(last) => last.date_naive(),
        None => (Utc::now() - Duration::days(lookback_days)).date_naive(),
    }
}

/// One orchestrator pass: sync every syncable connection sequentially. A
/// failing connection is marked `error` and the loop moves on; the failure
/// never escapes a pass.
pub async fn sync_all_connections(
    pool: &PgPool,
    aggregator: &dyn BankAggregator,
    config: &Config,
) -> Result<(), sqlx::Error> {
    // Errored connections stay in the rotation so a transient provider
    // failure heals on the next pass.
    let connections = sqlx::query_as::<_, Connection>(
        "SELECT * FROM connections WHERE status IN ('active', 'error') ORDER BY created_at",
    )
    .fetch_all(pool)
    .await?;

    tracing::info!("Sync pass over {} connection(s)", connections.len());

    for connection in &connections {
        if let Err(e) = sync_connection(pool, aggregator, config, connection).await {
            tracing::warn!(
                connection_id = %connection.id,
                "Sync failed, marking connection errored: {}",
                e
            );
            sqlx::query("UPDATE connections SET status = 'error' WHERE id = $1")
                .bind(connection.id)
                .execute(pool)
                .await?;
        }
    }

    Ok(())
}
