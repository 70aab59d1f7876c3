//! Connection bookkeeping: connect sessions, aggregator callbacks, listing
//! and disconnects.

use serde::Serialize;
use sqlx::PgPool;
use uuid::Uuid;

use crate::config::Config;
use crate::error::{ServiceError, ServiceResult};
use crate::models::{Account, Connection};
use crate::services::aggregator::{
    BankAggregator, CallbackNotification, ConnectSession, ProviderAccount,
};
use crate::services::importer;

#[derive(Debug, Serialize)]
pub struct ConnectionSummary {
    #[serde(flatten)]
    pub connection: Connection,
    pub accounts: Vec<Account>,
}

pub async fn list_connections(pool: &PgPool, user_id: Uuid) -> ServiceResult<Vec<ConnectionSummary>> {
    let connections = sqlx::query_as::<_, Connection>(
        "SELECT * FROM connections WHERE user_id = $1 ORDER BY created_at",
    )
    .bind(user_id)
    .fetch_all(pool)
    .await?;

    let mut summaries = Vec::with_capacity(connections.len());
    for connection in connections {
        let accounts = sqlx::query_as::<_, Account>(
            "SELECT * FROM accounts WHERE connection_id = $1 ORDER BY name",
        )
        .bind(connection.id)
        .fetch_all(pool)
        .await?;
        summaries.push(ConnectionSummary {
            connection,
            accounts,
        });
    }
    Ok(summaries)
}

/// Start the hosted connect flow for a user, creating the aggregator-side
/// customer handle on first use.
pub async fn create_connect_session(
    pool: &PgPool,
    aggregator: &dyn BankAggregator,
    user_id: Uuid,
) -> ServiceResult<ConnectSession> {
    let user = sqlx::query_as::<_, (String, Option<String>)>(
        "SELECT email, aggregator_customer_id FROM users WHERE id = $1",
    )
    .bind(user_id)
    .fetch_optional(pool)
    .await?
    .ok_or(ServiceError::NotFound)?;

    let (email, customer_id) = user;
    let customer_id = match customer_id {
        Some(id) => id,
        None => {
            let id = aggregator.create_customer(&email).await?;
            sqlx::query("UPDATE users SET aggregator_customer_id = $2 WHERE id = $1")
                .bind(user_id)
                .bind(&id)
                .execute(pool)
                .await?;
            id
        }
    };

    let session = aggregator.create_connect_session(&customer_id).await?;
    tracing::info!(user_id = %user_id, "Connect session created");
    Ok(session)
}

/// Handle the asynchronous callback the aggregator posts after the hosted
/// flow. "finish" registers (or refreshes) the connection and runs its first
/// sync; "error" flips the connection's status. The customer id resolves the
/// owning user.
pub async fn handle_callback(
    pool: &PgPool,
    aggregator: &dyn BankAggregator,
    config: &Config,
    notification: &CallbackNotification,
) -> ServiceResult<()> {
    let user_id = sqlx::query_scalar::<_, Uuid>(
        "SELECT id FROM users WHERE aggregator_customer_id = $1",
    )
    .bind(&notification.customer_id)
    .fetch_optional(pool)
    .await?
    .ok_or(ServiceError::NotFound)?;

    match notification.stage.as_str() {
        "finish" => {
            let meta = aggregator.get_connection(&notification.connection_id).await?;

            let connection_id = Uuid::new_v4();
            let connection = sqlx::query_as::<_, Connection>(
                r#"
                INSERT INTO connections (id, user_id, provider_id, display_name, country, status)
                VALUES ($1, $2, $3, $4, $5, 'active')
                ON CONFLICT (provider_id) DO UPDATE
                    SET display_name = EXCLUDED.display_name,
                        country = EXCLUDED.country,
                        status = 'active'
                RETURNING *
                "#,
            )
            .bind(connection_id)
            .bind(user_id)
            .bind(&meta.id)
            .bind(&meta.provider_name)
            .bind(&meta.country)
            .fetch_one(pool)
            .await?;

            let accounts = aggregator.list_accounts(&meta.id).await?;
            upsert_accounts(pool, connection.id, &accounts).await?;

            tracing::info!(
                connection_id = %connection.id,
                user_id = %user_id,
                "Connection established, running first sync"
            );
            importer::sync_connection(pool, aggregator, config, &connection).await?;
            Ok(())
        }
        "error" => {
            sqlx::query("UPDATE connections SET status = 'error' WHERE provider_id = $1")
                .bind(&notification.connection_id)
                .execute(pool)
                .await?;
            tracing::warn!(
                provider_id = %notification.connection_id,
                "Aggregator reported connection error"
            );
            Ok(())
        }
        other => {
            tracing::debug!("Ignoring callback stage '{}'", other);
            Ok(())
        }
    }
}

/// Disconnect a connection. Aggregator-side deletion is best effort; the
/// local row always goes away.
pub async fn delete_connection(
    pool: &PgPool,
    aggregator: &dyn BankAggregator,
    user_id: Uuid,
    connection_id: Uuid,
) -> ServiceResult<()> {
    let connection = sqlx::query_as::<_, Connection>(
        "SELECT * FROM connections WHERE id = $1 AND user_id = $2",
    )
    .bind(connection_id)
    .bind(user_id)
    .fetch_optional(pool)
    .await?
    .ok_or(ServiceError::NotFound)?;

    if let Err(e) = aggregator.delete_connection(&connection.provider_id).await {
        tracing::warn!(
            connection_id = %connection.id,
            "Aggregator-side delete failed, removing locally anyway: {}",
            e
        );
    }

    sqlx::query("DELETE FROM connections WHERE id = $1")
        .bind(connection.id)
        .execute(pool)
        .await?;

    tracing::info!(connection_id = %connection.id, "Connection deleted");
    Ok(())
}

/// Load a connection only if owned by `user_id` (manual sync trigger).
pub async fn owned_connection(
    pool: &PgPool,
    connection_id: Uuid,
    user_id: Uuid,
) -> ServiceResult<Connection> {
    sqlx::query_as::<_, Connection>(
        "SELECT * FROM connections WHERE id = $1 AND user_id = $2",
    )
    .bind(connection_id)
    .bind(user_id)
    .fetch_optional(pool)
    .await?
    .ok_or(ServiceError::NotFound)
}

/// Insert or refresh the local account rows for a connection from the
/// aggregator's view. External ids are immutable, so conflicts only refresh
/// the mutable snapshot fields.
pub async fn upsert_accounts(
    pool: &PgPool,
    connection_id: Uuid,
    accounts: &[ProviderAccount],
) -> Result<(), sqlx::Error> {
    for account in accounts {
        sqlx::query(
            r#"
            INSERT INTO accounts (id, connection_id, external_id, name, balance, currency)
            VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT (external_id) DO UPDATE
                SET name = EXCLUDED.name,
                    balance = EXCLUDED.balance,
                    currency = EXCLUDED.currency
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(connection_id)
        .bind(&account.id)
        .bind(&account.name)
        .bind(account.balance)
        .bind(&account.currency)
        .execute(pool)
        .await?;
    }
    Ok(())
}
