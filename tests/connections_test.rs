// Connection bookkeeping: connect sessions, aggregator callbacks, listing
// and disconnects.

mod test_helpers;
use test_helpers::*;

use chrono::{Duration, Utc};
use uuid::Uuid;

use invoice_recon_api::services::aggregator::{
    CallbackNotification, ConnectSession, ProviderAccount, ProviderConnection,
    ProviderTransaction,
};
use invoice_recon_api::services::connections::{
    create_connect_session, delete_connection, handle_callback, list_connections,
};
use invoice_recon_api::ServiceError;

fn finish_notification(provider_id: &str, customer_id: &str) -> CallbackNotification {
    CallbackNotification {
        connection_id: provider_id.to_string(),
        customer_id: customer_id.to_string(),
        stage: "finish".to_string(),
    }
}

#[tokio::test]
async fn finish_callback_registers_connection_and_runs_first_sync() {
    let pool = setup_test_db().await;
    let config = test_config();
    let user_id = create_test_user(&pool).await;
    let customer_id = format!("cust-{}", user_id);

    let provider_id = format!("conn-{}", Uuid::new_v4());
    let account_ext = format!("acct-{}", Uuid::new_v4());
    let tx_ext = format!("tx-{}", Uuid::new_v4());

    let mut aggregator = MockAggregator::new();
    let meta_id = provider_id.clone();
    aggregator.expect_get_connection().returning(move |_| {
        Ok(ProviderConnection {
            id: meta_id.clone(),
            provider_name: "Acme Bank".to_string(),
            country: "US".to_string(),
        })
    });
    let listed_ext = account_ext.clone();
    aggregator.expect_list_accounts().returning(move |_| {
        Ok(vec![ProviderAccount {
            id: listed_ext.clone(),
            name: "Checking".to_string(),
            balance: 42_000,
            currency: "USD".to_string(),
        }])
    });
    aggregator.expect_get_transactions().returning(move |_, _| {
        Ok(vec![ProviderTransaction {
            id: tx_ext.clone(),
            amount: 3_000,
            currency: "USD".to_string(),
            description: "wire".to_string(),
            date: Utc::now().date_naive(),
        }])
    });

    handle_callback(
        &pool,
        &aggregator,
        &config,
        &finish_notification(&provider_id, &customer_id),
    )
    .await
    .unwrap();

    let connection = sqlx::query_as::<_, invoice_recon_api::models::Connection>(
        "SELECT * FROM connections WHERE provider_id = $1",
    )
    .bind(&provider_id)
    .fetch_one(&pool)
    .await
    .unwrap();
    assert_eq!(connection.user_id, user_id);
    assert_eq!(connection.display_name, "Acme Bank");
    assert_eq!(connection.status.as_str(), "active");
    // The first sync ran and stamped the window anchor.
    assert!(connection.last_synced_at.is_some());

    let accounts = sqlx::query_scalar::<_, i64>(
        "SELECT COUNT(*) FROM accounts WHERE connection_id = $1",
    )
    .bind(connection.id)
    .fetch_one(&pool)
    .await
    .unwrap();
    assert_eq!(accounts, 1);

    let imported = sqlx::query_scalar::<_, i64>(
        "SELECT COUNT(*) FROM bank_transactions WHERE external_id LIKE 'tx-%'
         AND account_id IN (SELECT id FROM accounts WHERE connection_id = $1)",
    )
    .bind(connection.id)
    .fetch_one(&pool)
    .await
    .unwrap();
    assert_eq!(imported, 1);
}

#[tokio::test]
async fn error_callback_flips_connection_status() {
    let pool = setup_test_db().await;
    let config = test_config();
    let user_id = create_test_user(&pool).await;
    let connection_id = create_test_connection(&pool, user_id).await;
    let provider_id = format!("conn-{}", connection_id);

    let aggregator = MockAggregator::new();
    let notification = CallbackNotification {
        connection_id: provider_id,
        customer_id: format!("cust-{}", user_id),
        stage: "error".to_string(),
    };
    handle_callback(&pool, &aggregator, &config, &notification)
        .await
        .unwrap();

    assert_eq!(connection_status(&pool, connection_id).await, "error");
}

#[tokio::test]
async fn callback_for_unknown_customer_is_not_found() {
    let pool = setup_test_db().await;
    let config = test_config();

    let aggregator = MockAggregator::new();
    let notification = finish_notification(
        &format!("conn-{}", Uuid::new_v4()),
        &format!("cust-unknown-{}", Uuid::new_v4()),
    );
    let err = handle_callback(&pool, &aggregator, &config, &notification)
        .await
        .unwrap_err();
    assert!(matches!(err, ServiceError::NotFound));
}

#[tokio::test]
async fn unknown_callback_stage_changes_nothing() {
    let pool = setup_test_db().await;
    let config = test_config();
    let user_id = create_test_user(&pool).await;
    let connection_id = create_test_connection(&pool, user_id).await;

    let aggregator = MockAggregator::new();
    let notification = CallbackNotification {
        connection_id: format!("conn-{}", connection_id),
        customer_id: format!("cust-{}", user_id),
        stage: "pending".to_string(),
    };
    handle_callback(&pool, &aggregator, &config, &notification)
        .await
        .unwrap();

    assert_eq!(connection_status(&pool, connection_id).await, "active");
}

#[tokio::test]
async fn disconnect_removes_local_rows_even_when_provider_delete_fails() {
    let pool = setup_test_db().await;
    let user_id = create_test_user(&pool).await;
    let connection_id = create_test_connection(&pool, user_id).await;
    create_test_account(&pool, connection_id, "USD").await;

    let mut aggregator = MockAggregator::new();
    aggregator
        .expect_delete_connection()
        .returning(|_| Err(ServiceError::Provider("already revoked".to_string())));

    delete_connection(&pool, &aggregator, user_id, connection_id)
        .await
        .unwrap();

    let remaining = sqlx::query_scalar::<_, i64>(
        "SELECT COUNT(*) FROM connections WHERE id = $1",
    )
    .bind(connection_id)
    .fetch_one(&pool)
    .await
    .unwrap();
    assert_eq!(remaining, 0);

    let accounts = sqlx::query_scalar::<_, i64>(
        "SELECT COUNT(*) FROM accounts WHERE connection_id = $1",
    )
    .bind(connection_id)
    .fetch_one(&pool)
    .await
    .unwrap();
    assert_eq!(accounts, 0);
}

#[tokio::test]
async fn strangers_cannot_disconnect() {
    let pool = setup_test_db().await;
    let owner = create_test_user(&pool).await;
    let stranger = create_test_user(&pool).await;
    let connection_id = create_test_connection(&pool, owner).await;

    let aggregator = MockAggregator::new();
    let err = delete_connection(&pool, &aggregator, stranger, connection_id)
        .await
        .unwrap_err();
    assert!(matches!(err, ServiceError::NotFound));

    assert_eq!(connection_status(&pool, connection_id).await, "active");
}

#[tokio::test]
async fn connect_session_creates_the_customer_handle_once() {
    let pool = setup_test_db().await;

    // A user who has never touched the aggregator.
    let user_id = Uuid::new_v4();
    sqlx::query("INSERT INTO users (id, email) VALUES ($1, $2)")
        .bind(user_id)
        .bind(format!("{}@example.com", user_id))
        .execute(&pool)
        .await
        .unwrap();

    let customer_id = format!("cust-fresh-{}", user_id);
    let mut aggregator = MockAggregator::new();
    let created = customer_id.clone();
    aggregator
        .expect_create_customer()
        .times(1)
        .returning(move |_| Ok(created.clone()));
    let expected = customer_id.clone();
    aggregator
        .expect_create_connect_session()
        .withf(move |c| c == expected)
        .returning(|_| {
            Ok(ConnectSession {
                url: "https://connect.example/session".to_string(),
                expires_at: Utc::now() + Duration::hours(1),
            })
        });

    let session = create_connect_session(&pool, &aggregator, user_id)
        .await
        .unwrap();
    assert!(session.url.starts_with("https://"));

    let stored = sqlx::query_scalar::<_, Option<String>>(
        "SELECT aggregator_customer_id FROM users WHERE id = $1",
    )
    .bind(user_id)
    .fetch_one(&pool)
    .await
    .unwrap();
    assert_eq!(stored.as_deref(), Some(customer_id.as_str()));

    // Second session reuses the stored handle; create_customer stays at one
    // call.
    create_connect_session(&pool, &aggregator, user_id)
        .await
        .unwrap();
}

#[tokio::test]
async fn listing_returns_own_connections_with_accounts() {
    let pool = setup_test_db().await;
    let user_id = create_test_user(&pool).await;
    let other_user = create_test_user(&pool).await;

    let first = create_test_connection(&pool, user_id).await;
    create_test_account(&pool, first, "USD").await;
    let second = create_test_connection(&pool, user_id).await;
    create_test_connection(&pool, other_user).await;

    let summaries = list_connections(&pool, user_id).await.unwrap();
    assert_eq!(summaries.len(), 2);

    let with_account = summaries
        .iter()
        .find(|s| s.connection.id == first)
        .unwrap();
    assert_eq!(with_account.accounts.len(), 1);
    let without = summaries
        .iter()
        .find(|s| s.connection.id == second)
        .unwrap();
    assert!(without.accounts.is_empty());
}
