use axum::{
    routing::{delete, get, post},
    Router,
};
use std::sync::Arc;
use tokio::signal;
use tracing::{error, info};

use invoice_recon_api::services::aggregator::{AggregatorClient, BankAggregator};
use invoice_recon_api::{background, config::Config, database, handlers, middleware, AppState};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables
    dotenv::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "invoice_recon_api=debug,tower_http=debug".into()),
        )
        .init();

    info!("Starting invoice reconciliation API server...");

    let config = Arc::new(Config::from_env()?);
    info!("Configuration loaded");

    let db_pool = database::new_pool(&config.database_url).await?;
    info!("Database connection pool created");

    let aggregator: Arc<dyn BankAggregator> = Arc::new(AggregatorClient::new(
        config.aggregator_base_url.clone(),
        config.aggregator_api_key.clone(),
    ));

    let scheduler = Arc::new(
        background::scheduler::BackgroundScheduler::new(
            db_pool.clone(),
            config.clone(),
            aggregator.clone(),
        )
        .await?,
    );

    let app_state = AppState {
        db_pool: db_pool.clone(),
        config: config.clone(),
        aggregator,
    };

    let app = Router::new()
        .route("/health", get(health_check))
        .route("/api/bank/connections", get(handlers::get_connections))
        .route(
            "/api/bank/connections/session",
            post(handlers::create_connect_session),
        )
        .route(
            "/api/bank/connections/:id",
            delete(handlers::delete_connection),
        )
        .route(
            "/api/bank/connections/:id/sync",
            post(handlers::sync_connection),
        )
        .route("/api/bank/callback", post(handlers::aggregator_callback))
        .route(
            "/api/bank/transactions/review",
            get(handlers::get_review),
        )
        .route(
            "/api/bank/transactions/:id/confirm",
            post(handlers::confirm_match),
        )
        .route(
            "/api/bank/transactions/:id/ignore",
            post(handlers::ignore_transaction),
        )
        .route(
            "/api/invoices/:id/payments",
            post(handlers::record_payment).get(handlers::get_payments),
        )
        .route("/api/payments/:id", delete(handlers::delete_payment))
        .layer(axum::middleware::from_fn_with_state(
            app_state.clone(),
            middleware::user_context::user_context_middleware,
        ))
        .layer(tower_http::cors::CorsLayer::permissive())
        .layer(tower_http::trace::TraceLayer::new_for_http())
        .with_state(app_state);

    let addr = format!("0.0.0.0:{}", config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!("Server listening on http://{}", addr);

    tokio::select! {
        result = axum::serve(listener, app) => {
            if let Err(e) = result {
                error!("Server error: {}", e);
            }
        }
        _ = shutdown_signal() => {
            info!("Shutting down gracefully...");
            scheduler.shutdown().await;
        }
    }

    Ok(())
}

async fn health_check() -> &'static str {
    "OK"
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("Shutdown signal received");
}
