// Library root - exports for testing

pub mod background;
pub mod config;
pub mod database;
pub mod error;
pub mod handlers;
pub mod middleware;
pub mod models;
pub mod services;

pub use config::Config;
pub use error::{ServiceError, ServiceResult};

use database::DatabasePool;
use services::aggregator::BankAggregator;
use std::sync::Arc;

#[derive(Clone)]
pub struct AppState {
    pub db_pool: DatabasePool,
    pub config: Arc<Config>,
    pub aggregator: Arc<dyn BankAggregator>,
}
