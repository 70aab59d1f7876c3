use std::sync::Arc;

use tokio_cron_scheduler::{Job, JobScheduler};
use tracing::info;

use crate::config::Config;
use crate::database::DatabasePool;
use crate::services::aggregator::BankAggregator;
use crate::services::importer;

/// Periodic trigger for the sync orchestrator. Retry policy lives here and
/// nowhere in the sync loop itself: a failed connection simply waits for the
/// next pass.
pub struct BackgroundScheduler {
    #[allow(dead_code)]
    scheduler: Arc<JobScheduler>,
}

impl BackgroundScheduler {
    pub async fn new(
        db_pool: DatabasePool,
        config: Arc<Config>,
        aggregator: Arc<dyn BankAggregator>,
    ) -> anyhow::Result<Self> {
        let scheduler = JobScheduler::new().await?;

        // Hourly sync pass over all connections.
        scheduler
            .add(Job::new_async("0 0 * * * *", move |_uuid, _l| {
                let pool = db_pool.clone();
                let config = config.clone();
                let aggregator = aggregator.clone();
                Box::pin(async move {
                    info!("Periodic bank sync pass starting");
                    if let Err(e) =
                        importer::sync_all_connections(&pool, &*aggregator, &config).await
                    {
                        tracing::error!("Periodic sync pass failed: {:?}", e);
                    }
                })
            })?)
            .await?;

        scheduler.start().await?;
        info!("Background scheduler started");

        Ok(Self {
            scheduler: Arc::new(scheduler),
        })
    }

    pub async fn shutdown(&self) {
        // JobScheduler shuts down when dropped.
        info!("Background scheduler stopped");
    }
}
