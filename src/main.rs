//! Maintenance sweep entry point.
//!
//! Runs one sweep and exits; scheduling (cron, a Kubernetes CronJob) lives
//! outside the binary.

use std::sync::Arc;

use sqlx::postgres::PgPoolOptions;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use gatherly::adapters::cache::RedisEntitlementCache;
use gatherly::adapters::notifications::LogNotificationSender;
use gatherly::adapters::postgres::PostgresBillingStore;
use gatherly::application::{MaintenanceSweepHandler, SweepReport};
use gatherly::config::AppConfig;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    match run().await {
        Ok(report) => {
            info!(
                subscriptions_ended = report.subscriptions_ended,
                trial_notices_sent = report.trial_notices_sent,
                promotions_disabled = report.promotions_disabled,
                pending_grants_disabled = report.pending_grants_disabled,
                "Sweep complete"
            );
        }
        Err(e) => {
            error!(error = %e, "Sweep failed");
            std::process::exit(1);
        }
    }
}

async fn run() -> Result<SweepReport, Box<dyn std::error::Error>> {
    let config = AppConfig::load()?;
    config.validate()?;

    let pool = PgPoolOptions::new()
        .min_connections(config.database.min_connections)
        .max_connections(config.database.max_connections)
        .acquire_timeout(config.database.acquire_timeout())
        .connect(&config.database.url)
        .await?;

    if config.database.run_migrations {
        sqlx::migrate!("./migrations").run(&pool).await?;
    }

    let redis_client = redis::Client::open(config.redis.url.as_str())?;
    let redis_conn = redis_client.get_multiplexed_tokio_connection().await?;

    let store = Arc::new(PostgresBillingStore::new(pool));
    let notifier = Arc::new(LogNotificationSender::new());
    let cache = Arc::new(RedisEntitlementCache::new(redis_conn));

    let sweep = MaintenanceSweepHandler::new(
        store,
        notifier,
        cache,
        config.billing.expiring_soon_days,
        config.billing.sweep_batch_size,
    );

    Ok(sweep.run().await?)
}
