//! Alert Engine for iot-sentinel
//!
//! Consumes sensor-event deliveries from the broker queue and evaluates them
//! against the alert rules.

use std::sync::Arc;

use alert_engine::{
    worker, AuthorizedUserCache, EventProcessor, PgAlertStore, PgAuthorizedUserStore,
    PgProcessedEventLog, RedisDlq, RedisEventConsumer, RedisMembershipCache,
};
use anyhow::{Context, Result};
use shared::{db, Config, EntityCache};
use tokio::signal;
use tokio_util::sync::CancellationToken;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    shared::init_tracing();

    tracing::info!("Starting Alert Engine...");

    // Load configuration
    let config = Config::from_env().context("Failed to load configuration")?;

    // Create database connection pool
    let db_pool = db::create_pool(&config.database)
        .await
        .context("Failed to create database pool")?;

    // Check database health
    db::check_health(&db_pool)
        .await
        .context("Database health check failed")?;

    // Create Redis connections: connection manager for the cache layer,
    // multiplexed connection for the queues
    let redis_client = redis::Client::open(config.redis.connection_url())
        .context("Failed to create Redis client")?;

    let redis_manager = redis::aio::ConnectionManager::new(redis_client.clone())
        .await
        .context("Failed to create Redis connection manager")?;

    let redis_conn = redis_client
        .get_multiplexed_async_connection()
        .await
        .context("Failed to connect to Redis")?;

    tracing::info!("Connected to Redis");

    // Assemble the processing pipeline
    let consumer: Arc<dyn alert_engine::EventConsumer> =
        Arc::new(RedisEventConsumer::new(redis_conn.clone()));
    let users = Arc::new(AuthorizedUserCache::new(
        Arc::new(PgAuthorizedUserStore::new(db_pool.clone())),
        Arc::new(RedisMembershipCache::new(
            EntityCache::new(redis_manager),
            &config.pipeline,
        )),
    ));
    let processed = Arc::new(PgProcessedEventLog::new(db_pool.clone()));
    let processor = Arc::new(EventProcessor::new(
        consumer.clone(),
        users,
        Arc::new(PgAlertStore::new(db_pool.clone())),
        processed.clone(),
        Arc::new(RedisDlq::new(redis_conn)),
        config.pipeline.clone(),
    ));

    let shutdown = CancellationToken::new();

    // Hourly retention pass over the processed-event log
    let prune_handle = tokio::spawn({
        let processed = processed.clone();
        let window = chrono::Duration::seconds(config.pipeline.dedup_window_secs);
        let shutdown = shutdown.clone();
        async move {
            let mut ticker = tokio::time::interval(std::time::Duration::from_secs(3600));
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = ticker.tick() => {
                        match processed.prune(window).await {
                            Ok(0) => {}
                            Ok(n) => tracing::info!(pruned = n, "Pruned expired processed-event records"),
                            Err(e) => tracing::warn!("Processed-event prune failed: {}", e),
                        }
                    }
                }
            }
        }
    });

    let mut pool_handle = tokio::spawn({
        let consumer = consumer.clone();
        let pipeline_config = config.pipeline.clone();
        let shutdown = shutdown.clone();
        async move { worker::run_worker_pool(consumer, processor, pipeline_config, shutdown).await }
    });

    // Wait for either shutdown signal OR pool failure
    tokio::select! {
        result = signal::ctrl_c() => {
            result.context("Failed to listen for shutdown signal")?;
            tracing::info!("Shutdown signal received, stopping Alert Engine...");
            shutdown.cancel();
            // Let in-flight deliveries resolve before exiting
            match pool_handle.await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => tracing::error!("Worker pool failed during shutdown: {:#}", e),
                Err(e) => tracing::error!("Worker pool task panicked during shutdown: {}", e),
            }
            let _ = prune_handle.await;
        }
        result = &mut pool_handle => {
            prune_handle.abort();
            match result {
                Ok(Ok(())) => {
                    tracing::warn!("Worker pool exited cleanly (unexpected)");
                }
                Ok(Err(e)) => {
                    tracing::error!("Worker pool failed: {:#}", e);
                    return Err(e.context("Worker pool failed"));
                }
                Err(e) => {
                    tracing::error!("Worker pool task panicked: {}", e);
                    anyhow::bail!("Worker pool task panicked: {}", e);
                }
            }
        }
    }

    Ok(())
}
