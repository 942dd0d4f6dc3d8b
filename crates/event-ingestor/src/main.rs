//! Event Ingestor for iot-sentinel
//!
//! Ingestion-side service: pops raw sensor events off the inbound Redis
//! list, validates them against the sensor registry, persists them, and
//! publishes them to the broker with confirmation. Also runs the
//! pending-event sweeper that re-drives events stuck between persistence
//! and broker confirmation.

use std::sync::Arc;

use anyhow::{Context, Result};
use event_ingestor::retry::RetryPolicy;
use event_ingestor::{
    intake, sweeper, EventPublisher, EventStore, EventValidator, IngestPipeline, PgEventStore,
    PgSensorStore, RedisEventQueue, RedisSensorCache, SensorRegistry,
};
use shared::{db, Config, EntityCache};
use tokio::signal;
use tokio_util::sync::CancellationToken;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    shared::init_tracing();

    tracing::info!("Starting Event Ingestor...");

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

    // Assemble the pipeline
    let registry = SensorRegistry::new(
        Arc::new(PgSensorStore::new(db_pool.clone())),
        Arc::new(RedisSensorCache::new(
            EntityCache::new(redis_manager),
            &config.pipeline,
        )),
    );

    let events: Arc<dyn EventStore> = Arc::new(PgEventStore::new(db_pool.clone()));
    let publisher = Arc::new(EventPublisher::new(
        Arc::new(RedisEventQueue::new(redis_conn.clone())),
        events.clone(),
        RetryPolicy::from_config(&config.pipeline),
    ));
    let pipeline = Arc::new(IngestPipeline::new(
        EventValidator::new(registry),
        events.clone(),
        publisher.clone(),
    ));

    let shutdown = CancellationToken::new();

    let mut intake_handle = tokio::spawn({
        let pipeline_config = config.pipeline.clone();
        let shutdown = shutdown.clone();
        async move { intake::run_intake_loop(redis_conn, pipeline, pipeline_config, shutdown).await }
    });

    let mut sweeper_handle = tokio::spawn({
        let pipeline_config = config.pipeline.clone();
        let shutdown = shutdown.clone();
        async move { sweeper::run_pending_sweeper(events, publisher, pipeline_config, shutdown).await }
    });

    // Wait for shutdown signal OR either loop failing
    tokio::select! {
        result = signal::ctrl_c() => {
            result.context("Failed to listen for shutdown signal")?;
            tracing::info!("Shutdown signal received, stopping Event Ingestor...");
            shutdown.cancel();
            // Let both loops finish their current iteration before exiting
            drain("Raw event intake", intake_handle).await;
            drain("Pending-event sweeper", sweeper_handle).await;
        }
        result = &mut intake_handle => {
            return exit_error("Raw event intake", result);
        }
        result = &mut sweeper_handle => {
            return exit_error("Pending-event sweeper", result);
        }
    }

    Ok(())
}

/// Await a background task during shutdown, logging any failure
async fn drain(task: &str, handle: tokio::task::JoinHandle<Result<()>>) {
    match handle.await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => tracing::error!("{} failed during shutdown: {:#}", task, e),
        Err(e) => tracing::error!("{} task panicked during shutdown: {}", task, e),
    }
}

/// Turn a finished background task into the process exit error
fn exit_error(task: &str, result: std::result::Result<Result<()>, tokio::task::JoinError>) -> Result<()> {
    match result {
        Ok(Ok(())) => {
            tracing::warn!("{} exited cleanly (unexpected)", task);
            Ok(())
        }
        Ok(Err(e)) => {
            tracing::error!("{} failed: {:#}", task, e);
            Err(e.context(format!("{task} failed")))
        }
        Err(e) => {
            tracing::error!("{} task panicked: {}", task, e);
            anyhow::bail!("{task} task panicked: {e}")
        }
    }
}
