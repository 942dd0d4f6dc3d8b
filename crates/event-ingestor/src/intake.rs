//! Raw event intake loop
//!
//! Device gateways drop raw JSON events onto an inbound Redis list; this
//! loop pops them and feeds the ingestion pipeline. Undecodable entries are
//! logged and dropped. Infrastructure failures push the entry back so it is
//! retried once the dependency recovers.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use redis::aio::MultiplexedConnection;
use redis::AsyncCommands;
use shared::{PipelineConfig, RAW_SENSOR_EVENTS_QUEUE};
use tokio_util::sync::CancellationToken;

use crate::ingest::{IngestOutcome, IngestPipeline};
use crate::validator::RawEvent;

/// Pause after an infrastructure failure before retrying
const FAILURE_BACKOFF: Duration = Duration::from_secs(1);

/// Run the raw-event intake loop until cancelled
pub async fn run_intake_loop(
    conn: MultiplexedConnection,
    pipeline: Arc<IngestPipeline>,
    config: PipelineConfig,
    shutdown: CancellationToken,
) -> Result<()> {
    tracing::info!(queue = RAW_SENSOR_EVENTS_QUEUE, "Raw event intake started");

    let timeout = config.consume_timeout_secs as f64;
    let mut conn = conn;

    loop {
        let popped = tokio::select! {
            _ = shutdown.cancelled() => {
                tracing::info!("Raw event intake stopping");
                return Ok(());
            }
            result = async {
                conn.brpop::<_, Option<(String, String)>>(RAW_SENSOR_EVENTS_QUEUE, timeout).await
            } => result.context("Failed to pop from raw event queue")?,
        };

        let Some((_, raw_json)) = popped else {
            continue; // timeout, loop back to check for shutdown
        };

        let raw: RawEvent = match serde_json::from_str(&raw_json) {
            Ok(raw) => raw,
            Err(e) => {
                tracing::warn!(error = %e, "Dropping undecodable raw event");
                continue;
            }
        };

        match pipeline.ingest(raw).await {
            Ok(IngestOutcome::Accepted(event)) => {
                tracing::debug!(event_id = %event.id, "Raw event accepted");
            }
            Ok(IngestOutcome::Rejected(reason)) => {
                tracing::warn!(reason = %reason, "Raw event rejected");
            }
            Err(e) => {
                // Push back to the tail so the entry is retried after the
                // dependency recovers
                tracing::error!(error = %e, "Ingestion failed, requeuing raw event");
                if let Err(push_err) = conn
                    .rpush::<_, _, ()>(RAW_SENSOR_EVENTS_QUEUE, &raw_json)
                    .await
                {
                    tracing::error!(error = %push_err, "Failed to requeue raw event; entry lost");
                }
                tokio::time::sleep(FAILURE_BACKOFF).await;
            }
        }
    }
}
