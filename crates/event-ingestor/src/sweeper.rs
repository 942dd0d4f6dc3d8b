//! Pending-event sweeper
//!
//! Backstop for the outbox: a crash between persisting an event and getting
//! the broker confirmation leaves the row `pending`. This loop periodically
//! re-drives such rows past a grace period, so no validated event is ever
//! silently dropped. Redelivery is safe because consumption is
//! dedup-guarded.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use chrono::Utc;
use shared::PipelineConfig;
use tokio_util::sync::CancellationToken;

use crate::event_store::EventStore;
use crate::publisher::EventPublisher;

/// Upper bound on rows re-driven per sweep
const SWEEP_BATCH_SIZE: i64 = 100;

/// Run the pending-event sweep loop until cancelled
pub async fn run_pending_sweeper(
    events: Arc<dyn EventStore>,
    publisher: Arc<EventPublisher>,
    config: PipelineConfig,
    shutdown: CancellationToken,
) -> Result<()> {
    let mut interval = tokio::time::interval(Duration::from_secs(config.pending_sweep_interval_secs));
    // The first tick fires immediately; skip it so a restart doesn't race
    // in-flight publishes that are simply slow
    interval.tick().await;

    tracing::info!(
        interval_secs = config.pending_sweep_interval_secs,
        grace_secs = config.pending_grace_secs,
        "Pending-event sweeper started"
    );

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => {
                tracing::info!("Pending-event sweeper stopping");
                return Ok(());
            }
            _ = interval.tick() => {
                if let Err(e) = sweep_once(&events, &publisher, &config).await {
                    tracing::error!(error = %e, "Pending-event sweep failed");
                }
            }
        }
    }
}

/// Re-publish events stuck in `pending` past the grace period
async fn sweep_once(
    events: &Arc<dyn EventStore>,
    publisher: &Arc<EventPublisher>,
    config: &PipelineConfig,
) -> Result<()> {
    let cutoff = Utc::now() - chrono::Duration::seconds(config.pending_grace_secs);
    let stuck = events.fetch_stuck_pending(cutoff, SWEEP_BATCH_SIZE).await?;

    if stuck.is_empty() {
        return Ok(());
    }

    tracing::warn!(count = stuck.len(), "Re-driving events stuck in pending");

    for event in &stuck {
        match publisher.publish(event).await {
            Ok(()) => {
                tracing::info!(event_id = %event.id, "Stuck pending event re-published");
            }
            Err(e) => {
                // Left pending; the next sweep will pick it up again
                tracing::error!(event_id = %event.id, error = %e, "Re-publish failed");
            }
        }
    }

    Ok(())
}
