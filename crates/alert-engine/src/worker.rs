//! Worker pool driving the consume/process loop
//!
//! A fixed number of workers block on the queue and run each delivery
//! through the processor. Infrastructure failures are logged and the loop
//! continues after a short pause; the unacked delivery stays in the
//! processing list and is reclaimed on the next startup.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use shared::PipelineConfig;
use tokio_util::sync::CancellationToken;

use crate::consumer::EventConsumer;
use crate::processor::EventProcessor;

/// Pause after an infrastructure failure before retrying
const FAILURE_BACKOFF: Duration = Duration::from_secs(1);

/// Spawn the worker pool and wait for all workers to stop
pub async fn run_worker_pool(
    consumer: Arc<dyn EventConsumer>,
    processor: Arc<EventProcessor>,
    config: PipelineConfig,
    shutdown: CancellationToken,
) -> Result<()> {
    // Deliveries stranded by a previous crash go back onto the main queue
    // before any worker starts consuming
    let reclaimed = consumer.reclaim_stranded().await?;
    if reclaimed > 0 {
        tracing::info!(count = reclaimed, "Stranded deliveries returned to queue");
    }

    let mut handles = Vec::with_capacity(config.consumer_workers);
    for worker_id in 0..config.consumer_workers {
        handles.push(tokio::spawn(run_worker(
            worker_id,
            consumer.clone(),
            processor.clone(),
            config.consume_timeout_secs,
            shutdown.clone(),
        )));
    }

    tracing::info!(workers = config.consumer_workers, "Worker pool started");

    for handle in handles {
        if let Err(e) = handle.await {
            tracing::error!(error = %e, "Worker task panicked");
        }
    }

    Ok(())
}

/// Single worker loop: consume, process, repeat until cancelled
async fn run_worker(
    worker_id: usize,
    consumer: Arc<dyn EventConsumer>,
    processor: Arc<EventProcessor>,
    consume_timeout_secs: u64,
    shutdown: CancellationToken,
) {
    tracing::info!(worker_id = worker_id, "Worker started");

    loop {
        let consumed = tokio::select! {
            _ = shutdown.cancelled() => {
                tracing::info!(worker_id = worker_id, "Worker stopping");
                return;
            }
            result = consumer.consume(consume_timeout_secs) => result,
        };

        let delivery = match consumed {
            Ok(Some(delivery)) => delivery,
            Ok(None) => continue, // timeout, loop back to check for shutdown
            Err(e) => {
                tracing::error!(worker_id = worker_id, error = %e, "Consume failed");
                tokio::time::sleep(FAILURE_BACKOFF).await;
                continue;
            }
        };

        if let Err(e) = processor.process(&delivery).await {
            // Ack/nack/DLQ plumbing failed; the delivery stays in the
            // processing list and is reclaimed on restart
            tracing::error!(
                worker_id = worker_id,
                event_id = %delivery.message.event_id,
                error = %e,
                "Failed to resolve delivery"
            );
            tokio::time::sleep(FAILURE_BACKOFF).await;
        }
    }
}
