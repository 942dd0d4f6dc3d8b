//! Event consumer for reading deliveries from the broker queue
//!
//! Provides a trait-based abstraction for at-least-once consumption. A
//! delivery popped from the main queue is atomically moved into a processing
//! list, where it stays until the processor acks (removes) or nacks
//! (requeues) it. A worker crash leaves the delivery in the processing list;
//! the next startup reclaims it back onto the main queue.

use async_trait::async_trait;
use redis::aio::MultiplexedConnection;
use redis::{AsyncCommands, Direction};
use shared::{Delivery, SENSOR_EVENTS_DLQ, SENSOR_EVENTS_PROCESSING, SENSOR_EVENTS_QUEUE};
use std::collections::VecDeque;
use std::sync::Mutex;

use crate::error::{ProcessorError, ProcessorResult};

/// Event consumer trait for testability
#[async_trait]
pub trait EventConsumer: Send + Sync {
    /// Block and wait for the next delivery from the queue
    ///
    /// Returns `Some(Delivery)` if a delivery was received, `None` on
    /// timeout. The delivery is held in the processing list until acked or
    /// nacked.
    async fn consume(&self, timeout_secs: u64) -> ProcessorResult<Option<Delivery>>;

    /// Acknowledge a delivery: processing finished, drop it for good
    async fn ack(&self, delivery: &Delivery) -> ProcessorResult<()>;

    /// Negative-acknowledge a delivery: requeue it with the attempt count
    /// incremented
    async fn nack(&self, delivery: &Delivery) -> ProcessorResult<()>;

    /// Push deliveries stranded in the processing list by a previous crash
    /// back onto the main queue. Returns the number reclaimed.
    async fn reclaim_stranded(&self) -> ProcessorResult<u64>;
}

/// Redis-backed event consumer implementation
#[derive(Clone)]
pub struct RedisEventConsumer {
    conn: MultiplexedConnection,
    queue_name: String,
    processing_name: String,
}

impl RedisEventConsumer {
    /// Create a new Redis event consumer
    pub fn new(conn: MultiplexedConnection) -> Self {
        Self {
            conn,
            queue_name: SENSOR_EVENTS_QUEUE.to_string(),
            processing_name: SENSOR_EVENTS_PROCESSING.to_string(),
        }
    }
}

#[async_trait]
impl EventConsumer for RedisEventConsumer {
    async fn consume(&self, timeout_secs: u64) -> ProcessorResult<Option<Delivery>> {
        let mut conn = self.conn.clone();

        // BLMOVE pops from the main queue and pushes onto the processing
        // list in one atomic step, so the delivery is never in neither
        let result: Option<String> = conn
            .blmove(
                &self.queue_name,
                &self.processing_name,
                Direction::Right,
                Direction::Left,
                timeout_secs as f64,
            )
            .await
            .map_err(ProcessorError::Redis)?;

        match result {
            Some(json) => {
                let delivery: Delivery = match serde_json::from_str(&json) {
                    Ok(delivery) => delivery,
                    Err(e) => {
                        // Undecodable entries can never be processed; move
                        // the raw string straight to the DLQ so it cannot
                        // cycle through reclaim forever
                        tracing::error!(error = %e, "Undecodable delivery, dead-lettering raw entry");
                        conn.lpush::<_, _, ()>(SENSOR_EVENTS_DLQ, &json)
                            .await
                            .map_err(ProcessorError::Redis)?;
                        conn.lrem::<_, _, u64>(&self.processing_name, 1, &json)
                            .await
                            .map_err(ProcessorError::Redis)?;
                        return Ok(None);
                    }
                };

                tracing::debug!(
                    event_id = %delivery.message.event_id,
                    event_type = %delivery.message.event_type(),
                    attempts = delivery.attempts,
                    "Consumed delivery from queue"
                );

                Ok(Some(delivery))
            }
            None => {
                // Timeout, no delivery available
                Ok(None)
            }
        }
    }

    async fn ack(&self, delivery: &Delivery) -> ProcessorResult<()> {
        let json = serde_json::to_string(delivery)?;

        let mut conn = self.conn.clone();
        let removed: u64 = conn
            .lrem(&self.processing_name, 1, &json)
            .await
            .map_err(ProcessorError::Redis)?;

        if removed == 0 {
            // Already reclaimed by a restart; dedup absorbs the redelivery
            tracing::warn!(
                event_id = %delivery.message.event_id,
                "Acked delivery was not in the processing list"
            );
        }

        Ok(())
    }

    async fn nack(&self, delivery: &Delivery) -> ProcessorResult<()> {
        let requeued = delivery.next_attempt();
        let requeued_json = serde_json::to_string(&requeued)?;
        let original_json = serde_json::to_string(delivery)?;

        // Requeue before removing from the processing list: a crash in
        // between duplicates the delivery instead of losing it
        let mut conn = self.conn.clone();
        conn.lpush::<_, _, ()>(&self.queue_name, &requeued_json)
            .await
            .map_err(ProcessorError::Redis)?;
        conn.lrem::<_, _, u64>(&self.processing_name, 1, &original_json)
            .await
            .map_err(ProcessorError::Redis)?;

        tracing::debug!(
            event_id = %delivery.message.event_id,
            attempts = requeued.attempts,
            "Requeued delivery for retry"
        );

        Ok(())
    }

    async fn reclaim_stranded(&self) -> ProcessorResult<u64> {
        let mut conn = self.conn.clone();
        let mut reclaimed = 0u64;

        loop {
            let moved: Option<String> = conn
                .lmove(
                    &self.processing_name,
                    &self.queue_name,
                    Direction::Right,
                    Direction::Right,
                )
                .await
                .map_err(ProcessorError::Redis)?;

            if moved.is_none() {
                break;
            }
            reclaimed += 1;
        }

        if reclaimed > 0 {
            tracing::warn!(
                count = reclaimed,
                "Reclaimed deliveries stranded by a previous crash"
            );
        }

        Ok(reclaimed)
    }
}

/// In-memory event consumer for testing
///
/// Mirrors the Redis list semantics: consume moves a delivery from the queue
/// into a processing set, ack drops it, nack requeues the next attempt.
#[derive(Default)]
pub struct InMemoryEventConsumer {
    queue: Mutex<VecDeque<Delivery>>,
    processing: Mutex<Vec<Delivery>>,
}

impl InMemoryEventConsumer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Enqueue a delivery as the ingestor would
    pub fn push(&self, delivery: Delivery) {
        self.queue.lock().unwrap().push_back(delivery);
    }

    /// Remaining queued deliveries (for test inspection)
    pub fn queue_len(&self) -> usize {
        self.queue.lock().unwrap().len()
    }

    /// In-flight deliveries (for test inspection)
    pub fn processing(&self) -> Vec<Delivery> {
        self.processing.lock().unwrap().clone()
    }
}

#[async_trait]
impl EventConsumer for InMemoryEventConsumer {
    async fn consume(&self, _timeout_secs: u64) -> ProcessorResult<Option<Delivery>> {
        let popped = self.queue.lock().unwrap().pop_front();
        if let Some(delivery) = popped {
            self.processing.lock().unwrap().push(delivery.clone());
            Ok(Some(delivery))
        } else {
            Ok(None)
        }
    }

    async fn ack(&self, delivery: &Delivery) -> ProcessorResult<()> {
        self.processing
            .lock()
            .unwrap()
            .retain(|d| d != delivery);
        Ok(())
    }

    async fn nack(&self, delivery: &Delivery) -> ProcessorResult<()> {
        self.queue.lock().unwrap().push_back(delivery.next_attempt());
        self.processing
            .lock()
            .unwrap()
            .retain(|d| d != delivery);
        Ok(())
    }

    async fn reclaim_stranded(&self) -> ProcessorResult<u64> {
        let stranded: Vec<Delivery> = self.processing.lock().unwrap().drain(..).collect();
        let count = stranded.len() as u64;
        let mut queue = self.queue.lock().unwrap();
        for delivery in stranded {
            queue.push_back(delivery);
        }
        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use shared::models::EventPayload;
    use shared::EventMessage;
    use uuid::Uuid;

    fn sample_delivery() -> Delivery {
        Delivery::new(EventMessage::new(
            Uuid::new_v4(),
            "AA:BB:CC:DD:EE:FF",
            Utc::now().fixed_offset(),
            EventPayload::AccessAttempt {
                user_id: "user_001".to_string(),
            },
        ))
    }

    #[tokio::test]
    async fn test_consume_moves_delivery_to_processing() {
        let consumer = InMemoryEventConsumer::new();
        consumer.push(sample_delivery());

        let delivery = consumer.consume(1).await.unwrap().unwrap();
        assert_eq!(consumer.queue_len(), 0);
        assert_eq!(consumer.processing().len(), 1);
        assert_eq!(consumer.processing()[0], delivery);
    }

    #[tokio::test]
    async fn test_ack_removes_from_processing() {
        let consumer = InMemoryEventConsumer::new();
        consumer.push(sample_delivery());

        let delivery = consumer.consume(1).await.unwrap().unwrap();
        consumer.ack(&delivery).await.unwrap();

        assert_eq!(consumer.queue_len(), 0);
        assert!(consumer.processing().is_empty());
    }

    #[tokio::test]
    async fn test_nack_requeues_with_incremented_attempts() {
        let consumer = InMemoryEventConsumer::new();
        consumer.push(sample_delivery());

        let delivery = consumer.consume(1).await.unwrap().unwrap();
        consumer.nack(&delivery).await.unwrap();

        assert!(consumer.processing().is_empty());
        let requeued = consumer.consume(1).await.unwrap().unwrap();
        assert_eq!(requeued.attempts, 1);
        assert_eq!(requeued.message, delivery.message);
    }

    #[tokio::test]
    async fn test_consume_timeout_returns_none() {
        let consumer = InMemoryEventConsumer::new();
        assert!(consumer.consume(1).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_reclaim_returns_stranded_deliveries_to_queue() {
        let consumer = InMemoryEventConsumer::new();
        consumer.push(sample_delivery());
        consumer.push(sample_delivery());

        // Simulate a crash: two deliveries consumed but never acked
        consumer.consume(1).await.unwrap();
        consumer.consume(1).await.unwrap();
        assert_eq!(consumer.processing().len(), 2);

        let reclaimed = consumer.reclaim_stranded().await.unwrap();
        assert_eq!(reclaimed, 2);
        assert_eq!(consumer.queue_len(), 2);
        assert!(consumer.processing().is_empty());
    }
}
