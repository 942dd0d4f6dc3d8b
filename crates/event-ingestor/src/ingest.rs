//! Ingestion pipeline orchestration
//!
//! validate → persist as `pending` → publish with confirmation. A publish
//! failure after successful persistence is not an ingestion failure: the
//! event is durably stored and the sweeper will re-drive it.

use std::sync::Arc;

use shared::{Event, Result};

use crate::event_store::{EventStore, NewEvent};
use crate::publisher::EventPublisher;
use crate::validator::{EventValidator, RawEvent, RejectionReason, ValidationOutcome};

/// Outcome of ingesting a raw event
#[derive(Debug)]
pub enum IngestOutcome {
    /// Event validated and durably stored (publish may still be pending)
    Accepted(Event),
    /// Event rejected; the caller must correct the input
    Rejected(RejectionReason),
}

/// The ingestion-side pipeline: validation, persistence, publish
pub struct IngestPipeline {
    validator: EventValidator,
    events: Arc<dyn EventStore>,
    publisher: Arc<EventPublisher>,
}

impl IngestPipeline {
    pub fn new(
        validator: EventValidator,
        events: Arc<dyn EventStore>,
        publisher: Arc<EventPublisher>,
    ) -> Self {
        Self {
            validator,
            events,
            publisher,
        }
    }

    /// Ingest a raw sensor event
    ///
    /// Returns `Err` only for infrastructure failures; input problems come
    /// back as `IngestOutcome::Rejected`.
    pub async fn ingest(&self, raw: RawEvent) -> Result<IngestOutcome> {
        let valid = match self.validator.validate(&raw).await? {
            ValidationOutcome::Valid(valid) => valid,
            ValidationOutcome::Rejected(reason) => {
                return Ok(IngestOutcome::Rejected(reason));
            }
        };

        // Persist first: once this commits the event cannot be lost
        let event = self
            .events
            .create(&NewEvent::new(
                &valid.device_id,
                valid.payload,
                valid.occurred_at,
            ))
            .await?;

        tracing::info!(
            event_id = %event.id,
            device_id = %event.device_id,
            event_type = %event.payload.event_type(),
            "Event ingested"
        );

        if let Err(e) = self.publisher.publish(&event).await {
            // Surfaced for operators, not returned to the caller: the event
            // is stored and recoverable from the pending set
            tracing::error!(
                event_id = %event.id,
                error = %e,
                "Publish failed after persistence; event left pending for the sweeper"
            );
        }

        Ok(IngestOutcome::Accepted(event))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event_store::InMemoryEventStore;
    use crate::queue::InMemoryEventQueue;
    use crate::retry::RetryPolicy;
    use crate::sensor_cache::{InMemorySensorCache, SensorRegistry};
    use crate::sensor_store::InMemorySensorStore;
    use chrono::Utc;
    use shared::models::{DeviceType, EventPayload};
    use std::time::Duration;

    struct Fixture {
        pipeline: IngestPipeline,
        registry: SensorRegistry,
        events: Arc<InMemoryEventStore>,
        queue: Arc<InMemoryEventQueue>,
    }

    fn fixture() -> Fixture {
        let registry = SensorRegistry::new(
            Arc::new(InMemorySensorStore::new()),
            Arc::new(InMemorySensorCache::new()),
        );
        let events = Arc::new(InMemoryEventStore::new());
        let queue = Arc::new(InMemoryEventQueue::new());
        let publisher = Arc::new(EventPublisher::new(
            queue.clone(),
            events.clone(),
            RetryPolicy::new(2, Duration::from_millis(1), Duration::from_millis(2)),
        ));
        let pipeline = IngestPipeline::new(
            EventValidator::new(registry.clone()),
            events.clone(),
            publisher,
        );
        Fixture {
            pipeline,
            registry,
            events,
            queue,
        }
    }

    fn access_attempt(device_id: &str, user_id: &str) -> RawEvent {
        RawEvent {
            device_id: device_id.to_string(),
            timestamp: Utc::now().fixed_offset(),
            payload: EventPayload::AccessAttempt {
                user_id: user_id.to_string(),
            },
        }
    }

    #[tokio::test]
    async fn test_ingest_persists_and_publishes() {
        let f = fixture();
        f.registry
            .register("AA:BB:CC:DD:EE:FF", DeviceType::AccessController)
            .await
            .unwrap();

        let outcome = f
            .pipeline
            .ingest(access_attempt("AA:BB:CC:DD:EE:FF", "user_001"))
            .await
            .unwrap();

        let event = match outcome {
            IngestOutcome::Accepted(event) => event,
            other => panic!("expected accepted, got {:?}", other),
        };

        assert_eq!(f.events.get(event.id).unwrap().delivery_state, "published");
        let published = f.queue.published();
        assert_eq!(published.len(), 1);
        assert_eq!(published[0].message.event_id, event.id);
    }

    #[tokio::test]
    async fn test_rejected_event_is_not_stored() {
        let f = fixture();

        let outcome = f
            .pipeline
            .ingest(access_attempt("AA:BB:CC:DD:EE:FF", "user_001"))
            .await
            .unwrap();

        assert!(matches!(
            outcome,
            IngestOutcome::Rejected(RejectionReason::UnregisteredDevice(_))
        ));
        assert!(f.queue.published().is_empty());
    }

    #[tokio::test]
    async fn test_broker_outage_still_accepts_and_leaves_pending() {
        let f = fixture();
        f.registry
            .register("AA:BB:CC:DD:EE:FF", DeviceType::AccessController)
            .await
            .unwrap();
        f.queue.fail_next(10); // outlasts the retry budget

        let outcome = f
            .pipeline
            .ingest(access_attempt("AA:BB:CC:DD:EE:FF", "user_001"))
            .await
            .unwrap();

        // Ingestion succeeded: the event is durable, just not yet published
        let event = match outcome {
            IngestOutcome::Accepted(event) => event,
            other => panic!("expected accepted, got {:?}", other),
        };
        assert_eq!(f.events.get(event.id).unwrap().delivery_state, "pending");
        assert!(f.queue.published().is_empty());
    }
}
