//! Confirmed event publishing
//!
//! Publishes stored events to the broker and advances their delivery state.
//! The ordering is publish-after-persist: the event row already exists in
//! state `pending` when `publish` is called, so a crash at any point here
//! leaves a recoverable row rather than a lost event.

use std::sync::Arc;

use shared::{Delivery, EventMessage};
use thiserror::Error;
use uuid::Uuid;

use crate::event_store::EventStore;
use crate::queue::EventQueue;
use crate::retry::{execute_with_retry, RetryPolicy};

/// Why a publish attempt ultimately failed
#[derive(Debug, Error)]
pub enum PublishError {
    /// Broker rejected or never confirmed the enqueue, retries exhausted.
    /// The event remains `pending` and will be re-driven by the sweeper.
    #[error("broker publish failed for event {event_id}: {source}")]
    Broker {
        event_id: Uuid,
        #[source]
        source: anyhow::Error,
    },

    /// The broker confirmed but the delivery-state update failed. The
    /// message is in flight and the row stays `pending`; the sweeper will
    /// re-publish and the consumer's dedup absorbs the duplicate.
    #[error("failed to mark event {event_id} published: {source}")]
    Store {
        event_id: Uuid,
        #[source]
        source: shared::Error,
    },
}

/// Publishes validated events with confirmation and bounded retry
pub struct EventPublisher {
    queue: Arc<dyn EventQueue>,
    events: Arc<dyn EventStore>,
    policy: RetryPolicy,
}

impl EventPublisher {
    pub fn new(queue: Arc<dyn EventQueue>, events: Arc<dyn EventStore>, policy: RetryPolicy) -> Self {
        Self {
            queue,
            events,
            policy,
        }
    }

    /// Publish a stored event and mark it `published`
    ///
    /// Retries transient broker failures with exponential backoff. On
    /// exhaustion the failure is surfaced, never swallowed: the caller logs
    /// it and the event stays in the `pending` set for the sweeper.
    pub async fn publish(&self, event: &shared::Event) -> Result<(), PublishError> {
        let message = EventMessage::new(
            event.id,
            &event.device_id,
            event.occurred_at_local(),
            event.payload.clone(),
        );
        let delivery = Delivery::new(message);

        execute_with_retry(&self.policy, || self.queue.publish(&delivery))
            .await
            .map_err(|source| PublishError::Broker {
                event_id: event.id,
                source,
            })?;

        self.events
            .mark_published(event.id)
            .await
            .map_err(|source| PublishError::Store {
                event_id: event.id,
                source,
            })?;

        tracing::info!(
            event_id = %event.id,
            event_type = %event.payload.event_type(),
            "Event published"
        );

        Ok(())
    }
}
