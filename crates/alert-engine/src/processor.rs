//! Per-delivery processing state machine
//!
//! received → duplicate-skip(ack)
//!          → evaluate → persist alert → mark processed → ack
//!          → transient failure → nack(requeue) until the attempt budget is
//!            spent, then dead-letter
//!          → permanent failure → dead-letter immediately
//!
//! Acking only after the outcome is durable keeps the pipeline
//! at-least-once; the processed-event log turns redelivery into a no-op.

use std::sync::Arc;

use shared::{Delivery, PipelineConfig};

use crate::alert_store::{AlertStore, PersistOutcome};
use crate::authorized_users::AuthorizedUserLookup;
use crate::consumer::EventConsumer;
use crate::dedup::ProcessedEventLog;
use crate::dlq::{DeadLetterQueue, DlqEntry};
use crate::error::ProcessorResult;
use crate::rules;

/// How a delivery was resolved
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessOutcome {
    /// Already processed; acked without effect
    Duplicate,
    /// Rules evaluated, no alert warranted
    NoAlert,
    /// An alert was created (or already existed from a racing worker)
    AlertRaised,
    /// Transient failure; requeued for another attempt
    Requeued,
    /// Moved to the dead letter queue
    DeadLettered,
}

/// Processes consumed deliveries through the rule engine
pub struct EventProcessor {
    consumer: Arc<dyn EventConsumer>,
    users: Arc<dyn AuthorizedUserLookup>,
    alerts: Arc<dyn AlertStore>,
    processed: Arc<dyn ProcessedEventLog>,
    dlq: Arc<dyn DeadLetterQueue>,
    config: PipelineConfig,
}

impl EventProcessor {
    pub fn new(
        consumer: Arc<dyn EventConsumer>,
        users: Arc<dyn AuthorizedUserLookup>,
        alerts: Arc<dyn AlertStore>,
        processed: Arc<dyn ProcessedEventLog>,
        dlq: Arc<dyn DeadLetterQueue>,
        config: PipelineConfig,
    ) -> Self {
        Self {
            consumer,
            users,
            alerts,
            processed,
            dlq,
            config,
        }
    }

    /// Process a single delivery end to end, including ack/nack
    pub async fn process(&self, delivery: &Delivery) -> ProcessorResult<ProcessOutcome> {
        let event_id = delivery.message.event_id;

        match self.try_process(delivery).await {
            Ok(outcome) => {
                self.consumer.ack(delivery).await?;
                Ok(outcome)
            }
            Err(e) if e.is_retryable() => {
                let attempts_made = delivery.attempts + 1;
                if attempts_made >= self.config.max_delivery_attempts {
                    tracing::error!(
                        event_id = %event_id,
                        attempts = attempts_made,
                        error = %e,
                        "Attempt budget spent, dead-lettering delivery"
                    );
                    self.dlq
                        .push(DlqEntry::new(delivery.next_attempt(), e.to_string()))
                        .await?;
                    self.consumer.ack(delivery).await?;
                    Ok(ProcessOutcome::DeadLettered)
                } else {
                    tracing::warn!(
                        event_id = %event_id,
                        attempts = attempts_made,
                        max_attempts = self.config.max_delivery_attempts,
                        error = %e,
                        "Processing failed, requeuing delivery"
                    );
                    self.consumer.nack(delivery).await?;
                    Ok(ProcessOutcome::Requeued)
                }
            }
            Err(e) => {
                // Permanent failure: retrying can never succeed
                tracing::error!(
                    event_id = %event_id,
                    error = %e,
                    "Permanent failure, dead-lettering delivery"
                );
                self.dlq
                    .push(DlqEntry::new(delivery.clone(), e.to_string()))
                    .await?;
                self.consumer.ack(delivery).await?;
                Ok(ProcessOutcome::DeadLettered)
            }
        }
    }

    /// The happy path: dedup check, rule evaluation, persistence, mark
    async fn try_process(&self, delivery: &Delivery) -> ProcessorResult<ProcessOutcome> {
        let message = &delivery.message;

        if self.processed.is_processed(message.event_id).await? {
            tracing::debug!(
                event_id = %message.event_id,
                "Duplicate delivery, skipping"
            );
            return Ok(ProcessOutcome::Duplicate);
        }

        let decision = rules::evaluate(message, self.users.as_ref(), &self.config).await?;

        let outcome = match decision {
            Some(decision) => {
                match self.alerts.persist(&decision).await? {
                    PersistOutcome::Created(_) => {}
                    PersistOutcome::AlreadyExists => {
                        // A racing worker won; same end state
                        tracing::debug!(
                            event_id = %message.event_id,
                            "Alert already persisted by another worker"
                        );
                    }
                }
                ProcessOutcome::AlertRaised
            }
            None => ProcessOutcome::NoAlert,
        };

        self.processed.mark_processed(message.event_id).await?;
        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alert_store::InMemoryAlertStore;
    use crate::authorized_users::InMemoryAuthorizedUsers;
    use crate::consumer::InMemoryEventConsumer;
    use crate::dedup::InMemoryProcessedEventLog;
    use crate::dlq::InMemoryDlq;
    use crate::error::ProcessorError;
    use crate::rules::AlertDecision;
    use async_trait::async_trait;
    use chrono::Utc;
    use mockall::mock;
    use shared::models::EventPayload;
    use shared::EventMessage;
    use uuid::Uuid;

    mock! {
        pub AlertStore {}

        #[async_trait]
        impl AlertStore for AlertStore {
            async fn persist(&self, decision: &AlertDecision) -> ProcessorResult<PersistOutcome>;
        }
    }

    struct Fixture {
        processor: EventProcessor,
        consumer: Arc<InMemoryEventConsumer>,
        alerts: Arc<InMemoryAlertStore>,
        dlq: Arc<InMemoryDlq>,
        processed: Arc<InMemoryProcessedEventLog>,
    }

    fn fixture(users: InMemoryAuthorizedUsers) -> Fixture {
        let consumer = Arc::new(InMemoryEventConsumer::new());
        let alerts = Arc::new(InMemoryAlertStore::new());
        let dlq = Arc::new(InMemoryDlq::new());
        let processed = Arc::new(InMemoryProcessedEventLog::new());
        let processor = EventProcessor::new(
            consumer.clone(),
            Arc::new(users),
            alerts.clone(),
            processed.clone(),
            dlq.clone(),
            PipelineConfig::default(),
        );
        Fixture {
            processor,
            consumer,
            alerts,
            dlq,
            processed,
        }
    }

    fn speeding_delivery() -> Delivery {
        Delivery::new(EventMessage::new(
            Uuid::new_v4(),
            "AA:BB:CC:DD:EE:FF",
            Utc::now().fixed_offset(),
            EventPayload::SpeedViolation {
                speed_kmh: 120.0,
                location: "Main St".to_string(),
            },
        ))
    }

    #[tokio::test]
    async fn test_alert_raised_and_acked() {
        let f = fixture(InMemoryAuthorizedUsers::new());
        let delivery = speeding_delivery();
        f.consumer.push(delivery.clone());
        f.consumer.consume(1).await.unwrap();

        let outcome = f.processor.process(&delivery).await.unwrap();

        assert_eq!(outcome, ProcessOutcome::AlertRaised);
        assert_eq!(f.alerts.alerts().len(), 1);
        assert!(f.consumer.processing().is_empty());
        assert!(f
            .processed
            .is_processed(delivery.message.event_id)
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn test_duplicate_delivery_is_acked_without_effect() {
        let f = fixture(InMemoryAuthorizedUsers::new());
        let delivery = speeding_delivery();

        f.processor.process(&delivery).await.unwrap();
        let second = f.processor.process(&delivery).await.unwrap();

        assert_eq!(second, ProcessOutcome::Duplicate);
        assert_eq!(f.alerts.alerts().len(), 1);
    }

    #[tokio::test]
    async fn test_no_alert_still_marks_processed() {
        let f = fixture(InMemoryAuthorizedUsers::with_users(&["user_001"]));
        let delivery = Delivery::new(EventMessage::new(
            Uuid::new_v4(),
            "AA:BB:CC:DD:EE:FF",
            Utc::now().fixed_offset(),
            EventPayload::AccessAttempt {
                user_id: "user_001".to_string(),
            },
        ));

        let outcome = f.processor.process(&delivery).await.unwrap();

        assert_eq!(outcome, ProcessOutcome::NoAlert);
        assert!(f.alerts.alerts().is_empty());
        assert!(f
            .processed
            .is_processed(delivery.message.event_id)
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn test_persist_failure_requeues_delivery() {
        let mut alerts = MockAlertStore::new();
        alerts
            .expect_persist()
            .times(1)
            .returning(|_| Err(ProcessorError::Database(sqlx::Error::PoolTimedOut)));

        let consumer = Arc::new(InMemoryEventConsumer::new());
        let processed = Arc::new(InMemoryProcessedEventLog::new());
        let processor = EventProcessor::new(
            consumer.clone(),
            Arc::new(InMemoryAuthorizedUsers::new()),
            Arc::new(alerts),
            processed.clone(),
            Arc::new(InMemoryDlq::new()),
            PipelineConfig::default(),
        );

        let delivery = speeding_delivery();
        let outcome = processor.process(&delivery).await.unwrap();

        assert_eq!(outcome, ProcessOutcome::Requeued);
        // Not marked processed: the redelivery must evaluate again
        assert!(!processed
            .is_processed(delivery.message.event_id)
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn test_final_attempt_goes_to_dlq() {
        // A lookup that always fails with a retryable error
        struct FailingLookup;

        #[async_trait::async_trait]
        impl AuthorizedUserLookup for FailingLookup {
            async fn is_authorized(&self, _user_id: &str) -> ProcessorResult<bool> {
                Err(ProcessorError::queue("connection lost"))
            }
        }

        let consumer = Arc::new(InMemoryEventConsumer::new());
        let dlq = Arc::new(InMemoryDlq::new());
        let config = PipelineConfig::default();
        let processor = EventProcessor::new(
            consumer.clone(),
            Arc::new(FailingLookup),
            Arc::new(InMemoryAlertStore::new()),
            Arc::new(InMemoryProcessedEventLog::new()),
            dlq.clone(),
            config.clone(),
        );

        let mut delivery = Delivery::new(EventMessage::new(
            Uuid::new_v4(),
            "AA:BB:CC:DD:EE:FF",
            Utc::now().fixed_offset(),
            EventPayload::AccessAttempt {
                user_id: "user_001".to_string(),
            },
        ));

        // Earlier attempts are requeued
        let outcome = processor.process(&delivery).await.unwrap();
        assert_eq!(outcome, ProcessOutcome::Requeued);

        // On the final attempt the delivery is dead-lettered
        delivery.attempts = config.max_delivery_attempts - 1;
        let outcome = processor.process(&delivery).await.unwrap();
        assert_eq!(outcome, ProcessOutcome::DeadLettered);

        let entries = dlq.entries();
        assert_eq!(entries.len(), 1);
        assert_eq!(
            entries[0].delivery.message.event_id,
            delivery.message.event_id
        );
    }
}
