//! Alert persistence gateway
//!
//! Alert creation is idempotent on the source event id: the table's unique
//! constraint on `event_id` decides races between concurrent workers, so a
//! duplicate delivery persists nothing and reports `AlreadyExists`.

use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;
use shared::{Alert, DbPool};
use uuid::Uuid;

use crate::error::{ProcessorError, ProcessorResult};
use crate::rules::AlertDecision;

/// Result of persisting an alert decision
#[derive(Debug, Clone)]
pub enum PersistOutcome {
    /// A new alert row was created
    Created(Alert),
    /// An alert for this event id already exists; success without effect
    AlreadyExists,
}

/// Alert store trait for testability
#[async_trait]
pub trait AlertStore: Send + Sync {
    /// Persist an alert decision, deduplicated by event id
    async fn persist(&self, decision: &AlertDecision) -> ProcessorResult<PersistOutcome>;
}

/// PostgreSQL-backed alert store
pub struct PgAlertStore {
    pool: DbPool,
}

impl PgAlertStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl AlertStore for PgAlertStore {
    async fn persist(&self, decision: &AlertDecision) -> ProcessorResult<PersistOutcome> {
        let alert = sqlx::query_as::<_, Alert>(
            r#"
            INSERT INTO alerts (id, event_id, device_id, alert_type, details, occurred_at, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, NOW())
            ON CONFLICT (event_id) DO NOTHING
            RETURNING id, event_id, device_id, alert_type, details, occurred_at, created_at
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(decision.event_id)
        .bind(&decision.device_id)
        .bind(decision.alert_type.to_string())
        .bind(sqlx::types::Json(&decision.details))
        .bind(decision.occurred_at)
        .fetch_optional(&self.pool)
        .await
        .map_err(ProcessorError::Database)?;

        match alert {
            Some(alert) => {
                tracing::info!(
                    alert_id = %alert.id,
                    event_id = %alert.event_id,
                    alert_type = %alert.alert_type,
                    "Alert created"
                );
                Ok(PersistOutcome::Created(alert))
            }
            None => {
                tracing::debug!(
                    event_id = %decision.event_id,
                    "Alert already exists for event, skipping"
                );
                Ok(PersistOutcome::AlreadyExists)
            }
        }
    }
}

/// In-memory alert store for testing
#[derive(Default)]
pub struct InMemoryAlertStore {
    by_event: DashMap<Uuid, Alert>,
}

impl InMemoryAlertStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// All stored alerts (for test inspection)
    pub fn alerts(&self) -> Vec<Alert> {
        self.by_event.iter().map(|e| e.value().clone()).collect()
    }
}

#[async_trait]
impl AlertStore for InMemoryAlertStore {
    async fn persist(&self, decision: &AlertDecision) -> ProcessorResult<PersistOutcome> {
        if self.by_event.contains_key(&decision.event_id) {
            return Ok(PersistOutcome::AlreadyExists);
        }

        let alert = Alert {
            id: Uuid::new_v4(),
            event_id: decision.event_id,
            device_id: decision.device_id.clone(),
            alert_type: decision.alert_type.to_string(),
            details: decision.details.clone(),
            occurred_at: decision.occurred_at,
            created_at: Utc::now(),
        };
        self.by_event.insert(decision.event_id, alert.clone());
        Ok(PersistOutcome::Created(alert))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use shared::models::AlertType;

    fn decision() -> AlertDecision {
        AlertDecision {
            alert_type: AlertType::SpeedViolation,
            event_id: Uuid::new_v4(),
            device_id: "AA:BB:CC:DD:EE:FF".to_string(),
            occurred_at: Utc::now(),
            details: json!({ "speed_kmh": 120.0 }),
        }
    }

    #[tokio::test]
    async fn test_persist_creates_alert() {
        let store = InMemoryAlertStore::new();
        let decision = decision();

        let outcome = store.persist(&decision).await.unwrap();
        let alert = match outcome {
            PersistOutcome::Created(alert) => alert,
            PersistOutcome::AlreadyExists => panic!("expected created"),
        };

        assert_eq!(alert.event_id, decision.event_id);
        assert_eq!(alert.alert_type, "speed_violation");
        assert_eq!(store.alerts().len(), 1);
    }

    #[tokio::test]
    async fn test_duplicate_event_id_is_not_an_error() {
        let store = InMemoryAlertStore::new();
        let decision = decision();

        store.persist(&decision).await.unwrap();
        let second = store.persist(&decision).await.unwrap();

        assert!(matches!(second, PersistOutcome::AlreadyExists));
        assert_eq!(store.alerts().len(), 1);
    }
}
