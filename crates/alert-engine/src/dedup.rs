//! Durable processed-event log for duplicate suppression
//!
//! The broker is at-least-once, so the same event id can arrive more than
//! once (nack redelivery, sweeper re-drive, crash between persist and ack).
//! Every delivery is checked against this log before evaluation and marked
//! after its outcome is persisted; a duplicate is acked without effect.

use async_trait::async_trait;
use chrono::{Duration, Utc};
use dashmap::DashSet;
use shared::DbPool;
use uuid::Uuid;

use crate::error::{ProcessorError, ProcessorResult};

/// Processed-event log trait for testability
#[async_trait]
pub trait ProcessedEventLog: Send + Sync {
    /// Whether this event id has already been fully processed
    async fn is_processed(&self, event_id: Uuid) -> ProcessorResult<bool>;

    /// Record the event id as processed
    ///
    /// Returns `false` if another worker recorded it first.
    async fn mark_processed(&self, event_id: Uuid) -> ProcessorResult<bool>;
}

/// PostgreSQL-backed processed-event log
///
/// The primary key on `event_id` is the dedup guarantee; the instance
/// column only aids debugging of redeliveries across workers.
pub struct PgProcessedEventLog {
    pool: DbPool,
    instance: String,
}

impl PgProcessedEventLog {
    pub fn new(pool: DbPool) -> Self {
        let instance = hostname::get()
            .ok()
            .and_then(|h| h.into_string().ok())
            .unwrap_or_else(|| "unknown".to_string());
        Self { pool, instance }
    }

    /// Delete records older than the dedup window
    ///
    /// Events are only redelivered within the broker's retry horizon, so
    /// records past the window can no longer match anything in flight.
    pub async fn prune(&self, window: Duration) -> ProcessorResult<u64> {
        let cutoff = Utc::now() - window;
        let result = sqlx::query("DELETE FROM processed_events WHERE processed_at < $1")
            .bind(cutoff)
            .execute(&self.pool)
            .await
            .map_err(ProcessorError::Database)?;

        Ok(result.rows_affected())
    }
}

#[async_trait]
impl ProcessedEventLog for PgProcessedEventLog {
    async fn is_processed(&self, event_id: Uuid) -> ProcessorResult<bool> {
        let exists: bool = sqlx::query_scalar(
            "SELECT EXISTS(SELECT 1 FROM processed_events WHERE event_id = $1)",
        )
        .bind(event_id)
        .fetch_one(&self.pool)
        .await
        .map_err(ProcessorError::Database)?;

        Ok(exists)
    }

    async fn mark_processed(&self, event_id: Uuid) -> ProcessorResult<bool> {
        let result = sqlx::query(
            r#"
            INSERT INTO processed_events (event_id, processed_by, processed_at)
            VALUES ($1, $2, NOW())
            ON CONFLICT (event_id) DO NOTHING
            "#,
        )
        .bind(event_id)
        .bind(&self.instance)
        .execute(&self.pool)
        .await
        .map_err(ProcessorError::Database)?;

        Ok(result.rows_affected() > 0)
    }
}

/// In-memory processed-event log for testing
#[derive(Default)]
pub struct InMemoryProcessedEventLog {
    processed: DashSet<Uuid>,
}

impl InMemoryProcessedEventLog {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ProcessedEventLog for InMemoryProcessedEventLog {
    async fn is_processed(&self, event_id: Uuid) -> ProcessorResult<bool> {
        Ok(self.processed.contains(&event_id))
    }

    async fn mark_processed(&self, event_id: Uuid) -> ProcessorResult<bool> {
        Ok(self.processed.insert(event_id))
    }
}
