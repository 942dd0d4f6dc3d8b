//! Dead Letter Queue (DLQ) for failed deliveries
//!
//! Deliveries that exhaust their attempt budget, and poison messages that
//! can never be processed, are moved to the DLQ for manual review.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use redis::aio::MultiplexedConnection;
use redis::AsyncCommands;
use serde::{Deserialize, Serialize};
use shared::{Delivery, SENSOR_EVENTS_DLQ};

use crate::error::{ProcessorError, ProcessorResult};

/// Entry in the Dead Letter Queue
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DlqEntry {
    /// Original delivery that failed
    pub delivery: Delivery,
    /// Error message from the last failure
    pub error: String,
    /// When the delivery was moved to DLQ
    pub failed_at: DateTime<Utc>,
}

impl DlqEntry {
    /// Create a new DLQ entry
    pub fn new(delivery: Delivery, error: String) -> Self {
        Self {
            delivery,
            error,
            failed_at: Utc::now(),
        }
    }
}

/// Dead Letter Queue trait for testability
#[async_trait]
pub trait DeadLetterQueue: Send + Sync {
    /// Push a failed delivery to the DLQ
    async fn push(&self, entry: DlqEntry) -> ProcessorResult<()>;

    /// Get current DLQ length
    async fn len(&self) -> ProcessorResult<u64>;

    /// Pop an entry from the DLQ (for reprocessing)
    async fn pop(&self) -> ProcessorResult<Option<DlqEntry>>;

    /// Peek at the first entry in the DLQ without removing it
    async fn peek(&self) -> ProcessorResult<Option<DlqEntry>>;
}

/// Redis-backed Dead Letter Queue
#[derive(Clone)]
pub struct RedisDlq {
    conn: MultiplexedConnection,
    queue_name: String,
}

impl RedisDlq {
    /// Create a new Redis DLQ
    pub fn new(conn: MultiplexedConnection) -> Self {
        Self {
            conn,
            queue_name: SENSOR_EVENTS_DLQ.to_string(),
        }
    }
}

#[async_trait]
impl DeadLetterQueue for RedisDlq {
    async fn push(&self, entry: DlqEntry) -> ProcessorResult<()> {
        let json = serde_json::to_string(&entry)?;

        let mut conn = self.conn.clone();
        conn.lpush::<_, _, ()>(&self.queue_name, &json)
            .await
            .map_err(ProcessorError::Redis)?;

        tracing::error!(
            event_id = %entry.delivery.message.event_id,
            event_type = %entry.delivery.message.event_type(),
            error = %entry.error,
            attempts = entry.delivery.attempts,
            "Delivery moved to Dead Letter Queue"
        );

        Ok(())
    }

    async fn len(&self) -> ProcessorResult<u64> {
        let mut conn = self.conn.clone();
        let len: u64 = conn
            .llen(&self.queue_name)
            .await
            .map_err(ProcessorError::Redis)?;
        Ok(len)
    }

    async fn pop(&self) -> ProcessorResult<Option<DlqEntry>> {
        let mut conn = self.conn.clone();
        let result: Option<String> = conn
            .rpop(&self.queue_name, None)
            .await
            .map_err(ProcessorError::Redis)?;

        match result {
            Some(json) => {
                let entry: DlqEntry = serde_json::from_str(&json)?;
                Ok(Some(entry))
            }
            None => Ok(None),
        }
    }

    async fn peek(&self) -> ProcessorResult<Option<DlqEntry>> {
        let mut conn = self.conn.clone();
        let result: Option<String> = conn
            .lindex(&self.queue_name, -1)
            .await
            .map_err(ProcessorError::Redis)?;

        match result {
            Some(json) => {
                let entry: DlqEntry = serde_json::from_str(&json)?;
                Ok(Some(entry))
            }
            None => Ok(None),
        }
    }
}

/// In-memory DLQ for testing
#[derive(Default)]
pub struct InMemoryDlq {
    entries: std::sync::Mutex<Vec<DlqEntry>>,
}

impl InMemoryDlq {
    pub fn new() -> Self {
        Self::default()
    }

    /// Get all entries (for test inspection)
    pub fn entries(&self) -> Vec<DlqEntry> {
        self.entries.lock().unwrap().clone()
    }
}

#[async_trait]
impl DeadLetterQueue for InMemoryDlq {
    async fn push(&self, entry: DlqEntry) -> ProcessorResult<()> {
        self.entries.lock().unwrap().push(entry);
        Ok(())
    }

    async fn len(&self) -> ProcessorResult<u64> {
        Ok(self.entries.lock().unwrap().len() as u64)
    }

    async fn pop(&self) -> ProcessorResult<Option<DlqEntry>> {
        Ok(self.entries.lock().unwrap().pop())
    }

    async fn peek(&self) -> ProcessorResult<Option<DlqEntry>> {
        Ok(self.entries.lock().unwrap().last().cloned())
    }
}
