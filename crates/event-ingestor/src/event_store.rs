//! Event store
//!
//! Events are the durable side of the outbox: a row is created in state
//! `pending` before any broker publish is attempted and advanced to
//! `published` only after the broker confirms. Rows stuck in `pending` are
//! picked up by the sweeper.

use async_trait::async_trait;
use chrono::{DateTime, FixedOffset, Utc};
use dashmap::DashMap;
use shared::models::{DeliveryState, Event, EventPayload};
use shared::{DbPool, Result};
use uuid::Uuid;

/// Event to insert, before the store assigns bookkeeping columns
///
/// `occurred_at` keeps the sensor's UTC offset; the store normalizes to UTC
/// for the timestamp column and keeps the offset in a column of its own.
#[derive(Debug, Clone)]
pub struct NewEvent {
    pub id: Uuid,
    pub device_id: String,
    pub payload: EventPayload,
    pub occurred_at: DateTime<FixedOffset>,
}

impl NewEvent {
    pub fn new(device_id: &str, payload: EventPayload, occurred_at: DateTime<FixedOffset>) -> Self {
        Self {
            id: Uuid::new_v4(),
            device_id: device_id.to_string(),
            payload,
            occurred_at,
        }
    }
}

/// Abstract event store interface
#[async_trait]
pub trait EventStore: Send + Sync {
    /// Insert a new event in state `pending`
    async fn create(&self, event: &NewEvent) -> Result<Event>;

    /// Advance an event's delivery state to `published`
    async fn mark_published(&self, event_id: Uuid) -> Result<()>;

    /// Fetch events still `pending` that were created before `cutoff`
    async fn fetch_stuck_pending(&self, cutoff: DateTime<Utc>, limit: i64) -> Result<Vec<Event>>;
}

/// PostgreSQL-backed event store
#[derive(Clone)]
pub struct PgEventStore {
    pool: DbPool,
}

impl PgEventStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl EventStore for PgEventStore {
    async fn create(&self, event: &NewEvent) -> Result<Event> {
        let created = sqlx::query_as::<_, Event>(
            r#"
            INSERT INTO events (id, device_id, payload, occurred_at, tz_offset_secs, delivery_state, created_at)
            VALUES ($1, $2, $3, $4, $5, 'pending', NOW())
            RETURNING id, device_id, payload, occurred_at, tz_offset_secs, delivery_state, created_at
            "#,
        )
        .bind(event.id)
        .bind(&event.device_id)
        .bind(sqlx::types::Json(&event.payload))
        .bind(event.occurred_at.with_timezone(&Utc))
        .bind(event.occurred_at.offset().local_minus_utc())
        .fetch_one(&self.pool)
        .await?;

        Ok(created)
    }

    async fn mark_published(&self, event_id: Uuid) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE events
            SET delivery_state = 'published'
            WHERE id = $1 AND delivery_state = 'pending'
            "#,
        )
        .bind(event_id)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn fetch_stuck_pending(&self, cutoff: DateTime<Utc>, limit: i64) -> Result<Vec<Event>> {
        let events = sqlx::query_as::<_, Event>(
            r#"
            SELECT id, device_id, payload, occurred_at, tz_offset_secs, delivery_state, created_at
            FROM events
            WHERE delivery_state = 'pending' AND created_at < $1
            ORDER BY created_at
            LIMIT $2
            "#,
        )
        .bind(cutoff)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(events)
    }
}

/// In-memory event store for testing
#[derive(Default)]
pub struct InMemoryEventStore {
    events: DashMap<Uuid, Event>,
}

impl InMemoryEventStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fetch a stored event (for test assertions)
    pub fn get(&self, event_id: Uuid) -> Option<Event> {
        self.events.get(&event_id).map(|e| e.clone())
    }
}

#[async_trait]
impl EventStore for InMemoryEventStore {
    async fn create(&self, event: &NewEvent) -> Result<Event> {
        let created = Event {
            id: event.id,
            device_id: event.device_id.clone(),
            payload: event.payload.clone(),
            occurred_at: event.occurred_at.with_timezone(&Utc),
            tz_offset_secs: event.occurred_at.offset().local_minus_utc(),
            delivery_state: DeliveryState::Pending.to_string(),
            created_at: Utc::now(),
        };
        self.events.insert(created.id, created.clone());
        Ok(created)
    }

    async fn mark_published(&self, event_id: Uuid) -> Result<()> {
        if let Some(mut event) = self.events.get_mut(&event_id) {
            event.delivery_state = DeliveryState::Published.to_string();
        }
        Ok(())
    }

    async fn fetch_stuck_pending(&self, cutoff: DateTime<Utc>, limit: i64) -> Result<Vec<Event>> {
        let mut pending: Vec<Event> = self
            .events
            .iter()
            .filter(|e| e.delivery_state == "pending" && e.created_at < cutoff)
            .map(|e| e.clone())
            .collect();
        pending.sort_by_key(|e| e.created_at);
        pending.truncate(limit as usize);
        Ok(pending)
    }
}
