//! Broker queue abstraction for event publishing
//!
//! Provides a trait-based abstraction over the event queue to enable testing.
//!
//! # Queue Overflow Protection
//!
//! Queue depth is checked before each publish to prevent Redis memory
//! exhaustion. Past the critical threshold new publishes are rejected; the
//! event stays `pending` and the sweeper re-drives it once consumers catch up.

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use redis::aio::MultiplexedConnection;
use redis::AsyncCommands;
use shared::{Delivery, SENSOR_EVENTS_QUEUE};
use std::sync::Mutex;

/// Queue depth that triggers a falling-behind warning
const MAX_QUEUE_DEPTH: usize = 10_000;

/// Queue depth at which new publishes are rejected (backpressure)
const CRITICAL_QUEUE_DEPTH: usize = 50_000;

/// Abstract event queue interface for testability
///
/// `publish` returns only after the broker has confirmed the enqueue; a
/// successful return is the delivery confirmation.
#[async_trait]
pub trait EventQueue: Send + Sync {
    /// Enqueue a delivery, waiting for broker confirmation
    async fn publish(&self, delivery: &Delivery) -> Result<()>;
}

/// Redis-backed event queue implementation
#[derive(Clone)]
pub struct RedisEventQueue {
    conn: MultiplexedConnection,
}

impl RedisEventQueue {
    /// Create a new Redis event queue
    pub fn new(conn: MultiplexedConnection) -> Self {
        Self { conn }
    }
}

#[async_trait]
impl EventQueue for RedisEventQueue {
    async fn publish(&self, delivery: &Delivery) -> Result<()> {
        let mut conn = self.conn.clone();
        let queue_depth: usize = conn
            .llen(SENSOR_EVENTS_QUEUE)
            .await
            .context("Failed to get queue depth from Redis")?;

        if queue_depth >= CRITICAL_QUEUE_DEPTH {
            tracing::error!(
                queue_depth = queue_depth,
                critical_threshold = CRITICAL_QUEUE_DEPTH,
                event_id = %delivery.message.event_id,
                "Queue at critical depth, rejecting publish (backpressure)"
            );

            bail!(
                "Queue depth {} exceeds critical threshold {} - rejecting publish to prevent memory exhaustion",
                queue_depth,
                CRITICAL_QUEUE_DEPTH
            );
        }

        if queue_depth >= MAX_QUEUE_DEPTH {
            tracing::warn!(
                queue_depth = queue_depth,
                max_threshold = MAX_QUEUE_DEPTH,
                event_id = %delivery.message.event_id,
                "Queue depth exceeds threshold - alert engine may be falling behind"
            );
        }

        let json = serde_json::to_string(delivery).context("Failed to serialize delivery")?;

        // LPUSH round trip doubles as the delivery confirmation: the reply
        // arrives only after the broker has accepted the element
        conn.lpush::<_, _, ()>(SENSOR_EVENTS_QUEUE, &json)
            .await
            .context("Failed to enqueue event to Redis")?;

        tracing::debug!(
            event_id = %delivery.message.event_id,
            event_type = %delivery.message.event_type(),
            queue_depth = queue_depth,
            "Published event to queue"
        );

        Ok(())
    }
}

/// In-memory event queue for testing
///
/// Records published deliveries and can be flipped into a failing mode to
/// exercise retry paths.
#[derive(Default)]
pub struct InMemoryEventQueue {
    published: Mutex<Vec<Delivery>>,
    failures_remaining: Mutex<u32>,
}

impl InMemoryEventQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `n` publish calls fail
    pub fn fail_next(&self, n: u32) {
        *self.failures_remaining.lock().unwrap() = n;
    }

    /// All deliveries published so far (for test inspection)
    pub fn published(&self) -> Vec<Delivery> {
        self.published.lock().unwrap().clone()
    }
}

#[async_trait]
impl EventQueue for InMemoryEventQueue {
    async fn publish(&self, delivery: &Delivery) -> Result<()> {
        {
            let mut failures = self.failures_remaining.lock().unwrap();
            if *failures > 0 {
                *failures -= 1;
                bail!("simulated broker failure");
            }
        }
        self.published.lock().unwrap().push(delivery.clone());
        Ok(())
    }
}
