//! Broker message schema shared by the event ingestor and the alert engine
//!
//! Messages are published to a durable Redis list by the ingestor and
//! consumed at-least-once by the alert engine. The wire format is flat JSON:
//! `{"event_id", "device_id", "event_type", "timestamp", ...type fields}`.

use chrono::{DateTime, FixedOffset, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::{EventPayload, EventType};

/// Inbound list where device gateways drop raw, unvalidated events
pub const RAW_SENSOR_EVENTS_QUEUE: &str = "raw_sensor_events";

/// Main queue for sensor events
pub const SENSOR_EVENTS_QUEUE: &str = "sensor_events";

/// Processing list holding in-flight deliveries until they are acked
pub const SENSOR_EVENTS_PROCESSING: &str = "sensor_events_processing";

/// Dead letter queue for deliveries that exhausted their retry budget
pub const SENSOR_EVENTS_DLQ: &str = "sensor_events_dlq";

/// Event message as it travels through the broker
///
/// The payload enum is flattened so the tag and type-specific fields sit at
/// the top level of the JSON object. The timestamp keeps the sender's UTC
/// offset: time-of-day rules evaluate the sensor's wall clock, not UTC.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventMessage {
    pub event_id: Uuid,
    pub device_id: String,
    pub timestamp: DateTime<FixedOffset>,
    #[serde(flatten)]
    pub payload: EventPayload,
}

impl EventMessage {
    pub fn new(
        event_id: Uuid,
        device_id: &str,
        timestamp: DateTime<FixedOffset>,
        payload: EventPayload,
    ) -> Self {
        Self {
            event_id,
            device_id: device_id.to_string(),
            timestamp,
            payload,
        }
    }

    /// The event type tag of this message
    pub fn event_type(&self) -> EventType {
        self.payload.event_type()
    }
}

/// Delivery envelope wrapping a message on the queue
///
/// The attempt count rides with the message so redeliveries can be bounded
/// without consumer-side bookkeeping. A fresh publish starts at attempt 0;
/// each nack requeues the envelope with the count incremented.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Delivery {
    pub message: EventMessage,
    /// Number of failed processing attempts so far
    pub attempts: u32,
    pub enqueued_at: DateTime<Utc>,
}

impl Delivery {
    /// Wrap a freshly published message
    pub fn new(message: EventMessage) -> Self {
        Self {
            message,
            attempts: 0,
            enqueued_at: Utc::now(),
        }
    }

    /// The envelope to requeue after a failed processing attempt
    pub fn next_attempt(&self) -> Self {
        Self {
            message: self.message.clone(),
            attempts: self.attempts + 1,
            enqueued_at: Utc::now(),
        }
    }
}
