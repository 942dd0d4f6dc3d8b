//! Event Ingestor library
//!
//! Ingestion side of the iot-sentinel pipeline: validates inbound sensor
//! events against the sensor registry, persists them as `pending`, and
//! publishes them to the broker with delivery confirmation (outbox pattern).
//!
//! Raw events arrive on an inbound Redis list fed by device gateways; the
//! intake loop hands each decoded [`validator::RawEvent`] to
//! [`ingest::IngestPipeline`].

pub mod event_store;
pub mod ingest;
pub mod intake;
pub mod publisher;
pub mod queue;
pub mod retry;
pub mod sensor_cache;
pub mod sensor_store;
pub mod sweeper;
pub mod validator;

pub use event_store::{EventStore, InMemoryEventStore, NewEvent, PgEventStore};
pub use ingest::{IngestOutcome, IngestPipeline};
pub use publisher::{EventPublisher, PublishError};
pub use queue::{EventQueue, InMemoryEventQueue, RedisEventQueue};
pub use sensor_cache::{
    CachedSensor, InMemorySensorCache, RedisSensorCache, SensorCacheBackend, SensorRegistry,
};
pub use sensor_store::{InMemorySensorStore, PgSensorStore, SensorStore};
pub use validator::{EventValidator, RawEvent, RejectionReason, ValidEvent, ValidationOutcome};
