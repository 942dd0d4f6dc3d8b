//! Shared library for the iot-sentinel pipeline services
//!
//! This crate provides common functionality used by the event ingestor and
//! the alert engine:
//! - Database connection pooling and utilities
//! - Domain models matching the PostgreSQL schema
//! - Error handling types
//! - Configuration management
//! - Broker message schema and queue names
//! - Redis caching layer

pub mod config;
pub mod db;
pub mod error;
pub mod messages;
pub mod models;
pub mod redis;

// Re-export commonly used types
pub use config::{Config, PipelineConfig};
pub use db::DbPool;
pub use error::{Error, Result};
pub use messages::{
    Delivery, EventMessage, RAW_SENSOR_EVENTS_QUEUE, SENSOR_EVENTS_DLQ, SENSOR_EVENTS_PROCESSING,
    SENSOR_EVENTS_QUEUE,
};
pub use models::{
    Alert, AlertType, AuthorizedUser, DeliveryState, DeviceType, Event, EventPayload, EventType,
    Sensor,
};
pub use redis::EntityCache;

/// Initialize tracing subscriber for structured logging
pub fn init_tracing() {
    use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "shared=debug,event_ingestor=debug,alert_engine=debug,info".into()
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}
