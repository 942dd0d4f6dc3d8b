//! Alert Engine library
//!
//! Consumption side of the iot-sentinel pipeline: pulls event deliveries off
//! the broker at-least-once, suppresses duplicates against a durable
//! processed-event log, evaluates the alert rules, and persists alerts
//! idempotently. Deliveries that keep failing are dead-lettered.

pub mod alert_store;
pub mod authorized_users;
pub mod consumer;
pub mod dedup;
pub mod dlq;
pub mod error;
pub mod processor;
pub mod rules;
pub mod worker;

pub use alert_store::{AlertStore, InMemoryAlertStore, PersistOutcome, PgAlertStore};
pub use authorized_users::{
    AuthorizedUserCache, AuthorizedUserLookup, AuthorizedUserStore, InMemoryAuthorizedUsers,
    InMemoryMembershipCache, MembershipCacheBackend, PgAuthorizedUserStore, RedisMembershipCache,
};
pub use consumer::{EventConsumer, InMemoryEventConsumer, RedisEventConsumer};
pub use dedup::{InMemoryProcessedEventLog, PgProcessedEventLog, ProcessedEventLog};
pub use dlq::{DeadLetterQueue, DlqEntry, InMemoryDlq, RedisDlq};
pub use error::{ProcessorError, ProcessorResult};
pub use processor::{EventProcessor, ProcessOutcome};
pub use rules::AlertDecision;
