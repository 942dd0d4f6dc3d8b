//! Inbound event validation
//!
//! Three checks, in order, short-circuiting on the first failure:
//!
//! 1. MAC-address syntax of the device identifier
//! 2. The identifier resolves to a registered sensor (via the cache)
//! 3. The event type is allowed for the sensor's device type and the
//!    payload fields are well-formed
//!
//! Validation has no side effects beyond cache reads.

use chrono::{DateTime, FixedOffset};
use lazy_static::lazy_static;
use regex::Regex;
use serde::Deserialize;
use shared::models::{EventPayload, Sensor};
use shared::Result;
use thiserror::Error;

use crate::sensor_cache::SensorRegistry;

lazy_static! {
    /// Canonical MAC syntax: six colon-separated two-digit hex octets
    static ref MAC_ADDRESS_REGEX: Regex =
        Regex::new(r"^([0-9A-Fa-f]{2}:){5}[0-9A-Fa-f]{2}$").expect("MAC regex is valid");
}

/// Check a device identifier against canonical MAC syntax
pub fn is_valid_mac(device_id: &str) -> bool {
    MAC_ADDRESS_REGEX.is_match(device_id)
}

/// Normalize a device identifier to canonical uppercase MAC form
///
/// Returns None if the identifier is not valid MAC syntax.
pub fn canonicalize_mac(device_id: &str) -> Option<String> {
    if is_valid_mac(device_id) {
        Some(device_id.to_uppercase())
    } else {
        None
    }
}

/// Why an inbound event was rejected
///
/// These are synchronous rejections: the caller must correct the input,
/// nothing is retried.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RejectionReason {
    /// Device identifier is not valid MAC syntax
    #[error("device identifier is not a valid MAC address")]
    MalformedIdentifier,

    /// Device identifier does not resolve to a registered sensor
    ///
    /// Maps to an access-denied outcome at the API boundary.
    #[error("device '{0}' is not registered")]
    UnregisteredDevice(String),

    /// Event type or payload does not satisfy the schema
    #[error("schema violation: {0}")]
    SchemaViolation(String),
}

/// Raw event as submitted by a sensor, before validation
///
/// The timestamp keeps whatever UTC offset the sensor sent; time-of-day
/// rules downstream evaluate the sensor's wall clock.
#[derive(Debug, Clone, Deserialize)]
pub struct RawEvent {
    pub device_id: String,
    pub timestamp: DateTime<FixedOffset>,
    #[serde(flatten)]
    pub payload: EventPayload,
}

/// Event that passed validation
///
/// `device_id` is canonical and `sensor` is the registration it resolved to.
#[derive(Debug, Clone)]
pub struct ValidEvent {
    pub device_id: String,
    pub sensor: Sensor,
    pub occurred_at: DateTime<FixedOffset>,
    pub payload: EventPayload,
}

/// Result of running the validator over a raw event
#[derive(Debug, Clone)]
pub enum ValidationOutcome {
    Valid(ValidEvent),
    Rejected(RejectionReason),
}

/// Validates inbound events against syntax, registry and schema
#[derive(Clone)]
pub struct EventValidator {
    registry: SensorRegistry,
}

impl EventValidator {
    pub fn new(registry: SensorRegistry) -> Self {
        Self { registry }
    }

    /// Validate a raw event
    ///
    /// Returns `Err` only for infrastructure failures (store unreachable);
    /// input problems come back as `ValidationOutcome::Rejected`.
    pub async fn validate(&self, raw: &RawEvent) -> Result<ValidationOutcome> {
        let canonical = match canonicalize_mac(&raw.device_id) {
            Some(mac) => mac,
            None => {
                tracing::debug!(device_id = %raw.device_id, "Rejected: malformed device id");
                return Ok(ValidationOutcome::Rejected(
                    RejectionReason::MalformedIdentifier,
                ));
            }
        };

        let sensor = match self.registry.get(&canonical).await? {
            Some(sensor) => sensor,
            None => {
                tracing::debug!(device_id = %canonical, "Rejected: unregistered device");
                return Ok(ValidationOutcome::Rejected(
                    RejectionReason::UnregisteredDevice(canonical),
                ));
            }
        };

        if let Err(violation) = check_payload(&sensor, &raw.payload) {
            tracing::debug!(
                device_id = %canonical,
                event_type = %raw.payload.event_type(),
                violation = %violation,
                "Rejected: schema violation"
            );
            return Ok(ValidationOutcome::Rejected(RejectionReason::SchemaViolation(
                violation,
            )));
        }

        Ok(ValidationOutcome::Valid(ValidEvent {
            device_id: canonical,
            sensor,
            occurred_at: raw.timestamp,
            payload: raw.payload.clone(),
        }))
    }
}

/// Check the payload against the sensor's device type and field constraints
fn check_payload(sensor: &Sensor, payload: &EventPayload) -> std::result::Result<(), String> {
    let device_type = sensor
        .device_type()
        .map_err(|_| format!("unknown device type '{}'", sensor.device_type))?;

    let event_type = payload.event_type();
    let allowed = device_type.allowed_event_type();
    if event_type != allowed {
        return Err(format!(
            "event type '{}' not valid for device type '{}', expected '{}'",
            event_type, device_type, allowed
        ));
    }

    match payload {
        EventPayload::AccessAttempt { user_id } => {
            if user_id.is_empty() {
                return Err("user_id must not be empty".to_string());
            }
        }
        EventPayload::SpeedViolation { speed_kmh, location } => {
            if !speed_kmh.is_finite() || *speed_kmh < 0.0 {
                return Err(format!("speed_kmh must be a non-negative number, got {}", speed_kmh));
            }
            if location.is_empty() {
                return Err("location must not be empty".to_string());
            }
        }
        EventPayload::MotionDetected {
            zone, confidence, ..
        } => {
            if zone.is_empty() {
                return Err("zone must not be empty".to_string());
            }
            if !(0.0..=1.0).contains(confidence) {
                return Err(format!("confidence must be in [0, 1], got {}", confidence));
            }
        }
    }

    Ok(())
}
