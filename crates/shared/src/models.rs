//! Data models matching the PostgreSQL database schema

use chrono::{DateTime, FixedOffset, Offset, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Supported sensor device types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceType {
    AccessController,
    Radar,
    SecurityCamera,
}

impl DeviceType {
    /// The single event type a device of this type is allowed to emit
    pub fn allowed_event_type(&self) -> EventType {
        match self {
            DeviceType::AccessController => EventType::AccessAttempt,
            DeviceType::Radar => EventType::SpeedViolation,
            DeviceType::SecurityCamera => EventType::MotionDetected,
        }
    }
}

impl fmt::Display for DeviceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            DeviceType::AccessController => "access_controller",
            DeviceType::Radar => "radar",
            DeviceType::SecurityCamera => "security_camera",
        };
        write!(f, "{}", s)
    }
}

impl FromStr for DeviceType {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "access_controller" => Ok(DeviceType::AccessController),
            "radar" => Ok(DeviceType::Radar),
            "security_camera" => Ok(DeviceType::SecurityCamera),
            _ => anyhow::bail!("Invalid device type: {}", s),
        }
    }
}

/// Supported event types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    AccessAttempt,
    SpeedViolation,
    MotionDetected,
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            EventType::AccessAttempt => "access_attempt",
            EventType::SpeedViolation => "speed_violation",
            EventType::MotionDetected => "motion_detected",
        };
        write!(f, "{}", s)
    }
}

impl FromStr for EventType {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "access_attempt" => Ok(EventType::AccessAttempt),
            "speed_violation" => Ok(EventType::SpeedViolation),
            "motion_detected" => Ok(EventType::MotionDetected),
            _ => anyhow::bail!("Invalid event type: {}", s),
        }
    }
}

/// Type-specific event payload, tagged by `event_type`
///
/// The tag makes the broker JSON self-describing and keeps dispatch at
/// validation and rule evaluation exhaustive: adding an event type is a
/// compile-checked enum extension.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event_type", rename_all = "snake_case")]
pub enum EventPayload {
    AccessAttempt {
        user_id: String,
    },
    SpeedViolation {
        speed_kmh: f64,
        location: String,
    },
    MotionDetected {
        zone: String,
        confidence: f64,
        photo_base64: String,
    },
}

impl EventPayload {
    /// The event type tag for this payload
    pub fn event_type(&self) -> EventType {
        match self {
            EventPayload::AccessAttempt { .. } => EventType::AccessAttempt,
            EventPayload::SpeedViolation { .. } => EventType::SpeedViolation,
            EventPayload::MotionDetected { .. } => EventType::MotionDetected,
        }
    }
}

/// Delivery state of a stored event
///
/// Events are created `pending` and advance to `published` only after the
/// broker confirms the enqueue. A crash between the two leaves a recoverable
/// pending row for the sweeper.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryState {
    Pending,
    Published,
}

impl fmt::Display for DeliveryState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            DeliveryState::Pending => "pending",
            DeliveryState::Published => "published",
        };
        write!(f, "{}", s)
    }
}

impl FromStr for DeliveryState {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(DeliveryState::Pending),
            "published" => Ok(DeliveryState::Published),
            _ => anyhow::bail!("Invalid delivery state: {}", s),
        }
    }
}

/// Registered sensor device
///
/// `device_id` is the canonical MAC-address string (uppercase, colon
/// separated) and is immutable once registered.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct Sensor {
    pub id: Uuid,
    pub device_id: String,
    /// Stored as text; parse with `DeviceType::from_str`
    pub device_type: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Sensor {
    /// Parse the stored device type
    pub fn device_type(&self) -> anyhow::Result<DeviceType> {
        DeviceType::from_str(&self.device_type)
    }
}

/// Ingested sensor event
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Event {
    pub id: Uuid,
    pub device_id: String,
    #[sqlx(json)]
    pub payload: EventPayload,
    /// When the event occurred at the sensor, normalized to UTC
    pub occurred_at: DateTime<Utc>,
    /// UTC offset of the sensor's clock when the event occurred, in seconds
    pub tz_offset_secs: i32,
    /// Stored as text; parse with `DeliveryState::from_str`
    pub delivery_state: String,
    pub created_at: DateTime<Utc>,
}

impl Event {
    /// The occurrence timestamp in the sensor's original UTC offset
    ///
    /// Time-of-day rules must see the sensor's wall clock, not UTC, so the
    /// offset is stored alongside the normalized timestamp and restored here.
    pub fn occurred_at_local(&self) -> DateTime<FixedOffset> {
        let offset = FixedOffset::east_opt(self.tz_offset_secs).unwrap_or_else(|| Utc.fix());
        self.occurred_at.with_timezone(&offset)
    }
}

/// User permitted through access-controlled doors
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct AuthorizedUser {
    pub user_id: String,
    pub created_at: DateTime<Utc>,
}

/// Alert types produced by the rule engine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertType {
    UnauthorizedAccess,
    SpeedViolation,
    IntrusionDetected,
}

impl fmt::Display for AlertType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            AlertType::UnauthorizedAccess => "unauthorized_access",
            AlertType::SpeedViolation => "speed_violation",
            AlertType::IntrusionDetected => "intrusion_detected",
        };
        write!(f, "{}", s)
    }
}

impl FromStr for AlertType {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "unauthorized_access" => Ok(AlertType::UnauthorizedAccess),
            "speed_violation" => Ok(AlertType::SpeedViolation),
            "intrusion_detected" => Ok(AlertType::IntrusionDetected),
            _ => anyhow::bail!("Invalid alert type: {}", s),
        }
    }
}

/// Persisted alert
///
/// `event_id` is unique: at most one alert exists per source event, which is
/// what makes duplicate delivery harmless.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Alert {
    pub id: Uuid,
    pub event_id: Uuid,
    pub device_id: String,
    /// Stored as text; parse with `AlertType::from_str`
    pub alert_type: String,
    /// Rule-specific decision details, kept for audit
    #[sqlx(json)]
    pub details: serde_json::Value,
    /// When the source event occurred
    pub occurred_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}
