//! Alert rule evaluation
//!
//! One rule per event type, dispatched on the payload variant. Evaluation is
//! pure given the authorized-user lookup: the same message and membership
//! state always produce the same decision, which is what makes redelivery
//! harmless.

use chrono::{DateTime, Timelike, Utc};
use serde_json::json;
use shared::models::{AlertType, EventPayload};
use shared::{EventMessage, PipelineConfig};
use uuid::Uuid;

use crate::authorized_users::AuthorizedUserLookup;
use crate::error::ProcessorResult;

/// A rule decision to raise an alert
#[derive(Debug, Clone, PartialEq)]
pub struct AlertDecision {
    pub alert_type: AlertType,
    pub event_id: Uuid,
    pub device_id: String,
    /// When the source event occurred
    pub occurred_at: DateTime<Utc>,
    /// Rule-specific fields kept for audit
    pub details: serde_json::Value,
}

/// Evaluate a consumed event message against the alert rules
///
/// Returns `Ok(None)` when no rule fires. `Err` means the membership lookup
/// failed and the delivery should be retried.
pub async fn evaluate(
    message: &EventMessage,
    users: &dyn AuthorizedUserLookup,
    config: &PipelineConfig,
) -> ProcessorResult<Option<AlertDecision>> {
    // Alerts store the occurrence time normalized to UTC; the rules below
    // that care about time-of-day read the timestamp as sent
    let occurred_at = message.timestamp.with_timezone(&Utc);

    let decision = match &message.payload {
        EventPayload::AccessAttempt { user_id } => {
            if users.is_authorized(user_id).await? {
                None
            } else {
                Some(AlertDecision {
                    alert_type: AlertType::UnauthorizedAccess,
                    event_id: message.event_id,
                    device_id: message.device_id.clone(),
                    occurred_at,
                    details: json!({ "user_id": user_id }),
                })
            }
        }

        EventPayload::SpeedViolation { speed_kmh, location } => {
            // Strictly above the limit; driving exactly at it is legal
            if *speed_kmh > config.speed_limit_kmh {
                Some(AlertDecision {
                    alert_type: AlertType::SpeedViolation,
                    event_id: message.event_id,
                    device_id: message.device_id.clone(),
                    occurred_at,
                    details: json!({
                        "speed_kmh": speed_kmh,
                        "speed_limit_kmh": config.speed_limit_kmh,
                        "location": location,
                    }),
                })
            } else {
                None
            }
        }

        EventPayload::MotionDetected {
            zone,
            confidence,
            photo_base64,
        } => {
            let restricted = config.restricted_zones.iter().any(|z| z == zone);
            // The sensor's wall clock: the timestamp carries its UTC offset
            let hour = message.timestamp.hour();

            if restricted && is_after_hours(hour, config.after_hours_start, config.after_hours_end)
            {
                Some(AlertDecision {
                    alert_type: AlertType::IntrusionDetected,
                    event_id: message.event_id,
                    device_id: message.device_id.clone(),
                    occurred_at,
                    details: json!({
                        "zone": zone,
                        "confidence": confidence,
                        "photo_base64": photo_base64,
                    }),
                })
            } else {
                None
            }
        }
    };

    if let Some(decision) = &decision {
        tracing::info!(
            event_id = %decision.event_id,
            device_id = %decision.device_id,
            alert_type = %decision.alert_type,
            "Alert rule fired"
        );
    }

    Ok(decision)
}

/// Whether `hour` falls in the `[start, end)` window, wrapping past midnight
/// when `start > end`
fn is_after_hours(hour: u32, start: u32, end: u32) -> bool {
    if start <= end {
        hour >= start && hour < end
    } else {
        hour >= start || hour < end
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::authorized_users::InMemoryAuthorizedUsers;
    use chrono::{FixedOffset, TimeZone};

    fn config() -> PipelineConfig {
        PipelineConfig::default()
    }

    fn message(payload: EventPayload, timestamp: DateTime<FixedOffset>) -> EventMessage {
        EventMessage::new(Uuid::new_v4(), "AA:BB:CC:DD:EE:FF", timestamp, payload)
    }

    fn at_hour(hour: u32, minute: u32) -> DateTime<FixedOffset> {
        Utc.with_ymd_and_hms(2026, 3, 14, hour, minute, 0)
            .unwrap()
            .fixed_offset()
    }

    fn motion(zone: &str, timestamp: DateTime<FixedOffset>) -> EventMessage {
        message(
            EventPayload::MotionDetected {
                zone: zone.to_string(),
                confidence: 0.9,
                photo_base64: "aGVsbG8=".to_string(),
            },
            timestamp,
        )
    }

    #[tokio::test]
    async fn test_authorized_user_does_not_fire() {
        let users = InMemoryAuthorizedUsers::with_users(&["user_001"]);
        let msg = message(
            EventPayload::AccessAttempt {
                user_id: "user_001".to_string(),
            },
            Utc::now().fixed_offset(),
        );

        let decision = evaluate(&msg, &users, &config()).await.unwrap();
        assert!(decision.is_none());
    }

    #[tokio::test]
    async fn test_unknown_user_fires_unauthorized_access() {
        let users = InMemoryAuthorizedUsers::with_users(&["user_001"]);
        let msg = message(
            EventPayload::AccessAttempt {
                user_id: "user_999".to_string(),
            },
            Utc::now().fixed_offset(),
        );

        let decision = evaluate(&msg, &users, &config()).await.unwrap().unwrap();
        assert_eq!(decision.alert_type, AlertType::UnauthorizedAccess);
        assert_eq!(decision.event_id, msg.event_id);
        assert_eq!(decision.details["user_id"], "user_999");
    }

    #[tokio::test]
    async fn test_speed_at_limit_does_not_fire() {
        let users = InMemoryAuthorizedUsers::new();
        let msg = message(
            EventPayload::SpeedViolation {
                speed_kmh: 90.0,
                location: "Main St".to_string(),
            },
            Utc::now().fixed_offset(),
        );

        assert!(evaluate(&msg, &users, &config()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_speed_above_limit_fires() {
        let users = InMemoryAuthorizedUsers::new();
        let msg = message(
            EventPayload::SpeedViolation {
                speed_kmh: 91.0,
                location: "Main St".to_string(),
            },
            Utc::now().fixed_offset(),
        );

        let decision = evaluate(&msg, &users, &config()).await.unwrap().unwrap();
        assert_eq!(decision.alert_type, AlertType::SpeedViolation);
        assert_eq!(decision.details["speed_kmh"], 91.0);
        assert_eq!(decision.details["location"], "Main St");
    }

    #[tokio::test]
    async fn test_speed_barely_above_limit_fires() {
        let users = InMemoryAuthorizedUsers::new();
        let msg = message(
            EventPayload::SpeedViolation {
                speed_kmh: 90.1,
                location: "Main St".to_string(),
            },
            Utc::now().fixed_offset(),
        );

        assert!(evaluate(&msg, &users, &config()).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_restricted_zone_after_hours_fires() {
        let users = InMemoryAuthorizedUsers::new();
        let msg = message(
            EventPayload::MotionDetected {
                zone: "Secure Zone".to_string(),
                confidence: 0.95,
                photo_base64: "aGVsbG8=".to_string(),
            },
            at_hour(23, 0),
        );

        let decision = evaluate(&msg, &users, &config()).await.unwrap().unwrap();
        assert_eq!(decision.alert_type, AlertType::IntrusionDetected);
        assert_eq!(decision.details["zone"], "Secure Zone");
        assert_eq!(decision.details["confidence"], 0.95);
    }

    #[tokio::test]
    async fn test_restricted_zone_during_business_hours_does_not_fire() {
        let users = InMemoryAuthorizedUsers::new();
        let msg = message(
            EventPayload::MotionDetected {
                zone: "Secure Zone".to_string(),
                confidence: 0.95,
                photo_base64: "aGVsbG8=".to_string(),
            },
            at_hour(12, 0),
        );

        assert!(evaluate(&msg, &users, &config()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_unrestricted_zone_after_hours_does_not_fire() {
        let users = InMemoryAuthorizedUsers::new();
        let msg = message(
            EventPayload::MotionDetected {
                zone: "Lobby".to_string(),
                confidence: 0.95,
                photo_base64: "aGVsbG8=".to_string(),
            },
            at_hour(23, 0),
        );

        assert!(evaluate(&msg, &users, &config()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_after_hours_boundaries() {
        let users = InMemoryAuthorizedUsers::new();

        // 17:59 is still business hours, 18:00 starts the window
        let msg = motion("Restricted Area", at_hour(17, 59));
        assert!(evaluate(&msg, &users, &config()).await.unwrap().is_none());
        let msg = motion("Restricted Area", at_hour(18, 0));
        assert!(evaluate(&msg, &users, &config()).await.unwrap().is_some());

        // 05:59 is inside the window, 06:00 ends it
        let msg = motion("Restricted Area", at_hour(5, 59));
        assert!(evaluate(&msg, &users, &config()).await.unwrap().is_some());
        let msg = motion("Restricted Area", at_hour(6, 0));
        assert!(evaluate(&msg, &users, &config()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_window_uses_sender_local_hour() {
        let users = InMemoryAuthorizedUsers::new();

        // 19:00 at +05:00 is 14:00 UTC; the sensor's clock is inside the
        // window even though the UTC hour is not
        let timestamp = FixedOffset::east_opt(5 * 3600)
            .unwrap()
            .with_ymd_and_hms(2026, 3, 14, 19, 0, 0)
            .unwrap();
        let msg = motion("Restricted Area", timestamp);
        let decision = evaluate(&msg, &users, &config()).await.unwrap().unwrap();
        assert_eq!(decision.alert_type, AlertType::IntrusionDetected);
        // The stored occurrence time is normalized to UTC
        assert_eq!(decision.occurred_at.hour(), 14);

        // 08:00 at +09:00 is 23:00 UTC; the sensor's clock is outside the
        // window even though the UTC hour is in it
        let timestamp = FixedOffset::east_opt(9 * 3600)
            .unwrap()
            .with_ymd_and_hms(2026, 3, 14, 8, 0, 0)
            .unwrap();
        let msg = motion("Restricted Area", timestamp);
        assert!(evaluate(&msg, &users, &config()).await.unwrap().is_none());
    }

    #[test]
    fn test_after_hours_window_math() {
        // Wrap-around window [18, 6)
        assert!(is_after_hours(18, 18, 6));
        assert!(is_after_hours(23, 18, 6));
        assert!(is_after_hours(0, 18, 6));
        assert!(is_after_hours(5, 18, 6));
        assert!(!is_after_hours(6, 18, 6));
        assert!(!is_after_hours(12, 18, 6));
        assert!(!is_after_hours(17, 18, 6));

        // Non-wrapping window [8, 17)
        assert!(is_after_hours(8, 8, 17));
        assert!(is_after_hours(16, 8, 17));
        assert!(!is_after_hours(17, 8, 17));
        assert!(!is_after_hours(7, 8, 17));
    }

    #[tokio::test]
    async fn test_all_restricted_zones_recognized() {
        let users = InMemoryAuthorizedUsers::new();
        for zone in [
            "Restricted Area",
            "Secure Zone",
            "Private Area",
            "Classified Zone",
        ] {
            let msg = message(
                EventPayload::MotionDetected {
                    zone: zone.to_string(),
                    confidence: 0.9,
                    photo_base64: "aGVsbG8=".to_string(),
                },
                at_hour(22, 0),
            );
            assert!(
                evaluate(&msg, &users, &config()).await.unwrap().is_some(),
                "zone {zone} should fire"
            );
        }
    }
}
