//! Sensor registry store
//!
//! Authoritative persistence for registered sensors, behind a trait so the
//! registry and validator can be exercised without PostgreSQL.

use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;
use shared::models::{DeviceType, Sensor};
use shared::{DbPool, Result};
use uuid::Uuid;

/// Abstract sensor store interface
#[async_trait]
pub trait SensorStore: Send + Sync {
    /// Look up a sensor by canonical device id
    async fn get_by_device_id(&self, device_id: &str) -> Result<Option<Sensor>>;

    /// Insert a new sensor registration
    async fn insert(&self, device_id: &str, device_type: DeviceType) -> Result<Sensor>;

    /// Update the device type of an existing sensor
    ///
    /// Returns the updated row, or None if the device is not registered
    async fn update_device_type(
        &self,
        device_id: &str,
        device_type: DeviceType,
    ) -> Result<Option<Sensor>>;

    /// Delete a sensor registration; returns whether a row was removed
    async fn delete(&self, device_id: &str) -> Result<bool>;
}

/// PostgreSQL-backed sensor store
#[derive(Clone)]
pub struct PgSensorStore {
    pool: DbPool,
}

impl PgSensorStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl SensorStore for PgSensorStore {
    async fn get_by_device_id(&self, device_id: &str) -> Result<Option<Sensor>> {
        let sensor = sqlx::query_as::<_, Sensor>(
            r#"
            SELECT id, device_id, device_type, created_at, updated_at
            FROM sensors
            WHERE device_id = $1
            "#,
        )
        .bind(device_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(sensor)
    }

    async fn insert(&self, device_id: &str, device_type: DeviceType) -> Result<Sensor> {
        let sensor = sqlx::query_as::<_, Sensor>(
            r#"
            INSERT INTO sensors (id, device_id, device_type, created_at, updated_at)
            VALUES ($1, $2, $3, NOW(), NOW())
            RETURNING id, device_id, device_type, created_at, updated_at
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(device_id)
        .bind(device_type.to_string())
        .fetch_one(&self.pool)
        .await?;

        Ok(sensor)
    }

    async fn update_device_type(
        &self,
        device_id: &str,
        device_type: DeviceType,
    ) -> Result<Option<Sensor>> {
        let sensor = sqlx::query_as::<_, Sensor>(
            r#"
            UPDATE sensors
            SET device_type = $2, updated_at = NOW()
            WHERE device_id = $1
            RETURNING id, device_id, device_type, created_at, updated_at
            "#,
        )
        .bind(device_id)
        .bind(device_type.to_string())
        .fetch_optional(&self.pool)
        .await?;

        Ok(sensor)
    }

    async fn delete(&self, device_id: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM sensors WHERE device_id = $1")
            .bind(device_id)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }
}

/// In-memory sensor store for testing
#[derive(Default)]
pub struct InMemorySensorStore {
    sensors: DashMap<String, Sensor>,
}

impl InMemorySensorStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SensorStore for InMemorySensorStore {
    async fn get_by_device_id(&self, device_id: &str) -> Result<Option<Sensor>> {
        Ok(self.sensors.get(device_id).map(|s| s.clone()))
    }

    async fn insert(&self, device_id: &str, device_type: DeviceType) -> Result<Sensor> {
        let now = Utc::now();
        let sensor = Sensor {
            id: Uuid::new_v4(),
            device_id: device_id.to_string(),
            device_type: device_type.to_string(),
            created_at: now,
            updated_at: now,
        };
        self.sensors.insert(device_id.to_string(), sensor.clone());
        Ok(sensor)
    }

    async fn update_device_type(
        &self,
        device_id: &str,
        device_type: DeviceType,
    ) -> Result<Option<Sensor>> {
        match self.sensors.get_mut(device_id) {
            Some(mut entry) => {
                entry.device_type = device_type.to_string();
                entry.updated_at = Utc::now();
                Ok(Some(entry.clone()))
            }
            None => Ok(None),
        }
    }

    async fn delete(&self, device_id: &str) -> Result<bool> {
        Ok(self.sensors.remove(device_id).is_some())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_in_memory_insert_and_get() {
        let store = InMemorySensorStore::new();

        let sensor = store
            .insert("AA:BB:CC:DD:EE:FF", DeviceType::Radar)
            .await
            .unwrap();
        assert_eq!(sensor.device_type, "radar");

        let fetched = store.get_by_device_id("AA:BB:CC:DD:EE:FF").await.unwrap();
        assert_eq!(fetched.unwrap().id, sensor.id);
    }

    #[tokio::test]
    async fn test_in_memory_update_device_type() {
        let store = InMemorySensorStore::new();
        store
            .insert("AA:BB:CC:DD:EE:FF", DeviceType::Radar)
            .await
            .unwrap();

        let updated = store
            .update_device_type("AA:BB:CC:DD:EE:FF", DeviceType::SecurityCamera)
            .await
            .unwrap();
        assert_eq!(updated.unwrap().device_type, "security_camera");

        let missing = store
            .update_device_type("00:00:00:00:00:00", DeviceType::Radar)
            .await
            .unwrap();
        assert!(missing.is_none());
    }

    #[tokio::test]
    async fn test_in_memory_delete() {
        let store = InMemorySensorStore::new();
        store
            .insert("AA:BB:CC:DD:EE:FF", DeviceType::Radar)
            .await
            .unwrap();

        assert!(store.delete("AA:BB:CC:DD:EE:FF").await.unwrap());
        assert!(!store.delete("AA:BB:CC:DD:EE:FF").await.unwrap());
        assert!(store
            .get_by_device_id("AA:BB:CC:DD:EE:FF")
            .await
            .unwrap()
            .is_none());
    }
}
