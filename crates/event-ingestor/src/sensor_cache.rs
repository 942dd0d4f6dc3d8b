//! Write-through sensor cache and registry service
//!
//! The registry is the single entry point for sensor reads and mutations.
//! Reads fall through to the store on a miss and remember the answer,
//! including "not registered", which is cached briefly so repeated events
//! from unknown devices don't hammer the store. Mutations go to the store
//! first and only then touch the cache, so a crash between the two can
//! never leave a stale-positive entry validating events for a device the
//! store no longer knows.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use shared::models::{DeviceType, Sensor};
use shared::redis::{sensor_key, EntityCache};
use shared::{PipelineConfig, Result};
use tokio::sync::Mutex;

use crate::sensor_store::SensorStore;
use crate::validator;

/// Cached lookup result for a device id
///
/// `Unregistered` is the negative entry: it expires quickly and is replaced
/// synchronously when the device registers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum CachedSensor {
    Registered(Sensor),
    Unregistered,
}

/// Abstract cache backend for sensor lookups
#[async_trait]
pub trait SensorCacheBackend: Send + Sync {
    /// Fetch the cached entry for a device id, if any
    async fn get(&self, device_id: &str) -> Option<CachedSensor>;

    /// Store an entry (positive or negative) for a device id
    async fn set(&self, device_id: &str, entry: &CachedSensor);

    /// Drop the entry for a device id
    async fn invalidate(&self, device_id: &str);
}

/// Redis-backed sensor cache
///
/// Positive entries use the sensor cache TTL; negative entries use the much
/// shorter negative TTL. Redis failures degrade to store access.
#[derive(Clone)]
pub struct RedisSensorCache {
    cache: EntityCache,
    ttl: Duration,
    negative_ttl: Duration,
}

impl RedisSensorCache {
    pub fn new(cache: EntityCache, config: &PipelineConfig) -> Self {
        Self {
            cache,
            ttl: Duration::from_secs(config.sensor_cache_ttl_secs),
            negative_ttl: Duration::from_secs(config.sensor_negative_cache_ttl_secs),
        }
    }
}

#[async_trait]
impl SensorCacheBackend for RedisSensorCache {
    async fn get(&self, device_id: &str) -> Option<CachedSensor> {
        self.cache.get(&sensor_key(device_id)).await
    }

    async fn set(&self, device_id: &str, entry: &CachedSensor) {
        let ttl = match entry {
            CachedSensor::Registered(_) => self.ttl,
            CachedSensor::Unregistered => self.negative_ttl,
        };
        self.cache.set(&sensor_key(device_id), entry, ttl).await;
    }

    async fn invalidate(&self, device_id: &str) {
        self.cache.delete(&sensor_key(device_id)).await;
    }
}

/// In-memory sensor cache for testing
#[derive(Default)]
pub struct InMemorySensorCache {
    entries: DashMap<String, CachedSensor>,
}

impl InMemorySensorCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inspect an entry without going through the trait (for test assertions)
    pub fn peek(&self, device_id: &str) -> Option<CachedSensor> {
        self.entries.get(device_id).map(|e| e.clone())
    }
}

#[async_trait]
impl SensorCacheBackend for InMemorySensorCache {
    async fn get(&self, device_id: &str) -> Option<CachedSensor> {
        self.entries.get(device_id).map(|e| e.clone())
    }

    async fn set(&self, device_id: &str, entry: &CachedSensor) {
        self.entries.insert(device_id.to_string(), entry.clone());
    }

    async fn invalidate(&self, device_id: &str) {
        self.entries.remove(device_id);
    }
}

/// Per-device mutex table
///
/// A read that misses the cache snapshots the store and then writes the
/// cache; unserialized, a concurrent deregister can slip between the two and
/// its invalidation is overwritten by the stale snapshot. Every registry
/// operation on a device takes that device's lock first.
#[derive(Default)]
struct DeviceLocks {
    locks: DashMap<String, Arc<Mutex<()>>>,
}

impl DeviceLocks {
    fn for_device(&self, device_id: &str) -> Arc<Mutex<()>> {
        self.locks
            .entry(device_id.to_ascii_uppercase())
            .or_default()
            .clone()
    }
}

/// Sensor registry: write-through cache over the sensor store
#[derive(Clone)]
pub struct SensorRegistry {
    store: Arc<dyn SensorStore>,
    cache: Arc<dyn SensorCacheBackend>,
    locks: Arc<DeviceLocks>,
}

impl SensorRegistry {
    pub fn new(store: Arc<dyn SensorStore>, cache: Arc<dyn SensorCacheBackend>) -> Self {
        Self {
            store,
            cache,
            locks: Arc::new(DeviceLocks::default()),
        }
    }

    /// Look up a sensor, consulting the cache first
    ///
    /// Both presence and absence are cached; a cache failure falls through
    /// to the store. Miss-populate holds the device lock so it cannot
    /// overwrite an invalidation from a concurrent mutation.
    pub async fn get(&self, device_id: &str) -> Result<Option<Sensor>> {
        let lock = self.locks.for_device(device_id);
        let _guard = lock.lock().await;

        match self.cache.get(device_id).await {
            Some(CachedSensor::Registered(sensor)) => return Ok(Some(sensor)),
            Some(CachedSensor::Unregistered) => return Ok(None),
            None => {}
        }

        let sensor = self.store.get_by_device_id(device_id).await?;

        let entry = match &sensor {
            Some(s) => CachedSensor::Registered(s.clone()),
            None => CachedSensor::Unregistered,
        };
        self.cache.set(device_id, &entry).await;

        Ok(sensor)
    }

    /// Register a new sensor
    ///
    /// The device id is normalized to canonical MAC form. Store first, then
    /// cache: the cache write also replaces any lingering negative entry.
    pub async fn register(&self, device_id: &str, device_type: DeviceType) -> Result<Sensor> {
        let canonical = validator::canonicalize_mac(device_id).ok_or_else(|| {
            shared::Error::validation(format!("'{}' is not a valid MAC address", device_id))
        })?;

        let lock = self.locks.for_device(&canonical);
        let _guard = lock.lock().await;

        let sensor = self.store.insert(&canonical, device_type).await?;
        self.cache
            .set(&canonical, &CachedSensor::Registered(sensor.clone()))
            .await;

        tracing::info!(
            device_id = %canonical,
            device_type = %device_type,
            "Sensor registered"
        );

        Ok(sensor)
    }

    /// Update the device type of a registered sensor (write-through)
    pub async fn update(
        &self,
        device_id: &str,
        device_type: DeviceType,
    ) -> Result<Option<Sensor>> {
        let lock = self.locks.for_device(device_id);
        let _guard = lock.lock().await;

        let updated = self.store.update_device_type(device_id, device_type).await?;

        match &updated {
            Some(sensor) => {
                self.cache
                    .set(device_id, &CachedSensor::Registered(sensor.clone()))
                    .await;
            }
            None => {
                // The store has no such row; drop whatever the cache thinks
                self.cache.invalidate(device_id).await;
            }
        }

        Ok(updated)
    }

    /// Remove a sensor registration; the cache entry is invalidated
    /// synchronously so stale-positive validation is impossible
    pub async fn deregister(&self, device_id: &str) -> Result<bool> {
        let lock = self.locks.for_device(device_id);
        let _guard = lock.lock().await;

        let removed = self.store.delete(device_id).await?;
        self.cache.invalidate(device_id).await;

        if removed {
            tracing::info!(device_id = %device_id, "Sensor deregistered");
        }

        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sensor_store::InMemorySensorStore;

    fn registry_with_cache() -> (SensorRegistry, Arc<InMemorySensorCache>) {
        let store = Arc::new(InMemorySensorStore::new());
        let cache = Arc::new(InMemorySensorCache::new());
        (SensorRegistry::new(store, cache.clone()), cache)
    }

    #[tokio::test]
    async fn test_miss_populates_cache() {
        let (registry, cache) = registry_with_cache();
        registry
            .register("AA:BB:CC:DD:EE:FF", DeviceType::Radar)
            .await
            .unwrap();

        // Registration already primed the cache; clear it to force a miss
        cache.invalidate("AA:BB:CC:DD:EE:FF").await;
        assert!(cache.peek("AA:BB:CC:DD:EE:FF").is_none());

        let sensor = registry.get("AA:BB:CC:DD:EE:FF").await.unwrap();
        assert!(sensor.is_some());
        assert!(matches!(
            cache.peek("AA:BB:CC:DD:EE:FF"),
            Some(CachedSensor::Registered(_))
        ));
    }

    #[tokio::test]
    async fn test_absence_is_cached() {
        let (registry, cache) = registry_with_cache();

        let sensor = registry.get("AA:BB:CC:DD:EE:FF").await.unwrap();
        assert!(sensor.is_none());
        assert_eq!(
            cache.peek("AA:BB:CC:DD:EE:FF"),
            Some(CachedSensor::Unregistered)
        );
    }

    #[tokio::test]
    async fn test_registration_replaces_negative_entry() {
        let (registry, cache) = registry_with_cache();

        // Prime a negative entry
        registry.get("AA:BB:CC:DD:EE:FF").await.unwrap();
        assert_eq!(
            cache.peek("AA:BB:CC:DD:EE:FF"),
            Some(CachedSensor::Unregistered)
        );

        registry
            .register("AA:BB:CC:DD:EE:FF", DeviceType::AccessController)
            .await
            .unwrap();

        // Negative entry is gone immediately, not after TTL expiry
        assert!(matches!(
            cache.peek("AA:BB:CC:DD:EE:FF"),
            Some(CachedSensor::Registered(_))
        ));
        assert!(registry.get("AA:BB:CC:DD:EE:FF").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_register_normalizes_device_id() {
        let (registry, _cache) = registry_with_cache();

        let sensor = registry
            .register("aa:bb:cc:dd:ee:ff", DeviceType::Radar)
            .await
            .unwrap();
        assert_eq!(sensor.device_id, "AA:BB:CC:DD:EE:FF");
    }

    #[tokio::test]
    async fn test_register_rejects_malformed_id() {
        let (registry, _cache) = registry_with_cache();

        let result = registry.register("not-a-mac", DeviceType::Radar).await;
        assert!(matches!(result, Err(shared::Error::Validation(_))));
    }

    #[tokio::test]
    async fn test_deregister_invalidates_synchronously() {
        let (registry, cache) = registry_with_cache();
        registry
            .register("AA:BB:CC:DD:EE:FF", DeviceType::Radar)
            .await
            .unwrap();
        assert!(cache.peek("AA:BB:CC:DD:EE:FF").is_some());

        assert!(registry.deregister("AA:BB:CC:DD:EE:FF").await.unwrap());

        // The cache entry must be gone even though its TTL has not expired
        assert!(cache.peek("AA:BB:CC:DD:EE:FF").is_none());
        assert!(registry.get("AA:BB:CC:DD:EE:FF").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_deregister_waits_for_inflight_read() {
        use std::sync::atomic::{AtomicBool, Ordering};
        use tokio::sync::Notify;

        // Store whose first read parks until released, holding the read
        // mid-flight while a deregister races it
        struct GatedStore {
            inner: InMemorySensorStore,
            gate: Notify,
            block_first_read: AtomicBool,
        }

        #[async_trait]
        impl SensorStore for GatedStore {
            async fn get_by_device_id(&self, device_id: &str) -> Result<Option<Sensor>> {
                if self.block_first_read.swap(false, Ordering::SeqCst) {
                    self.gate.notified().await;
                }
                self.inner.get_by_device_id(device_id).await
            }

            async fn insert(&self, device_id: &str, device_type: DeviceType) -> Result<Sensor> {
                self.inner.insert(device_id, device_type).await
            }

            async fn update_device_type(
                &self,
                device_id: &str,
                device_type: DeviceType,
            ) -> Result<Option<Sensor>> {
                self.inner.update_device_type(device_id, device_type).await
            }

            async fn delete(&self, device_id: &str) -> Result<bool> {
                self.inner.delete(device_id).await
            }
        }

        let store = Arc::new(GatedStore {
            inner: InMemorySensorStore::new(),
            gate: Notify::new(),
            block_first_read: AtomicBool::new(false),
        });
        let cache = Arc::new(InMemorySensorCache::new());
        let registry = SensorRegistry::new(store.clone(), cache.clone());

        registry
            .register("AA:BB:CC:DD:EE:FF", DeviceType::Radar)
            .await
            .unwrap();
        cache.invalidate("AA:BB:CC:DD:EE:FF").await;
        store.block_first_read.store(true, Ordering::SeqCst);

        // The reader misses the cache and parks inside the store read
        let reader = tokio::spawn({
            let registry = registry.clone();
            async move { registry.get("AA:BB:CC:DD:EE:FF").await }
        });
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;

        // The deregister must wait for the in-flight read to finish
        let remover = tokio::spawn({
            let registry = registry.clone();
            async move { registry.deregister("AA:BB:CC:DD:EE:FF").await }
        });
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        store.gate.notify_one();

        assert!(reader.await.unwrap().unwrap().is_some());
        assert!(remover.await.unwrap().unwrap());

        // The read's snapshot must not have re-poisoned the cache
        assert!(!matches!(
            cache.peek("AA:BB:CC:DD:EE:FF"),
            Some(CachedSensor::Registered(_))
        ));
        assert!(registry.get("AA:BB:CC:DD:EE:FF").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_update_refreshes_cache() {
        let (registry, cache) = registry_with_cache();
        registry
            .register("AA:BB:CC:DD:EE:FF", DeviceType::Radar)
            .await
            .unwrap();

        registry
            .update("AA:BB:CC:DD:EE:FF", DeviceType::SecurityCamera)
            .await
            .unwrap();

        match cache.peek("AA:BB:CC:DD:EE:FF") {
            Some(CachedSensor::Registered(sensor)) => {
                assert_eq!(sensor.device_type, "security_camera");
            }
            other => panic!("expected registered entry, got {:?}", other),
        }
    }
}
