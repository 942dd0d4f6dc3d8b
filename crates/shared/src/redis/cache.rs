//! Generic Redis caching layer for entities
//!
//! Provides the caching substrate for the sensor registry (write-through)
//! and the authorized-user lookup (cache-aside).
//!
//! # Cache Strategy
//!
//! - **TTL**: per-entry, so negative entries can expire sooner than hits
//! - **Graceful degradation**: Redis errors are logged and treated as a
//!   miss; the caller falls back to the authoritative store
//!
//! # Key Prefixes
//!
//! - `sensor:{device_id}` - Sensor by canonical MAC address
//! - `authorized:{user_id}` - Authorized-user membership result

use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use serde::{de::DeserializeOwned, Serialize};
use std::time::Duration;
use tracing::{debug, warn};

/// Entity cache manager for Redis
///
/// Generic caching layer that can cache any serializable entity.
#[derive(Clone)]
pub struct EntityCache {
    redis: ConnectionManager,
}

impl EntityCache {
    /// Create a new entity cache over an existing connection manager
    pub fn new(redis: ConnectionManager) -> Self {
        Self { redis }
    }

    /// Get an entity from cache
    ///
    /// Returns None if not found or on Redis error (graceful degradation)
    pub async fn get<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let mut conn = self.redis.clone();

        match conn.get::<_, Option<String>>(key).await {
            Ok(Some(json_str)) => match serde_json::from_str(&json_str) {
                Ok(entity) => {
                    debug!(key = key, "Cache HIT");
                    Some(entity)
                }
                Err(e) => {
                    warn!(key = key, error = %e, "Failed to deserialize cached entity");
                    None
                }
            },
            Ok(None) => {
                debug!(key = key, "Cache MISS");
                None
            }
            Err(e) => {
                warn!(key = key, error = %e, "Redis cache read failed");
                None
            }
        }
    }

    /// Store an entity in cache with a TTL
    ///
    /// Errors are logged but don't fail the operation (graceful degradation)
    pub async fn set<T: Serialize>(&self, key: &str, entity: &T, ttl: Duration) {
        let mut conn = self.redis.clone();

        match serde_json::to_string(entity) {
            Ok(json_str) => {
                if let Err(e) = conn.set_ex::<_, _, ()>(key, json_str, ttl.as_secs()).await {
                    warn!(key = key, error = %e, "Redis cache write failed");
                }
            }
            Err(e) => {
                warn!(key = key, error = %e, "Failed to serialize entity for cache");
            }
        }
    }

    /// Delete an entity from cache
    ///
    /// Errors are logged but don't fail the operation
    pub async fn delete(&self, key: &str) {
        let mut conn = self.redis.clone();

        if let Err(e) = conn.del::<_, ()>(key).await {
            warn!(key = key, error = %e, "Redis cache delete failed");
        }
    }
}

// ============================================================================
// Key Builders
// ============================================================================

/// Build cache key for a sensor by canonical device id
pub fn sensor_key(device_id: &str) -> String {
    format!("sensor:{}", device_id.to_uppercase())
}

/// Build cache key for an authorized-user membership result
pub fn authorized_user_key(user_id: &str) -> String {
    format!("authorized:{}", user_id)
}
