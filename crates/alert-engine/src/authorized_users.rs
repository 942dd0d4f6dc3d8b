//! Authorized-user membership with cache-aside lookup
//!
//! The unauthorized-access rule needs a membership check per access attempt.
//! Lookups go through a Redis cache entry with a TTL; a miss falls through
//! to the PostgreSQL store and populates the cache. Mutations write the
//! store first, then fix the cache, so a revoked user stops passing lookups
//! immediately.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::{DashMap, DashSet};
use shared::redis::authorized_user_key;
use shared::{DbPool, EntityCache, PipelineConfig};
use tokio::sync::Mutex;

use crate::error::{ProcessorError, ProcessorResult};

/// Membership lookup used by the rule engine
#[async_trait]
pub trait AuthorizedUserLookup: Send + Sync {
    /// Whether this user id is currently authorized
    async fn is_authorized(&self, user_id: &str) -> ProcessorResult<bool>;
}

/// Authorized-user store trait for testability
#[async_trait]
pub trait AuthorizedUserStore: Send + Sync {
    /// Whether the user id exists in the store
    async fn exists(&self, user_id: &str) -> ProcessorResult<bool>;

    /// Grant authorization; idempotent
    async fn add(&self, user_id: &str) -> ProcessorResult<()>;

    /// Revoke authorization; returns whether a row was removed
    async fn remove(&self, user_id: &str) -> ProcessorResult<bool>;
}

/// PostgreSQL-backed authorized-user store
pub struct PgAuthorizedUserStore {
    pool: DbPool,
}

impl PgAuthorizedUserStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl AuthorizedUserStore for PgAuthorizedUserStore {
    async fn exists(&self, user_id: &str) -> ProcessorResult<bool> {
        let exists: bool = sqlx::query_scalar(
            "SELECT EXISTS(SELECT 1 FROM authorized_users WHERE user_id = $1)",
        )
        .bind(user_id)
        .fetch_one(&self.pool)
        .await
        .map_err(ProcessorError::Database)?;

        Ok(exists)
    }

    async fn add(&self, user_id: &str) -> ProcessorResult<()> {
        sqlx::query(
            r#"
            INSERT INTO authorized_users (user_id, created_at)
            VALUES ($1, NOW())
            ON CONFLICT (user_id) DO NOTHING
            "#,
        )
        .bind(user_id)
        .execute(&self.pool)
        .await
        .map_err(ProcessorError::Database)?;

        Ok(())
    }

    async fn remove(&self, user_id: &str) -> ProcessorResult<bool> {
        let result = sqlx::query("DELETE FROM authorized_users WHERE user_id = $1")
            .bind(user_id)
            .execute(&self.pool)
            .await
            .map_err(ProcessorError::Database)?;

        Ok(result.rows_affected() > 0)
    }
}

/// Cache backend for membership entries, behind a trait so the cache-aside
/// behavior can be exercised without Redis
#[async_trait]
pub trait MembershipCacheBackend: Send + Sync {
    /// Fetch the cached membership entry for a user id, if any
    async fn get(&self, user_id: &str) -> Option<bool>;

    /// Store a membership entry (positive or negative)
    async fn set(&self, user_id: &str, member: bool);

    /// Drop the entry for a user id
    async fn invalidate(&self, user_id: &str);
}

/// Redis-backed membership cache
///
/// Both positive and negative membership are cached under the same TTL.
/// Redis failures degrade to store access.
#[derive(Clone)]
pub struct RedisMembershipCache {
    cache: EntityCache,
    ttl: Duration,
}

impl RedisMembershipCache {
    pub fn new(cache: EntityCache, config: &PipelineConfig) -> Self {
        Self {
            cache,
            ttl: Duration::from_secs(config.authorized_user_cache_ttl_secs),
        }
    }
}

#[async_trait]
impl MembershipCacheBackend for RedisMembershipCache {
    async fn get(&self, user_id: &str) -> Option<bool> {
        self.cache.get::<bool>(&authorized_user_key(user_id)).await
    }

    async fn set(&self, user_id: &str, member: bool) {
        self.cache
            .set(&authorized_user_key(user_id), &member, self.ttl)
            .await;
    }

    async fn invalidate(&self, user_id: &str) {
        self.cache.delete(&authorized_user_key(user_id)).await;
    }
}

/// In-memory membership cache for testing
#[derive(Default)]
pub struct InMemoryMembershipCache {
    entries: DashMap<String, bool>,
}

impl InMemoryMembershipCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inspect an entry without going through the trait (for test assertions)
    pub fn peek(&self, user_id: &str) -> Option<bool> {
        self.entries.get(user_id).map(|e| *e)
    }
}

#[async_trait]
impl MembershipCacheBackend for InMemoryMembershipCache {
    async fn get(&self, user_id: &str) -> Option<bool> {
        self.entries.get(user_id).map(|e| *e)
    }

    async fn set(&self, user_id: &str, member: bool) {
        self.entries.insert(user_id.to_string(), member);
    }

    async fn invalidate(&self, user_id: &str) {
        self.entries.remove(user_id);
    }
}

/// Cache-aside membership service over a store and a cache backend
///
/// Lookups that miss snapshot the store and populate the cache; mutations
/// write the store first, then fix the cache. Operations on the same user id
/// hold a per-user lock, so a miss-populate cannot overwrite the
/// invalidation of a concurrent revocation.
pub struct AuthorizedUserCache {
    store: Arc<dyn AuthorizedUserStore>,
    cache: Arc<dyn MembershipCacheBackend>,
    locks: DashMap<String, Arc<Mutex<()>>>,
}

impl AuthorizedUserCache {
    pub fn new(store: Arc<dyn AuthorizedUserStore>, cache: Arc<dyn MembershipCacheBackend>) -> Self {
        Self {
            store,
            cache,
            locks: DashMap::new(),
        }
    }

    fn lock_for(&self, user_id: &str) -> Arc<Mutex<()>> {
        self.locks.entry(user_id.to_string()).or_default().clone()
    }

    /// Grant authorization and refresh the cache entry
    pub async fn add(&self, user_id: &str) -> ProcessorResult<()> {
        let lock = self.lock_for(user_id);
        let _guard = lock.lock().await;

        self.store.add(user_id).await?;
        self.cache.set(user_id, true).await;
        Ok(())
    }

    /// Revoke authorization and invalidate the cache entry
    pub async fn remove(&self, user_id: &str) -> ProcessorResult<bool> {
        let lock = self.lock_for(user_id);
        let _guard = lock.lock().await;

        let removed = self.store.remove(user_id).await?;
        self.cache.invalidate(user_id).await;
        Ok(removed)
    }
}

#[async_trait]
impl AuthorizedUserLookup for AuthorizedUserCache {
    async fn is_authorized(&self, user_id: &str) -> ProcessorResult<bool> {
        let lock = self.lock_for(user_id);
        let _guard = lock.lock().await;

        if let Some(member) = self.cache.get(user_id).await {
            return Ok(member);
        }

        let member = self.store.exists(user_id).await?;
        self.cache.set(user_id, member).await;
        Ok(member)
    }
}

/// In-memory authorized-user set for testing
///
/// Serves as both the store and the lookup.
#[derive(Default)]
pub struct InMemoryAuthorizedUsers {
    users: DashSet<String>,
}

impl InMemoryAuthorizedUsers {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed the set with the given user ids
    pub fn with_users(user_ids: &[&str]) -> Self {
        let users = DashSet::new();
        for user_id in user_ids {
            users.insert(user_id.to_string());
        }
        Self { users }
    }
}

#[async_trait]
impl AuthorizedUserStore for InMemoryAuthorizedUsers {
    async fn exists(&self, user_id: &str) -> ProcessorResult<bool> {
        Ok(self.users.contains(user_id))
    }

    async fn add(&self, user_id: &str) -> ProcessorResult<()> {
        self.users.insert(user_id.to_string());
        Ok(())
    }

    async fn remove(&self, user_id: &str) -> ProcessorResult<bool> {
        Ok(self.users.remove(user_id).is_some())
    }
}

#[async_trait]
impl AuthorizedUserLookup for InMemoryAuthorizedUsers {
    async fn is_authorized(&self, user_id: &str) -> ProcessorResult<bool> {
        Ok(self.users.contains(user_id))
    }
}
