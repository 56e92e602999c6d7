//! Decision cache.
//!
//! Authorization responses may be cached keyed by
//! `(user_id, tenant_id, resource, action)`. The cache is read-through with
//! explicit invalidation: every administrative mutation that could change a
//! user's permissions invalidates the affected key space before returning.
//!
//! Cache failures must never fail a decision. Both implementations degrade
//! to a miss on error; the Redis backend logs and swallows.

use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use dashmap::DashMap;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use std::fmt;
use std::time::Duration;
use tracing::{debug, warn};
use uuid::Uuid;

const KEY_PREFIX: &str = "authz:decision";

/// Cache key for one decision.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DecisionKey {
    pub user_id: Uuid,
    pub tenant_id: Uuid,
    pub resource: String,
    pub action: String,
}

impl DecisionKey {
    pub fn new(
        user_id: Uuid,
        tenant_id: Uuid,
        resource: impl Into<String>,
        action: impl Into<String>,
    ) -> Self {
        Self {
            user_id,
            tenant_id,
            resource: resource.into(),
            action: action.into(),
        }
    }

    /// Prefix matching every key for a `(user, tenant)` pair.
    pub fn user_prefix(user_id: Uuid, tenant_id: Uuid) -> String {
        format!("{KEY_PREFIX}:{user_id}:{tenant_id}:")
    }

    /// Prefix matching every key for a tenant, regardless of user.
    pub fn tenant_infix(tenant_id: Uuid) -> String {
        format!(":{tenant_id}:")
    }
}

impl fmt::Display for DecisionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{KEY_PREFIX}:{}:{}:{}:{}",
            self.user_id, self.tenant_id, self.resource, self.action
        )
    }
}

/// Store for cached decision payloads (serialized responses).
#[async_trait]
pub trait DecisionCache: Send + Sync {
    /// Fetch a cached decision; `None` on miss or backend failure.
    async fn get(&self, key: &DecisionKey) -> Option<String>;

    /// Store a decision with a TTL.
    async fn put(&self, key: &DecisionKey, value: String, ttl: Duration);

    /// Drop every cached decision for one user in one tenant.
    async fn invalidate_user(&self, user_id: Uuid, tenant_id: Uuid);

    /// Drop every cached decision under a tenant.
    async fn invalidate_tenant(&self, tenant_id: Uuid);

    /// Drop everything.
    async fn clear(&self);
}

/// Redis-backed cache for multi-node deployments.
pub struct RedisDecisionCache {
    redis: ConnectionManager,
}

impl RedisDecisionCache {
    pub fn new(redis: ConnectionManager) -> Self {
        Self { redis }
    }

    async fn delete_matching(&self, pattern: &str) {
        let mut conn = self.redis.clone();
        let mut cursor: u64 = 0;
        loop {
            let scan: Result<(u64, Vec<String>), redis::RedisError> = redis::cmd("SCAN")
                .arg(cursor)
                .arg("MATCH")
                .arg(pattern)
                .arg("COUNT")
                .arg(200)
                .query_async(&mut conn)
                .await;

            match scan {
                Ok((next, keys)) => {
                    if !keys.is_empty() {
                        if let Err(e) = conn.del::<_, ()>(keys).await {
                            warn!(error = %e, "Failed to delete cached decisions");
                            return;
                        }
                    }
                    if next == 0 {
                        return;
                    }
                    cursor = next;
                }
                Err(e) => {
                    warn!(error = %e, pattern, "Decision cache scan failed");
                    return;
                }
            }
        }
    }
}

#[async_trait]
impl DecisionCache for RedisDecisionCache {
    async fn get(&self, key: &DecisionKey) -> Option<String> {
        let mut conn = self.redis.clone();
        match conn.get::<_, Option<String>>(key.to_string()).await {
            Ok(value) => value,
            Err(e) => {
                warn!(error = %e, "Decision cache read failed, treating as miss");
                None
            }
        }
    }

    async fn put(&self, key: &DecisionKey, value: String, ttl: Duration) {
        let mut conn = self.redis.clone();
        let ttl_secs = ttl.as_secs().max(1);
        if let Err(e) = conn
            .set_ex::<_, _, ()>(key.to_string(), value, ttl_secs)
            .await
        {
            warn!(error = %e, "Decision cache write failed");
        }
    }

    async fn invalidate_user(&self, user_id: Uuid, tenant_id: Uuid) {
        let pattern = format!("{}*", DecisionKey::user_prefix(user_id, tenant_id));
        debug!(%user_id, %tenant_id, "Invalidating user decision cache");
        self.delete_matching(&pattern).await;
    }

    async fn invalidate_tenant(&self, tenant_id: Uuid) {
        let pattern = format!("{KEY_PREFIX}:*{}*", DecisionKey::tenant_infix(tenant_id));
        debug!(%tenant_id, "Invalidating tenant decision cache");
        self.delete_matching(&pattern).await;
    }

    async fn clear(&self) {
        self.delete_matching(&format!("{KEY_PREFIX}:*")).await;
    }
}

/// In-process cache for tests and single-node deployments.
#[derive(Default)]
pub struct InMemoryDecisionCache {
    entries: DashMap<String, (String, DateTime<Utc>)>,
}

impl InMemoryDecisionCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[async_trait]
impl DecisionCache for InMemoryDecisionCache {
    async fn get(&self, key: &DecisionKey) -> Option<String> {
        let key = key.to_string();
        // Copy out before any removal; holding a map guard across remove
        // would deadlock the shard.
        let hit = self.entries.get(&key).map(|e| (e.0.clone(), e.1));
        match hit {
            Some((value, expires)) if expires > Utc::now() => Some(value),
            Some(_) => {
                self.entries.remove(&key);
                None
            }
            None => None,
        }
    }

    async fn put(&self, key: &DecisionKey, value: String, ttl: Duration) {
        let expires = Utc::now()
            + ChronoDuration::from_std(ttl).unwrap_or_else(|_| ChronoDuration::seconds(60));
        self.entries.insert(key.to_string(), (value, expires));
    }

    async fn invalidate_user(&self, user_id: Uuid, tenant_id: Uuid) {
        let prefix = DecisionKey::user_prefix(user_id, tenant_id);
        self.entries.retain(|key, _| !key.starts_with(&prefix));
    }

    async fn invalidate_tenant(&self, tenant_id: Uuid) {
        let infix = DecisionKey::tenant_infix(tenant_id);
        self.entries.retain(|key, _| !key.contains(&infix));
    }

    async fn clear(&self) {
        self.entries.clear();
    }
}
