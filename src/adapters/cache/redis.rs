//! Redis-backed entitlement cache invalidation.
//!
//! Edge layers cache derived Pro status under a per-user key; invalidation is
//! a DEL on that key. A missed invalidation only means slightly stale reads
//! until the cache TTL expires.

use async_trait::async_trait;
use redis::aio::MultiplexedConnection;
use redis::AsyncCommands;

use crate::domain::foundation::{DomainError, ErrorCode, UserId};
use crate::ports::EntitlementCache;

/// Key prefix shared with the read-side cache.
const KEY_PREFIX: &str = "entitlements:pro:";

/// Redis-backed cache invalidation signal.
#[derive(Clone)]
pub struct RedisEntitlementCache {
    conn: MultiplexedConnection,
}

impl RedisEntitlementCache {
    /// Creates a new Redis entitlement cache.
    pub fn new(conn: MultiplexedConnection) -> Self {
        Self { conn }
    }

    fn key_for(user_id: &UserId) -> String {
        format!("{}{}", KEY_PREFIX, user_id)
    }
}

#[async_trait]
impl EntitlementCache for RedisEntitlementCache {
    async fn invalidate_user(&self, user_id: &UserId) -> Result<(), DomainError> {
        let mut conn = self.conn.clone();
        conn.del::<_, ()>(Self::key_for(user_id))
            .await
            .map_err(|e| {
                DomainError::new(
                    ErrorCode::CacheError,
                    format!("Failed to invalidate entitlement cache: {}", e),
                )
            })
    }
}
