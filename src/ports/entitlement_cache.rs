//! Entitlement cache port.
//!
//! Pro status is derived on every read, so edge layers cache it per user.
//! Every state-changing command signals invalidation for the affected user
//! after its transaction commits. Like notifications, failures are logged
//! and swallowed; a cache that misses an invalidation only serves slightly
//! stale reads until its TTL expires.

use async_trait::async_trait;

use crate::domain::foundation::{DomainError, UserId};

/// Port for the per-user cache invalidation signal.
#[async_trait]
pub trait EntitlementCache: Send + Sync {
    /// Drops any cached entitlement state for the user.
    async fn invalidate_user(&self, user_id: &UserId) -> Result<(), DomainError>;
}
