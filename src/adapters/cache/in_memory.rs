//! Recording entitlement cache for tests.

use std::sync::Mutex;

use async_trait::async_trait;

use crate::domain::foundation::{DomainError, UserId};
use crate::ports::EntitlementCache;

/// Records invalidations instead of touching a cache.
#[derive(Default)]
pub struct RecordingEntitlementCache {
    invalidated: Mutex<Vec<UserId>>,
}

impl RecordingEntitlementCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// All invalidated user ids, in call order.
    pub fn invalidated(&self) -> Vec<UserId> {
        self.invalidated.lock().unwrap().clone()
    }
}

#[async_trait]
impl EntitlementCache for RecordingEntitlementCache {
    async fn invalidate_user(&self, user_id: &UserId) -> Result<(), DomainError> {
        self.invalidated.lock().unwrap().push(*user_id);
        Ok(())
    }
}
