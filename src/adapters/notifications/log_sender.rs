//! Log-only notification sender.
//!
//! Real email delivery lives in a separate service; this adapter records the
//! intent in the logs so deployments without that service (development, the
//! sweep binary in dry runs) still surface what would have been sent.

use async_trait::async_trait;
use tracing::info;

use crate::domain::foundation::{DomainError, Timestamp, UserId};
use crate::ports::NotificationSender;

/// Notification sender that only logs.
#[derive(Debug, Clone, Default)]
pub struct LogNotificationSender;

impl LogNotificationSender {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl NotificationSender for LogNotificationSender {
    async fn cancellation_scheduled(
        &self,
        user_id: &UserId,
        effective_at: Timestamp,
    ) -> Result<(), DomainError> {
        info!(
            user_id = %user_id,
            effective_at = %effective_at,
            "notification: cancellation scheduled"
        );
        Ok(())
    }

    async fn subscription_ended(&self, user_id: &UserId) -> Result<(), DomainError> {
        info!(user_id = %user_id, "notification: subscription ended");
        Ok(())
    }

    async fn trial_expiring_soon(
        &self,
        user_id: &UserId,
        trial_ends_at: Timestamp,
    ) -> Result<(), DomainError> {
        info!(
            user_id = %user_id,
            trial_ends_at = %trial_ends_at,
            "notification: trial expiring soon"
        );
        Ok(())
    }
}
