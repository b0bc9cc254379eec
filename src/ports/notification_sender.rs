//! Notification sender port.
//!
//! Entitlement transitions trigger user-facing emails. Delivery is a
//! collaborator concern: handlers dispatch AFTER the transaction commits and
//! swallow failures (logged, never propagated), so a broken mail pipeline can
//! never roll back or fail a state change.

use async_trait::async_trait;

use crate::domain::foundation::{DomainError, Timestamp, UserId};

/// Port for fire-and-forget entitlement notifications.
#[async_trait]
pub trait NotificationSender: Send + Sync {
    /// The user scheduled a cancellation; access runs until `effective_at`.
    async fn cancellation_scheduled(
        &self,
        user_id: &UserId,
        effective_at: Timestamp,
    ) -> Result<(), DomainError>;

    /// The subscription reached its terminal state.
    async fn subscription_ended(&self, user_id: &UserId) -> Result<(), DomainError>;

    /// The trial ends soon. Sent at most once per subscription, enforced by
    /// the caller's ledger marker.
    async fn trial_expiring_soon(
        &self,
        user_id: &UserId,
        trial_ends_at: Timestamp,
    ) -> Result<(), DomainError>;
}
