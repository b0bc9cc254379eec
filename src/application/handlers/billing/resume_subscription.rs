//! ResumeSubscriptionHandler - Command handler for reverting a scheduled
//! cancellation.

use std::sync::Arc;

use crate::domain::billing::{
    BillingEntityType, BillingError, BillingEvent, BillingEventSource, BillingEventType,
    SubscriptionStatus,
};
use crate::domain::foundation::{Timestamp, UserId};
use crate::ports::{BillingStore, EntitlementCache};

use super::support::invalidate_cache;

/// Command to clear a scheduled cancellation.
#[derive(Debug, Clone)]
pub struct ResumeSubscriptionCommand {
    pub user_id: UserId,
}

/// Result of resuming a subscription.
#[derive(Debug, Clone)]
pub struct ResumeSubscriptionResult {
    /// True when no cancellation was scheduled; the call was a no-op and no
    /// event was appended.
    pub already_active: bool,
}

/// Handler for reverting scheduled cancellations.
pub struct ResumeSubscriptionHandler {
    store: Arc<dyn BillingStore>,
    cache: Arc<dyn EntitlementCache>,
}

impl ResumeSubscriptionHandler {
    pub fn new(store: Arc<dyn BillingStore>, cache: Arc<dyn EntitlementCache>) -> Self {
        Self { store, cache }
    }

    pub async fn handle(
        &self,
        cmd: ResumeSubscriptionCommand,
    ) -> Result<ResumeSubscriptionResult, BillingError> {
        self.handle_at(cmd, Timestamp::now()).await
    }

    /// Handles with an explicit reference time, for schedulers and tests.
    pub async fn handle_at(
        &self,
        cmd: ResumeSubscriptionCommand,
        now: Timestamp,
    ) -> Result<ResumeSubscriptionResult, BillingError> {
        let mut tx = self.store.begin().await?;

        let mut subscription = tx
            .lock_subscription(&cmd.user_id)
            .await?
            .ok_or_else(|| BillingError::not_found("Subscription"))?;

        if subscription.status == SubscriptionStatus::Ended {
            return Err(BillingError::SubscriptionEnded);
        }
        if subscription.is_window_elapsed(now) {
            return Err(BillingError::NotActive);
        }

        if !subscription.cancel_at_period_end {
            return Ok(ResumeSubscriptionResult {
                already_active: true,
            });
        }

        subscription.resume(now);
        tx.update_subscription(&subscription).await?;

        let event = BillingEvent::new(
            BillingEventSource::Api,
            BillingEventType::CancelReverted,
            BillingEntityType::Subscription,
            subscription.id.to_string(),
            now,
        )
        .with_user(cmd.user_id);
        tx.append_event(&event).await?;

        tx.commit().await?;

        invalidate_cache(self.cache.as_ref(), &cmd.user_id).await;

        Ok(ResumeSubscriptionResult {
            already_active: false,
        })
    }
}
