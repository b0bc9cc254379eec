//! ScheduleCancellationHandler - Command handler for cancel-at-period-end.

use std::sync::Arc;

use tracing::warn;

use crate::domain::billing::{
    BillingEntityType, BillingError, BillingEvent, BillingEventSource, BillingEventType,
    SubscriptionStatus,
};
use crate::domain::foundation::{Timestamp, UserId};
use crate::ports::{BillingStore, EntitlementCache, NotificationSender};

use super::support::invalidate_cache;

/// Command to schedule cancellation at the end of the current window.
#[derive(Debug, Clone)]
pub struct ScheduleCancellationCommand {
    pub user_id: UserId,
}

/// Result of scheduling a cancellation.
#[derive(Debug, Clone)]
pub struct ScheduleCancellationResult {
    /// True when the cancellation was already scheduled; the call was a
    /// no-op, no event was appended and no email re-sent.
    pub already_scheduled: bool,
    /// When access runs out.
    pub effective_at: Timestamp,
}

/// Handler for scheduling cancellations.
pub struct ScheduleCancellationHandler {
    store: Arc<dyn BillingStore>,
    notifier: Arc<dyn NotificationSender>,
    cache: Arc<dyn EntitlementCache>,
}

impl ScheduleCancellationHandler {
    pub fn new(
        store: Arc<dyn BillingStore>,
        notifier: Arc<dyn NotificationSender>,
        cache: Arc<dyn EntitlementCache>,
    ) -> Self {
        Self {
            store,
            notifier,
            cache,
        }
    }

    pub async fn handle(
        &self,
        cmd: ScheduleCancellationCommand,
    ) -> Result<ScheduleCancellationResult, BillingError> {
        self.handle_at(cmd, Timestamp::now()).await
    }

    /// Handles with an explicit reference time, for schedulers and tests.
    pub async fn handle_at(
        &self,
        cmd: ScheduleCancellationCommand,
        now: Timestamp,
    ) -> Result<ScheduleCancellationResult, BillingError> {
        let mut tx = self.store.begin().await?;

        let mut subscription = tx
            .lock_subscription(&cmd.user_id)
            .await?
            .ok_or_else(|| BillingError::not_found("Subscription"))?;

        if subscription.status == SubscriptionStatus::Ended {
            return Err(BillingError::SubscriptionEnded);
        }
        let effective_at = match subscription.window_ends_at() {
            Some(end) if end > now => end,
            _ => return Err(BillingError::NotActive),
        };

        if subscription.cancel_at_period_end {
            // Retried client call; succeed without re-appending or re-mailing.
            return Ok(ScheduleCancellationResult {
                already_scheduled: true,
                effective_at,
            });
        }

        subscription.schedule_cancellation(now);
        tx.update_subscription(&subscription).await?;

        let event = BillingEvent::new(
            BillingEventSource::Api,
            BillingEventType::CancelScheduled,
            BillingEntityType::Subscription,
            subscription.id.to_string(),
            now,
        )
        .with_user(cmd.user_id)
        .with_payload(serde_json::json!({ "effective_at": effective_at }));
        tx.append_event(&event).await?;

        tx.commit().await?;

        invalidate_cache(self.cache.as_ref(), &cmd.user_id).await;
        if let Err(e) = self
            .notifier
            .cancellation_scheduled(&cmd.user_id, effective_at)
            .await
        {
            warn!(user_id = %cmd.user_id, error = %e, "Failed to send cancellation email");
        }

        Ok(ScheduleCancellationResult {
            already_scheduled: false,
            effective_at,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::cache::RecordingEntitlementCache;
    use crate::adapters::memory::InMemoryBillingStore;
    use crate::adapters::notifications::RecordingNotificationSender;
    use crate::domain::billing::Subscription;
    use crate::domain::foundation::SubscriptionId;

    fn ts(s: &str) -> Timestamp {
        Timestamp::parse_rfc3339(s).unwrap()
    }

    struct Fixture {
        store: Arc<InMemoryBillingStore>,
        notifier: Arc<RecordingNotificationSender>,
        cache: Arc<RecordingEntitlementCache>,
        handler: ScheduleCancellationHandler,
    }

    fn fixture() -> Fixture {
        let store = Arc::new(InMemoryBillingStore::new());
        let notifier = Arc::new(RecordingNotificationSender::new());
        let cache = Arc::new(RecordingEntitlementCache::new());
        let handler =
            ScheduleCancellationHandler::new(store.clone(), notifier.clone(), cache.clone());
        Fixture {
            store,
            notifier,
            cache,
            handler,
        }
    }

    async fn seed_trial(store: &InMemoryBillingStore, now: Timestamp) -> UserId {
        let sub = Subscription::start_trial(SubscriptionId::new(), UserId::new(), "pro", now, 14);
        let user = sub.user_id;
        store.put_subscription(sub).await;
        user
    }

    #[tokio::test]
    async fn schedules_cancellation_on_active_window() {
        let f = fixture();
        let now = ts("2024-01-01T00:00:00Z");
        let user = seed_trial(&f.store, now).await;

        let result = f
            .handler
            .handle_at(ScheduleCancellationCommand { user_id: user }, now.add_days(3))
            .await
            .unwrap();

        assert!(!result.already_scheduled);
        assert_eq!(result.effective_at, ts("2024-01-15T00:00:00Z"));
        assert!(f.store.subscription(&user).await.unwrap().cancel_at_period_end);
    }

    #[tokio::test]
    async fn second_call_is_idempotent() {
        let f = fixture();
        let now = ts("2024-01-01T00:00:00Z");
        let user = seed_trial(&f.store, now).await;
        let cmd = ScheduleCancellationCommand { user_id: user };

        f.handler.handle_at(cmd.clone(), now.add_days(3)).await.unwrap();
        let second = f.handler.handle_at(cmd, now.add_days(4)).await.unwrap();

        assert!(second.already_scheduled);
        // Exactly one event and exactly one email.
        assert_eq!(f.store.events().await.len(), 1);
        assert_eq!(f.notifier.sent().len(), 1);
    }

    #[tokio::test]
    async fn missing_subscription_is_not_found() {
        let f = fixture();

        let result = f
            .handler
            .handle_at(
                ScheduleCancellationCommand { user_id: UserId::new() },
                ts("2024-01-01T00:00:00Z"),
            )
            .await;

        assert!(matches!(result, Err(BillingError::NotFound { .. })));
    }

    #[tokio::test]
    async fn ended_subscription_is_rejected() {
        let f = fixture();
        let now = ts("2024-01-01T00:00:00Z");
        let user = seed_trial(&f.store, now).await;
        let mut sub = f.store.subscription(&user).await.unwrap();
        sub.status = crate::domain::billing::SubscriptionStatus::Ended;
        f.store.put_subscription(sub).await;

        let result = f
            .handler
            .handle_at(ScheduleCancellationCommand { user_id: user }, now)
            .await;

        assert_eq!(result.unwrap_err(), BillingError::SubscriptionEnded);
    }

    #[tokio::test]
    async fn elapsed_window_is_not_active() {
        let f = fixture();
        let now = ts("2024-01-01T00:00:00Z");
        let user = seed_trial(&f.store, now).await;

        let result = f
            .handler
            .handle_at(
                ScheduleCancellationCommand { user_id: user },
                ts("2024-02-01T00:00:00Z"),
            )
            .await;

        assert_eq!(result.unwrap_err(), BillingError::NotActive);
    }

    #[tokio::test]
    async fn sends_email_and_invalidates_cache() {
        let f = fixture();
        let now = ts("2024-01-01T00:00:00Z");
        let user = seed_trial(&f.store, now).await;

        f.handler
            .handle_at(ScheduleCancellationCommand { user_id: user }, now)
            .await
            .unwrap();

        assert_eq!(f.notifier.sent().len(), 1);
        assert_eq!(f.cache.invalidated(), vec![user]);
    }

    #[tokio::test]
    async fn notification_failure_does_not_fail_the_command() {
        let store = Arc::new(InMemoryBillingStore::new());
        let notifier = Arc::new(RecordingNotificationSender::failing());
        let cache = Arc::new(RecordingEntitlementCache::new());
        let handler = ScheduleCancellationHandler::new(store.clone(), notifier, cache);

        let now = ts("2024-01-01T00:00:00Z");
        let user = seed_trial(&store, now).await;

        let result = handler
            .handle_at(ScheduleCancellationCommand { user_id: user }, now)
            .await;

        assert!(result.is_ok());
        // State change and ledger event still committed.
        assert!(store.subscription(&user).await.unwrap().cancel_at_period_end);
        assert_eq!(store.events().await.len(), 1);
    }
}
