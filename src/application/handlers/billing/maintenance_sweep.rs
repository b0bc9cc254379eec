//! MaintenanceSweepHandler - Periodic job that expires billing state.
//!
//! Three independent passes, each transactional per row so a crash or an
//! overlapping sweep leaves no half-applied work:
//!
//! 1. Finalize subscriptions whose window elapsed, `ended_at` set to the
//!    window boundary rather than wall-clock now.
//! 2. Mark and notify trials ending soon, at most once per subscription via
//!    a ledger idempotency marker.
//! 3. Disable promotions and pending grants whose validity windows elapsed.
//!
//! Row-level failures are logged and skipped; the next run converges.

use std::sync::Arc;

use tracing::{info, warn};

use crate::domain::billing::{
    BillingEntityType, BillingError, BillingEvent, BillingEventSource, BillingEventType,
    Subscription,
};
use crate::domain::foundation::Timestamp;
use crate::ports::{BillingStore, EntitlementCache, NotificationSender};

use super::support::invalidate_cache;

/// Provider tag for sweep-issued idempotency markers.
const MARKER_PROVIDER: &str = "maintenance";

/// Aggregate counts from one sweep run, for observability.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub subscriptions_ended: u32,
    pub trial_notices_sent: u32,
    pub promotions_disabled: u32,
    pub pending_grants_disabled: u32,
}

/// Handler that runs the maintenance sweep.
pub struct MaintenanceSweepHandler {
    store: Arc<dyn BillingStore>,
    notifier: Arc<dyn NotificationSender>,
    cache: Arc<dyn EntitlementCache>,
    /// How close to its end a trial must be for the expiring notice.
    expiring_soon_days: u32,
    /// Candidate scan size per pass.
    batch_size: u32,
}

impl MaintenanceSweepHandler {
    pub fn new(
        store: Arc<dyn BillingStore>,
        notifier: Arc<dyn NotificationSender>,
        cache: Arc<dyn EntitlementCache>,
        expiring_soon_days: u32,
        batch_size: u32,
    ) -> Self {
        Self {
            store,
            notifier,
            cache,
            expiring_soon_days,
            batch_size,
        }
    }

    pub async fn run(&self) -> Result<SweepReport, BillingError> {
        self.run_at(Timestamp::now()).await
    }

    /// Runs with an explicit reference time, for schedulers and tests.
    pub async fn run_at(&self, now: Timestamp) -> Result<SweepReport, BillingError> {
        let report = SweepReport {
            subscriptions_ended: self.finalize_expired_subscriptions(now).await?,
            trial_notices_sent: self.notify_expiring_trials(now).await?,
            promotions_disabled: self.disable_expired_promotions(now).await?,
            pending_grants_disabled: self.disable_expired_pending_grants(now).await?,
        };

        info!(
            subscriptions_ended = report.subscriptions_ended,
            trial_notices_sent = report.trial_notices_sent,
            promotions_disabled = report.promotions_disabled,
            pending_grants_disabled = report.pending_grants_disabled,
            "Maintenance sweep finished"
        );

        Ok(report)
    }

    /// Pass 1: move elapsed subscriptions to `ended`.
    async fn finalize_expired_subscriptions(&self, now: Timestamp) -> Result<u32, BillingError> {
        let candidates = self.store.expired_subscriptions(now, self.batch_size).await?;
        let mut ended = 0;

        for subscription in candidates {
            match self.finalize_one(&subscription, now).await {
                Ok(true) => {
                    ended += 1;
                    invalidate_cache(self.cache.as_ref(), &subscription.user_id).await;
                    if let Err(e) = self.notifier.subscription_ended(&subscription.user_id).await {
                        warn!(
                            user_id = %subscription.user_id,
                            error = %e,
                            "Failed to send subscription-ended email"
                        );
                    }
                }
                // Another sweep or command got there first.
                Ok(false) => {}
                Err(e) => {
                    warn!(
                        subscription_id = %subscription.id,
                        error = %e,
                        "Failed to finalize expired subscription"
                    );
                }
            }
        }

        Ok(ended)
    }

    /// Ends one subscription in its own transaction. Returns whether this
    /// call performed the transition.
    async fn finalize_one(
        &self,
        subscription: &Subscription,
        now: Timestamp,
    ) -> Result<bool, BillingError> {
        // The candidate scan ran unlocked; the boundary is re-read from the
        // candidate row and the compare-and-set re-checks status under the
        // transaction.
        let boundary = match subscription.window_ends_at() {
            Some(end) if end <= now => end,
            _ => return Ok(false),
        };

        let mut tx = self.store.begin().await?;
        if !tx.end_subscription_if_active(&subscription.id, boundary).await? {
            return Ok(false);
        }

        let event = BillingEvent::new(
            BillingEventSource::Maintenance,
            BillingEventType::SubscriptionEnded,
            BillingEntityType::Subscription,
            subscription.id.to_string(),
            now,
        )
        .with_user(subscription.user_id)
        .with_payload(serde_json::json!({
            "ended_at": boundary,
            "previous_status": subscription.status,
        }));
        tx.append_event(&event).await?;
        tx.commit().await?;

        Ok(true)
    }

    /// Pass 2: send "trial expiring soon" at most once per subscription.
    async fn notify_expiring_trials(&self, now: Timestamp) -> Result<u32, BillingError> {
        let candidates = self
            .store
            .trials_expiring_within(now, self.expiring_soon_days, self.batch_size)
            .await?;
        let mut sent = 0;

        for subscription in candidates {
            let trial_ends_at = match subscription.trial_ends_at {
                Some(end) => end,
                None => continue,
            };

            let marker = BillingEvent::new(
                BillingEventSource::Maintenance,
                BillingEventType::TrialExpiringSoonNotified,
                BillingEntityType::Subscription,
                subscription.id.to_string(),
                now,
            )
            .with_user(subscription.user_id)
            .with_payload(serde_json::json!({ "trial_ends_at": trial_ends_at }))
            .with_idempotency_key(
                MARKER_PROVIDER,
                format!("trial_expiring_soon_notified:{}", subscription.id),
            );

            let inserted = {
                let mut tx = self.store.begin().await?;
                let inserted = tx.append_event(&marker).await?;
                tx.commit().await?;
                inserted
            };

            // Only the run that wins the marker insert sends the email.
            if inserted {
                sent += 1;
                if let Err(e) = self
                    .notifier
                    .trial_expiring_soon(&subscription.user_id, trial_ends_at)
                    .await
                {
                    warn!(
                        user_id = %subscription.user_id,
                        error = %e,
                        "Failed to send trial-expiring email"
                    );
                }
            }
        }

        Ok(sent)
    }

    /// Pass 3a: disable promotions whose validity window elapsed.
    async fn disable_expired_promotions(&self, now: Timestamp) -> Result<u32, BillingError> {
        let candidates = self.store.expired_promotions(now, self.batch_size).await?;
        let mut disabled = 0;

        for promotion in candidates {
            let mut tx = self.store.begin().await?;
            if tx.set_promotion_active(&promotion.id, false).await? {
                let event = BillingEvent::new(
                    BillingEventSource::Maintenance,
                    BillingEventType::PromotionDisabled,
                    BillingEntityType::Promotion,
                    promotion.id.to_string(),
                    now,
                )
                .with_payload(serde_json::json!({ "valid_to": promotion.valid_to }));
                tx.append_event(&event).await?;
                disabled += 1;
            }
            tx.commit().await?;
        }

        Ok(disabled)
    }

    /// Pass 3b: disable pending grants whose claim window elapsed.
    async fn disable_expired_pending_grants(&self, now: Timestamp) -> Result<u32, BillingError> {
        let candidates = self.store.expired_pending_grants(now, self.batch_size).await?;
        let mut disabled = 0;

        for grant in candidates {
            let mut tx = self.store.begin().await?;
            if tx.set_pending_grant_active(&grant.id, false).await? {
                let event = BillingEvent::new(
                    BillingEventSource::Maintenance,
                    BillingEventType::PendingGrantDisabled,
                    BillingEntityType::PendingGrant,
                    grant.id.to_string(),
                    now,
                )
                .with_payload(serde_json::json!({ "claim_valid_to": grant.claim_valid_to }));
                tx.append_event(&event).await?;
                disabled += 1;
            }
            tx.commit().await?;
        }

        Ok(disabled)
    }
}
