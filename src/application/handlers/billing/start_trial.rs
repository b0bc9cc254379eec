//! StartTrialHandler - Command handler for starting the one free trial.

use std::sync::Arc;

use crate::domain::billing::{
    BillingEntityType, BillingError, BillingEvent, BillingEventSource, BillingEventType,
    Subscription,
};
use crate::domain::entitlement::evaluate;
use crate::domain::foundation::{SubscriptionId, Timestamp, UserId};
use crate::ports::{BillingStore, EntitlementCache};

use super::support::{entitlement_intervals, invalidate_cache};

/// Command to start a free trial.
#[derive(Debug, Clone)]
pub struct StartTrialCommand {
    pub user_id: UserId,
    /// Verified state of the user's email, supplied by the auth layer.
    pub email_verified: bool,
    /// Plan the trial runs on.
    pub plan_key: String,
}

/// Result of successfully starting a trial.
#[derive(Debug, Clone)]
pub struct StartTrialResult {
    pub subscription: Subscription,
}

/// Handler for starting trials.
///
/// Preconditions, in order: the email must be verified, the user must not
/// already hold Pro access, and the one-per-user trial-use row must not
/// exist yet. The trial-use insert is conflict-do-nothing, so two racing
/// requests cannot both start a trial.
pub struct StartTrialHandler {
    store: Arc<dyn BillingStore>,
    cache: Arc<dyn EntitlementCache>,
    trial_days: i64,
}

impl StartTrialHandler {
    pub fn new(
        store: Arc<dyn BillingStore>,
        cache: Arc<dyn EntitlementCache>,
        trial_days: i64,
    ) -> Self {
        Self {
            store,
            cache,
            trial_days,
        }
    }

    pub async fn handle(&self, cmd: StartTrialCommand) -> Result<StartTrialResult, BillingError> {
        self.handle_at(cmd, Timestamp::now()).await
    }

    /// Handles with an explicit reference time, for schedulers and tests.
    pub async fn handle_at(
        &self,
        cmd: StartTrialCommand,
        now: Timestamp,
    ) -> Result<StartTrialResult, BillingError> {
        if !cmd.email_verified {
            return Err(BillingError::EmailNotVerified);
        }

        let mut tx = self.store.begin().await?;

        // Lock the subscription row first; everything below reads state this
        // lock protects.
        let existing = tx.lock_subscription(&cmd.user_id).await?;
        let overrides = tx.live_overrides_for_user(&cmd.user_id, now).await?;

        let access = evaluate(now, false, &entitlement_intervals(existing.as_ref(), &overrides));
        if access.is_pro {
            return Err(BillingError::AlreadyPro);
        }

        if !tx.insert_trial_use(&cmd.user_id).await? {
            return Err(BillingError::TrialAlreadyUsed);
        }

        let mut subscription = Subscription::start_trial(
            SubscriptionId::new(),
            cmd.user_id,
            cmd.plan_key,
            now,
            self.trial_days,
        );
        if let Some(previous) = existing {
            subscription.id = previous.id;
            subscription.created_at = previous.created_at;
        }
        tx.upsert_subscription(&subscription).await?;

        let event = BillingEvent::new(
            BillingEventSource::Api,
            BillingEventType::TrialStarted,
            BillingEntityType::Subscription,
            subscription.id.to_string(),
            now,
        )
        .with_user(cmd.user_id)
        .with_payload(serde_json::json!({
            "plan_key": subscription.plan_key,
            "trial_days": self.trial_days,
            "trial_ends_at": subscription.trial_ends_at,
        }));
        tx.append_event(&event).await?;

        tx.commit().await?;

        invalidate_cache(self.cache.as_ref(), &cmd.user_id).await;

        Ok(StartTrialResult { subscription })
    }
}
