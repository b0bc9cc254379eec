//! GetProStatusHandler - Query handler for the billing/status display.
//!
//! Read-only: a subscription snapshot plus the evaluator result. Pro status
//! is always derived here, never read from a stored flag.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::domain::billing::{BillingError, SubscriptionStatus};
use crate::domain::entitlement::{evaluate, ProAccess};
use crate::domain::foundation::{Timestamp, UserId};
use crate::ports::BillingStore;

use super::support::entitlement_intervals;

/// Query for a user's Pro status.
#[derive(Debug, Clone)]
pub struct GetProStatusQuery {
    pub user_id: UserId,
    /// Staff flag, supplied by the caller's auth layer; grants the internal
    /// bypass.
    pub is_internal: bool,
}

/// Subscription fields the status page shows.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubscriptionSnapshot {
    pub status: SubscriptionStatus,
    pub plan_key: String,
    pub cancel_at_period_end: bool,
    pub window_ends_at: Option<Timestamp>,
}

/// Result of the status query.
#[derive(Debug, Clone)]
pub struct GetProStatusResult {
    pub access: ProAccess,
    pub subscription: Option<SubscriptionSnapshot>,
}

/// Handler for the Pro status query.
pub struct GetProStatusHandler {
    store: Arc<dyn BillingStore>,
}

impl GetProStatusHandler {
    pub fn new(store: Arc<dyn BillingStore>) -> Self {
        Self { store }
    }

    pub async fn handle(&self, query: GetProStatusQuery) -> Result<GetProStatusResult, BillingError> {
        self.handle_at(query, Timestamp::now()).await
    }

    /// Handles with an explicit reference time, for schedulers and tests.
    pub async fn handle_at(
        &self,
        query: GetProStatusQuery,
        now: Timestamp,
    ) -> Result<GetProStatusResult, BillingError> {
        let subscription = self.store.subscription_for_user(&query.user_id).await?;
        let overrides = self
            .store
            .live_overrides_for_user(&query.user_id, now)
            .await?;

        let access = evaluate(
            now,
            query.is_internal,
            &entitlement_intervals(subscription.as_ref(), &overrides),
        );

        let snapshot = subscription.map(|s| SubscriptionSnapshot {
            status: s.status,
            plan_key: s.plan_key.clone(),
            cancel_at_period_end: s.cancel_at_period_end,
            window_ends_at: s.window_ends_at(),
        });

        Ok(GetProStatusResult {
            access,
            subscription: snapshot,
        })
    }
}
