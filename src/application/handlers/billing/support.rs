//! Shared plumbing for billing handlers.

use tracing::warn;

use crate::domain::billing::{EntitlementOverride, Subscription};
use crate::domain::entitlement::EntitlementInterval;
use crate::domain::foundation::UserId;
use crate::ports::EntitlementCache;

/// Collects the evaluator inputs from a subscription snapshot plus override
/// rows. Write paths call this with rows read under the user's row locks so
/// the stacking base cannot move before commit.
pub(crate) fn entitlement_intervals(
    subscription: Option<&Subscription>,
    overrides: &[EntitlementOverride],
) -> Vec<EntitlementInterval> {
    let mut intervals: Vec<EntitlementInterval> = Vec::with_capacity(overrides.len() + 1);
    if let Some(interval) = subscription.and_then(Subscription::entitlement_interval) {
        intervals.push(interval);
    }
    intervals.extend(overrides.iter().map(EntitlementOverride::as_interval));
    intervals
}

/// Signals cache invalidation after commit. Failures are logged and
/// swallowed; they must never affect the command result.
pub(crate) async fn invalidate_cache(cache: &dyn EntitlementCache, user_id: &UserId) {
    if let Err(e) = cache.invalidate_user(user_id).await {
        warn!(user_id = %user_id, error = %e, "Failed to invalidate entitlement cache");
    }
}
