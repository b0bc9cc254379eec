//! RedeemPromotionHandler - Command handler for redeeming promo codes.

use std::sync::Arc;

use crate::domain::billing::{
    code_prefix, normalize_code, BillingEntityType, BillingError, BillingEvent,
    BillingEventSource, BillingEventType, CodeHasher, EntitlementOverride, OverrideSource,
};
use crate::domain::entitlement::{compute_grant_window, evaluate, GrantWindow};
use crate::domain::foundation::{OverrideId, Timestamp, UserId};
use crate::ports::{BillingStore, EntitlementCache};

use super::support::{entitlement_intervals, invalidate_cache};

/// Command to redeem a promo code for a user.
#[derive(Debug, Clone)]
pub struct RedeemPromotionCommand {
    pub user_id: UserId,
    /// The code as the user typed it; normalized before lookup.
    pub code: String,
}

/// Result of a redemption attempt.
#[derive(Debug, Clone)]
pub struct RedeemPromotionResult {
    /// True when this user had already redeemed the promotion; nothing was
    /// mutated and no event appended.
    pub already_redeemed: bool,
    /// The granted window, absent when `already_redeemed` or when the grant
    /// added no time.
    pub granted: Option<GrantWindow>,
    /// End of the user's Pro access after this call; absent when
    /// `already_redeemed`.
    pub pro_until: Option<Timestamp>,
}

/// Handler for promo code redemption.
///
/// Locks the promotion row first and the user's subscription row second;
/// every command that touches both takes them in that order. The redemption
/// insert is conflict-do-nothing on `(promotion_id, user_id)`, so concurrent
/// double-redemption resolves to exactly one winner; the loser sees
/// `already_redeemed` and mutates nothing.
pub struct RedeemPromotionHandler {
    store: Arc<dyn BillingStore>,
    cache: Arc<dyn EntitlementCache>,
    hasher: Arc<CodeHasher>,
}

impl RedeemPromotionHandler {
    pub fn new(
        store: Arc<dyn BillingStore>,
        cache: Arc<dyn EntitlementCache>,
        hasher: Arc<CodeHasher>,
    ) -> Self {
        Self {
            store,
            cache,
            hasher,
        }
    }

    pub async fn handle(
        &self,
        cmd: RedeemPromotionCommand,
    ) -> Result<RedeemPromotionResult, BillingError> {
        self.handle_at(cmd, Timestamp::now()).await
    }

    /// Handles with an explicit reference time, for schedulers and tests.
    pub async fn handle_at(
        &self,
        cmd: RedeemPromotionCommand,
        now: Timestamp,
    ) -> Result<RedeemPromotionResult, BillingError> {
        let normalized = normalize_code(&cmd.code);
        let candidates = self.hasher.lookup_hashes(&normalized);

        let mut tx = self.store.begin().await?;

        let mut promotion = tx
            .lock_promotion_by_code_hashes(&candidates)
            .await?
            .ok_or(BillingError::PromoNotFound)?;

        if !promotion.is_redeemable_at(now) {
            return Err(BillingError::PromoInactive);
        }
        if promotion.is_exhausted() {
            return Err(BillingError::PromoMaxRedemptions);
        }

        if !tx.insert_redemption(&promotion.id, &cmd.user_id, now).await? {
            // Retried or concurrent duplicate; counters stay untouched.
            tx.commit().await?;
            return Ok(RedeemPromotionResult {
                already_redeemed: true,
                granted: None,
                pro_until: None,
            });
        }

        promotion.record_redemption(now);
        tx.increment_redemption_count(&promotion.id).await?;

        let subscription = tx.lock_subscription(&cmd.user_id).await?;
        let overrides = tx.live_overrides_for_user(&cmd.user_id, now).await?;
        let access = evaluate(
            now,
            false,
            &entitlement_intervals(subscription.as_ref(), &overrides),
        );

        let window = compute_grant_window(now, access.pro_until, Some(promotion.grant));

        let mut override_id = None;
        if !window.no_extension {
            let granted = EntitlementOverride::grant(
                OverrideId::new(),
                cmd.user_id,
                window.starts_at,
                window.ends_at,
                OverrideSource::Promotion,
                Some(promotion.id.to_string()),
                None,
                None,
                now,
            );
            override_id = Some(granted.id);
            tx.insert_override(&granted).await?;
        }

        let event = BillingEvent::new(
            BillingEventSource::Api,
            BillingEventType::PromotionRedeemed,
            BillingEntityType::Promotion,
            promotion.id.to_string(),
            now,
        )
        .with_user(cmd.user_id)
        .with_payload(serde_json::json!({
            "code_prefix": code_prefix(&normalized),
            "starts_at": window.starts_at,
            "ends_at": window.ends_at,
            "no_extension": window.no_extension,
            "override_id": override_id,
        }));
        tx.append_event(&event).await?;

        tx.commit().await?;

        invalidate_cache(self.cache.as_ref(), &cmd.user_id).await;

        let pro_until = if window.no_extension {
            access.pro_until
        } else {
            Some(window.ends_at)
        };
        Ok(RedeemPromotionResult {
            already_redeemed: false,
            granted: (!window.no_extension).then_some(window),
            pro_until,
        })
    }
}
