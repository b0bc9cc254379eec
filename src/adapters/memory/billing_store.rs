//! In-memory implementation of the billing store.
//!
//! For tests and single-process development. A transaction holds the store's
//! single lock for its whole lifetime, so concurrent transactions serialize
//! exactly like row-locked transactions do in PostgreSQL. Writes apply
//! immediately; there is no rollback, which the handler tests never need
//! because a failed handler stops writing.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{Mutex, OwnedMutexGuard};

use crate::domain::billing::{
    BillingEvent, EntitlementOverride, PendingEntitlementGrant, Promotion, Subscription,
    SubscriptionStatus, VersionedHash,
};
use crate::domain::foundation::{
    DomainError, OverrideId, PendingGrantId, PromotionId, SubscriptionId, Timestamp, UserId,
};
use crate::ports::{BillingStore, BillingTransaction};

#[derive(Debug, Default)]
struct StoreState {
    subscriptions: HashMap<UserId, Subscription>,
    trial_uses: HashSet<UserId>,
    overrides: Vec<EntitlementOverride>,
    promotions: HashMap<PromotionId, Promotion>,
    redemptions: HashSet<(PromotionId, UserId)>,
    pending_grants: HashMap<PendingGrantId, PendingEntitlementGrant>,
    events: Vec<BillingEvent>,
    idempotency_keys: HashSet<(String, String)>,
}

/// In-memory billing store for tests and development.
#[derive(Clone, Default)]
pub struct InMemoryBillingStore {
    state: Arc<Mutex<StoreState>>,
}

impl InMemoryBillingStore {
    pub fn new() -> Self {
        Self::default()
    }

    // ── Fixture helpers ─────────────────────────────────────────────────────

    /// Seeds a subscription row.
    pub async fn put_subscription(&self, subscription: Subscription) {
        let mut state = self.state.lock().await;
        state
            .subscriptions
            .insert(subscription.user_id, subscription);
    }

    /// Seeds a consumed trial.
    pub async fn put_trial_use(&self, user_id: UserId) {
        self.state.lock().await.trial_uses.insert(user_id);
    }

    /// Seeds an override row.
    pub async fn put_override(&self, entitlement_override: EntitlementOverride) {
        self.state.lock().await.overrides.push(entitlement_override);
    }

    /// Seeds a promotion row.
    pub async fn put_promotion(&self, promotion: Promotion) {
        let mut state = self.state.lock().await;
        state.promotions.insert(promotion.id, promotion);
    }

    /// Seeds a pending grant row.
    pub async fn put_pending_grant(&self, grant: PendingEntitlementGrant) {
        let mut state = self.state.lock().await;
        state.pending_grants.insert(grant.id, grant);
    }

    // ── Inspection helpers ──────────────────────────────────────────────────

    /// All ledger events, in append order.
    pub async fn events(&self) -> Vec<BillingEvent> {
        self.state.lock().await.events.clone()
    }

    /// The user's subscription, if any.
    pub async fn subscription(&self, user_id: &UserId) -> Option<Subscription> {
        self.state.lock().await.subscriptions.get(user_id).cloned()
    }

    /// All override rows for the user, in insertion order.
    pub async fn overrides_for(&self, user_id: &UserId) -> Vec<EntitlementOverride> {
        self.state
            .lock()
            .await
            .overrides
            .iter()
            .filter(|o| o.user_id == *user_id)
            .cloned()
            .collect()
    }

    /// One promotion row.
    pub async fn promotion(&self, id: &PromotionId) -> Option<Promotion> {
        self.state.lock().await.promotions.get(id).cloned()
    }

    /// One pending grant row.
    pub async fn pending_grant(&self, id: &PendingGrantId) -> Option<PendingEntitlementGrant> {
        self.state.lock().await.pending_grants.get(id).cloned()
    }

    /// Number of redemption rows for a promotion.
    pub async fn redemption_count(&self, id: &PromotionId) -> usize {
        self.state
            .lock()
            .await
            .redemptions
            .iter()
            .filter(|(promo, _)| promo == id)
            .count()
    }
}

fn live_overrides(state: &StoreState, user_id: &UserId, now: Timestamp) -> Vec<EntitlementOverride> {
    state
        .overrides
        .iter()
        .filter(|o| o.user_id == *user_id && o.ends_at > now)
        .cloned()
        .collect()
}

fn hash_matches(hashes: &[VersionedHash], version: u32, stored: &str) -> bool {
    hashes
        .iter()
        .any(|h| h.version == version && h.matches(stored))
}

#[async_trait]
impl BillingStore for InMemoryBillingStore {
    async fn begin(&self) -> Result<Box<dyn BillingTransaction>, DomainError> {
        let guard = self.state.clone().lock_owned().await;
        Ok(Box::new(InMemoryBillingTransaction { state: guard }))
    }

    async fn subscription_for_user(
        &self,
        user_id: &UserId,
    ) -> Result<Option<Subscription>, DomainError> {
        Ok(self.state.lock().await.subscriptions.get(user_id).cloned())
    }

    async fn live_overrides_for_user(
        &self,
        user_id: &UserId,
        now: Timestamp,
    ) -> Result<Vec<EntitlementOverride>, DomainError> {
        Ok(live_overrides(&*self.state.lock().await, user_id, now))
    }

    async fn expired_subscriptions(
        &self,
        now: Timestamp,
        limit: u32,
    ) -> Result<Vec<Subscription>, DomainError> {
        let state = self.state.lock().await;
        let mut expired: Vec<Subscription> = state
            .subscriptions
            .values()
            .filter(|s| {
                matches!(
                    s.status,
                    SubscriptionStatus::Trialing | SubscriptionStatus::Active
                ) && s.is_window_elapsed(now)
            })
            .cloned()
            .collect();
        expired.sort_by_key(|s| s.window_ends_at());
        expired.truncate(limit as usize);
        Ok(expired)
    }

    async fn trials_expiring_within(
        &self,
        now: Timestamp,
        within_days: u32,
        limit: u32,
    ) -> Result<Vec<Subscription>, DomainError> {
        let threshold = now.add_days(i64::from(within_days));
        let state = self.state.lock().await;
        let mut expiring: Vec<Subscription> = state
            .subscriptions
            .values()
            .filter(|s| {
                s.status == SubscriptionStatus::Trialing
                    && matches!(s.trial_ends_at, Some(end) if now < end && end <= threshold)
            })
            .cloned()
            .collect();
        expiring.sort_by_key(|s| s.trial_ends_at);
        expiring.truncate(limit as usize);
        Ok(expiring)
    }

    async fn expired_promotions(
        &self,
        now: Timestamp,
        limit: u32,
    ) -> Result<Vec<Promotion>, DomainError> {
        let state = self.state.lock().await;
        let mut expired: Vec<Promotion> = state
            .promotions
            .values()
            .filter(|p| p.is_active && p.is_expired(now))
            .cloned()
            .collect();
        expired.sort_by_key(|p| p.valid_to);
        expired.truncate(limit as usize);
        Ok(expired)
    }

    async fn expired_pending_grants(
        &self,
        now: Timestamp,
        limit: u32,
    ) -> Result<Vec<PendingEntitlementGrant>, DomainError> {
        let state = self.state.lock().await;
        let mut expired: Vec<PendingEntitlementGrant> = state
            .pending_grants
            .values()
            .filter(|g| g.is_active && !g.is_claimed() && g.is_expired(now))
            .cloned()
            .collect();
        expired.sort_by_key(|g| g.claim_valid_to);
        expired.truncate(limit as usize);
        Ok(expired)
    }
}

/// Transaction over the in-memory store; holds the store lock until dropped.
struct InMemoryBillingTransaction {
    state: OwnedMutexGuard<StoreState>,
}

#[async_trait]
impl BillingTransaction for InMemoryBillingTransaction {
    async fn lock_subscription(
        &mut self,
        user_id: &UserId,
    ) -> Result<Option<Subscription>, DomainError> {
        Ok(self.state.subscriptions.get(user_id).cloned())
    }

    async fn upsert_subscription(
        &mut self,
        subscription: &Subscription,
    ) -> Result<(), DomainError> {
        self.state
            .subscriptions
            .insert(subscription.user_id, subscription.clone());
        Ok(())
    }

    async fn update_subscription(
        &mut self,
        subscription: &Subscription,
    ) -> Result<(), DomainError> {
        self.state
            .subscriptions
            .insert(subscription.user_id, subscription.clone());
        Ok(())
    }

    async fn end_subscription_if_active(
        &mut self,
        id: &SubscriptionId,
        ended_at: Timestamp,
    ) -> Result<bool, DomainError> {
        for subscription in self.state.subscriptions.values_mut() {
            if subscription.id == *id {
                if matches!(
                    subscription.status,
                    SubscriptionStatus::Trialing | SubscriptionStatus::Active
                ) {
                    subscription.status = SubscriptionStatus::Ended;
                    subscription.ended_at = Some(ended_at);
                    subscription.updated_at = ended_at;
                    return Ok(true);
                }
                return Ok(false);
            }
        }
        Ok(false)
    }

    async fn insert_trial_use(&mut self, user_id: &UserId) -> Result<bool, DomainError> {
        Ok(self.state.trial_uses.insert(*user_id))
    }

    async fn live_overrides_for_user(
        &mut self,
        user_id: &UserId,
        now: Timestamp,
    ) -> Result<Vec<EntitlementOverride>, DomainError> {
        Ok(live_overrides(&self.state, user_id, now))
    }

    async fn lock_override(
        &mut self,
        id: &OverrideId,
    ) -> Result<Option<EntitlementOverride>, DomainError> {
        Ok(self.state.overrides.iter().find(|o| o.id == *id).cloned())
    }

    async fn insert_override(
        &mut self,
        entitlement_override: &EntitlementOverride,
    ) -> Result<(), DomainError> {
        self.state.overrides.push(entitlement_override.clone());
        Ok(())
    }

    async fn shorten_override(
        &mut self,
        id: &OverrideId,
        ends_at: Timestamp,
    ) -> Result<(), DomainError> {
        if let Some(o) = self.state.overrides.iter_mut().find(|o| o.id == *id) {
            o.ends_at = ends_at;
        }
        Ok(())
    }

    async fn lock_promotion(
        &mut self,
        id: &PromotionId,
    ) -> Result<Option<Promotion>, DomainError> {
        Ok(self.state.promotions.get(id).cloned())
    }

    async fn lock_promotion_by_code_hashes(
        &mut self,
        hashes: &[VersionedHash],
    ) -> Result<Option<Promotion>, DomainError> {
        Ok(self
            .state
            .promotions
            .values()
            .find(|p| hash_matches(hashes, p.hash_version, &p.code_hash))
            .cloned())
    }

    async fn insert_promotion(&mut self, promotion: &Promotion) -> Result<bool, DomainError> {
        let collision = self
            .state
            .promotions
            .values()
            .any(|p| p.code_hash == promotion.code_hash);
        if collision {
            return Ok(false);
        }
        self.state.promotions.insert(promotion.id, promotion.clone());
        Ok(true)
    }

    async fn insert_redemption(
        &mut self,
        promotion_id: &PromotionId,
        user_id: &UserId,
        _now: Timestamp,
    ) -> Result<bool, DomainError> {
        Ok(self.state.redemptions.insert((*promotion_id, *user_id)))
    }

    async fn increment_redemption_count(
        &mut self,
        id: &PromotionId,
    ) -> Result<(), DomainError> {
        if let Some(p) = self.state.promotions.get_mut(id) {
            p.redemption_count += 1;
        }
        Ok(())
    }

    async fn set_promotion_active(
        &mut self,
        id: &PromotionId,
        active: bool,
    ) -> Result<bool, DomainError> {
        match self.state.promotions.get_mut(id) {
            Some(p) if p.is_active != active => {
                p.is_active = active;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn insert_pending_grant(
        &mut self,
        grant: &PendingEntitlementGrant,
    ) -> Result<(), DomainError> {
        self.state.pending_grants.insert(grant.id, grant.clone());
        Ok(())
    }

    async fn lock_pending_grant(
        &mut self,
        id: &PendingGrantId,
    ) -> Result<Option<PendingEntitlementGrant>, DomainError> {
        Ok(self.state.pending_grants.get(id).cloned())
    }

    async fn lock_claimable_grants(
        &mut self,
        hashes: &[VersionedHash],
        now: Timestamp,
    ) -> Result<Vec<PendingEntitlementGrant>, DomainError> {
        let mut claimable: Vec<PendingEntitlementGrant> = self
            .state
            .pending_grants
            .values()
            .filter(|g| {
                g.is_claimable_at(now) && hash_matches(hashes, g.hash_version, &g.email_hash)
            })
            .cloned()
            .collect();
        claimable.sort_by_key(|g| g.created_at);
        Ok(claimable)
    }

    async fn claim_pending_grant(
        &mut self,
        id: &PendingGrantId,
        user_id: &UserId,
        claim_source: &str,
        now: Timestamp,
    ) -> Result<bool, DomainError> {
        match self.state.pending_grants.get_mut(id) {
            Some(g) if g.claimed_at.is_none() => {
                g.mark_claimed(*user_id, claim_source, now);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn set_pending_grant_active(
        &mut self,
        id: &PendingGrantId,
        active: bool,
    ) -> Result<bool, DomainError> {
        match self.state.pending_grants.get_mut(id) {
            Some(g) if g.is_active != active => {
                g.is_active = active;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn append_event(&mut self, event: &BillingEvent) -> Result<bool, DomainError> {
        if let (Some(provider), Some(external_id)) = (&event.provider, &event.external_event_id) {
            let key = (provider.clone(), external_id.clone());
            if self.state.idempotency_keys.contains(&key) {
                return Ok(false);
            }
            self.state.idempotency_keys.insert(key);
        }
        self.state.events.push(event.clone());
        Ok(true)
    }

    async fn commit(self: Box<Self>) -> Result<(), DomainError> {
        // Writes applied eagerly; dropping self releases the store lock.
        Ok(())
    }
}
