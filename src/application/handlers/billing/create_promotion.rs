//! CreatePromotionHandler - Admin command handler for minting promo codes.

use std::sync::Arc;

use crate::domain::billing::{
    code_prefix, generate_code, normalize_code, BillingEntityType, BillingError, BillingEvent,
    BillingEventSource, BillingEventType, CodeHasher, Promotion,
};
use crate::domain::entitlement::GrantSpec;
use crate::domain::foundation::{PromotionId, Timestamp, UserId};
use crate::ports::BillingStore;

/// How many fresh codes to try before giving up on a hash collision streak.
const MAX_CODE_ATTEMPTS: u32 = 5;

/// Command to create a promotion.
#[derive(Debug, Clone)]
pub struct CreatePromotionCommand {
    pub grant: GrantSpec,
    pub valid_from: Option<Timestamp>,
    pub valid_to: Option<Timestamp>,
    pub max_redemptions: Option<u32>,
    /// Must be 1 in this version.
    pub per_user_max_redemptions: u32,
    pub created_by_user_id: Option<UserId>,
}

/// Result of creating a promotion.
#[derive(Debug, Clone)]
pub struct CreatePromotionResult {
    pub promotion: Promotion,
    /// The plaintext code, returned exactly once. Only the hash and the
    /// display prefix are stored.
    pub code: String,
}

/// Handler for creating promotions.
pub struct CreatePromotionHandler {
    store: Arc<dyn BillingStore>,
    hasher: Arc<CodeHasher>,
}

impl CreatePromotionHandler {
    pub fn new(store: Arc<dyn BillingStore>, hasher: Arc<CodeHasher>) -> Self {
        Self { store, hasher }
    }

    pub async fn handle(
        &self,
        cmd: CreatePromotionCommand,
    ) -> Result<CreatePromotionResult, BillingError> {
        self.handle_at(cmd, Timestamp::now()).await
    }

    /// Handles with an explicit reference time, for schedulers and tests.
    pub async fn handle_at(
        &self,
        cmd: CreatePromotionCommand,
        now: Timestamp,
    ) -> Result<CreatePromotionResult, BillingError> {
        if cmd.per_user_max_redemptions != 1 {
            return Err(BillingError::InvalidPerUserLimit {
                requested: cmd.per_user_max_redemptions,
            });
        }
        if !self.hasher.has_secrets() {
            return Err(BillingError::HashSecretMissing);
        }

        let mut tx = self.store.begin().await?;

        for _ in 0..MAX_CODE_ATTEMPTS {
            let code = {
                let mut rng = rand::thread_rng();
                generate_code(&mut rng)
            };
            let normalized = normalize_code(&code);
            let hashed = self
                .hasher
                .hash_latest(&normalized)
                .ok_or(BillingError::HashSecretMissing)?;

            let promotion = Promotion {
                id: PromotionId::new(),
                code_hash: hashed.hash,
                hash_version: hashed.version,
                code_prefix: code_prefix(&normalized),
                grant: cmd.grant,
                valid_from: cmd.valid_from,
                valid_to: cmd.valid_to,
                max_redemptions: cmd.max_redemptions,
                per_user_max_redemptions: cmd.per_user_max_redemptions,
                redemption_count: 0,
                is_active: true,
                created_by_user_id: cmd.created_by_user_id,
                created_at: now,
                updated_at: now,
            };

            if !tx.insert_promotion(&promotion).await? {
                // Another promotion already carries this hash; try a new code.
                continue;
            }

            let event = BillingEvent::new(
                BillingEventSource::Admin,
                BillingEventType::PromotionCreated,
                BillingEntityType::Promotion,
                promotion.id.to_string(),
                now,
            )
            .with_payload(serde_json::json!({
                "code_prefix": promotion.code_prefix,
                "grant": promotion.grant,
                "valid_from": promotion.valid_from,
                "valid_to": promotion.valid_to,
                "max_redemptions": promotion.max_redemptions,
            }));
            tx.append_event(&event).await?;

            tx.commit().await?;

            return Ok(CreatePromotionResult { promotion, code });
        }

        Err(BillingError::CodeGenerationFailed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::memory::InMemoryBillingStore;
    use crate::domain::billing::{
        EntitlementOverride, HashSecret, PendingEntitlementGrant, Subscription, VersionedHash,
    };
    use crate::domain::foundation::{
        DomainError, OverrideId, PendingGrantId, SubscriptionId,
    };
    use crate::ports::BillingTransaction;
    use async_trait::async_trait;

    fn ts(s: &str) -> Timestamp {
        Timestamp::parse_rfc3339(s).unwrap()
    }

    fn hasher() -> Arc<CodeHasher> {
        Arc::new(CodeHasher::new(vec![HashSecret::new(1, "test-hash-secret")]))
    }

    fn command() -> CreatePromotionCommand {
        CreatePromotionCommand {
            grant: GrantSpec::DurationDays(30),
            valid_from: Some(ts("2024-01-01T00:00:00Z")),
            valid_to: Some(ts("2025-01-01T00:00:00Z")),
            max_redemptions: Some(100),
            per_user_max_redemptions: 1,
            created_by_user_id: Some(UserId::new()),
        }
    }

    #[tokio::test]
    async fn creates_promotion_and_returns_plaintext_once() {
        let store = Arc::new(InMemoryBillingStore::new());
        let handler = CreatePromotionHandler::new(store.clone(), hasher());

        let result = handler
            .handle_at(command(), ts("2024-01-01T00:00:00Z"))
            .await
            .unwrap();

        // Stored row carries the hash of the returned code, not the code.
        let normalized = normalize_code(&result.code);
        let expected = hasher().hash_latest(&normalized).unwrap();
        let stored = store.promotion(&result.promotion.id).await.unwrap();
        assert_eq!(stored.code_hash, expected.hash);
        assert_eq!(stored.hash_version, expected.version);
        assert_eq!(stored.code_prefix, code_prefix(&normalized));
        assert!(stored.is_active);
        assert_eq!(stored.redemption_count, 0);
    }

    #[tokio::test]
    async fn appends_promotion_created_event() {
        let store = Arc::new(InMemoryBillingStore::new());
        let handler = CreatePromotionHandler::new(store.clone(), hasher());

        handler
            .handle_at(command(), ts("2024-01-01T00:00:00Z"))
            .await
            .unwrap();

        let events = store.events().await;
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event_type, BillingEventType::PromotionCreated);
        // The ledger must never see the plaintext either.
        assert!(events[0].payload.get("code").is_none());
    }

    #[tokio::test]
    async fn rejects_unsupported_per_user_limit() {
        let store = Arc::new(InMemoryBillingStore::new());
        let handler = CreatePromotionHandler::new(store.clone(), hasher());

        let mut cmd = command();
        cmd.per_user_max_redemptions = 3;

        let result = handler.handle_at(cmd, ts("2024-01-01T00:00:00Z")).await;

        assert_eq!(
            result.unwrap_err(),
            BillingError::InvalidPerUserLimit { requested: 3 }
        );
    }

    #[tokio::test]
    async fn missing_hash_secret_is_a_configuration_error() {
        let store = Arc::new(InMemoryBillingStore::new());
        let handler =
            CreatePromotionHandler::new(store.clone(), Arc::new(CodeHasher::default()));

        let result = handler.handle_at(command(), ts("2024-01-01T00:00:00Z")).await;

        let err = result.unwrap_err();
        assert_eq!(err, BillingError::HashSecretMissing);
        assert!(err.is_configuration());
    }

    #[tokio::test]
    async fn generated_codes_are_unique_across_calls() {
        let store = Arc::new(InMemoryBillingStore::new());
        let handler = CreatePromotionHandler::new(store.clone(), hasher());
        let now = ts("2024-01-01T00:00:00Z");

        let a = handler.handle_at(command(), now).await.unwrap();
        let b = handler.handle_at(command(), now).await.unwrap();

        assert_ne!(a.code, b.code);
        assert_ne!(a.promotion.code_hash, b.promotion.code_hash);
    }

    // ════════════════════════════════════════════════════════════════════════════
    // Collision Exhaustion
    // ════════════════════════════════════════════════════════════════════════════

    /// Store whose promotion inserts always collide.
    struct CollidingStore {
        inner: Arc<InMemoryBillingStore>,
    }

    struct CollidingTx {
        inner: Box<dyn BillingTransaction>,
    }

    #[async_trait]
    impl crate::ports::BillingStore for CollidingStore {
        async fn begin(&self) -> Result<Box<dyn BillingTransaction>, DomainError> {
            Ok(Box::new(CollidingTx {
                inner: self.inner.begin().await?,
            }))
        }

        async fn subscription_for_user(
            &self,
            user_id: &UserId,
        ) -> Result<Option<Subscription>, DomainError> {
            self.inner.subscription_for_user(user_id).await
        }

        async fn live_overrides_for_user(
            &self,
            user_id: &UserId,
            now: Timestamp,
        ) -> Result<Vec<EntitlementOverride>, DomainError> {
            self.inner.live_overrides_for_user(user_id, now).await
        }

        async fn expired_subscriptions(
            &self,
            now: Timestamp,
            limit: u32,
        ) -> Result<Vec<Subscription>, DomainError> {
            self.inner.expired_subscriptions(now, limit).await
        }

        async fn trials_expiring_within(
            &self,
            now: Timestamp,
            within_days: u32,
            limit: u32,
        ) -> Result<Vec<Subscription>, DomainError> {
            self.inner.trials_expiring_within(now, within_days, limit).await
        }

        async fn expired_promotions(
            &self,
            now: Timestamp,
            limit: u32,
        ) -> Result<Vec<Promotion>, DomainError> {
            self.inner.expired_promotions(now, limit).await
        }

        async fn expired_pending_grants(
            &self,
            now: Timestamp,
            limit: u32,
        ) -> Result<Vec<PendingEntitlementGrant>, DomainError> {
            self.inner.expired_pending_grants(now, limit).await
        }
    }

    #[async_trait]
    impl BillingTransaction for CollidingTx {
        async fn lock_subscription(
            &mut self,
            user_id: &UserId,
        ) -> Result<Option<Subscription>, DomainError> {
            self.inner.lock_subscription(user_id).await
        }

        async fn upsert_subscription(
            &mut self,
            subscription: &Subscription,
        ) -> Result<(), DomainError> {
            self.inner.upsert_subscription(subscription).await
        }

        async fn update_subscription(
            &mut self,
            subscription: &Subscription,
        ) -> Result<(), DomainError> {
            self.inner.update_subscription(subscription).await
        }

        async fn end_subscription_if_active(
            &mut self,
            id: &SubscriptionId,
            ended_at: Timestamp,
        ) -> Result<bool, DomainError> {
            self.inner.end_subscription_if_active(id, ended_at).await
        }

        async fn insert_trial_use(&mut self, user_id: &UserId) -> Result<bool, DomainError> {
            self.inner.insert_trial_use(user_id).await
        }

        async fn live_overrides_for_user(
            &mut self,
            user_id: &UserId,
            now: Timestamp,
        ) -> Result<Vec<EntitlementOverride>, DomainError> {
            self.inner.live_overrides_for_user(user_id, now).await
        }

        async fn lock_override(
            &mut self,
            id: &OverrideId,
        ) -> Result<Option<EntitlementOverride>, DomainError> {
            self.inner.lock_override(id).await
        }

        async fn insert_override(
            &mut self,
            entitlement_override: &EntitlementOverride,
        ) -> Result<(), DomainError> {
            self.inner.insert_override(entitlement_override).await
        }

        async fn shorten_override(
            &mut self,
            id: &OverrideId,
            ends_at: Timestamp,
        ) -> Result<(), DomainError> {
            self.inner.shorten_override(id, ends_at).await
        }

        async fn lock_promotion(
            &mut self,
            id: &PromotionId,
        ) -> Result<Option<Promotion>, DomainError> {
            self.inner.lock_promotion(id).await
        }

        async fn lock_promotion_by_code_hashes(
            &mut self,
            hashes: &[VersionedHash],
        ) -> Result<Option<Promotion>, DomainError> {
            self.inner.lock_promotion_by_code_hashes(hashes).await
        }

        async fn insert_promotion(&mut self, _promotion: &Promotion) -> Result<bool, DomainError> {
            // Every code collides.
            Ok(false)
        }

        async fn insert_redemption(
            &mut self,
            promotion_id: &PromotionId,
            user_id: &UserId,
            now: Timestamp,
        ) -> Result<bool, DomainError> {
            self.inner.insert_redemption(promotion_id, user_id, now).await
        }

        async fn increment_redemption_count(
            &mut self,
            id: &PromotionId,
        ) -> Result<(), DomainError> {
            self.inner.increment_redemption_count(id).await
        }

        async fn set_promotion_active(
            &mut self,
            id: &PromotionId,
            active: bool,
        ) -> Result<bool, DomainError> {
            self.inner.set_promotion_active(id, active).await
        }

        async fn insert_pending_grant(
            &mut self,
            grant: &PendingEntitlementGrant,
        ) -> Result<(), DomainError> {
            self.inner.insert_pending_grant(grant).await
        }

        async fn lock_pending_grant(
            &mut self,
            id: &PendingGrantId,
        ) -> Result<Option<PendingEntitlementGrant>, DomainError> {
            self.inner.lock_pending_grant(id).await
        }

        async fn lock_claimable_grants(
            &mut self,
            hashes: &[VersionedHash],
            now: Timestamp,
        ) -> Result<Vec<PendingEntitlementGrant>, DomainError> {
            self.inner.lock_claimable_grants(hashes, now).await
        }

        async fn claim_pending_grant(
            &mut self,
            id: &PendingGrantId,
            user_id: &UserId,
            claim_source: &str,
            now: Timestamp,
        ) -> Result<bool, DomainError> {
            self.inner.claim_pending_grant(id, user_id, claim_source, now).await
        }

        async fn set_pending_grant_active(
            &mut self,
            id: &PendingGrantId,
            active: bool,
        ) -> Result<bool, DomainError> {
            self.inner.set_pending_grant_active(id, active).await
        }

        async fn append_event(
            &mut self,
            event: &crate::domain::billing::BillingEvent,
        ) -> Result<bool, DomainError> {
            self.inner.append_event(event).await
        }

        async fn commit(self: Box<Self>) -> Result<(), DomainError> {
            self.inner.commit().await
        }
    }

    #[tokio::test]
    async fn exhausted_collision_retries_fail() {
        let store = Arc::new(CollidingStore {
            inner: Arc::new(InMemoryBillingStore::new()),
        });
        let handler = CreatePromotionHandler::new(store, hasher());

        let result = handler.handle_at(command(), ts("2024-01-01T00:00:00Z")).await;

        assert_eq!(result.unwrap_err(), BillingError::CodeGenerationFailed);
    }
}
