//! ClaimPendingGrantsHandler - Command handler that claims every grant
//! waiting on a user's email.
//!
//! Runs on signup and login. Claiming zero grants is the common case and is
//! silent success.

use std::sync::Arc;

use crate::domain::billing::{
    normalize_email, BillingEntityType, BillingError, BillingEvent, BillingEventSource,
    BillingEventType, CodeHasher, EntitlementOverride, OverrideSource,
};
use crate::domain::entitlement::{compute_grant_window, evaluate, GrantWindow};
use crate::domain::foundation::{OverrideId, PendingGrantId, Timestamp, UserId};
use crate::ports::{BillingStore, EntitlementCache};

use super::support::{entitlement_intervals, invalidate_cache};

/// Command to claim all pending grants matching a user's email.
#[derive(Debug, Clone)]
pub struct ClaimPendingGrantsCommand {
    pub user_id: UserId,
    /// The verified email to match grants against; hashed per secret version
    /// for the lookup.
    pub email: String,
    /// Where the claim was triggered ("signup", "login").
    pub claim_source: String,
}

/// One successfully claimed grant.
#[derive(Debug, Clone)]
pub struct ClaimedGrant {
    pub grant_id: PendingGrantId,
    /// The window actually granted; `None` when the grant added no time.
    pub granted: Option<GrantWindow>,
}

/// Result of a claim run.
#[derive(Debug, Clone)]
pub struct ClaimPendingGrantsResult {
    pub claimed: Vec<ClaimedGrant>,
    /// End of Pro access after all claims were applied.
    pub pro_until: Option<Timestamp>,
}

/// Handler for claiming pending grants.
///
/// Locks the full candidate set up front, then claims each grant through the
/// `claimed_at IS NULL` guard so a racing sweep or concurrent login cannot
/// double-claim. The stacking base is a running value: each applied grant
/// moves it forward, so several grants claimed in one transaction stack
/// end-to-end instead of overlapping.
pub struct ClaimPendingGrantsHandler {
    store: Arc<dyn BillingStore>,
    cache: Arc<dyn EntitlementCache>,
    hasher: Arc<CodeHasher>,
}

impl ClaimPendingGrantsHandler {
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
        cmd: ClaimPendingGrantsCommand,
    ) -> Result<ClaimPendingGrantsResult, BillingError> {
        self.handle_at(cmd, Timestamp::now()).await
    }

    /// Handles with an explicit reference time, for schedulers and tests.
    pub async fn handle_at(
        &self,
        cmd: ClaimPendingGrantsCommand,
        now: Timestamp,
    ) -> Result<ClaimPendingGrantsResult, BillingError> {
        let candidates = self.hasher.lookup_hashes(&normalize_email(&cmd.email));
        if candidates.is_empty() {
            // Without secrets nothing can match; same outcome as no grants.
            return Ok(ClaimPendingGrantsResult {
                claimed: Vec::new(),
                pro_until: None,
            });
        }

        let mut tx = self.store.begin().await?;

        let grants = tx.lock_claimable_grants(&candidates, now).await?;
        if grants.is_empty() {
            tx.commit().await?;
            return Ok(ClaimPendingGrantsResult {
                claimed: Vec::new(),
                pro_until: None,
            });
        }

        let subscription = tx.lock_subscription(&cmd.user_id).await?;
        let overrides = tx.live_overrides_for_user(&cmd.user_id, now).await?;
        let access = evaluate(
            now,
            false,
            &entitlement_intervals(subscription.as_ref(), &overrides),
        );

        // Advances as each grant lands, so grants stack end-to-end.
        let mut running_pro_until = access.pro_until;
        let mut claimed = Vec::new();

        for grant in grants {
            if !tx
                .claim_pending_grant(&grant.id, &cmd.user_id, &cmd.claim_source, now)
                .await?
            {
                // Lost a race on this one; skip it.
                continue;
            }

            let window = compute_grant_window(now, running_pro_until, Some(grant.grant));

            let mut override_id = None;
            if !window.no_extension {
                let granted = EntitlementOverride::grant(
                    OverrideId::new(),
                    cmd.user_id,
                    window.starts_at,
                    window.ends_at,
                    OverrideSource::PendingGrant,
                    Some(grant.id.to_string()),
                    grant.reason.clone(),
                    grant.created_by_user_id,
                    now,
                );
                override_id = Some(granted.id);
                tx.insert_override(&granted).await?;
                running_pro_until = Some(window.ends_at);
            }

            let event = BillingEvent::new(
                BillingEventSource::Api,
                BillingEventType::PendingGrantClaimed,
                BillingEntityType::PendingGrant,
                grant.id.to_string(),
                now,
            )
            .with_user(cmd.user_id)
            .with_payload(serde_json::json!({
                "claim_source": cmd.claim_source,
                "starts_at": window.starts_at,
                "ends_at": window.ends_at,
                "no_extension": window.no_extension,
                "override_id": override_id,
            }));
            tx.append_event(&event).await?;

            claimed.push(ClaimedGrant {
                grant_id: grant.id,
                granted: (!window.no_extension).then_some(window),
            });
        }

        tx.commit().await?;

        if !claimed.is_empty() {
            invalidate_cache(self.cache.as_ref(), &cmd.user_id).await;
        }

        Ok(ClaimPendingGrantsResult {
            claimed,
            pro_until: running_pro_until,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::cache::RecordingEntitlementCache;
    use crate::adapters::memory::InMemoryBillingStore;
    use crate::domain::billing::{HashSecret, PendingEntitlementGrant};
    use crate::domain::entitlement::GrantSpec;

    const EMAIL: &str = "speaker@example.com";

    fn ts(s: &str) -> Timestamp {
        Timestamp::parse_rfc3339(s).unwrap()
    }

    fn hasher() -> Arc<CodeHasher> {
        Arc::new(CodeHasher::new(vec![HashSecret::new(1, "test-hash-secret")]))
    }

    struct Fixture {
        store: Arc<InMemoryBillingStore>,
        cache: Arc<RecordingEntitlementCache>,
        handler: ClaimPendingGrantsHandler,
    }

    fn fixture() -> Fixture {
        let store = Arc::new(InMemoryBillingStore::new());
        let cache = Arc::new(RecordingEntitlementCache::new());
        let handler = ClaimPendingGrantsHandler::new(store.clone(), cache.clone(), hasher());
        Fixture {
            store,
            cache,
            handler,
        }
    }

    async fn seed_grant(
        store: &InMemoryBillingStore,
        spec: GrantSpec,
        created_at: Timestamp,
    ) -> PendingGrantId {
        let hashed = hasher().hash_latest(EMAIL).unwrap();
        let grant = PendingEntitlementGrant {
            id: PendingGrantId::new(),
            email_hash: hashed.hash,
            hash_version: hashed.version,
            grant: spec,
            claim_valid_from: None,
            claim_valid_to: None,
            is_active: true,
            reason: None,
            created_by_user_id: None,
            claimed_at: None,
            claimed_by_user_id: None,
            claim_source: None,
            created_at,
        };
        let id = grant.id;
        store.put_pending_grant(grant).await;
        id
    }

    fn command(user_id: UserId) -> ClaimPendingGrantsCommand {
        ClaimPendingGrantsCommand {
            user_id,
            email: "  Speaker@Example.COM ".to_string(),
            claim_source: "signup".to_string(),
        }
    }

    #[tokio::test]
    async fn claims_a_single_grant() {
        let f = fixture();
        let now = ts("2024-01-01T00:00:00Z");
        let grant_id = seed_grant(&f.store, GrantSpec::DurationDays(30), now.minus_days(10)).await;
        let user = UserId::new();

        let result = f.handler.handle_at(command(user), now).await.unwrap();

        assert_eq!(result.claimed.len(), 1);
        assert_eq!(result.claimed[0].grant_id, grant_id);
        assert_eq!(result.pro_until, Some(ts("2024-01-31T00:00:00Z")));

        let stored = f.store.pending_grant(&grant_id).await.unwrap();
        assert_eq!(stored.claimed_by_user_id, Some(user));
        assert_eq!(stored.claim_source.as_deref(), Some("signup"));

        assert_eq!(f.store.overrides_for(&user).await.len(), 1);
        assert_eq!(f.store.events().await.len(), 1);
        assert_eq!(f.cache.invalidated(), vec![user]);
    }

    #[tokio::test]
    async fn multiple_grants_stack_oldest_first() {
        let f = fixture();
        let now = ts("2024-01-01T00:00:00Z");
        // Seeded newest-first to prove ordering comes from created_at.
        let newer = seed_grant(&f.store, GrantSpec::DurationDays(10), now.minus_days(1)).await;
        let older = seed_grant(&f.store, GrantSpec::DurationDays(30), now.minus_days(20)).await;
        let user = UserId::new();

        let result = f.handler.handle_at(command(user), now).await.unwrap();

        assert_eq!(result.claimed.len(), 2);
        assert_eq!(result.claimed[0].grant_id, older);
        assert_eq!(result.claimed[1].grant_id, newer);

        // 30 days from now, then 10 more stacked on top.
        let first = result.claimed[0].granted.unwrap();
        let second = result.claimed[1].granted.unwrap();
        assert_eq!(first.starts_at, now);
        assert_eq!(first.ends_at, ts("2024-01-31T00:00:00Z"));
        assert_eq!(second.starts_at, ts("2024-01-31T00:00:00Z"));
        assert_eq!(second.ends_at, ts("2024-02-10T00:00:00Z"));
        assert_eq!(result.pro_until, Some(ts("2024-02-10T00:00:00Z")));

        // One ledger event per claimed grant.
        assert_eq!(f.store.events().await.len(), 2);
    }

    #[tokio::test]
    async fn grants_stack_onto_existing_subscription() {
        let f = fixture();
        let now = ts("2024-01-01T00:00:00Z");
        seed_grant(&f.store, GrantSpec::DurationDays(30), now.minus_days(10)).await;

        let sub = crate::domain::billing::Subscription::start_trial(
            crate::domain::foundation::SubscriptionId::new(),
            UserId::new(),
            "pro",
            now,
            14,
        );
        let user = sub.user_id;
        f.store.put_subscription(sub).await;

        let result = f.handler.handle_at(command(user), now).await.unwrap();

        let window = result.claimed[0].granted.unwrap();
        assert_eq!(window.starts_at, ts("2024-01-15T00:00:00Z"));
        assert_eq!(window.ends_at, ts("2024-02-14T00:00:00Z"));
    }

    #[tokio::test]
    async fn claiming_nothing_is_silent_success() {
        let f = fixture();

        let result = f
            .handler
            .handle_at(command(UserId::new()), ts("2024-01-01T00:00:00Z"))
            .await
            .unwrap();

        assert!(result.claimed.is_empty());
        assert!(f.store.events().await.is_empty());
        assert!(f.cache.invalidated().is_empty());
    }

    #[tokio::test]
    async fn second_run_claims_nothing() {
        let f = fixture();
        let now = ts("2024-01-01T00:00:00Z");
        seed_grant(&f.store, GrantSpec::DurationDays(30), now.minus_days(10)).await;
        let user = UserId::new();

        f.handler.handle_at(command(user), now).await.unwrap();
        let second = f
            .handler
            .handle_at(command(user), now.add_days(1))
            .await
            .unwrap();

        assert!(second.claimed.is_empty());
        assert_eq!(f.store.overrides_for(&user).await.len(), 1);
        assert_eq!(f.store.events().await.len(), 1);
    }

    #[tokio::test]
    async fn inactive_and_expired_grants_are_skipped() {
        let f = fixture();
        let now = ts("2024-06-01T00:00:00Z");
        let hashed = hasher().hash_latest(EMAIL).unwrap();

        let disabled = PendingEntitlementGrant {
            id: PendingGrantId::new(),
            email_hash: hashed.hash.clone(),
            hash_version: hashed.version,
            grant: GrantSpec::DurationDays(30),
            claim_valid_from: None,
            claim_valid_to: None,
            is_active: false,
            reason: None,
            created_by_user_id: None,
            claimed_at: None,
            claimed_by_user_id: None,
            claim_source: None,
            created_at: ts("2024-01-01T00:00:00Z"),
        };
        let expired = PendingEntitlementGrant {
            claim_valid_to: Some(ts("2024-03-01T00:00:00Z")),
            is_active: true,
            id: PendingGrantId::new(),
            email_hash: hashed.hash,
            hash_version: hashed.version,
            grant: GrantSpec::DurationDays(30),
            claim_valid_from: None,
            reason: None,
            created_by_user_id: None,
            claimed_at: None,
            claimed_by_user_id: None,
            claim_source: None,
            created_at: ts("2024-01-02T00:00:00Z"),
        };
        f.store.put_pending_grant(disabled).await;
        f.store.put_pending_grant(expired).await;

        let result = f
            .handler
            .handle_at(command(UserId::new()), now)
            .await
            .unwrap();

        assert!(result.claimed.is_empty());
    }

    #[tokio::test]
    async fn no_op_grant_claims_without_override() {
        let f = fixture();
        let now = ts("2024-06-01T00:00:00Z");
        // Fixed end already in the past: claim consumes the grant but adds
        // no time.
        let grant_id = seed_grant(
            &f.store,
            GrantSpec::FixedEnd(ts("2024-01-01T00:00:00Z")),
            ts("2023-12-01T00:00:00Z"),
        )
        .await;
        let user = UserId::new();

        let result = f.handler.handle_at(command(user), now).await.unwrap();

        assert_eq!(result.claimed.len(), 1);
        assert!(result.claimed[0].granted.is_none());
        assert!(f.store.pending_grant(&grant_id).await.unwrap().is_claimed());
        assert!(f.store.overrides_for(&user).await.is_empty());
        // The claim is still on the ledger.
        assert_eq!(f.store.events().await.len(), 1);
    }

    #[tokio::test]
    async fn without_secrets_claims_zero() {
        let store = Arc::new(InMemoryBillingStore::new());
        let cache = Arc::new(RecordingEntitlementCache::new());
        let handler =
            ClaimPendingGrantsHandler::new(store.clone(), cache, Arc::new(CodeHasher::default()));

        let result = handler
            .handle_at(command(UserId::new()), ts("2024-01-01T00:00:00Z"))
            .await
            .unwrap();

        assert!(result.claimed.is_empty());
    }
}
