//! End-to-end entitlement flows over the in-memory adapters.
//!
//! Exercises whole user journeys through the real handlers: trial to
//! cancellation to sweep finalization, promotion stacking, and pending-grant
//! claims landing on signup.

use std::sync::Arc;

use gatherly::adapters::cache::RecordingEntitlementCache;
use gatherly::adapters::memory::InMemoryBillingStore;
use gatherly::adapters::notifications::{RecordingNotificationSender, SentNotification};
use gatherly::application::handlers::billing::{
    ClaimPendingGrantsCommand, ClaimPendingGrantsHandler, CreatePendingGrantCommand,
    CreatePendingGrantHandler, CreatePromotionCommand, CreatePromotionHandler,
    GetProStatusHandler, GetProStatusQuery, MaintenanceSweepHandler, RedeemPromotionCommand,
    RedeemPromotionHandler, ScheduleCancellationCommand, ScheduleCancellationHandler,
    StartTrialCommand, StartTrialHandler,
};
use gatherly::domain::billing::{BillingEventType, CodeHasher, HashSecret, SubscriptionStatus};
use gatherly::domain::entitlement::{EntitlementSource, GrantSpec};
use gatherly::domain::foundation::{Timestamp, UserId};

fn ts(s: &str) -> Timestamp {
    Timestamp::parse_rfc3339(s).unwrap()
}

struct Engine {
    store: Arc<InMemoryBillingStore>,
    notifier: Arc<RecordingNotificationSender>,
    cache: Arc<RecordingEntitlementCache>,
    hasher: Arc<CodeHasher>,
}

impl Engine {
    fn new() -> Self {
        Self {
            store: Arc::new(InMemoryBillingStore::new()),
            notifier: Arc::new(RecordingNotificationSender::new()),
            cache: Arc::new(RecordingEntitlementCache::new()),
            hasher: Arc::new(CodeHasher::new(vec![HashSecret::new(1, "flow-test-secret")])),
        }
    }

    fn start_trial(&self) -> StartTrialHandler {
        StartTrialHandler::new(self.store.clone(), self.cache.clone(), 14)
    }

    fn schedule_cancellation(&self) -> ScheduleCancellationHandler {
        ScheduleCancellationHandler::new(
            self.store.clone(),
            self.notifier.clone(),
            self.cache.clone(),
        )
    }

    fn create_promotion(&self) -> CreatePromotionHandler {
        CreatePromotionHandler::new(self.store.clone(), self.hasher.clone())
    }

    fn redeem_promotion(&self) -> RedeemPromotionHandler {
        RedeemPromotionHandler::new(self.store.clone(), self.cache.clone(), self.hasher.clone())
    }

    fn create_pending_grant(&self) -> CreatePendingGrantHandler {
        CreatePendingGrantHandler::new(self.store.clone(), self.hasher.clone())
    }

    fn claim_pending_grants(&self) -> ClaimPendingGrantsHandler {
        ClaimPendingGrantsHandler::new(self.store.clone(), self.cache.clone(), self.hasher.clone())
    }

    fn status(&self) -> GetProStatusHandler {
        GetProStatusHandler::new(self.store.clone())
    }

    fn sweep(&self) -> MaintenanceSweepHandler {
        MaintenanceSweepHandler::new(
            self.store.clone(),
            self.notifier.clone(),
            self.cache.clone(),
            3,
            100,
        )
    }
}

#[tokio::test]
async fn trial_lifecycle_from_start_to_sweep() {
    let engine = Engine::new();
    let user = UserId::new();
    let day0 = ts("2024-01-01T00:00:00Z");

    // Start the trial.
    engine
        .start_trial()
        .handle_at(
            StartTrialCommand {
                user_id: user,
                email_verified: true,
                plan_key: "pro".to_string(),
            },
            day0,
        )
        .await
        .unwrap();

    let status = engine
        .status()
        .handle_at(GetProStatusQuery { user_id: user, is_internal: false }, day0.add_days(1))
        .await
        .unwrap();
    assert!(status.access.is_pro);
    assert_eq!(status.access.effective_source, Some(EntitlementSource::Trial));

    // Schedule cancellation mid-trial; twice, to prove idempotency.
    let cancel = engine.schedule_cancellation();
    let first = cancel
        .handle_at(ScheduleCancellationCommand { user_id: user }, day0.add_days(5))
        .await
        .unwrap();
    let second = cancel
        .handle_at(ScheduleCancellationCommand { user_id: user }, day0.add_days(6))
        .await
        .unwrap();
    assert!(!first.already_scheduled);
    assert!(second.already_scheduled);

    // Sweep three days before the end: expiring notice goes out once.
    let notice_day = ts("2024-01-13T00:00:00Z");
    let report = engine.sweep().run_at(notice_day).await.unwrap();
    assert_eq!(report.trial_notices_sent, 1);

    // Sweep after the window: trial finalizes at the boundary, exactly once.
    let after = ts("2024-02-01T00:00:00Z");
    let report = engine.sweep().run_at(after).await.unwrap();
    assert_eq!(report.subscriptions_ended, 1);
    let rerun = engine.sweep().run_at(after).await.unwrap();
    assert_eq!(rerun.subscriptions_ended, 0);

    let sub = engine.store.subscription(&user).await.unwrap();
    assert_eq!(sub.status, SubscriptionStatus::Ended);
    assert_eq!(sub.ended_at, Some(ts("2024-01-15T00:00:00Z")));

    // No access afterwards.
    let status = engine
        .status()
        .handle_at(GetProStatusQuery { user_id: user, is_internal: false }, after)
        .await
        .unwrap();
    assert!(!status.access.is_pro);

    // One cancellation email, one expiring notice, one ended email.
    let sent = engine.notifier.sent();
    assert_eq!(sent.len(), 3);
    assert!(matches!(sent[0], SentNotification::CancellationScheduled { .. }));
    assert!(matches!(sent[1], SentNotification::TrialExpiringSoon { .. }));
    assert!(matches!(sent[2], SentNotification::SubscriptionEnded { .. }));

    // Ledger: trial_started, cancel_scheduled, marker, subscription_ended.
    let types: Vec<BillingEventType> = engine
        .store
        .events()
        .await
        .into_iter()
        .map(|e| e.event_type)
        .collect();
    assert_eq!(
        types,
        vec![
            BillingEventType::TrialStarted,
            BillingEventType::CancelScheduled,
            BillingEventType::TrialExpiringSoonNotified,
            BillingEventType::SubscriptionEnded,
        ]
    );
}

#[tokio::test]
async fn promotions_stack_onto_each_other() {
    let engine = Engine::new();
    let user = UserId::new();
    let jan1 = ts("2024-01-01T00:00:00Z");
    let jan15 = ts("2024-01-15T00:00:00Z");

    let promo_cmd = || CreatePromotionCommand {
        grant: GrantSpec::DurationDays(30),
        valid_from: None,
        valid_to: None,
        max_redemptions: None,
        per_user_max_redemptions: 1,
        created_by_user_id: None,
    };

    let first = engine.create_promotion().handle_at(promo_cmd(), jan1).await.unwrap();
    let second = engine.create_promotion().handle_at(promo_cmd(), jan1).await.unwrap();

    // First redemption starts immediately.
    let redeemed = engine
        .redeem_promotion()
        .handle_at(
            RedeemPromotionCommand { user_id: user, code: first.code },
            jan1,
        )
        .await
        .unwrap();
    assert_eq!(redeemed.pro_until, Some(ts("2024-01-31T00:00:00Z")));

    // Second redemption two weeks later stacks from the prior end.
    let redeemed = engine
        .redeem_promotion()
        .handle_at(
            RedeemPromotionCommand { user_id: user, code: second.code },
            jan15,
        )
        .await
        .unwrap();
    let window = redeemed.granted.unwrap();
    assert_eq!(window.starts_at, ts("2024-01-31T00:00:00Z"));
    assert_eq!(window.ends_at, ts("2024-03-01T00:00:00Z"));

    // The merged status shows one contiguous stretch ending at the far end.
    let status = engine
        .status()
        .handle_at(GetProStatusQuery { user_id: user, is_internal: false }, jan15)
        .await
        .unwrap();
    assert!(status.access.is_pro);
    assert_eq!(status.access.pro_until, Some(ts("2024-03-01T00:00:00Z")));
    assert_eq!(status.access.sources.len(), 2);
}

#[tokio::test]
async fn pending_grants_claim_on_signup() {
    let engine = Engine::new();
    let email = "new.organizer@example.com";
    let jan1 = ts("2024-01-01T00:00:00Z");

    // An admin set up two grants before the user ever signed up.
    let grant_cmd = |days| CreatePendingGrantCommand {
        email: email.to_string(),
        grant: GrantSpec::DurationDays(days),
        claim_valid_from: None,
        claim_valid_to: None,
        reason: Some("event partner".to_string()),
        created_by_user_id: None,
    };
    engine
        .create_pending_grant()
        .handle_at(grant_cmd(30), jan1)
        .await
        .unwrap();
    engine
        .create_pending_grant()
        .handle_at(grant_cmd(60), jan1.add_days(1))
        .await
        .unwrap();

    // The user signs up in March and both grants land, stacked end-to-end.
    let user = UserId::new();
    let march1 = ts("2024-03-01T00:00:00Z");
    let claimed = engine
        .claim_pending_grants()
        .handle_at(
            ClaimPendingGrantsCommand {
                user_id: user,
                email: email.to_string(),
                claim_source: "signup".to_string(),
            },
            march1,
        )
        .await
        .unwrap();

    assert_eq!(claimed.claimed.len(), 2);
    assert_eq!(claimed.pro_until, Some(ts("2024-05-30T00:00:00Z")));

    // A login later the same day claims nothing more.
    let again = engine
        .claim_pending_grants()
        .handle_at(
            ClaimPendingGrantsCommand {
                user_id: user,
                email: email.to_string(),
                claim_source: "login".to_string(),
            },
            march1,
        )
        .await
        .unwrap();
    assert!(again.claimed.is_empty());

    let status = engine
        .status()
        .handle_at(GetProStatusQuery { user_id: user, is_internal: false }, march1)
        .await
        .unwrap();
    assert!(status.access.is_pro);
    assert_eq!(
        status.access.effective_source,
        Some(EntitlementSource::PendingGrant)
    );
}
