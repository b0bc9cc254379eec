//! Billing store port - the transactional storage contract.
//!
//! The engine treats storage as a relational store with row-level locking,
//! unique constraints with conflict-do-nothing upserts, and multi-statement
//! atomic transactions. This port captures exactly that contract: `begin()`
//! hands out a transaction object, every lock/read/write/ledger-append of one
//! command happens on that object, and `commit()` ends it.
//!
//! # Locking Discipline
//!
//! Commands that read-then-write a shared aggregate (a user's subscription,
//! a promotion) must call the `lock_*` method for it before reading, so two
//! concurrent requests for the same row serialize instead of losing updates.
//! Implementations back `lock_*` with `SELECT ... FOR UPDATE` semantics.
//! Locks live only as long as the transaction.
//!
//! # Conflict Semantics
//!
//! Methods returning `bool` insert (or update) with a conflict-do-nothing
//! guard and report whether the write landed. The conflict path and the
//! success path must be distinguishable without a second round-trip:
//! `false` always means "a concurrent or earlier writer got there first".

use async_trait::async_trait;

use crate::domain::billing::{
    BillingEvent, EntitlementOverride, PendingEntitlementGrant, Promotion, Subscription,
    VersionedHash,
};
use crate::domain::foundation::{
    DomainError, OverrideId, PendingGrantId, PromotionId, SubscriptionId, Timestamp, UserId,
};

/// Entry point to billing storage.
#[async_trait]
pub trait BillingStore: Send + Sync {
    /// Opens a transaction. Dropping the returned object without committing
    /// rolls back.
    async fn begin(&self) -> Result<Box<dyn BillingTransaction>, DomainError>;

    /// Reads a user's subscription without locking. For read-only queries.
    async fn subscription_for_user(
        &self,
        user_id: &UserId,
    ) -> Result<Option<Subscription>, DomainError>;

    /// Reads a user's overrides that still have time left at `now`, without
    /// locking. For read-only queries.
    async fn live_overrides_for_user(
        &self,
        user_id: &UserId,
        now: Timestamp,
    ) -> Result<Vec<EntitlementOverride>, DomainError>;

    /// Subscriptions whose active window has elapsed at `now`, oldest first.
    /// Sweep candidates; the sweep re-checks under a per-row transaction.
    async fn expired_subscriptions(
        &self,
        now: Timestamp,
        limit: u32,
    ) -> Result<Vec<Subscription>, DomainError>;

    /// Trialing subscriptions ending within `within_days` of `now`.
    async fn trials_expiring_within(
        &self,
        now: Timestamp,
        within_days: u32,
        limit: u32,
    ) -> Result<Vec<Subscription>, DomainError>;

    /// Active promotions whose validity window has fully elapsed.
    async fn expired_promotions(
        &self,
        now: Timestamp,
        limit: u32,
    ) -> Result<Vec<Promotion>, DomainError>;

    /// Active, unclaimed pending grants whose claim window has fully elapsed.
    async fn expired_pending_grants(
        &self,
        now: Timestamp,
        limit: u32,
    ) -> Result<Vec<PendingEntitlementGrant>, DomainError>;
}

/// One atomic unit of billing work.
#[async_trait]
pub trait BillingTransaction: Send {
    // ── Subscriptions ────────────────────────────────────────────────────────

    /// Locks and returns the user's subscription row, if any.
    async fn lock_subscription(
        &mut self,
        user_id: &UserId,
    ) -> Result<Option<Subscription>, DomainError>;

    /// Inserts the subscription, or replaces the user's existing row
    /// (the `user_id` column is unique).
    async fn upsert_subscription(&mut self, subscription: &Subscription)
        -> Result<(), DomainError>;

    /// Updates an existing subscription row.
    async fn update_subscription(
        &mut self,
        subscription: &Subscription,
    ) -> Result<(), DomainError>;

    /// Transitions the subscription to `ended` with the given `ended_at`,
    /// guarded by `status IN ('trialing', 'active')`. Returns whether the
    /// transition happened; `false` means another writer already ended it.
    async fn end_subscription_if_active(
        &mut self,
        id: &SubscriptionId,
        ended_at: Timestamp,
    ) -> Result<bool, DomainError>;

    /// Records that the user consumed their one trial. Conflict-do-nothing;
    /// `false` means the trial was already used.
    async fn insert_trial_use(&mut self, user_id: &UserId) -> Result<bool, DomainError>;

    // ── Overrides ────────────────────────────────────────────────────────────

    /// The user's overrides that still have time left at `now`. Called while
    /// holding the user's subscription lock on write paths, so the stacking
    /// base cannot move under the caller.
    async fn live_overrides_for_user(
        &mut self,
        user_id: &UserId,
        now: Timestamp,
    ) -> Result<Vec<EntitlementOverride>, DomainError>;

    /// Locks and returns one override row.
    async fn lock_override(
        &mut self,
        id: &OverrideId,
    ) -> Result<Option<EntitlementOverride>, DomainError>;

    /// Inserts a new override row.
    async fn insert_override(
        &mut self,
        entitlement_override: &EntitlementOverride,
    ) -> Result<(), DomainError>;

    /// Shortens an override's `ends_at`. Rows are never deleted.
    async fn shorten_override(
        &mut self,
        id: &OverrideId,
        ends_at: Timestamp,
    ) -> Result<(), DomainError>;

    // ── Promotions ───────────────────────────────────────────────────────────

    /// Locks and returns a promotion by id.
    async fn lock_promotion(
        &mut self,
        id: &PromotionId,
    ) -> Result<Option<Promotion>, DomainError>;

    /// Locks and returns the promotion whose stored `(hash_version,
    /// code_hash)` matches any of the supplied candidates.
    async fn lock_promotion_by_code_hashes(
        &mut self,
        hashes: &[VersionedHash],
    ) -> Result<Option<Promotion>, DomainError>;

    /// Inserts a promotion. Conflict-do-nothing on the unique `code_hash`;
    /// `false` signals a hash collision and the caller retries with a fresh
    /// code.
    async fn insert_promotion(&mut self, promotion: &Promotion) -> Result<bool, DomainError>;

    /// Records a redemption. Conflict-do-nothing on the unique
    /// `(promotion_id, user_id)`; `false` means this user already redeemed.
    async fn insert_redemption(
        &mut self,
        promotion_id: &PromotionId,
        user_id: &UserId,
        now: Timestamp,
    ) -> Result<bool, DomainError>;

    /// Increments the promotion's redemption counter.
    async fn increment_redemption_count(
        &mut self,
        id: &PromotionId,
    ) -> Result<(), DomainError>;

    /// Sets `is_active`, guarded by `is_active <> $active`. Returns whether
    /// the row actually changed.
    async fn set_promotion_active(
        &mut self,
        id: &PromotionId,
        active: bool,
    ) -> Result<bool, DomainError>;

    // ── Pending grants ───────────────────────────────────────────────────────

    /// Inserts a pending grant row.
    async fn insert_pending_grant(
        &mut self,
        grant: &PendingEntitlementGrant,
    ) -> Result<(), DomainError>;

    /// Locks and returns one pending grant row.
    async fn lock_pending_grant(
        &mut self,
        id: &PendingGrantId,
    ) -> Result<Option<PendingEntitlementGrant>, DomainError>;

    /// Locks and returns every unclaimed, active grant matching any hash
    /// candidate whose claim window covers `now`, oldest first.
    async fn lock_claimable_grants(
        &mut self,
        hashes: &[VersionedHash],
        now: Timestamp,
    ) -> Result<Vec<PendingEntitlementGrant>, DomainError>;

    /// Claims a grant, guarded by `claimed_at IS NULL`. Returns whether this
    /// caller won the claim; `false` under a concurrent claim race.
    async fn claim_pending_grant(
        &mut self,
        id: &PendingGrantId,
        user_id: &UserId,
        claim_source: &str,
        now: Timestamp,
    ) -> Result<bool, DomainError>;

    /// Sets `is_active`, guarded by `is_active <> $active`. Returns whether
    /// the row actually changed.
    async fn set_pending_grant_active(
        &mut self,
        id: &PendingGrantId,
        active: bool,
    ) -> Result<bool, DomainError>;

    // ── Ledger ───────────────────────────────────────────────────────────────

    /// Appends one ledger event. When the event carries a
    /// `(provider, external_event_id)` pair the insert is conflict-do-nothing
    /// on that pair; `false` means an event with the same pair already exists
    /// and nothing was written.
    async fn append_event(&mut self, event: &BillingEvent) -> Result<bool, DomainError>;

    /// Commits the transaction.
    async fn commit(self: Box<Self>) -> Result<(), DomainError>;
}
