//! PostgreSQL implementation of the billing store.
//!
//! Row locks map to `SELECT ... FOR UPDATE`, conflict-do-nothing writes to
//! `ON CONFLICT DO NOTHING` with `rows_affected` telling the caller whether
//! the write landed, and the transaction object wraps one sqlx transaction.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Postgres, Transaction};
use uuid::Uuid;

use crate::domain::billing::{
    BillingEvent, EntitlementOverride, OverrideSource, PendingEntitlementGrant, Promotion,
    Subscription, SubscriptionStatus, VersionedHash,
};
use crate::domain::entitlement::GrantSpec;
use crate::domain::foundation::{
    DomainError, ErrorCode, OverrideId, PendingGrantId, PromotionId, SubscriptionId, Timestamp,
    UserId,
};
use crate::ports::{BillingStore, BillingTransaction};

/// PostgreSQL-backed billing store.
///
/// Uses sqlx for type-safe database operations with connection pooling.
#[derive(Clone)]
pub struct PostgresBillingStore {
    pool: PgPool,
}

impl PostgresBillingStore {
    /// Creates a new store with the given connection pool.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn db_error(context: &str, e: sqlx::Error) -> DomainError {
    DomainError::new(ErrorCode::DatabaseError, format!("{}: {}", context, e))
}

// ── Row types ────────────────────────────────────────────────────────────────

#[derive(Debug, sqlx::FromRow)]
struct SubscriptionRow {
    id: Uuid,
    user_id: Uuid,
    status: String,
    plan_key: String,
    trial_starts_at: Option<DateTime<Utc>>,
    trial_ends_at: Option<DateTime<Utc>>,
    current_period_starts_at: Option<DateTime<Utc>>,
    current_period_ends_at: Option<DateTime<Utc>>,
    cancel_at_period_end: bool,
    canceled_at: Option<DateTime<Utc>>,
    ended_at: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

const SUBSCRIPTION_COLUMNS: &str = "id, user_id, status, plan_key, trial_starts_at, \
     trial_ends_at, current_period_starts_at, current_period_ends_at, cancel_at_period_end, \
     canceled_at, ended_at, created_at, updated_at";

impl TryFrom<SubscriptionRow> for Subscription {
    type Error = DomainError;

    fn try_from(row: SubscriptionRow) -> Result<Self, Self::Error> {
        Ok(Subscription {
            id: SubscriptionId::from_uuid(row.id),
            user_id: UserId::from_uuid(row.user_id),
            status: parse_subscription_status(&row.status)?,
            plan_key: row.plan_key,
            trial_starts_at: row.trial_starts_at.map(Timestamp::from_datetime),
            trial_ends_at: row.trial_ends_at.map(Timestamp::from_datetime),
            current_period_starts_at: row.current_period_starts_at.map(Timestamp::from_datetime),
            current_period_ends_at: row.current_period_ends_at.map(Timestamp::from_datetime),
            cancel_at_period_end: row.cancel_at_period_end,
            canceled_at: row.canceled_at.map(Timestamp::from_datetime),
            ended_at: row.ended_at.map(Timestamp::from_datetime),
            created_at: Timestamp::from_datetime(row.created_at),
            updated_at: Timestamp::from_datetime(row.updated_at),
        })
    }
}

fn parse_subscription_status(s: &str) -> Result<SubscriptionStatus, DomainError> {
    match s {
        "trialing" => Ok(SubscriptionStatus::Trialing),
        "active" => Ok(SubscriptionStatus::Active),
        "ended" => Ok(SubscriptionStatus::Ended),
        other => Err(DomainError::new(
            ErrorCode::DatabaseError,
            format!("Invalid subscription status value: {}", other),
        )),
    }
}

#[derive(Debug, sqlx::FromRow)]
struct OverrideRow {
    id: Uuid,
    user_id: Uuid,
    entitlement_key: String,
    starts_at: DateTime<Utc>,
    ends_at: DateTime<Utc>,
    source_type: String,
    source_id: Option<String>,
    reason: Option<String>,
    granted_by_user_id: Option<Uuid>,
    created_at: DateTime<Utc>,
}

const OVERRIDE_COLUMNS: &str = "id, user_id, entitlement_key, starts_at, ends_at, \
     source_type, source_id, reason, granted_by_user_id, created_at";

impl TryFrom<OverrideRow> for EntitlementOverride {
    type Error = DomainError;

    fn try_from(row: OverrideRow) -> Result<Self, Self::Error> {
        let source: OverrideSource = row.source_type.parse().map_err(|_| {
            DomainError::new(
                ErrorCode::DatabaseError,
                format!("Invalid override source value: {}", row.source_type),
            )
        })?;
        Ok(EntitlementOverride {
            id: OverrideId::from_uuid(row.id),
            user_id: UserId::from_uuid(row.user_id),
            entitlement_key: row.entitlement_key,
            starts_at: Timestamp::from_datetime(row.starts_at),
            ends_at: Timestamp::from_datetime(row.ends_at),
            source,
            source_id: row.source_id,
            reason: row.reason,
            granted_by_user_id: row.granted_by_user_id.map(UserId::from_uuid),
            created_at: Timestamp::from_datetime(row.created_at),
        })
    }
}

#[derive(Debug, sqlx::FromRow)]
struct PromotionRow {
    id: Uuid,
    code_hash: String,
    hash_version: i32,
    code_prefix: String,
    grant_duration_days: Option<i32>,
    grant_fixed_ends_at: Option<DateTime<Utc>>,
    valid_from: Option<DateTime<Utc>>,
    valid_to: Option<DateTime<Utc>>,
    max_redemptions: Option<i32>,
    per_user_max_redemptions: i32,
    redemption_count: i32,
    is_active: bool,
    created_by_user_id: Option<Uuid>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

const PROMOTION_COLUMNS: &str = "id, code_hash, hash_version, code_prefix, \
     grant_duration_days, grant_fixed_ends_at, valid_from, valid_to, max_redemptions, \
     per_user_max_redemptions, redemption_count, is_active, created_by_user_id, created_at, \
     updated_at";

impl TryFrom<PromotionRow> for Promotion {
    type Error = DomainError;

    fn try_from(row: PromotionRow) -> Result<Self, Self::Error> {
        Ok(Promotion {
            id: PromotionId::from_uuid(row.id),
            code_hash: row.code_hash,
            hash_version: row.hash_version as u32,
            code_prefix: row.code_prefix,
            grant: grant_from_columns(row.grant_duration_days, row.grant_fixed_ends_at)?,
            valid_from: row.valid_from.map(Timestamp::from_datetime),
            valid_to: row.valid_to.map(Timestamp::from_datetime),
            max_redemptions: row.max_redemptions.map(|m| m as u32),
            per_user_max_redemptions: row.per_user_max_redemptions as u32,
            redemption_count: row.redemption_count as u32,
            is_active: row.is_active,
            created_by_user_id: row.created_by_user_id.map(UserId::from_uuid),
            created_at: Timestamp::from_datetime(row.created_at),
            updated_at: Timestamp::from_datetime(row.updated_at),
        })
    }
}

#[derive(Debug, sqlx::FromRow)]
struct PendingGrantRow {
    id: Uuid,
    email_hash: String,
    hash_version: i32,
    grant_duration_days: Option<i32>,
    grant_fixed_ends_at: Option<DateTime<Utc>>,
    claim_valid_from: Option<DateTime<Utc>>,
    claim_valid_to: Option<DateTime<Utc>>,
    is_active: bool,
    reason: Option<String>,
    created_by_user_id: Option<Uuid>,
    claimed_at: Option<DateTime<Utc>>,
    claimed_by_user_id: Option<Uuid>,
    claim_source: Option<String>,
    created_at: DateTime<Utc>,
}

const PENDING_GRANT_COLUMNS: &str = "id, email_hash, hash_version, grant_duration_days, \
     grant_fixed_ends_at, claim_valid_from, claim_valid_to, is_active, reason, \
     created_by_user_id, claimed_at, claimed_by_user_id, claim_source, created_at";

impl TryFrom<PendingGrantRow> for PendingEntitlementGrant {
    type Error = DomainError;

    fn try_from(row: PendingGrantRow) -> Result<Self, Self::Error> {
        Ok(PendingEntitlementGrant {
            id: PendingGrantId::from_uuid(row.id),
            email_hash: row.email_hash,
            hash_version: row.hash_version as u32,
            grant: grant_from_columns(row.grant_duration_days, row.grant_fixed_ends_at)?,
            claim_valid_from: row.claim_valid_from.map(Timestamp::from_datetime),
            claim_valid_to: row.claim_valid_to.map(Timestamp::from_datetime),
            is_active: row.is_active,
            reason: row.reason,
            created_by_user_id: row.created_by_user_id.map(UserId::from_uuid),
            claimed_at: row.claimed_at.map(Timestamp::from_datetime),
            claimed_by_user_id: row.claimed_by_user_id.map(UserId::from_uuid),
            claim_source: row.claim_source,
            created_at: Timestamp::from_datetime(row.created_at),
        })
    }
}

/// Splits a grant spec into its two mutually-exclusive columns.
fn grant_columns(grant: &GrantSpec) -> (Option<i32>, Option<DateTime<Utc>>) {
    match grant {
        GrantSpec::DurationDays(days) => (Some(*days as i32), None),
        GrantSpec::FixedEnd(ends_at) => (None, Some(*ends_at.as_datetime())),
    }
}

/// Rebuilds a grant spec from its columns; exactly one must be set.
fn grant_from_columns(
    duration_days: Option<i32>,
    fixed_ends_at: Option<DateTime<Utc>>,
) -> Result<GrantSpec, DomainError> {
    match (duration_days, fixed_ends_at) {
        (Some(days), None) => Ok(GrantSpec::DurationDays(i64::from(days))),
        (None, Some(ends_at)) => Ok(GrantSpec::FixedEnd(Timestamp::from_datetime(ends_at))),
        _ => Err(DomainError::new(
            ErrorCode::DatabaseError,
            "Grant row must set exactly one of grant_duration_days and grant_fixed_ends_at",
        )),
    }
}

/// Splits hash candidates into the parallel arrays UNNEST expects.
fn hash_arrays(hashes: &[VersionedHash]) -> (Vec<i32>, Vec<String>) {
    hashes
        .iter()
        .map(|h| (h.version as i32, h.hash.clone()))
        .unzip()
}

// ── Store ────────────────────────────────────────────────────────────────────

#[async_trait]
impl BillingStore for PostgresBillingStore {
    async fn begin(&self) -> Result<Box<dyn BillingTransaction>, DomainError> {
        let tx = self
            .pool
            .begin()
            .await
            .map_err(|e| db_error("Failed to begin transaction", e))?;
        Ok(Box::new(PostgresBillingTransaction { tx }))
    }

    async fn subscription_for_user(
        &self,
        user_id: &UserId,
    ) -> Result<Option<Subscription>, DomainError> {
        let row: Option<SubscriptionRow> = sqlx::query_as(&format!(
            "SELECT {} FROM subscriptions WHERE user_id = $1",
            SUBSCRIPTION_COLUMNS
        ))
        .bind(user_id.as_uuid())
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| db_error("Failed to load subscription", e))?;

        row.map(Subscription::try_from).transpose()
    }

    async fn live_overrides_for_user(
        &self,
        user_id: &UserId,
        now: Timestamp,
    ) -> Result<Vec<EntitlementOverride>, DomainError> {
        let rows: Vec<OverrideRow> = sqlx::query_as(&format!(
            "SELECT {} FROM entitlement_overrides \
             WHERE user_id = $1 AND ends_at > $2 \
             ORDER BY starts_at",
            OVERRIDE_COLUMNS
        ))
        .bind(user_id.as_uuid())
        .bind(now.as_datetime())
        .fetch_all(&self.pool)
        .await
        .map_err(|e| db_error("Failed to load overrides", e))?;

        rows.into_iter().map(EntitlementOverride::try_from).collect()
    }

    async fn expired_subscriptions(
        &self,
        now: Timestamp,
        limit: u32,
    ) -> Result<Vec<Subscription>, DomainError> {
        let rows: Vec<SubscriptionRow> = sqlx::query_as(&format!(
            "SELECT {} FROM subscriptions \
             WHERE (status = 'trialing' AND trial_ends_at <= $1) \
                OR (status = 'active' AND current_period_ends_at <= $1) \
             ORDER BY COALESCE(trial_ends_at, current_period_ends_at) \
             LIMIT $2",
            SUBSCRIPTION_COLUMNS
        ))
        .bind(now.as_datetime())
        .bind(i64::from(limit))
        .fetch_all(&self.pool)
        .await
        .map_err(|e| db_error("Failed to scan expired subscriptions", e))?;

        rows.into_iter().map(Subscription::try_from).collect()
    }

    async fn trials_expiring_within(
        &self,
        now: Timestamp,
        within_days: u32,
        limit: u32,
    ) -> Result<Vec<Subscription>, DomainError> {
        let threshold = now.add_days(i64::from(within_days));
        let rows: Vec<SubscriptionRow> = sqlx::query_as(&format!(
            "SELECT {} FROM subscriptions \
             WHERE status = 'trialing' AND trial_ends_at > $1 AND trial_ends_at <= $2 \
             ORDER BY trial_ends_at \
             LIMIT $3",
            SUBSCRIPTION_COLUMNS
        ))
        .bind(now.as_datetime())
        .bind(threshold.as_datetime())
        .bind(i64::from(limit))
        .fetch_all(&self.pool)
        .await
        .map_err(|e| db_error("Failed to scan expiring trials", e))?;

        rows.into_iter().map(Subscription::try_from).collect()
    }

    async fn expired_promotions(
        &self,
        now: Timestamp,
        limit: u32,
    ) -> Result<Vec<Promotion>, DomainError> {
        let rows: Vec<PromotionRow> = sqlx::query_as(&format!(
            "SELECT {} FROM promotions \
             WHERE is_active AND valid_to IS NOT NULL AND valid_to <= $1 \
             ORDER BY valid_to \
             LIMIT $2",
            PROMOTION_COLUMNS
        ))
        .bind(now.as_datetime())
        .bind(i64::from(limit))
        .fetch_all(&self.pool)
        .await
        .map_err(|e| db_error("Failed to scan expired promotions", e))?;

        rows.into_iter().map(Promotion::try_from).collect()
    }

    async fn expired_pending_grants(
        &self,
        now: Timestamp,
        limit: u32,
    ) -> Result<Vec<PendingEntitlementGrant>, DomainError> {
        let rows: Vec<PendingGrantRow> = sqlx::query_as(&format!(
            "SELECT {} FROM pending_entitlement_grants \
             WHERE is_active AND claimed_at IS NULL \
               AND claim_valid_to IS NOT NULL AND claim_valid_to <= $1 \
             ORDER BY claim_valid_to \
             LIMIT $2",
            PENDING_GRANT_COLUMNS
        ))
        .bind(now.as_datetime())
        .bind(i64::from(limit))
        .fetch_all(&self.pool)
        .await
        .map_err(|e| db_error("Failed to scan expired pending grants", e))?;

        rows.into_iter().map(PendingEntitlementGrant::try_from).collect()
    }
}

// ── Transaction ──────────────────────────────────────────────────────────────

/// One sqlx transaction implementing the billing transaction contract.
struct PostgresBillingTransaction {
    tx: Transaction<'static, Postgres>,
}

#[async_trait]
impl BillingTransaction for PostgresBillingTransaction {
    async fn lock_subscription(
        &mut self,
        user_id: &UserId,
    ) -> Result<Option<Subscription>, DomainError> {
        let row: Option<SubscriptionRow> = sqlx::query_as(&format!(
            "SELECT {} FROM subscriptions WHERE user_id = $1 FOR UPDATE",
            SUBSCRIPTION_COLUMNS
        ))
        .bind(user_id.as_uuid())
        .fetch_optional(&mut *self.tx)
        .await
        .map_err(|e| db_error("Failed to lock subscription", e))?;

        row.map(Subscription::try_from).transpose()
    }

    async fn upsert_subscription(
        &mut self,
        subscription: &Subscription,
    ) -> Result<(), DomainError> {
        sqlx::query(
            r#"
            INSERT INTO subscriptions (
                id, user_id, status, plan_key, trial_starts_at, trial_ends_at,
                current_period_starts_at, current_period_ends_at, cancel_at_period_end,
                canceled_at, ended_at, created_at, updated_at
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
            ON CONFLICT (user_id) DO UPDATE SET
                status = EXCLUDED.status,
                plan_key = EXCLUDED.plan_key,
                trial_starts_at = EXCLUDED.trial_starts_at,
                trial_ends_at = EXCLUDED.trial_ends_at,
                current_period_starts_at = EXCLUDED.current_period_starts_at,
                current_period_ends_at = EXCLUDED.current_period_ends_at,
                cancel_at_period_end = EXCLUDED.cancel_at_period_end,
                canceled_at = EXCLUDED.canceled_at,
                ended_at = EXCLUDED.ended_at,
                updated_at = EXCLUDED.updated_at
            "#,
        )
        .bind(subscription.id.as_uuid())
        .bind(subscription.user_id.as_uuid())
        .bind(subscription.status.as_str())
        .bind(&subscription.plan_key)
        .bind(subscription.trial_starts_at.map(|t| *t.as_datetime()))
        .bind(subscription.trial_ends_at.map(|t| *t.as_datetime()))
        .bind(subscription.current_period_starts_at.map(|t| *t.as_datetime()))
        .bind(subscription.current_period_ends_at.map(|t| *t.as_datetime()))
        .bind(subscription.cancel_at_period_end)
        .bind(subscription.canceled_at.map(|t| *t.as_datetime()))
        .bind(subscription.ended_at.map(|t| *t.as_datetime()))
        .bind(subscription.created_at.as_datetime())
        .bind(subscription.updated_at.as_datetime())
        .execute(&mut *self.tx)
        .await
        .map_err(|e| db_error("Failed to upsert subscription", e))?;

        Ok(())
    }

    async fn update_subscription(
        &mut self,
        subscription: &Subscription,
    ) -> Result<(), DomainError> {
        let result = sqlx::query(
            r#"
            UPDATE subscriptions SET
                status = $2,
                plan_key = $3,
                trial_starts_at = $4,
                trial_ends_at = $5,
                current_period_starts_at = $6,
                current_period_ends_at = $7,
                cancel_at_period_end = $8,
                canceled_at = $9,
                ended_at = $10,
                updated_at = $11
            WHERE id = $1
            "#,
        )
        .bind(subscription.id.as_uuid())
        .bind(subscription.status.as_str())
        .bind(&subscription.plan_key)
        .bind(subscription.trial_starts_at.map(|t| *t.as_datetime()))
        .bind(subscription.trial_ends_at.map(|t| *t.as_datetime()))
        .bind(subscription.current_period_starts_at.map(|t| *t.as_datetime()))
        .bind(subscription.current_period_ends_at.map(|t| *t.as_datetime()))
        .bind(subscription.cancel_at_period_end)
        .bind(subscription.canceled_at.map(|t| *t.as_datetime()))
        .bind(subscription.ended_at.map(|t| *t.as_datetime()))
        .bind(subscription.updated_at.as_datetime())
        .execute(&mut *self.tx)
        .await
        .map_err(|e| db_error("Failed to update subscription", e))?;

        if result.rows_affected() == 0 {
            return Err(DomainError::new(
                ErrorCode::NotFound,
                "Subscription not found",
            ));
        }
        Ok(())
    }

    async fn end_subscription_if_active(
        &mut self,
        id: &SubscriptionId,
        ended_at: Timestamp,
    ) -> Result<bool, DomainError> {
        let result = sqlx::query(
            r#"
            UPDATE subscriptions
            SET status = 'ended', ended_at = $2, updated_at = $2
            WHERE id = $1 AND status IN ('trialing', 'active')
            "#,
        )
        .bind(id.as_uuid())
        .bind(ended_at.as_datetime())
        .execute(&mut *self.tx)
        .await
        .map_err(|e| db_error("Failed to end subscription", e))?;

        Ok(result.rows_affected() > 0)
    }

    async fn insert_trial_use(&mut self, user_id: &UserId) -> Result<bool, DomainError> {
        let result =
            sqlx::query("INSERT INTO trial_uses (user_id) VALUES ($1) ON CONFLICT DO NOTHING")
                .bind(user_id.as_uuid())
                .execute(&mut *self.tx)
                .await
                .map_err(|e| db_error("Failed to record trial use", e))?;

        Ok(result.rows_affected() > 0)
    }

    async fn live_overrides_for_user(
        &mut self,
        user_id: &UserId,
        now: Timestamp,
    ) -> Result<Vec<EntitlementOverride>, DomainError> {
        let rows: Vec<OverrideRow> = sqlx::query_as(&format!(
            "SELECT {} FROM entitlement_overrides \
             WHERE user_id = $1 AND ends_at > $2 \
             ORDER BY starts_at",
            OVERRIDE_COLUMNS
        ))
        .bind(user_id.as_uuid())
        .bind(now.as_datetime())
        .fetch_all(&mut *self.tx)
        .await
        .map_err(|e| db_error("Failed to load overrides", e))?;

        rows.into_iter().map(EntitlementOverride::try_from).collect()
    }

    async fn lock_override(
        &mut self,
        id: &OverrideId,
    ) -> Result<Option<EntitlementOverride>, DomainError> {
        let row: Option<OverrideRow> = sqlx::query_as(&format!(
            "SELECT {} FROM entitlement_overrides WHERE id = $1 FOR UPDATE",
            OVERRIDE_COLUMNS
        ))
        .bind(id.as_uuid())
        .fetch_optional(&mut *self.tx)
        .await
        .map_err(|e| db_error("Failed to lock override", e))?;

        row.map(EntitlementOverride::try_from).transpose()
    }

    async fn insert_override(
        &mut self,
        entitlement_override: &EntitlementOverride,
    ) -> Result<(), DomainError> {
        sqlx::query(
            r#"
            INSERT INTO entitlement_overrides (
                id, user_id, entitlement_key, starts_at, ends_at, source_type,
                source_id, reason, granted_by_user_id, created_at
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            "#,
        )
        .bind(entitlement_override.id.as_uuid())
        .bind(entitlement_override.user_id.as_uuid())
        .bind(&entitlement_override.entitlement_key)
        .bind(entitlement_override.starts_at.as_datetime())
        .bind(entitlement_override.ends_at.as_datetime())
        .bind(entitlement_override.source.as_str())
        .bind(&entitlement_override.source_id)
        .bind(&entitlement_override.reason)
        .bind(entitlement_override.granted_by_user_id.map(|u| *u.as_uuid()))
        .bind(entitlement_override.created_at.as_datetime())
        .execute(&mut *self.tx)
        .await
        .map_err(|e| db_error("Failed to insert override", e))?;

        Ok(())
    }

    async fn shorten_override(
        &mut self,
        id: &OverrideId,
        ends_at: Timestamp,
    ) -> Result<(), DomainError> {
        sqlx::query("UPDATE entitlement_overrides SET ends_at = $2 WHERE id = $1")
            .bind(id.as_uuid())
            .bind(ends_at.as_datetime())
            .execute(&mut *self.tx)
            .await
            .map_err(|e| db_error("Failed to shorten override", e))?;

        Ok(())
    }

    async fn lock_promotion(
        &mut self,
        id: &PromotionId,
    ) -> Result<Option<Promotion>, DomainError> {
        let row: Option<PromotionRow> = sqlx::query_as(&format!(
            "SELECT {} FROM promotions WHERE id = $1 FOR UPDATE",
            PROMOTION_COLUMNS
        ))
        .bind(id.as_uuid())
        .fetch_optional(&mut *self.tx)
        .await
        .map_err(|e| db_error("Failed to lock promotion", e))?;

        row.map(Promotion::try_from).transpose()
    }

    async fn lock_promotion_by_code_hashes(
        &mut self,
        hashes: &[VersionedHash],
    ) -> Result<Option<Promotion>, DomainError> {
        if hashes.is_empty() {
            return Ok(None);
        }
        let (versions, hash_values) = hash_arrays(hashes);

        let row: Option<PromotionRow> = sqlx::query_as(&format!(
            "SELECT {} FROM promotions \
             WHERE (hash_version, code_hash) IN \
                   (SELECT * FROM UNNEST($1::int4[], $2::text[])) \
             FOR UPDATE",
            PROMOTION_COLUMNS
        ))
        .bind(&versions)
        .bind(&hash_values)
        .fetch_optional(&mut *self.tx)
        .await
        .map_err(|e| db_error("Failed to lock promotion by code", e))?;

        row.map(Promotion::try_from).transpose()
    }

    async fn insert_promotion(&mut self, promotion: &Promotion) -> Result<bool, DomainError> {
        let (duration_days, fixed_ends_at) = grant_columns(&promotion.grant);

        let result = sqlx::query(
            r#"
            INSERT INTO promotions (
                id, code_hash, hash_version, code_prefix, grant_duration_days,
                grant_fixed_ends_at, valid_from, valid_to, max_redemptions,
                per_user_max_redemptions, redemption_count, is_active,
                created_by_user_id, created_at, updated_at
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15)
            ON CONFLICT (code_hash) DO NOTHING
            "#,
        )
        .bind(promotion.id.as_uuid())
        .bind(&promotion.code_hash)
        .bind(promotion.hash_version as i32)
        .bind(&promotion.code_prefix)
        .bind(duration_days)
        .bind(fixed_ends_at)
        .bind(promotion.valid_from.map(|t| *t.as_datetime()))
        .bind(promotion.valid_to.map(|t| *t.as_datetime()))
        .bind(promotion.max_redemptions.map(|m| m as i32))
        .bind(promotion.per_user_max_redemptions as i32)
        .bind(promotion.redemption_count as i32)
        .bind(promotion.is_active)
        .bind(promotion.created_by_user_id.map(|u| *u.as_uuid()))
        .bind(promotion.created_at.as_datetime())
        .bind(promotion.updated_at.as_datetime())
        .execute(&mut *self.tx)
        .await
        .map_err(|e| db_error("Failed to insert promotion", e))?;

        Ok(result.rows_affected() > 0)
    }

    async fn insert_redemption(
        &mut self,
        promotion_id: &PromotionId,
        user_id: &UserId,
        now: Timestamp,
    ) -> Result<bool, DomainError> {
        let result = sqlx::query(
            r#"
            INSERT INTO promotion_redemptions (promotion_id, user_id, redeemed_at)
            VALUES ($1, $2, $3)
            ON CONFLICT (promotion_id, user_id) DO NOTHING
            "#,
        )
        .bind(promotion_id.as_uuid())
        .bind(user_id.as_uuid())
        .bind(now.as_datetime())
        .execute(&mut *self.tx)
        .await
        .map_err(|e| db_error("Failed to insert redemption", e))?;

        Ok(result.rows_affected() > 0)
    }

    async fn increment_redemption_count(
        &mut self,
        id: &PromotionId,
    ) -> Result<(), DomainError> {
        sqlx::query(
            "UPDATE promotions \
             SET redemption_count = redemption_count + 1, updated_at = NOW() \
             WHERE id = $1",
        )
        .bind(id.as_uuid())
        .execute(&mut *self.tx)
        .await
        .map_err(|e| db_error("Failed to increment redemption count", e))?;

        Ok(())
    }

    async fn set_promotion_active(
        &mut self,
        id: &PromotionId,
        active: bool,
    ) -> Result<bool, DomainError> {
        let result = sqlx::query(
            "UPDATE promotions SET is_active = $2, updated_at = NOW() \
             WHERE id = $1 AND is_active <> $2",
        )
        .bind(id.as_uuid())
        .bind(active)
        .execute(&mut *self.tx)
        .await
        .map_err(|e| db_error("Failed to toggle promotion", e))?;

        Ok(result.rows_affected() > 0)
    }

    async fn insert_pending_grant(
        &mut self,
        grant: &PendingEntitlementGrant,
    ) -> Result<(), DomainError> {
        let (duration_days, fixed_ends_at) = grant_columns(&grant.grant);

        sqlx::query(
            r#"
            INSERT INTO pending_entitlement_grants (
                id, email_hash, hash_version, grant_duration_days, grant_fixed_ends_at,
                claim_valid_from, claim_valid_to, is_active, reason, created_by_user_id,
                claimed_at, claimed_by_user_id, claim_source, created_at
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)
            "#,
        )
        .bind(grant.id.as_uuid())
        .bind(&grant.email_hash)
        .bind(grant.hash_version as i32)
        .bind(duration_days)
        .bind(fixed_ends_at)
        .bind(grant.claim_valid_from.map(|t| *t.as_datetime()))
        .bind(grant.claim_valid_to.map(|t| *t.as_datetime()))
        .bind(grant.is_active)
        .bind(&grant.reason)
        .bind(grant.created_by_user_id.map(|u| *u.as_uuid()))
        .bind(grant.claimed_at.map(|t| *t.as_datetime()))
        .bind(grant.claimed_by_user_id.map(|u| *u.as_uuid()))
        .bind(&grant.claim_source)
        .bind(grant.created_at.as_datetime())
        .execute(&mut *self.tx)
        .await
        .map_err(|e| db_error("Failed to insert pending grant", e))?;

        Ok(())
    }

    async fn lock_pending_grant(
        &mut self,
        id: &PendingGrantId,
    ) -> Result<Option<PendingEntitlementGrant>, DomainError> {
        let row: Option<PendingGrantRow> = sqlx::query_as(&format!(
            "SELECT {} FROM pending_entitlement_grants WHERE id = $1 FOR UPDATE",
            PENDING_GRANT_COLUMNS
        ))
        .bind(id.as_uuid())
        .fetch_optional(&mut *self.tx)
        .await
        .map_err(|e| db_error("Failed to lock pending grant", e))?;

        row.map(PendingEntitlementGrant::try_from).transpose()
    }

    async fn lock_claimable_grants(
        &mut self,
        hashes: &[VersionedHash],
        now: Timestamp,
    ) -> Result<Vec<PendingEntitlementGrant>, DomainError> {
        if hashes.is_empty() {
            return Ok(Vec::new());
        }
        let (versions, hash_values) = hash_arrays(hashes);

        let rows: Vec<PendingGrantRow> = sqlx::query_as(&format!(
            "SELECT {} FROM pending_entitlement_grants \
             WHERE (hash_version, email_hash) IN \
                   (SELECT * FROM UNNEST($1::int4[], $2::text[])) \
               AND is_active AND claimed_at IS NULL \
               AND (claim_valid_from IS NULL OR claim_valid_from <= $3) \
               AND (claim_valid_to IS NULL OR claim_valid_to > $3) \
             ORDER BY created_at \
             FOR UPDATE",
            PENDING_GRANT_COLUMNS
        ))
        .bind(&versions)
        .bind(&hash_values)
        .bind(now.as_datetime())
        .fetch_all(&mut *self.tx)
        .await
        .map_err(|e| db_error("Failed to lock claimable grants", e))?;

        rows.into_iter().map(PendingEntitlementGrant::try_from).collect()
    }

    async fn claim_pending_grant(
        &mut self,
        id: &PendingGrantId,
        user_id: &UserId,
        claim_source: &str,
        now: Timestamp,
    ) -> Result<bool, DomainError> {
        let result = sqlx::query(
            r#"
            UPDATE pending_entitlement_grants
            SET claimed_at = $4, claimed_by_user_id = $2, claim_source = $3
            WHERE id = $1 AND claimed_at IS NULL
            "#,
        )
        .bind(id.as_uuid())
        .bind(user_id.as_uuid())
        .bind(claim_source)
        .bind(now.as_datetime())
        .execute(&mut *self.tx)
        .await
        .map_err(|e| db_error("Failed to claim pending grant", e))?;

        Ok(result.rows_affected() > 0)
    }

    async fn set_pending_grant_active(
        &mut self,
        id: &PendingGrantId,
        active: bool,
    ) -> Result<bool, DomainError> {
        let result = sqlx::query(
            "UPDATE pending_entitlement_grants SET is_active = $2 \
             WHERE id = $1 AND is_active <> $2",
        )
        .bind(id.as_uuid())
        .bind(active)
        .execute(&mut *self.tx)
        .await
        .map_err(|e| db_error("Failed to toggle pending grant", e))?;

        Ok(result.rows_affected() > 0)
    }

    async fn append_event(&mut self, event: &BillingEvent) -> Result<bool, DomainError> {
        // Events carrying an idempotency pair dedupe on it; the rest always
        // append.
        let sql = if event.provider.is_some() {
            r#"
            INSERT INTO billing_events (
                id, source, event_type, entity_type, entity_id, user_id, payload,
                provider, external_event_id, recorded_at
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            ON CONFLICT (provider, external_event_id)
                WHERE provider IS NOT NULL AND external_event_id IS NOT NULL
                DO NOTHING
            "#
        } else {
            r#"
            INSERT INTO billing_events (
                id, source, event_type, entity_type, entity_id, user_id, payload,
                provider, external_event_id, recorded_at
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            "#
        };

        let result = sqlx::query(sql)
            .bind(event.id.as_uuid())
            .bind(event.source.as_str())
            .bind(event.event_type.as_str())
            .bind(event.entity_type.as_str())
            .bind(&event.entity_id)
            .bind(event.user_id.map(|u| *u.as_uuid()))
            .bind(&event.payload)
            .bind(&event.provider)
            .bind(&event.external_event_id)
            .bind(event.recorded_at.as_datetime())
            .execute(&mut *self.tx)
            .await
            .map_err(|e| db_error("Failed to append billing event", e))?;

        Ok(result.rows_affected() > 0)
    }

    async fn commit(self: Box<Self>) -> Result<(), DomainError> {
        self.tx
            .commit()
            .await
            .map_err(|e| db_error("Failed to commit transaction", e))
    }
}
