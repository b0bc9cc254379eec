//! AdminOverrideHandler - Admin command handlers for granting, extending,
//! and revoking Pro overrides.
//!
//! Grant and extend share one internal path; they differ only in the ledger
//! event type. Revocation never deletes the row, it shortens `ends_at` to
//! the revocation instant.

use std::sync::Arc;

use crate::domain::billing::{
    BillingEntityType, BillingError, BillingEvent, BillingEventSource, BillingEventType,
    EntitlementOverride, OverrideSource,
};
use crate::domain::entitlement::{compute_grant_window, evaluate, GrantSpec, GrantWindow};
use crate::domain::foundation::{OverrideId, Timestamp, UserId};
use crate::ports::{BillingStore, EntitlementCache};

use super::support::{entitlement_intervals, invalidate_cache};

/// Command to grant a new admin override.
#[derive(Debug, Clone)]
pub struct GrantAdminOverrideCommand {
    pub user_id: UserId,
    pub grant: GrantSpec,
    pub reason: Option<String>,
    pub granted_by_user_id: Option<UserId>,
}

/// Command to extend a user's Pro access; same shape, different ledger event.
#[derive(Debug, Clone)]
pub struct ExtendAdminOverrideCommand {
    pub user_id: UserId,
    pub grant: GrantSpec,
    pub reason: Option<String>,
    pub granted_by_user_id: Option<UserId>,
}

/// Result of granting or extending.
#[derive(Debug, Clone)]
pub struct AdminOverrideResult {
    /// The created override; `None` when the grant added no time.
    pub entitlement_override: Option<EntitlementOverride>,
    pub window: GrantWindow,
}

/// Command to revoke an override early.
#[derive(Debug, Clone)]
pub struct RevokeAdminOverrideCommand {
    pub override_id: OverrideId,
}

/// Result of a revocation.
#[derive(Debug, Clone)]
pub struct RevokeAdminOverrideResult {
    /// True when the override had already run out; nothing was changed and
    /// no event appended.
    pub already_revoked: bool,
}

/// Handler for admin override commands.
pub struct AdminOverrideHandler {
    store: Arc<dyn BillingStore>,
    cache: Arc<dyn EntitlementCache>,
}

impl AdminOverrideHandler {
    pub fn new(store: Arc<dyn BillingStore>, cache: Arc<dyn EntitlementCache>) -> Self {
        Self { store, cache }
    }

    pub async fn grant(
        &self,
        cmd: GrantAdminOverrideCommand,
    ) -> Result<AdminOverrideResult, BillingError> {
        self.grant_at(cmd, Timestamp::now()).await
    }

    /// Grants with an explicit reference time, for schedulers and tests.
    pub async fn grant_at(
        &self,
        cmd: GrantAdminOverrideCommand,
        now: Timestamp,
    ) -> Result<AdminOverrideResult, BillingError> {
        self.apply(
            cmd.user_id,
            cmd.grant,
            cmd.reason,
            cmd.granted_by_user_id,
            BillingEventType::OverrideGranted,
            now,
        )
        .await
    }

    pub async fn extend(
        &self,
        cmd: ExtendAdminOverrideCommand,
    ) -> Result<AdminOverrideResult, BillingError> {
        self.extend_at(cmd, Timestamp::now()).await
    }

    /// Extends with an explicit reference time, for schedulers and tests.
    pub async fn extend_at(
        &self,
        cmd: ExtendAdminOverrideCommand,
        now: Timestamp,
    ) -> Result<AdminOverrideResult, BillingError> {
        self.apply(
            cmd.user_id,
            cmd.grant,
            cmd.reason,
            cmd.granted_by_user_id,
            BillingEventType::OverrideExtended,
            now,
        )
        .await
    }

    /// The shared grant/extend path: compute the stacked window under the
    /// user's locks, insert the override unless it adds nothing, ledger it.
    async fn apply(
        &self,
        user_id: UserId,
        grant: GrantSpec,
        reason: Option<String>,
        granted_by_user_id: Option<UserId>,
        event_type: BillingEventType,
        now: Timestamp,
    ) -> Result<AdminOverrideResult, BillingError> {
        let mut tx = self.store.begin().await?;

        let subscription = tx.lock_subscription(&user_id).await?;
        let overrides = tx.live_overrides_for_user(&user_id, now).await?;
        let access = evaluate(
            now,
            false,
            &entitlement_intervals(subscription.as_ref(), &overrides),
        );

        let window = compute_grant_window(now, access.pro_until, Some(grant));

        let mut created = None;
        if !window.no_extension {
            let entitlement_override = EntitlementOverride::grant(
                OverrideId::new(),
                user_id,
                window.starts_at,
                window.ends_at,
                OverrideSource::Admin,
                None,
                reason.clone(),
                granted_by_user_id,
                now,
            );
            tx.insert_override(&entitlement_override).await?;
            created = Some(entitlement_override);
        }

        let event = BillingEvent::new(
            BillingEventSource::Admin,
            event_type,
            BillingEntityType::Override,
            created
                .as_ref()
                .map(|o| o.id.to_string())
                .unwrap_or_else(|| user_id.to_string()),
            now,
        )
        .with_user(user_id)
        .with_payload(serde_json::json!({
            "starts_at": window.starts_at,
            "ends_at": window.ends_at,
            "no_extension": window.no_extension,
            "reason": reason,
        }));
        tx.append_event(&event).await?;

        tx.commit().await?;

        invalidate_cache(self.cache.as_ref(), &user_id).await;

        Ok(AdminOverrideResult {
            entitlement_override: created,
            window,
        })
    }

    pub async fn revoke(
        &self,
        cmd: RevokeAdminOverrideCommand,
    ) -> Result<RevokeAdminOverrideResult, BillingError> {
        self.revoke_at(cmd, Timestamp::now()).await
    }

    /// Revokes with an explicit reference time, for schedulers and tests.
    pub async fn revoke_at(
        &self,
        cmd: RevokeAdminOverrideCommand,
        now: Timestamp,
    ) -> Result<RevokeAdminOverrideResult, BillingError> {
        let mut tx = self.store.begin().await?;

        let entitlement_override = tx
            .lock_override(&cmd.override_id)
            .await?
            .ok_or_else(|| BillingError::not_found("Override"))?;

        if !entitlement_override.has_started(now) {
            return Err(BillingError::invalid_state(
                "Cannot revoke an override that has not started",
            ));
        }
        if entitlement_override.has_ended(now) {
            // Already ran out; retried revocations succeed quietly.
            return Ok(RevokeAdminOverrideResult {
                already_revoked: true,
            });
        }

        tx.shorten_override(&cmd.override_id, now).await?;

        let event = BillingEvent::new(
            BillingEventSource::Admin,
            BillingEventType::OverrideRevoked,
            BillingEntityType::Override,
            cmd.override_id.to_string(),
            now,
        )
        .with_user(entitlement_override.user_id)
        .with_payload(serde_json::json!({
            "previous_ends_at": entitlement_override.ends_at,
            "revoked_at": now,
        }));
        tx.append_event(&event).await?;

        tx.commit().await?;

        invalidate_cache(self.cache.as_ref(), &entitlement_override.user_id).await;

        Ok(RevokeAdminOverrideResult {
            already_revoked: false,
        })
    }
}
