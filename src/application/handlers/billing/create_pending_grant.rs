//! CreatePendingGrantHandler - Admin command handler for email-keyed grants.

use std::sync::Arc;

use crate::domain::billing::{
    normalize_email, BillingEntityType, BillingError, BillingEvent, BillingEventSource,
    BillingEventType, CodeHasher, PendingEntitlementGrant,
};
use crate::domain::entitlement::GrantSpec;
use crate::domain::foundation::{PendingGrantId, Timestamp, UserId};
use crate::ports::BillingStore;

/// Command to create a pending grant for an email address.
#[derive(Debug, Clone)]
pub struct CreatePendingGrantCommand {
    /// Recipient email; only its hash is stored.
    pub email: String,
    pub grant: GrantSpec,
    pub claim_valid_from: Option<Timestamp>,
    pub claim_valid_to: Option<Timestamp>,
    pub reason: Option<String>,
    pub created_by_user_id: Option<UserId>,
}

/// Result of creating a pending grant.
#[derive(Debug, Clone)]
pub struct CreatePendingGrantResult {
    pub grant: PendingEntitlementGrant,
}

/// Handler for creating pending grants.
pub struct CreatePendingGrantHandler {
    store: Arc<dyn BillingStore>,
    hasher: Arc<CodeHasher>,
}

impl CreatePendingGrantHandler {
    pub fn new(store: Arc<dyn BillingStore>, hasher: Arc<CodeHasher>) -> Self {
        Self { store, hasher }
    }

    pub async fn handle(
        &self,
        cmd: CreatePendingGrantCommand,
    ) -> Result<CreatePendingGrantResult, BillingError> {
        self.handle_at(cmd, Timestamp::now()).await
    }

    /// Handles with an explicit reference time, for schedulers and tests.
    pub async fn handle_at(
        &self,
        cmd: CreatePendingGrantCommand,
        now: Timestamp,
    ) -> Result<CreatePendingGrantResult, BillingError> {
        let hashed = self
            .hasher
            .hash_latest(&normalize_email(&cmd.email))
            .ok_or(BillingError::HashSecretMissing)?;

        let grant = PendingEntitlementGrant {
            id: PendingGrantId::new(),
            email_hash: hashed.hash,
            hash_version: hashed.version,
            grant: cmd.grant,
            claim_valid_from: cmd.claim_valid_from,
            claim_valid_to: cmd.claim_valid_to,
            is_active: true,
            reason: cmd.reason,
            created_by_user_id: cmd.created_by_user_id,
            claimed_at: None,
            claimed_by_user_id: None,
            claim_source: None,
            created_at: now,
        };

        let mut tx = self.store.begin().await?;
        tx.insert_pending_grant(&grant).await?;

        let event = BillingEvent::new(
            BillingEventSource::Admin,
            BillingEventType::PendingGrantCreated,
            BillingEntityType::PendingGrant,
            grant.id.to_string(),
            now,
        )
        .with_payload(serde_json::json!({
            "grant": grant.grant,
            "claim_valid_from": grant.claim_valid_from,
            "claim_valid_to": grant.claim_valid_to,
            "reason": grant.reason,
        }));
        tx.append_event(&event).await?;

        tx.commit().await?;

        Ok(CreatePendingGrantResult { grant })
    }
}
