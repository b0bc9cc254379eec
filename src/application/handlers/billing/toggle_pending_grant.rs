//! SetPendingGrantActiveHandler - Admin command handler for disabling and
//! re-enabling pending grants.

use std::sync::Arc;

use crate::domain::billing::{
    BillingEntityType, BillingError, BillingEvent, BillingEventSource, BillingEventType,
};
use crate::domain::foundation::{PendingGrantId, Timestamp};
use crate::ports::BillingStore;

/// Command to disable (`active = false`) or enable a pending grant.
#[derive(Debug, Clone)]
pub struct SetPendingGrantActiveCommand {
    pub grant_id: PendingGrantId,
    pub active: bool,
}

/// Result of toggling a pending grant.
#[derive(Debug, Clone)]
pub struct SetPendingGrantActiveResult {
    pub is_active: bool,
    /// True when the grant was already in the requested state; no event was
    /// appended.
    pub already_set: bool,
}

/// Handler for the idempotent pending-grant toggle.
pub struct SetPendingGrantActiveHandler {
    store: Arc<dyn BillingStore>,
}

impl SetPendingGrantActiveHandler {
    pub fn new(store: Arc<dyn BillingStore>) -> Self {
        Self { store }
    }

    pub async fn handle(
        &self,
        cmd: SetPendingGrantActiveCommand,
    ) -> Result<SetPendingGrantActiveResult, BillingError> {
        self.handle_at(cmd, Timestamp::now()).await
    }

    /// Handles with an explicit reference time, for schedulers and tests.
    pub async fn handle_at(
        &self,
        cmd: SetPendingGrantActiveCommand,
        now: Timestamp,
    ) -> Result<SetPendingGrantActiveResult, BillingError> {
        let mut tx = self.store.begin().await?;

        tx.lock_pending_grant(&cmd.grant_id)
            .await?
            .ok_or_else(|| BillingError::not_found("Pending grant"))?;

        let changed = tx
            .set_pending_grant_active(&cmd.grant_id, cmd.active)
            .await?;
        if changed {
            let event_type = if cmd.active {
                BillingEventType::PendingGrantEnabled
            } else {
                BillingEventType::PendingGrantDisabled
            };
            let event = BillingEvent::new(
                BillingEventSource::Admin,
                event_type,
                BillingEntityType::PendingGrant,
                cmd.grant_id.to_string(),
                now,
            );
            tx.append_event(&event).await?;
        }

        tx.commit().await?;

        Ok(SetPendingGrantActiveResult {
            is_active: cmd.active,
            already_set: !changed,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::memory::InMemoryBillingStore;
    use crate::domain::billing::PendingEntitlementGrant;
    use crate::domain::entitlement::GrantSpec;

    fn ts(s: &str) -> Timestamp {
        Timestamp::parse_rfc3339(s).unwrap()
    }

    async fn seed_grant(store: &InMemoryBillingStore, active: bool) -> PendingGrantId {
        let grant = PendingEntitlementGrant {
            id: PendingGrantId::new(),
            email_hash: "bb".repeat(32),
            hash_version: 1,
            grant: GrantSpec::DurationDays(30),
            claim_valid_from: None,
            claim_valid_to: None,
            is_active: active,
            reason: None,
            created_by_user_id: None,
            claimed_at: None,
            claimed_by_user_id: None,
            claim_source: None,
            created_at: ts("2024-01-01T00:00:00Z"),
        };
        let id = grant.id;
        store.put_pending_grant(grant).await;
        id
    }

    #[tokio::test]
    async fn disables_an_active_grant() {
        let store = Arc::new(InMemoryBillingStore::new());
        let handler = SetPendingGrantActiveHandler::new(store.clone());
        let id = seed_grant(&store, true).await;

        let result = handler
            .handle_at(
                SetPendingGrantActiveCommand { grant_id: id, active: false },
                ts("2024-02-01T00:00:00Z"),
            )
            .await
            .unwrap();

        assert!(!result.is_active);
        assert!(!result.already_set);
        assert!(!store.pending_grant(&id).await.unwrap().is_active);

        let events = store.events().await;
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event_type, BillingEventType::PendingGrantDisabled);
    }

    #[tokio::test]
    async fn toggling_twice_appends_one_event() {
        let store = Arc::new(InMemoryBillingStore::new());
        let handler = SetPendingGrantActiveHandler::new(store.clone());
        let id = seed_grant(&store, true).await;
        let cmd = SetPendingGrantActiveCommand { grant_id: id, active: false };

        handler.handle_at(cmd.clone(), ts("2024-02-01T00:00:00Z")).await.unwrap();
        let second = handler.handle_at(cmd, ts("2024-02-02T00:00:00Z")).await.unwrap();

        assert!(second.already_set);
        assert_eq!(store.events().await.len(), 1);
    }

    #[tokio::test]
    async fn re_enabling_appends_enabled_event() {
        let store = Arc::new(InMemoryBillingStore::new());
        let handler = SetPendingGrantActiveHandler::new(store.clone());
        let id = seed_grant(&store, false).await;

        let result = handler
            .handle_at(
                SetPendingGrantActiveCommand { grant_id: id, active: true },
                ts("2024-02-01T00:00:00Z"),
            )
            .await
            .unwrap();

        assert!(result.is_active);
        let events = store.events().await;
        assert_eq!(events[0].event_type, BillingEventType::PendingGrantEnabled);
    }

    #[tokio::test]
    async fn unknown_grant_is_not_found() {
        let store = Arc::new(InMemoryBillingStore::new());
        let handler = SetPendingGrantActiveHandler::new(store.clone());

        let result = handler
            .handle_at(
                SetPendingGrantActiveCommand {
                    grant_id: PendingGrantId::new(),
                    active: false,
                },
                ts("2024-02-01T00:00:00Z"),
            )
            .await;

        assert!(matches!(result, Err(BillingError::NotFound { .. })));
    }
}
