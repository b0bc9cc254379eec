//! SetPromotionActiveHandler - Admin command handler for disabling and
//! re-enabling promotions.

use std::sync::Arc;

use crate::domain::billing::{
    BillingEntityType, BillingError, BillingEvent, BillingEventSource, BillingEventType,
};
use crate::domain::foundation::{PromotionId, Timestamp};
use crate::ports::BillingStore;

/// Command to disable (`active = false`) or enable a promotion.
#[derive(Debug, Clone)]
pub struct SetPromotionActiveCommand {
    pub promotion_id: PromotionId,
    pub active: bool,
}

/// Result of toggling a promotion.
#[derive(Debug, Clone)]
pub struct SetPromotionActiveResult {
    pub is_active: bool,
    /// True when the promotion was already in the requested state; no event
    /// was appended.
    pub already_set: bool,
}

/// Handler for the idempotent promotion toggle.
pub struct SetPromotionActiveHandler {
    store: Arc<dyn BillingStore>,
}

impl SetPromotionActiveHandler {
    pub fn new(store: Arc<dyn BillingStore>) -> Self {
        Self { store }
    }

    pub async fn handle(
        &self,
        cmd: SetPromotionActiveCommand,
    ) -> Result<SetPromotionActiveResult, BillingError> {
        self.handle_at(cmd, Timestamp::now()).await
    }

    /// Handles with an explicit reference time, for schedulers and tests.
    pub async fn handle_at(
        &self,
        cmd: SetPromotionActiveCommand,
        now: Timestamp,
    ) -> Result<SetPromotionActiveResult, BillingError> {
        let mut tx = self.store.begin().await?;

        tx.lock_promotion(&cmd.promotion_id)
            .await?
            .ok_or_else(|| BillingError::not_found("Promotion"))?;

        let changed = tx.set_promotion_active(&cmd.promotion_id, cmd.active).await?;
        if changed {
            let event_type = if cmd.active {
                BillingEventType::PromotionEnabled
            } else {
                BillingEventType::PromotionDisabled
            };
            let event = BillingEvent::new(
                BillingEventSource::Admin,
                event_type,
                BillingEntityType::Promotion,
                cmd.promotion_id.to_string(),
                now,
            );
            tx.append_event(&event).await?;
        }

        tx.commit().await?;

        Ok(SetPromotionActiveResult {
            is_active: cmd.active,
            already_set: !changed,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::memory::InMemoryBillingStore;
    use crate::domain::billing::Promotion;
    use crate::domain::entitlement::GrantSpec;

    fn ts(s: &str) -> Timestamp {
        Timestamp::parse_rfc3339(s).unwrap()
    }

    async fn seed_promotion(store: &InMemoryBillingStore, active: bool) -> PromotionId {
        let created = ts("2024-01-01T00:00:00Z");
        let promo = Promotion {
            id: PromotionId::new(),
            code_hash: "aa".repeat(32),
            hash_version: 1,
            code_prefix: "K7PM".to_string(),
            grant: GrantSpec::DurationDays(30),
            valid_from: None,
            valid_to: None,
            max_redemptions: None,
            per_user_max_redemptions: 1,
            redemption_count: 0,
            is_active: active,
            created_by_user_id: None,
            created_at: created,
            updated_at: created,
        };
        let id = promo.id;
        store.put_promotion(promo).await;
        id
    }

    #[tokio::test]
    async fn disables_an_active_promotion() {
        let store = Arc::new(InMemoryBillingStore::new());
        let handler = SetPromotionActiveHandler::new(store.clone());
        let id = seed_promotion(&store, true).await;

        let result = handler
            .handle_at(
                SetPromotionActiveCommand { promotion_id: id, active: false },
                ts("2024-02-01T00:00:00Z"),
            )
            .await
            .unwrap();

        assert!(!result.is_active);
        assert!(!result.already_set);
        assert!(!store.promotion(&id).await.unwrap().is_active);

        let events = store.events().await;
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event_type, BillingEventType::PromotionDisabled);
    }

    #[tokio::test]
    async fn disabling_twice_appends_one_event() {
        let store = Arc::new(InMemoryBillingStore::new());
        let handler = SetPromotionActiveHandler::new(store.clone());
        let id = seed_promotion(&store, true).await;
        let cmd = SetPromotionActiveCommand { promotion_id: id, active: false };

        handler.handle_at(cmd.clone(), ts("2024-02-01T00:00:00Z")).await.unwrap();
        let second = handler
            .handle_at(cmd, ts("2024-02-02T00:00:00Z"))
            .await
            .unwrap();

        assert!(second.already_set);
        assert_eq!(store.events().await.len(), 1);
    }

    #[tokio::test]
    async fn enables_a_disabled_promotion() {
        let store = Arc::new(InMemoryBillingStore::new());
        let handler = SetPromotionActiveHandler::new(store.clone());
        let id = seed_promotion(&store, false).await;

        let result = handler
            .handle_at(
                SetPromotionActiveCommand { promotion_id: id, active: true },
                ts("2024-02-01T00:00:00Z"),
            )
            .await
            .unwrap();

        assert!(result.is_active);
        assert!(!result.already_set);

        let events = store.events().await;
        assert_eq!(events[0].event_type, BillingEventType::PromotionEnabled);
    }

    #[tokio::test]
    async fn unknown_promotion_is_not_found() {
        let store = Arc::new(InMemoryBillingStore::new());
        let handler = SetPromotionActiveHandler::new(store.clone());

        let result = handler
            .handle_at(
                SetPromotionActiveCommand {
                    promotion_id: PromotionId::new(),
                    active: false,
                },
                ts("2024-02-01T00:00:00Z"),
            )
            .await;

        assert!(matches!(result, Err(BillingError::NotFound { .. })));
    }
}
