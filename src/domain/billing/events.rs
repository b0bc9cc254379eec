//! Billing event ledger records.
//!
//! Every entitlement-affecting transition appends exactly one event; rows are
//! never updated or deleted. The optional `(provider, external_event_id)`
//! pair is unique at the storage layer and doubles as an idempotency key for
//! externally-triggered writes and sweep notification markers.

use serde::{Deserialize, Serialize};
use std::str::FromStr;

use crate::domain::foundation::{BillingEventId, Timestamp, UserId, ValidationError};

/// The closed set of transition kinds the ledger records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BillingEventType {
    TrialStarted,
    CancelScheduled,
    CancelReverted,
    SubscriptionEnded,
    TrialExpiringSoonNotified,
    PromotionCreated,
    PromotionRedeemed,
    PromotionEnabled,
    PromotionDisabled,
    PendingGrantCreated,
    PendingGrantClaimed,
    PendingGrantEnabled,
    PendingGrantDisabled,
    OverrideGranted,
    OverrideExtended,
    OverrideRevoked,
}

impl BillingEventType {
    /// Stable string form, matching the serialized representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::TrialStarted => "trial_started",
            Self::CancelScheduled => "cancel_scheduled",
            Self::CancelReverted => "cancel_reverted",
            Self::SubscriptionEnded => "subscription_ended",
            Self::TrialExpiringSoonNotified => "trial_expiring_soon_notified",
            Self::PromotionCreated => "promotion_created",
            Self::PromotionRedeemed => "promotion_redeemed",
            Self::PromotionEnabled => "promotion_enabled",
            Self::PromotionDisabled => "promotion_disabled",
            Self::PendingGrantCreated => "pending_grant_created",
            Self::PendingGrantClaimed => "pending_grant_claimed",
            Self::PendingGrantEnabled => "pending_grant_enabled",
            Self::PendingGrantDisabled => "pending_grant_disabled",
            Self::OverrideGranted => "override_granted",
            Self::OverrideExtended => "override_extended",
            Self::OverrideRevoked => "override_revoked",
        }
    }
}

impl std::fmt::Display for BillingEventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for BillingEventType {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "trial_started" => Ok(Self::TrialStarted),
            "cancel_scheduled" => Ok(Self::CancelScheduled),
            "cancel_reverted" => Ok(Self::CancelReverted),
            "subscription_ended" => Ok(Self::SubscriptionEnded),
            "trial_expiring_soon_notified" => Ok(Self::TrialExpiringSoonNotified),
            "promotion_created" => Ok(Self::PromotionCreated),
            "promotion_redeemed" => Ok(Self::PromotionRedeemed),
            "promotion_enabled" => Ok(Self::PromotionEnabled),
            "promotion_disabled" => Ok(Self::PromotionDisabled),
            "pending_grant_created" => Ok(Self::PendingGrantCreated),
            "pending_grant_claimed" => Ok(Self::PendingGrantClaimed),
            "pending_grant_enabled" => Ok(Self::PendingGrantEnabled),
            "pending_grant_disabled" => Ok(Self::PendingGrantDisabled),
            "override_granted" => Ok(Self::OverrideGranted),
            "override_extended" => Ok(Self::OverrideExtended),
            "override_revoked" => Ok(Self::OverrideRevoked),
            other => Err(ValidationError::invalid_format(
                "billing_event_type",
                format!("unknown event type '{}'", other),
            )),
        }
    }
}

/// What kind of row an event refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BillingEntityType {
    Subscription,
    Promotion,
    PendingGrant,
    Override,
}

impl BillingEntityType {
    /// Stable string form, matching the serialized representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Subscription => "subscription",
            Self::Promotion => "promotion",
            Self::PendingGrant => "pending_grant",
            Self::Override => "override",
        }
    }
}

impl std::fmt::Display for BillingEntityType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for BillingEntityType {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "subscription" => Ok(Self::Subscription),
            "promotion" => Ok(Self::Promotion),
            "pending_grant" => Ok(Self::PendingGrant),
            "override" => Ok(Self::Override),
            other => Err(ValidationError::invalid_format(
                "billing_entity_type",
                format!("unknown entity type '{}'", other),
            )),
        }
    }
}

/// Which part of the system appended an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BillingEventSource {
    /// A user-facing command.
    Api,
    /// An admin command.
    Admin,
    /// The maintenance sweep.
    Maintenance,
}

impl BillingEventSource {
    /// Stable string form, matching the serialized representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Api => "api",
            Self::Admin => "admin",
            Self::Maintenance => "maintenance",
        }
    }
}

impl std::fmt::Display for BillingEventSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for BillingEventSource {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "api" => Ok(Self::Api),
            "admin" => Ok(Self::Admin),
            "maintenance" => Ok(Self::Maintenance),
            other => Err(ValidationError::invalid_format(
                "billing_event_source",
                format!("unknown event source '{}'", other),
            )),
        }
    }
}

/// One append-only ledger row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BillingEvent {
    pub id: BillingEventId,
    pub source: BillingEventSource,
    pub event_type: BillingEventType,
    pub entity_type: BillingEntityType,
    pub entity_id: String,
    pub user_id: Option<UserId>,
    pub payload: serde_json::Value,
    /// External system the event came from, when ingested idempotently.
    pub provider: Option<String>,
    /// Unique per provider; doubles as the sweep's notification marker key.
    pub external_event_id: Option<String>,
    pub recorded_at: Timestamp,
}

impl BillingEvent {
    /// Creates an event with an empty payload.
    pub fn new(
        source: BillingEventSource,
        event_type: BillingEventType,
        entity_type: BillingEntityType,
        entity_id: impl Into<String>,
        recorded_at: Timestamp,
    ) -> Self {
        Self {
            id: BillingEventId::new(),
            source,
            event_type,
            entity_type,
            entity_id: entity_id.into(),
            user_id: None,
            payload: serde_json::Value::Null,
            provider: None,
            external_event_id: None,
            recorded_at,
        }
    }

    /// Builder: attach the affected user.
    pub fn with_user(mut self, user_id: UserId) -> Self {
        self.user_id = Some(user_id);
        self
    }

    /// Builder: attach a JSON payload.
    pub fn with_payload(mut self, payload: serde_json::Value) -> Self {
        self.payload = payload;
        self
    }

    /// Builder: attach the idempotency pair. Appending a second event with
    /// the same pair is a silent no-op at the storage layer.
    pub fn with_idempotency_key(
        mut self,
        provider: impl Into<String>,
        external_event_id: impl Into<String>,
    ) -> Self {
        self.provider = Some(provider.into());
        self.external_event_id = Some(external_event_id.into());
        self
    }
}
