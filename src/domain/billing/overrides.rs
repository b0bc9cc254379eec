//! Entitlement override aggregate.
//!
//! An override is a time-bounded Pro grant outside the subscription system:
//! admin grants, redeemed promotions, claimed pending grants, migrations.
//! Overrides are immutable once active except that `ends_at` may be
//! shortened to effect early revocation; rows are never deleted.

use serde::{Deserialize, Serialize};
use std::str::FromStr;

use crate::domain::entitlement::{EntitlementInterval, EntitlementSource};
use crate::domain::foundation::{OverrideId, Timestamp, UserId, ValidationError};

/// The single entitlement this engine currently gates.
pub const PRO_ACCESS_ENTITLEMENT: &str = "pro_access";

/// What created an override.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OverrideSource {
    Admin,
    Promotion,
    PendingGrant,
    Migration,
    System,
}

impl OverrideSource {
    /// Stable string form, matching the serialized representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Admin => "admin",
            Self::Promotion => "promotion",
            Self::PendingGrant => "pending_grant",
            Self::Migration => "migration",
            Self::System => "system",
        }
    }

    /// The source kind this override contributes to the evaluator.
    pub fn entitlement_source(&self) -> EntitlementSource {
        match self {
            Self::Admin => EntitlementSource::AdminOverride,
            Self::Promotion => EntitlementSource::Promotion,
            Self::PendingGrant => EntitlementSource::PendingGrant,
            Self::Migration => EntitlementSource::Migration,
            Self::System => EntitlementSource::System,
        }
    }
}

impl std::fmt::Display for OverrideSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for OverrideSource {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "admin" => Ok(Self::Admin),
            "promotion" => Ok(Self::Promotion),
            "pending_grant" => Ok(Self::PendingGrant),
            "migration" => Ok(Self::Migration),
            "system" => Ok(Self::System),
            other => Err(ValidationError::invalid_format(
                "override_source",
                format!("unknown source '{}'", other),
            )),
        }
    }
}

/// A time-bounded Pro grant for one user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntitlementOverride {
    pub id: OverrideId,
    pub user_id: UserId,
    pub entitlement_key: String,
    pub starts_at: Timestamp,
    pub ends_at: Timestamp,
    pub source: OverrideSource,
    pub source_id: Option<String>,
    pub reason: Option<String>,
    pub granted_by_user_id: Option<UserId>,
    pub created_at: Timestamp,
}

impl EntitlementOverride {
    /// Creates a new Pro-access override covering `[starts_at, ends_at)`.
    #[allow(clippy::too_many_arguments)]
    pub fn grant(
        id: OverrideId,
        user_id: UserId,
        starts_at: Timestamp,
        ends_at: Timestamp,
        source: OverrideSource,
        source_id: Option<String>,
        reason: Option<String>,
        granted_by_user_id: Option<UserId>,
        created_at: Timestamp,
    ) -> Self {
        Self {
            id,
            user_id,
            entitlement_key: PRO_ACCESS_ENTITLEMENT.to_string(),
            starts_at,
            ends_at,
            source,
            source_id,
            reason,
            granted_by_user_id,
            created_at,
        }
    }

    /// Whether the override window has started by `now`.
    pub fn has_started(&self, now: Timestamp) -> bool {
        self.starts_at < now
    }

    /// Whether the override window is already fully in the past.
    pub fn has_ended(&self, now: Timestamp) -> bool {
        self.ends_at <= now
    }

    /// Whether the override grants access at `now`.
    pub fn is_active_at(&self, now: Timestamp) -> bool {
        self.starts_at <= now && now < self.ends_at
    }

    /// Shortens the window to end at `now`, revoking remaining access.
    ///
    /// The row is kept; history is preserved.
    pub fn revoke_at(&mut self, now: Timestamp) {
        self.ends_at = now;
    }

    /// The interval this override contributes to the evaluator.
    pub fn as_interval(&self) -> EntitlementInterval {
        EntitlementInterval::new(
            self.source.entitlement_source(),
            self.starts_at,
            self.ends_at,
        )
        .with_source_id(self.id.to_string())
        .with_created_at(self.created_at)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ts(s: &str) -> Timestamp {
        Timestamp::parse_rfc3339(s).unwrap()
    }

    fn admin_override(starts: &str, ends: &str) -> EntitlementOverride {
        EntitlementOverride::grant(
            OverrideId::new(),
            UserId::new(),
            ts(starts),
            ts(ends),
            OverrideSource::Admin,
            None,
            Some("support escalation".to_string()),
            Some(UserId::new()),
            ts(starts),
        )
    }

    #[test]
    fn grant_uses_pro_access_key() {
        let o = admin_override("2024-01-01T00:00:00Z", "2024-02-01T00:00:00Z");
        assert_eq!(o.entitlement_key, PRO_ACCESS_ENTITLEMENT);
    }

    #[test]
    fn activity_window_is_half_open() {
        let o = admin_override("2024-01-01T00:00:00Z", "2024-02-01T00:00:00Z");

        assert!(o.is_active_at(ts("2024-01-01T00:00:00Z")));
        assert!(o.is_active_at(ts("2024-01-31T23:59:59Z")));
        assert!(!o.is_active_at(ts("2024-02-01T00:00:00Z")));
    }

    #[test]
    fn has_started_is_strict() {
        let o = admin_override("2024-01-01T00:00:00Z", "2024-02-01T00:00:00Z");

        assert!(!o.has_started(ts("2024-01-01T00:00:00Z")));
        assert!(o.has_started(ts("2024-01-01T00:00:01Z")));
    }

    #[test]
    fn revoke_shortens_to_now() {
        let mut o = admin_override("2024-01-01T00:00:00Z", "2024-06-01T00:00:00Z");
        let now = ts("2024-02-15T00:00:00Z");

        o.revoke_at(now);

        assert_eq!(o.ends_at, now);
        assert!(o.has_ended(now));
        assert!(!o.is_active_at(now));
    }

    #[test]
    fn interval_carries_tie_break_metadata() {
        let o = admin_override("2024-01-01T00:00:00Z", "2024-02-01T00:00:00Z");

        let interval = o.as_interval();
        assert_eq!(interval.source, EntitlementSource::AdminOverride);
        assert_eq!(interval.source_id, Some(o.id.to_string()));
        assert_eq!(interval.created_at, Some(o.created_at));
    }

    #[test]
    fn source_maps_to_entitlement_source() {
        assert_eq!(
            OverrideSource::Promotion.entitlement_source(),
            EntitlementSource::Promotion
        );
        assert_eq!(
            OverrideSource::PendingGrant.entitlement_source(),
            EntitlementSource::PendingGrant
        );
        assert_eq!(
            OverrideSource::Migration.entitlement_source(),
            EntitlementSource::Migration
        );
    }

    #[test]
    fn source_string_round_trip() {
        for source in [
            OverrideSource::Admin,
            OverrideSource::Promotion,
            OverrideSource::PendingGrant,
            OverrideSource::Migration,
            OverrideSource::System,
        ] {
            let parsed: OverrideSource = source.as_str().parse().unwrap();
            assert_eq!(parsed, source);
        }
    }
}
