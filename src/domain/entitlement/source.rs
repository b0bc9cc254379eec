//! Entitlement source kinds and their display priority.

use serde::{Deserialize, Serialize};
use std::str::FromStr;

use crate::domain::foundation::ValidationError;

/// Where a Pro-access interval came from.
///
/// Priorities decide which source is reported as "effective" when several
/// overlapping intervals end at the same instant; the lowest value wins.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntitlementSource {
    /// Unconditional staff/internal access, independent of intervals.
    InternalBypass,
    /// Paid subscription period.
    Subscription,
    /// Free trial period.
    Trial,
    /// Manually granted by an administrator.
    AdminOverride,
    /// Claimed email-keyed grant.
    PendingGrant,
    /// Redeemed promotion code.
    Promotion,
    /// Automated platform grant.
    System,
    /// Carried over from a data migration.
    Migration,
}

impl EntitlementSource {
    /// Display priority; lower wins when picking the effective source.
    pub fn priority(&self) -> u8 {
        match self {
            Self::InternalBypass => 0,
            Self::Subscription => 1,
            Self::Trial => 2,
            Self::AdminOverride => 3,
            Self::PendingGrant => 4,
            Self::Promotion => 5,
            Self::System => 6,
            Self::Migration => 7,
        }
    }

    /// Stable string form, matching the serialized representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::InternalBypass => "internal_bypass",
            Self::Subscription => "subscription",
            Self::Trial => "trial",
            Self::AdminOverride => "admin_override",
            Self::PendingGrant => "pending_grant",
            Self::Promotion => "promotion",
            Self::System => "system",
            Self::Migration => "migration",
        }
    }
}

impl std::fmt::Display for EntitlementSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for EntitlementSource {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "internal_bypass" => Ok(Self::InternalBypass),
            "subscription" => Ok(Self::Subscription),
            "trial" => Ok(Self::Trial),
            "admin_override" => Ok(Self::AdminOverride),
            "pending_grant" => Ok(Self::PendingGrant),
            "promotion" => Ok(Self::Promotion),
            "system" => Ok(Self::System),
            "migration" => Ok(Self::Migration),
            other => Err(ValidationError::invalid_format(
                "entitlement_source",
                format!("unknown source '{}'", other),
            )),
        }
    }
}
