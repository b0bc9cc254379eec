//! Pending entitlement grant aggregate.
//!
//! A Pro grant keyed by a hashed email rather than a user id, because the
//! recipient may not have an account yet. Claiming is terminal and one-time:
//! once `claimed_at` is set the grant can never be claimed again.

use serde::{Deserialize, Serialize};

use crate::domain::entitlement::GrantSpec;
use crate::domain::foundation::{PendingGrantId, Timestamp, UserId};

/// A Pro grant waiting for its recipient to show up.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingEntitlementGrant {
    pub id: PendingGrantId,
    /// Versioned HMAC of the normalized recipient email.
    pub email_hash: String,
    /// Which hash secret version produced `email_hash`.
    pub hash_version: u32,
    /// Duration or fixed-end grant shape.
    pub grant: GrantSpec,
    pub claim_valid_from: Option<Timestamp>,
    pub claim_valid_to: Option<Timestamp>,
    pub is_active: bool,
    pub reason: Option<String>,
    pub created_by_user_id: Option<UserId>,
    pub claimed_at: Option<Timestamp>,
    pub claimed_by_user_id: Option<UserId>,
    pub claim_source: Option<String>,
    pub created_at: Timestamp,
}

impl PendingEntitlementGrant {
    /// Whether the grant has already been claimed.
    pub fn is_claimed(&self) -> bool {
        self.claimed_at.is_some()
    }

    /// Whether `now` falls inside the claim window.
    pub fn is_within_claim_window(&self, now: Timestamp) -> bool {
        if let Some(from) = self.claim_valid_from {
            if now < from {
                return false;
            }
        }
        if let Some(to) = self.claim_valid_to {
            if now >= to {
                return false;
            }
        }
        true
    }

    /// Whether the claim window is fully in the past.
    pub fn is_expired(&self, now: Timestamp) -> bool {
        matches!(self.claim_valid_to, Some(to) if to <= now)
    }

    /// Whether the grant can be claimed at `now`.
    pub fn is_claimable_at(&self, now: Timestamp) -> bool {
        self.is_active && !self.is_claimed() && self.is_within_claim_window(now)
    }

    /// Records the one-time claim.
    pub fn mark_claimed(&mut self, user_id: UserId, source: impl Into<String>, now: Timestamp) {
        self.claimed_at = Some(now);
        self.claimed_by_user_id = Some(user_id);
        self.claim_source = Some(source.into());
    }
}
