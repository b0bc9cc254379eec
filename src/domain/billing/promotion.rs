//! Promotion aggregate.
//!
//! A promotion is a redeemable code granting Pro time. Only the HMAC hash and
//! a display prefix of the code are stored; the plaintext is returned exactly
//! once at creation. Redemptions are capped globally (`max_redemptions`) and
//! per user (at most once, enforced by a storage-level unique constraint).

use serde::{Deserialize, Serialize};

use crate::domain::entitlement::GrantSpec;
use crate::domain::foundation::{PromotionId, Timestamp, UserId};

/// A redeemable Pro-access promotion.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Promotion {
    pub id: PromotionId,
    /// Versioned HMAC of the normalized code.
    pub code_hash: String,
    /// Which hash secret version produced `code_hash`.
    pub hash_version: u32,
    /// First characters of the code, for display and admin lookup.
    pub code_prefix: String,
    /// Duration or fixed-end grant shape.
    pub grant: GrantSpec,
    pub valid_from: Option<Timestamp>,
    pub valid_to: Option<Timestamp>,
    /// Global redemption cap; `None` means unlimited.
    pub max_redemptions: Option<u32>,
    /// Fixed at 1 in this version.
    pub per_user_max_redemptions: u32,
    pub redemption_count: u32,
    pub is_active: bool,
    pub created_by_user_id: Option<UserId>,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

impl Promotion {
    /// Whether `now` falls inside the validity window.
    pub fn is_within_validity(&self, now: Timestamp) -> bool {
        if let Some(from) = self.valid_from {
            if now < from {
                return false;
            }
        }
        if let Some(to) = self.valid_to {
            if now >= to {
                return false;
            }
        }
        true
    }

    /// Whether the validity window is fully in the past.
    pub fn is_expired(&self, now: Timestamp) -> bool {
        matches!(self.valid_to, Some(to) if to <= now)
    }

    /// Whether the global redemption cap has been reached.
    pub fn is_exhausted(&self) -> bool {
        match self.max_redemptions {
            Some(max) => self.redemption_count >= max,
            None => false,
        }
    }

    /// Whether a new redemption is allowed at `now`, cap aside.
    pub fn is_redeemable_at(&self, now: Timestamp) -> bool {
        self.is_active && self.is_within_validity(now)
    }

    /// Counts one redemption.
    pub fn record_redemption(&mut self, now: Timestamp) {
        self.redemption_count += 1;
        self.updated_at = now;
    }
}
