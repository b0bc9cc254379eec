//! Subscription aggregate.
//!
//! Each user has at most one subscription row (unique `user_id`). Depending
//! on status, either the trial window or the current paid period is the
//! meaningful one. `Ended` is terminal: the sweep moves expired rows there
//! and nothing transitions out of it.

use serde::{Deserialize, Serialize};

use crate::domain::entitlement::{EntitlementInterval, EntitlementSource};
use crate::domain::foundation::{SubscriptionId, Timestamp, UserId};

/// Lifecycle status of a subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubscriptionStatus {
    /// In the free trial window.
    Trialing,
    /// In a paid period.
    Active,
    /// Terminal; the window elapsed or was finalized by the sweep.
    Ended,
}

impl SubscriptionStatus {
    /// Stable string form, matching the serialized representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Trialing => "trialing",
            Self::Active => "active",
            Self::Ended => "ended",
        }
    }
}

impl std::fmt::Display for SubscriptionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A user's subscription.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subscription {
    pub id: SubscriptionId,
    pub user_id: UserId,
    pub status: SubscriptionStatus,
    pub plan_key: String,
    pub trial_starts_at: Option<Timestamp>,
    pub trial_ends_at: Option<Timestamp>,
    pub current_period_starts_at: Option<Timestamp>,
    pub current_period_ends_at: Option<Timestamp>,
    pub cancel_at_period_end: bool,
    pub canceled_at: Option<Timestamp>,
    pub ended_at: Option<Timestamp>,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

impl Subscription {
    /// Creates a trialing subscription with a window of `trial_days` from `now`.
    pub fn start_trial(
        id: SubscriptionId,
        user_id: UserId,
        plan_key: impl Into<String>,
        now: Timestamp,
        trial_days: i64,
    ) -> Self {
        Self {
            id,
            user_id,
            status: SubscriptionStatus::Trialing,
            plan_key: plan_key.into(),
            trial_starts_at: Some(now),
            trial_ends_at: Some(now.add_days(trial_days)),
            current_period_starts_at: None,
            current_period_ends_at: None,
            cancel_at_period_end: false,
            canceled_at: None,
            ended_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// The window that matters for the current status: the trial window while
    /// trialing, the paid period while active, nothing once ended.
    pub fn active_window(&self) -> Option<(Timestamp, Timestamp)> {
        match self.status {
            SubscriptionStatus::Trialing => self.trial_starts_at.zip(self.trial_ends_at),
            SubscriptionStatus::Active => self
                .current_period_starts_at
                .zip(self.current_period_ends_at),
            SubscriptionStatus::Ended => None,
        }
    }

    /// End of the active window, if any.
    pub fn window_ends_at(&self) -> Option<Timestamp> {
        self.active_window().map(|(_, end)| end)
    }

    /// Whether the active window has already elapsed at `now`.
    ///
    /// An ended subscription (no window) counts as elapsed.
    pub fn is_window_elapsed(&self, now: Timestamp) -> bool {
        match self.window_ends_at() {
            Some(end) => end <= now,
            None => true,
        }
    }

    /// Marks the subscription for cancellation at the end of its window.
    pub fn schedule_cancellation(&mut self, now: Timestamp) {
        self.cancel_at_period_end = true;
        self.canceled_at = Some(now);
        self.updated_at = now;
    }

    /// Clears a scheduled cancellation.
    pub fn resume(&mut self, now: Timestamp) {
        self.cancel_at_period_end = false;
        self.canceled_at = None;
        self.updated_at = now;
    }

    /// The entitlement interval this subscription contributes, if any.
    ///
    /// Trials grant with `trial` source, paid periods with `subscription`.
    /// Ended subscriptions grant nothing.
    pub fn entitlement_interval(&self) -> Option<EntitlementInterval> {
        let (starts_at, ends_at) = self.active_window()?;
        let source = match self.status {
            SubscriptionStatus::Trialing => EntitlementSource::Trial,
            SubscriptionStatus::Active => EntitlementSource::Subscription,
            SubscriptionStatus::Ended => return None,
        };
        Some(
            EntitlementInterval::new(source, starts_at, ends_at)
                .with_source_id(self.id.to_string())
                .with_created_at(self.created_at),
        )
    }
}
