//! Grant-window arithmetic.
//!
//! Computes the `[starts_at, ends_at)` of a new grant so that grants stack
//! onto existing Pro time instead of running concurrently with it.

use serde::{Deserialize, Serialize};

use crate::domain::foundation::Timestamp;

/// How a grant's length is specified: a relative duration that extends from
/// the stacked start, or an absolute end instant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GrantSpec {
    /// Extend Pro by this many days from the stacked start.
    DurationDays(i64),
    /// Grant Pro until this absolute instant.
    FixedEnd(Timestamp),
}

/// The computed window for one new grant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct GrantWindow {
    pub starts_at: Timestamp,
    pub ends_at: Timestamp,
    /// True when the window is empty and grants nothing. Callers must skip
    /// creating an override row and record only a ledger event.
    pub no_extension: bool,
}

/// Computes the window for a new grant.
///
/// The window starts at the user's current Pro-until when that is still in
/// the future, otherwise at `now`; a grant never shortens existing Pro time.
/// Duration grants extend from that start; fixed-end grants are clamped so
/// the window never runs backwards. `None` produces an explicit no-op.
pub fn compute_grant_window(
    now: Timestamp,
    current_pro_until: Option<Timestamp>,
    spec: Option<GrantSpec>,
) -> GrantWindow {
    let starts_at = match current_pro_until {
        Some(until) if until.is_after(&now) => until,
        _ => now,
    };

    let (ends_at, no_extension) = match spec {
        Some(GrantSpec::DurationDays(days)) => {
            let ends_at = starts_at.add_days(days);
            (ends_at, ends_at <= starts_at)
        }
        Some(GrantSpec::FixedEnd(fixed)) => {
            let ends_at = fixed.max(starts_at);
            (ends_at, ends_at <= starts_at)
        }
        None => (starts_at, true),
    };

    GrantWindow {
        starts_at,
        ends_at,
        no_extension,
    }
}
