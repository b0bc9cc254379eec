//! Pro-access evaluator.
//!
//! Pure function that merges the time intervals granted by every source into
//! a single current/next Pro status. No I/O; callers fetch the intervals and
//! decide when to invoke it (read paths outside any transaction, write paths
//! while holding the relevant row locks).

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

use crate::domain::foundation::Timestamp;

use super::{EntitlementInterval, EntitlementSource};

/// Result of evaluating a user's Pro entitlement at one instant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProAccess {
    /// Whether the user holds Pro access right now.
    pub is_pro: bool,
    /// End of the current contiguous Pro window. `None` when not Pro, and
    /// `None` for the internal bypass (staff access has no expiry).
    pub pro_until: Option<Timestamp>,
    /// Which source is reported as granting the access, for display.
    pub effective_source: Option<EntitlementSource>,
    /// All live (unmerged, non-expired) intervals, for audit display.
    pub sources: Vec<EntitlementInterval>,
    /// Start of the earliest fully-future Pro window, when not Pro now.
    pub next_pro_starts_at: Option<Timestamp>,
}

impl ProAccess {
    /// The unconditional staff/internal result.
    fn internal_bypass() -> Self {
        Self {
            is_pro: true,
            pro_until: None,
            effective_source: Some(EntitlementSource::InternalBypass),
            sources: Vec::new(),
            next_pro_starts_at: None,
        }
    }

    /// The no-access result.
    fn none(next_pro_starts_at: Option<Timestamp>, sources: Vec<EntitlementInterval>) -> Self {
        Self {
            is_pro: false,
            pro_until: None,
            effective_source: None,
            sources,
            next_pro_starts_at,
        }
    }
}

/// A contiguous window produced by coalescing overlapping/adjacent intervals.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct MergedWindow {
    starts_at: Timestamp,
    ends_at: Timestamp,
}

/// Evaluates a user's Pro access at `now`.
///
/// Internal accounts bypass all interval logic. Otherwise intervals that have
/// already fully elapsed are dropped, the remainder are coalesced into
/// disjoint windows (touching windows merge), and the window containing `now`
/// decides the answer.
pub fn evaluate(
    now: Timestamp,
    is_internal: bool,
    intervals: &[EntitlementInterval],
) -> ProAccess {
    if is_internal {
        return ProAccess::internal_bypass();
    }

    let mut live: Vec<EntitlementInterval> = intervals
        .iter()
        .filter(|i| i.is_live_at(now))
        .cloned()
        .collect();
    live.sort_by_key(|i| (i.starts_at, i.ends_at));

    let merged = merge_windows(&live);

    let current = merged
        .iter()
        .find(|w| w.starts_at <= now && now < w.ends_at)
        .copied();

    match current {
        Some(window) => {
            let effective = effective_source(&live, &window);
            ProAccess {
                is_pro: true,
                pro_until: Some(window.ends_at),
                effective_source: effective,
                sources: live,
                next_pro_starts_at: None,
            }
        }
        None => {
            let next = merged
                .iter()
                .filter(|w| w.starts_at > now)
                .map(|w| w.starts_at)
                .min();
            ProAccess::none(next, live)
        }
    }
}

/// Coalesces sorted intervals into disjoint windows.
///
/// An interval merges into the previous window when its start does not lie
/// strictly after the window's end, so back-to-back windows become one.
fn merge_windows(sorted: &[EntitlementInterval]) -> Vec<MergedWindow> {
    let mut merged: Vec<MergedWindow> = Vec::new();
    for interval in sorted {
        match merged.last_mut() {
            Some(last) if interval.starts_at <= last.ends_at => {
                last.ends_at = last.ends_at.max(interval.ends_at);
            }
            _ => merged.push(MergedWindow {
                starts_at: interval.starts_at,
                ends_at: interval.ends_at,
            }),
        }
    }
    merged
}

/// Picks the source reported as "effective" for the current window.
///
/// Candidates are the original intervals that end exactly at the merged
/// window's end and overlap it. The winner has the lowest source priority;
/// ties fall to the earlier `created_at`, then the lexically smaller
/// `source_id`. Intervals missing both compare equal, so the stable sort
/// leaves them in input order and the first wins.
fn effective_source(
    live: &[EntitlementInterval],
    window: &MergedWindow,
) -> Option<EntitlementSource> {
    let mut candidates: Vec<&EntitlementInterval> = live
        .iter()
        .filter(|i| i.ends_at == window.ends_at && i.overlaps(window.starts_at, window.ends_at))
        .collect();

    candidates.sort_by(|a, b| {
        a.source
            .priority()
            .cmp(&b.source.priority())
            .then_with(|| match (a.created_at, b.created_at) {
                (Some(x), Some(y)) => x.cmp(&y),
                _ => Ordering::Equal,
            })
            .then_with(|| match (&a.source_id, &b.source_id) {
                (Some(x), Some(y)) => x.cmp(y),
                _ => Ordering::Equal,
            })
    });

    candidates.first().map(|i| i.source)
}
