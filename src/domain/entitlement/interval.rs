//! Entitlement interval value object.

use serde::{Deserialize, Serialize};

use crate::domain::foundation::Timestamp;

use super::EntitlementSource;

/// A half-open time window `[starts_at, ends_at)` during which one source
/// grants Pro access.
///
/// `source_id` points back at the row that produced the interval (override,
/// promotion, subscription) and `created_at` at when that row was created;
/// both are optional and only used for effective-source tie-breaking and
/// audit display.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntitlementInterval {
    pub source: EntitlementSource,
    pub starts_at: Timestamp,
    pub ends_at: Timestamp,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub created_at: Option<Timestamp>,
}

impl EntitlementInterval {
    /// Creates an interval with no back-reference.
    pub fn new(source: EntitlementSource, starts_at: Timestamp, ends_at: Timestamp) -> Self {
        Self {
            source,
            starts_at,
            ends_at,
            source_id: None,
            created_at: None,
        }
    }

    /// Builder: attach the originating row id.
    pub fn with_source_id(mut self, id: impl Into<String>) -> Self {
        self.source_id = Some(id.into());
        self
    }

    /// Builder: attach the originating row's creation time.
    pub fn with_created_at(mut self, created_at: Timestamp) -> Self {
        self.created_at = Some(created_at);
        self
    }

    /// Whether the interval covers the given instant (`starts_at <= at < ends_at`).
    pub fn contains(&self, at: Timestamp) -> bool {
        self.starts_at <= at && at < self.ends_at
    }

    /// Whether the interval still has time left at the given instant.
    pub fn is_live_at(&self, at: Timestamp) -> bool {
        self.ends_at > at
    }

    /// Whether the interval overlaps the half-open window `[starts_at, ends_at)`.
    pub fn overlaps(&self, starts_at: Timestamp, ends_at: Timestamp) -> bool {
        self.starts_at < ends_at && self.ends_at > starts_at
    }
}
