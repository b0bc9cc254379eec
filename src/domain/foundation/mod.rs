//! Foundation value objects shared across the domain.
//!
//! # Module Structure
//!
//! - `errors` - `DomainError`, `ErrorCode`, and validation errors
//! - `ids` - Strongly-typed UUID identifiers
//! - `timestamp` - Immutable UTC timestamps

mod errors;
mod ids;
mod timestamp;

pub use errors::{DomainError, ErrorCode, ValidationError};
pub use ids::{
    BillingEventId, OverrideId, PendingGrantId, PromotionId, SubscriptionId, UserId,
};
pub use timestamp::Timestamp;
