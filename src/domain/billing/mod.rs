//! Billing domain module.
//!
//! Aggregates and value objects for the Pro entitlement engine.
//!
//! # Module Structure
//!
//! - `subscription` - Subscription aggregate and status lifecycle
//! - `overrides` - Time-bounded Pro grants outside the subscription system
//! - `promotion` - Redeemable promo codes
//! - `pending_grant` - Email-keyed grants awaiting claim
//! - `promo_code` - Code alphabet, generation, and normalization
//! - `hashing` - Versioned HMAC hashing of codes and emails
//! - `events` - Append-only ledger records
//! - `errors` - Command error taxonomy with stable codes

mod errors;
mod events;
mod hashing;
mod overrides;
mod pending_grant;
mod promo_code;
mod promotion;
mod subscription;

pub use errors::BillingError;
pub use events::{
    BillingEntityType, BillingEvent, BillingEventSource, BillingEventType,
};
pub use hashing::{normalize_email, CodeHasher, HashSecret, VersionedHash};
pub use overrides::{
    EntitlementOverride, OverrideSource, PRO_ACCESS_ENTITLEMENT,
};
pub use pending_grant::PendingEntitlementGrant;
pub use promo_code::{code_prefix, generate_code, normalize_code, CODE_ALPHABET, CODE_LENGTH};
pub use promotion::Promotion;
pub use subscription::{Subscription, SubscriptionStatus};
