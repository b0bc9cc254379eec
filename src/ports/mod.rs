//! Ports - Interfaces for external dependencies.
//!
//! Following hexagonal architecture, ports define the contracts between
//! the domain and the outside world. Adapters implement these ports.
//!
//! ## Storage Ports
//!
//! - `BillingStore` / `BillingTransaction` - Transactional billing storage
//!   with row locking and conflict-do-nothing upserts
//!
//! ## Side-Effect Ports
//!
//! - `NotificationSender` - Fire-and-forget entitlement emails
//! - `EntitlementCache` - Per-user cache invalidation signal

mod billing_store;
mod entitlement_cache;
mod notification_sender;

pub use billing_store::{BillingStore, BillingTransaction};
pub use entitlement_cache::EntitlementCache;
pub use notification_sender::NotificationSender;
