//! Entitlement cache adapters.

mod in_memory;
mod redis;

pub use in_memory::RecordingEntitlementCache;
pub use redis::RedisEntitlementCache;
