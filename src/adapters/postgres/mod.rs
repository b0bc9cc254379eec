//! PostgreSQL adapters.

mod billing_store;

pub use billing_store::PostgresBillingStore;
