//! Gatherly - Event Registration Platform Backend
//!
//! This crate implements the Pro-access entitlement engine: it decides, for
//! any user at any instant, whether they hold the Pro capability by merging
//! time-bounded grants from subscriptions, trials, promotions, pending
//! grants, and admin overrides, recording every transition in an append-only
//! billing ledger.

pub mod adapters;
pub mod application;
pub mod config;
pub mod domain;
pub mod ports;
