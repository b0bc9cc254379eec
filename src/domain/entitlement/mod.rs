//! Pure entitlement core.
//!
//! Interval arithmetic only; no I/O. Write paths call these functions while
//! holding the row locks that protect their inputs, read paths call them
//! freely.
//!
//! # Module Structure
//!
//! - `source` - Source kinds and display priorities
//! - `interval` - Half-open `[starts_at, ends_at)` windows
//! - `evaluator` - Merges intervals into a current/next Pro status
//! - `grant_window` - Stacking arithmetic for new grants

mod evaluator;
mod grant_window;
mod interval;
mod source;

pub use evaluator::{evaluate, ProAccess};
pub use grant_window::{compute_grant_window, GrantSpec, GrantWindow};
pub use interval::EntitlementInterval;
pub use source::EntitlementSource;
