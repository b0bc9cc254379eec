//! Billing handlers.
//!
//! One handler per public entitlement operation, plus the status query and
//! the maintenance sweep. Every command follows the same shape: open a store
//! transaction, lock the mutated rows, check preconditions, compute via the
//! pure entitlement core, write state plus exactly one ledger event, commit,
//! then signal cache invalidation and (for some commands) a fire-and-forget
//! notification.
//!
//! ## Commands
//! - Start the one free trial
//! - Schedule / revert cancel-at-period-end
//! - Create, redeem, and toggle promotions
//! - Create, claim, and toggle pending grants
//! - Grant / extend / revoke admin overrides
//!
//! ## Queries
//! - Get a user's derived Pro status
//!
//! ## Maintenance
//! - The periodic expiry sweep

mod admin_override;
mod claim_pending_grants;
mod create_pending_grant;
mod create_promotion;
mod get_pro_status;
mod maintenance_sweep;
mod redeem_promotion;
mod resume_subscription;
mod schedule_cancellation;
mod start_trial;
mod support;
mod toggle_pending_grant;
mod toggle_promotion;

// Commands
pub use admin_override::{
    AdminOverrideHandler, AdminOverrideResult, ExtendAdminOverrideCommand,
    GrantAdminOverrideCommand, RevokeAdminOverrideCommand, RevokeAdminOverrideResult,
};
pub use claim_pending_grants::{
    ClaimedGrant, ClaimPendingGrantsCommand, ClaimPendingGrantsHandler, ClaimPendingGrantsResult,
};
pub use create_pending_grant::{
    CreatePendingGrantCommand, CreatePendingGrantHandler, CreatePendingGrantResult,
};
pub use create_promotion::{
    CreatePromotionCommand, CreatePromotionHandler, CreatePromotionResult,
};
pub use redeem_promotion::{
    RedeemPromotionCommand, RedeemPromotionHandler, RedeemPromotionResult,
};
pub use resume_subscription::{
    ResumeSubscriptionCommand, ResumeSubscriptionHandler, ResumeSubscriptionResult,
};
pub use schedule_cancellation::{
    ScheduleCancellationCommand, ScheduleCancellationHandler, ScheduleCancellationResult,
};
pub use start_trial::{StartTrialCommand, StartTrialHandler, StartTrialResult};
pub use toggle_pending_grant::{
    SetPendingGrantActiveCommand, SetPendingGrantActiveHandler, SetPendingGrantActiveResult,
};
pub use toggle_promotion::{
    SetPromotionActiveCommand, SetPromotionActiveHandler, SetPromotionActiveResult,
};

// Queries
pub use get_pro_status::{
    GetProStatusHandler, GetProStatusQuery, GetProStatusResult, SubscriptionSnapshot,
};

// Maintenance
pub use maintenance_sweep::{MaintenanceSweepHandler, SweepReport};
