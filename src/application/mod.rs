//! Application layer - Commands, Queries, and Handlers.
//!
//! This layer orchestrates domain operations and coordinates between ports.
//! Following CQRS, it separates command handlers (write) from query handlers
//! (read).

pub mod handlers;

pub use handlers::billing::{
    // Commands
    AdminOverrideHandler, ClaimPendingGrantsCommand, ClaimPendingGrantsHandler,
    CreatePendingGrantCommand, CreatePendingGrantHandler, CreatePromotionCommand,
    CreatePromotionHandler, ExtendAdminOverrideCommand, GrantAdminOverrideCommand,
    RedeemPromotionCommand, RedeemPromotionHandler, ResumeSubscriptionCommand,
    ResumeSubscriptionHandler, RevokeAdminOverrideCommand, ScheduleCancellationCommand,
    ScheduleCancellationHandler, SetPendingGrantActiveCommand, SetPendingGrantActiveHandler,
    SetPromotionActiveCommand, SetPromotionActiveHandler, StartTrialCommand, StartTrialHandler,
    // Queries
    GetProStatusHandler, GetProStatusQuery,
    // Maintenance
    MaintenanceSweepHandler, SweepReport,
};
