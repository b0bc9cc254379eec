//! Billing command error taxonomy.
//!
//! Commands return these as `Err` values; the stable `code()` string travels
//! to clients unchanged. Expected business-rule violations are plain variants
//! and are never logged as errors. `HashSecretMissing` flags deployment
//! misconfiguration (`is_configuration()`), which HTTP actions map to a 500
//! instead of a 4xx.

use crate::domain::foundation::{DomainError, ErrorCode};

/// Billing-specific errors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BillingError {
    /// Trial requires a verified email address.
    EmailNotVerified,

    /// User already holds Pro access.
    AlreadyPro,

    /// The one free trial was already consumed.
    TrialAlreadyUsed,

    /// The referenced row does not exist.
    NotFound { entity: String },

    /// The subscription reached its terminal state.
    SubscriptionEnded,

    /// The subscription's window has already elapsed.
    NotActive,

    /// No promotion matches the supplied code.
    PromoNotFound,

    /// Promotion is disabled or outside its validity window.
    PromoInactive,

    /// Promotion reached its global redemption cap.
    PromoMaxRedemptions,

    /// Only one redemption per user is supported in this version.
    InvalidPerUserLimit { requested: u32 },

    /// Could not generate a collision-free code.
    CodeGenerationFailed,

    /// The operation is not valid for the row's current state.
    InvalidState { reason: String },

    /// No hashing secret is configured; deployment misconfiguration.
    HashSecretMissing,

    /// Input validation failed.
    Validation { field: String, message: String },

    /// Storage or other infrastructure failure.
    Infrastructure(String),
}

impl BillingError {
    pub fn not_found(entity: impl Into<String>) -> Self {
        BillingError::NotFound {
            entity: entity.into(),
        }
    }

    pub fn invalid_state(reason: impl Into<String>) -> Self {
        BillingError::InvalidState {
            reason: reason.into(),
        }
    }

    pub fn validation(field: impl Into<String>, message: impl Into<String>) -> Self {
        BillingError::Validation {
            field: field.into(),
            message: message.into(),
        }
    }

    pub fn infrastructure(message: impl Into<String>) -> Self {
        BillingError::Infrastructure(message.into())
    }

    /// Returns the stable error code for this error.
    pub fn code(&self) -> ErrorCode {
        match self {
            BillingError::EmailNotVerified => ErrorCode::EmailNotVerified,
            BillingError::AlreadyPro => ErrorCode::AlreadyPro,
            BillingError::TrialAlreadyUsed => ErrorCode::TrialAlreadyUsed,
            BillingError::NotFound { .. } => ErrorCode::NotFound,
            BillingError::SubscriptionEnded => ErrorCode::SubscriptionEnded,
            BillingError::NotActive => ErrorCode::NotActive,
            BillingError::PromoNotFound => ErrorCode::PromoNotFound,
            BillingError::PromoInactive => ErrorCode::PromoInactive,
            BillingError::PromoMaxRedemptions => ErrorCode::PromoMaxRedemptions,
            BillingError::InvalidPerUserLimit { .. } => ErrorCode::InvalidPerUserLimit,
            BillingError::CodeGenerationFailed => ErrorCode::CodeGenerationFailed,
            BillingError::InvalidState { .. } => ErrorCode::InvalidState,
            BillingError::HashSecretMissing => ErrorCode::HashSecretMissing,
            BillingError::Validation { .. } => ErrorCode::ValidationFailed,
            BillingError::Infrastructure(_) => ErrorCode::DatabaseError,
        }
    }

    /// Returns a human-readable message.
    pub fn message(&self) -> String {
        match self {
            BillingError::EmailNotVerified => {
                "Verify your email address before starting a trial".to_string()
            }
            BillingError::AlreadyPro => "You already have Pro access".to_string(),
            BillingError::TrialAlreadyUsed => "The free trial has already been used".to_string(),
            BillingError::NotFound { entity } => format!("{} not found", entity),
            BillingError::SubscriptionEnded => "The subscription has ended".to_string(),
            BillingError::NotActive => "The subscription is no longer active".to_string(),
            BillingError::PromoNotFound => "That promo code does not exist".to_string(),
            BillingError::PromoInactive => "That promo code is no longer valid".to_string(),
            BillingError::PromoMaxRedemptions => {
                "That promo code has been fully redeemed".to_string()
            }
            BillingError::InvalidPerUserLimit { requested } => format!(
                "Per-user redemption limit must be 1, got {}",
                requested
            ),
            BillingError::CodeGenerationFailed => {
                "Could not generate a unique promo code".to_string()
            }
            BillingError::InvalidState { reason } => reason.clone(),
            BillingError::HashSecretMissing => {
                "No hashing secret is configured".to_string()
            }
            BillingError::Validation { field, message } => {
                format!("Validation failed for '{}': {}", field, message)
            }
            BillingError::Infrastructure(msg) => format!("Error: {}", msg),
        }
    }

    /// True for deployment misconfiguration rather than bad user input.
    pub fn is_configuration(&self) -> bool {
        matches!(self, BillingError::HashSecretMissing)
    }

    /// True when a retry may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, BillingError::Infrastructure(_))
    }
}

impl std::fmt::Display for BillingError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message())
    }
}

impl std::error::Error for BillingError {}

impl From<DomainError> for BillingError {
    fn from(err: DomainError) -> Self {
        match err.code {
            ErrorCode::HashSecretMissing => BillingError::HashSecretMissing,
            ErrorCode::ValidationFailed
            | ErrorCode::EmptyField
            | ErrorCode::OutOfRange
            | ErrorCode::InvalidFormat => BillingError::Validation {
                field: err
                    .details
                    .get("field")
                    .cloned()
                    .unwrap_or_else(|| "unknown".to_string()),
                message: err.message,
            },
            _ => BillingError::Infrastructure(err.to_string()),
        }
    }
}

impl From<BillingError> for DomainError {
    fn from(err: BillingError) -> Self {
        DomainError::new(err.code(), err.message())
    }
}
