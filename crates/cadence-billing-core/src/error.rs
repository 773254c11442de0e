//! Billing errors

use cadence_db::DbError;
use cadence_types::Platform;
use thiserror::Error;

/// Billing errors
#[derive(Error, Debug)]
pub enum BillingError {
    /// Malformed request
    #[error("validation failed: {0}")]
    Validation(String),

    /// Unknown plan
    #[error("subscription plan not found")]
    PlanNotFound,

    /// Unknown subscription, or one the caller does not own
    #[error("subscription not found")]
    SubscriptionNotFound,

    /// Transport error or outage at the payment platform
    #[error("platform unavailable: {0}")]
    PlatformUnavailable(String),

    /// The platform has no credentials configured
    #[error("{0} billing is not configured")]
    PlatformDisabled(Platform),

    /// Receipt or purchase token rejected as malformed by the platform
    #[error("invalid receipt: {0}")]
    InvalidReceipt(String),

    /// The platform answered, but not with a valid purchase
    #[error("verification failed: {0}")]
    VerificationFailed(String),

    /// Webhook authenticity check failed
    #[error("invalid signature: {0}")]
    InvalidSignature(String),

    /// Transition from a terminal or incompatible state
    #[error("state conflict: {0}")]
    StateConflict(String),

    /// Database error
    #[error("database error: {0}")]
    Database(#[from] DbError),

    /// Internal error
    #[error("internal error: {0}")]
    Internal(String),
}

impl BillingError {
    /// Stable category string for API responses
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::Validation(_) => "VALIDATION_ERROR",
            Self::PlanNotFound => "PLAN_NOT_FOUND",
            Self::SubscriptionNotFound => "SUBSCRIPTION_NOT_FOUND",
            Self::PlatformUnavailable(_) => "PLATFORM_UNAVAILABLE",
            Self::PlatformDisabled(_) => "PLATFORM_DISABLED",
            Self::InvalidReceipt(_) => "INVALID_RECEIPT",
            Self::VerificationFailed(_) => "VERIFICATION_FAILED",
            Self::InvalidSignature(_) => "INVALID_SIGNATURE",
            Self::StateConflict(_) => "STATE_CONFLICT",
            Self::Database(_) => "DATABASE_ERROR",
            Self::Internal(_) => "INTERNAL_ERROR",
        }
    }

    /// Check if this is a not found error
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::PlanNotFound | Self::SubscriptionNotFound)
    }

    /// Whether the caller may retry the same request unchanged.
    ///
    /// Creation calls are never retried blindly even when this is true; a
    /// timed-out creation is reconciled by a later webhook instead.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::PlatformUnavailable(_))
    }

    /// The platform refused the request outright and holds nothing for it.
    ///
    /// Anything else raised by a platform call (timeouts, unreadable answers)
    /// leaves the platform-side outcome unknown.
    pub fn is_rejection(&self) -> bool {
        matches!(
            self,
            Self::Validation(_)
                | Self::InvalidReceipt(_)
                | Self::VerificationFailed(_)
                | Self::PlatformDisabled(_)
        )
    }

    /// Check if this is a provider error
    pub fn is_platform_error(&self) -> bool {
        matches!(
            self,
            Self::PlatformUnavailable(_)
                | Self::PlatformDisabled(_)
                | Self::InvalidReceipt(_)
                | Self::VerificationFailed(_)
        )
    }
}
