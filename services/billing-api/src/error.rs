//! Error types for the Billing API service.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;

use cadence_billing_core::BillingError;

/// API error response
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: ErrorDetail,
}

#[derive(Debug, Serialize)]
pub struct ErrorDetail {
    pub code: String,
    pub message: String,
}

/// API error type
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Missing or invalid user identity")]
    Unauthenticated,

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error(transparent)]
    Billing(#[from] BillingError),
}

impl ApiError {
    fn status_code(&self) -> StatusCode {
        match self {
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::Unauthenticated => StatusCode::UNAUTHORIZED,
            Self::Forbidden(_) => StatusCode::FORBIDDEN,
            Self::Billing(e) => billing_status(e),
        }
    }

    fn error_code(&self) -> &'static str {
        match self {
            Self::BadRequest(_) => "BAD_REQUEST",
            Self::Unauthenticated => "UNAUTHENTICATED",
            Self::Forbidden(_) => "FORBIDDEN",
            Self::Billing(e) => e.error_code(),
        }
    }

    fn is_internal(&self) -> bool {
        matches!(
            self,
            Self::Billing(BillingError::Database(_) | BillingError::Internal(_))
        )
    }
}

/// HTTP status for a billing error category
pub fn billing_status(error: &BillingError) -> StatusCode {
    match error {
        BillingError::Validation(_) => StatusCode::BAD_REQUEST,
        BillingError::PlanNotFound | BillingError::SubscriptionNotFound => StatusCode::NOT_FOUND,
        BillingError::PlatformUnavailable(_) | BillingError::PlatformDisabled(_) => {
            StatusCode::SERVICE_UNAVAILABLE
        }
        BillingError::InvalidReceipt(_) => StatusCode::UNPROCESSABLE_ENTITY,
        BillingError::VerificationFailed(_) => StatusCode::PAYMENT_REQUIRED,
        BillingError::InvalidSignature(_) => StatusCode::UNAUTHORIZED,
        BillingError::StateConflict(_) => StatusCode::CONFLICT,
        BillingError::Database(_) | BillingError::Internal(_) => {
            StatusCode::INTERNAL_SERVER_ERROR
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let code = self.error_code();

        // Storage details stay in the logs
        let message = if self.is_internal() {
            tracing::error!(error = ?self, "Internal API error");
            "Internal server error".to_string()
        } else {
            self.to_string()
        };

        let body = ErrorResponse {
            error: ErrorDetail {
                code: code.to_string(),
                message,
            },
        };

        (status, Json(body)).into_response()
    }
}

/// Result type for API handlers
pub type ApiResult<T> = Result<T, ApiError>;
