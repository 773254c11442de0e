//! Shared handler utilities
//!
//! Caller identity, input bounds and metrics helpers used across handlers.

use std::time::Instant;

use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use axum::http::HeaderMap;
use subtle::ConstantTimeEq;

use cadence_types::UserId;

use crate::error::ApiError;
use crate::state::AppState;

/// Header carrying the authenticated user, set by the gateway in front of this service
pub const USER_ID_HEADER: &str = "x-user-id";

/// Header carrying the plan administration key
pub const ADMIN_KEY_HEADER: &str = "x-admin-key";

// ============================================================================
// Caller identity
// ============================================================================

/// The user a request acts for
#[derive(Debug, Clone, Copy)]
pub struct CurrentUser(pub UserId);

impl<S> FromRequestParts<S> for CurrentUser
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let raw = parts
            .headers
            .get(USER_ID_HEADER)
            .and_then(|value| value.to_str().ok())
            .ok_or(ApiError::Unauthenticated)?;

        UserId::parse(raw.trim())
            .map(CurrentUser)
            .map_err(|_| ApiError::Unauthenticated)
    }
}

/// Reject the request unless it carries the configured admin key
pub fn require_admin(state: &AppState, headers: &HeaderMap) -> Result<(), ApiError> {
    let Some(expected) = state.config.admin_api_key.as_deref() else {
        return Err(ApiError::Forbidden("plan administration is disabled".into()));
    };

    let provided = headers
        .get(ADMIN_KEY_HEADER)
        .and_then(|value| value.to_str().ok())
        .unwrap_or_default();

    if bool::from(provided.as_bytes().ct_eq(expected.as_bytes())) {
        Ok(())
    } else {
        tracing::warn!(security_event = true, "Rejected plan administration request");
        Err(ApiError::Forbidden("invalid admin key".into()))
    }
}

// ============================================================================
// Input Validation
// ============================================================================

/// Maximum length for short user-provided strings
const MAX_STRING_LEN: usize = 256;

/// Maximum length for receipts and purchase tokens
pub const MAX_RECEIPT_LEN: usize = 64 * 1024;

/// Validate a user-provided string is non-empty and within bounds
pub fn validate_string(value: &str, field_name: &str, max: usize) -> Result<(), ApiError> {
    if value.trim().is_empty() {
        return Err(ApiError::BadRequest(format!("{field_name} is required")));
    }
    if value.len() > max {
        return Err(ApiError::BadRequest(format!(
            "{field_name} too long (max {max} chars)"
        )));
    }
    Ok(())
}

/// Validate an optional short string
pub fn validate_optional(value: Option<&str>, field_name: &str) -> Result<(), ApiError> {
    match value {
        Some(value) => validate_string(value, field_name, MAX_STRING_LEN),
        None => Ok(()),
    }
}

/// Parse a UUID path segment into an identifier
pub fn parse_id<T>(raw: &str, field_name: &str) -> Result<T, ApiError>
where
    T: From<uuid::Uuid>,
{
    uuid::Uuid::parse_str(raw)
        .map(T::from)
        .map_err(|_| ApiError::BadRequest(format!("invalid {field_name}")))
}

// ============================================================================
// Metrics Helpers
// ============================================================================

/// Record HTTP operation duration with result label.
///
/// Labels: operation, result (ok/err)
#[inline]
pub fn record_op_duration(operation: &'static str, start: Instant, success: bool) {
    let result = if success { "ok" } else { "err" };
    metrics::histogram!(
        "billing_operation_duration_seconds",
        "operation" => operation,
        "result" => result
    )
    .record(start.elapsed().as_secs_f64());
}

/// Run a handler body and record its duration under `operation`
pub async fn timed<T, F>(operation: &'static str, fut: F) -> Result<T, ApiError>
where
    F: std::future::Future<Output = Result<T, ApiError>>,
{
    let start = Instant::now();
    let result = fut.await;
    record_op_duration(operation, start, result.is_ok());
    result
}

// ============================================================================
// Tests
// ============================================================================
