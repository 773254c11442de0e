//! Usage and entitlement handlers

use axum::extract::{Path, State};
use axum::Json;
use tracing::instrument;

use cadence_types::{EntitlementCheck, Feature, UsageDelta, UsagePeriod, UsageReport};

use super::shared::{timed, CurrentUser};
use crate::error::{ApiError, ApiResult};
use crate::state::AppState;

/// GET /api/v1/subscriptions/usage
pub async fn get_usage(
    State(state): State<AppState>,
    user: CurrentUser,
) -> ApiResult<Json<UsageReport>> {
    timed("get_usage", async {
        Ok(Json(state.billing.usage_report(user.0).await?))
    })
    .await
}

/// PUT /api/v1/subscriptions/usage
///
/// Hot path: counters are incremented atomically in storage.
#[instrument(skip(state, delta), fields(user_id = %user.0))]
pub async fn increment_usage(
    State(state): State<AppState>,
    user: CurrentUser,
    Json(delta): Json<UsageDelta>,
) -> ApiResult<Json<UsagePeriod>> {
    timed("increment_usage", async {
        if delta.analyses_used.is_none()
            && delta.storage_used_gb.is_none()
            && delta.chat_messages_used.is_none()
        {
            return Err(ApiError::BadRequest(
                "at least one usage field is required".into(),
            ));
        }
        Ok(Json(state.billing.increment_usage(user.0, &delta).await?))
    })
    .await
}

/// GET /api/v1/subscriptions/check-limits/{feature}
pub async fn check_limits(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(feature): Path<String>,
) -> ApiResult<Json<EntitlementCheck>> {
    timed("check_limits", async {
        let feature: Feature = feature
            .parse()
            .map_err(|_| ApiError::BadRequest(format!("unknown feature: {feature}")))?;
        Ok(Json(state.billing.check_limits(user.0, feature).await?))
    })
    .await
}
