//! Subscription handlers

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::Json;
use serde::{Deserialize, Serialize};
use tracing::instrument;

use cadence_billing_core::{
    ActiveSubscription, AppleReceiptVerification, CancelRequest, CardCheckout,
    CardSubscriptionRequest, GooglePurchaseVerification, Page,
};
use cadence_db::SubscriptionFilter;
use cadence_types::{
    BillingCycle, Payment, PlanId, Platform, Subscription, SubscriptionId, SubscriptionStatus,
};

use super::shared::{
    parse_id, timed, validate_optional, validate_string, CurrentUser, MAX_RECEIPT_LEN,
};
use crate::error::{ApiError, ApiResult};
use crate::state::AppState;

// ============================================================================
// Request/Response Types
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct CreateCardSubscriptionRequest {
    pub plan_id: PlanId,
    pub billing_cycle: BillingCycle,
    #[serde(default)]
    pub trial: bool,
}

#[derive(Debug, Deserialize)]
pub struct VerifyAppleRequest {
    pub plan_id: PlanId,
    pub billing_cycle: BillingCycle,
    pub receipt_data: String,
    pub product_id: Option<String>,
    pub transaction_id: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct VerifyGoogleRequest {
    pub plan_id: PlanId,
    pub billing_cycle: BillingCycle,
    pub purchase_token: String,
    pub product_id: Option<String>,
    pub order_id: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct CancelSubscriptionRequest {
    pub reason: Option<String>,
    #[serde(default)]
    pub immediately: bool,
}

#[derive(Debug, Deserialize)]
pub struct ListSubscriptionsQuery {
    pub status: Option<String>,
    pub platform: Option<String>,
    pub page: Option<u32>,
    pub limit: Option<u32>,
}

#[derive(Debug, Serialize)]
pub struct ActiveSubscriptionResponse {
    pub subscription: Option<ActiveSubscription>,
}

impl ListSubscriptionsQuery {
    fn into_filter(self) -> ApiResult<SubscriptionFilter> {
        let defaults = SubscriptionFilter::default();

        let status = self
            .status
            .map(|raw| {
                raw.parse::<SubscriptionStatus>()
                    .map(|status| status.as_str().to_string())
                    .map_err(|_| ApiError::BadRequest(format!("invalid status: {raw}")))
            })
            .transpose()?;

        let platform = self
            .platform
            .map(|raw| {
                raw.parse::<Platform>()
                    .map(|platform| platform.as_str().to_string())
                    .map_err(|_| ApiError::BadRequest(format!("invalid platform: {raw}")))
            })
            .transpose()?;

        Ok(SubscriptionFilter {
            status,
            platform,
            page: self.page.unwrap_or(defaults.page),
            limit: self.limit.unwrap_or(defaults.limit),
        })
    }
}

// ============================================================================
// Handlers
// ============================================================================

/// POST /api/v1/subscriptions/card/create
#[instrument(skip(state, req), fields(user_id = %user.0, plan_id = %req.plan_id))]
pub async fn create_card_subscription(
    State(state): State<AppState>,
    user: CurrentUser,
    Json(req): Json<CreateCardSubscriptionRequest>,
) -> ApiResult<(StatusCode, Json<CardCheckout>)> {
    timed("create_card_subscription", async {
        let checkout = state
            .billing
            .create_card_subscription(
                user.0,
                CardSubscriptionRequest {
                    plan_id: req.plan_id,
                    billing_cycle: req.billing_cycle,
                    trial: req.trial,
                },
            )
            .await?;

        tracing::info!(
            subscription_id = %checkout.subscription.id,
            platform_status = %checkout.platform_status,
            "Card subscription opened"
        );
        Ok((StatusCode::CREATED, Json(checkout)))
    })
    .await
}

/// POST /api/v1/subscriptions/apple/verify
#[instrument(skip(state, req), fields(user_id = %user.0, plan_id = %req.plan_id))]
pub async fn verify_apple_receipt(
    State(state): State<AppState>,
    user: CurrentUser,
    Json(req): Json<VerifyAppleRequest>,
) -> ApiResult<(StatusCode, Json<Subscription>)> {
    timed("verify_apple_receipt", async {
        validate_string(&req.receipt_data, "receipt_data", MAX_RECEIPT_LEN)?;
        validate_optional(req.product_id.as_deref(), "product_id")?;
        validate_optional(req.transaction_id.as_deref(), "transaction_id")?;

        let subscription = state
            .billing
            .verify_apple_receipt(
                user.0,
                AppleReceiptVerification {
                    plan_id: req.plan_id,
                    billing_cycle: req.billing_cycle,
                    receipt_data: req.receipt_data,
                    product_id: req.product_id,
                    transaction_id: req.transaction_id,
                },
            )
            .await?;
        Ok((StatusCode::CREATED, Json(subscription)))
    })
    .await
}

/// POST /api/v1/subscriptions/google/verify
#[instrument(skip(state, req), fields(user_id = %user.0, plan_id = %req.plan_id))]
pub async fn verify_google_purchase(
    State(state): State<AppState>,
    user: CurrentUser,
    Json(req): Json<VerifyGoogleRequest>,
) -> ApiResult<(StatusCode, Json<Subscription>)> {
    timed("verify_google_purchase", async {
        validate_string(&req.purchase_token, "purchase_token", MAX_RECEIPT_LEN)?;
        validate_optional(req.product_id.as_deref(), "product_id")?;
        validate_optional(req.order_id.as_deref(), "order_id")?;

        let subscription = state
            .billing
            .verify_google_purchase(
                user.0,
                GooglePurchaseVerification {
                    plan_id: req.plan_id,
                    billing_cycle: req.billing_cycle,
                    purchase_token: req.purchase_token,
                    product_id: req.product_id,
                    order_id: req.order_id,
                },
            )
            .await?;
        Ok((StatusCode::CREATED, Json(subscription)))
    })
    .await
}

/// GET /api/v1/subscriptions/my
pub async fn list_my_subscriptions(
    State(state): State<AppState>,
    user: CurrentUser,
    Query(query): Query<ListSubscriptionsQuery>,
) -> ApiResult<Json<Page<Subscription>>> {
    timed("list_subscriptions", async {
        let filter = query.into_filter()?;
        Ok(Json(
            state
                .billing
                .list_user_subscriptions(user.0, &filter)
                .await?,
        ))
    })
    .await
}

/// GET /api/v1/subscriptions/active
pub async fn get_active_subscription(
    State(state): State<AppState>,
    user: CurrentUser,
) -> ApiResult<Json<ActiveSubscriptionResponse>> {
    timed("get_active_subscription", async {
        let subscription = state.billing.active_subscription(user.0).await?;
        Ok(Json(ActiveSubscriptionResponse { subscription }))
    })
    .await
}

/// GET /api/v1/subscriptions/{id}
pub async fn get_subscription(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(id): Path<String>,
) -> ApiResult<Json<Subscription>> {
    timed("get_subscription", async {
        let id: SubscriptionId = parse_id(&id, "subscription id")?;
        Ok(Json(state.billing.get_subscription(user.0, id).await?))
    })
    .await
}

/// GET /api/v1/subscriptions/{id}/payments
pub async fn list_subscription_payments(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(id): Path<String>,
) -> ApiResult<Json<Vec<Payment>>> {
    timed("list_payments", async {
        let id: SubscriptionId = parse_id(&id, "subscription id")?;
        Ok(Json(state.billing.subscription_payments(user.0, id).await?))
    })
    .await
}

/// PUT /api/v1/subscriptions/{id}/cancel
///
/// The body is optional; an empty body requests a deferred cancellation.
#[instrument(skip(state, req), fields(user_id = %user.0))]
pub async fn cancel_subscription(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(id): Path<String>,
    req: Option<Json<CancelSubscriptionRequest>>,
) -> ApiResult<Json<Subscription>> {
    timed("cancel_subscription", async {
        let id: SubscriptionId = parse_id(&id, "subscription id")?;
        let Json(req) = req.unwrap_or_default();
        validate_optional(req.reason.as_deref(), "reason")?;

        let subscription = state
            .billing
            .cancel_subscription(
                user.0,
                id,
                CancelRequest {
                    reason: req.reason,
                    immediately: req.immediately,
                },
            )
            .await?;

        tracing::info!(
            subscription_id = %subscription.id,
            status = %subscription.status,
            immediately = req.immediately,
            "Subscription cancellation requested"
        );
        Ok(Json(subscription))
    })
    .await
}
