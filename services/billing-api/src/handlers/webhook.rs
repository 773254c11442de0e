//! Platform webhook handlers
//!
//! Every platform gets `{received: bool}` back. Anything that authenticated is
//! acknowledged with 200, including events that were discarded, so that the
//! platform does not redeliver them. Signature failures and storage errors
//! are the only non-2xx answers.

use std::time::Instant;

use axum::body::Bytes;
use axum::extract::{Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::Json;
use serde::{Deserialize, Serialize};

use cadence_billing_core::{BillingError, IngestOutcome};
use cadence_types::Platform;

use super::shared::record_op_duration;
use crate::error::billing_status;
use crate::state::AppState;

/// Signature header sent by the card processor
pub const CARD_SIGNATURE_HEADER: &str = "stripe-signature";

#[derive(Debug, Serialize)]
pub struct WebhookAck {
    pub received: bool,
}

#[derive(Debug, Deserialize)]
pub struct PlayPushQuery {
    pub token: Option<String>,
}

/// POST /api/v1/subscriptions/webhooks/card
pub async fn card_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> (StatusCode, Json<WebhookAck>) {
    let start = Instant::now();

    let signature = headers
        .get(CARD_SIGNATURE_HEADER)
        .and_then(|value| value.to_str().ok());

    let result = state.billing.ingest_card_webhook(&body, signature).await;
    acknowledge(Platform::Card, "card_webhook", start, result)
}

/// POST /api/v1/subscriptions/webhooks/apple
pub async fn apple_webhook(
    State(state): State<AppState>,
    body: Bytes,
) -> (StatusCode, Json<WebhookAck>) {
    let start = Instant::now();
    let result = state.billing.ingest_app_store_notification(&body).await;
    acknowledge(Platform::Apple, "apple_webhook", start, result)
}

/// POST /api/v1/subscriptions/webhooks/google?token=...
pub async fn google_webhook(
    State(state): State<AppState>,
    Query(query): Query<PlayPushQuery>,
    body: Bytes,
) -> (StatusCode, Json<WebhookAck>) {
    let start = Instant::now();
    let result = state
        .billing
        .ingest_play_notification(&body, query.token.as_deref())
        .await;
    acknowledge(Platform::Google, "google_webhook", start, result)
}

fn acknowledge(
    platform: Platform,
    operation: &'static str,
    start: Instant,
    result: Result<IngestOutcome, BillingError>,
) -> (StatusCode, Json<WebhookAck>) {
    let (status, received) = match result {
        Ok(outcome) => {
            tracing::debug!(
                platform = %platform,
                outcome = outcome.as_str(),
                "Webhook acknowledged"
            );
            (StatusCode::OK, true)
        }
        Err(e @ BillingError::InvalidSignature(_)) => {
            tracing::warn!(
                platform = %platform,
                security_event = true,
                error = %e,
                "Webhook rejected"
            );
            (StatusCode::UNAUTHORIZED, false)
        }
        Err(e) => {
            tracing::error!(platform = %platform, error = ?e, "Webhook processing failed");
            (billing_status(&e), false)
        }
    };

    record_op_duration(operation, start, received);
    (status, Json(WebhookAck { received }))
}
