//! Play Store adapter
//!
//! Verifies purchase tokens with the Play Developer API (`subscriptionsv2`).
//! The purchase token is the stable identifier a Play subscription is
//! tracked under.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use tracing::{error, info, instrument, warn};

use cadence_types::{Platform, SubscriptionStatus};

use crate::config::PlayStoreConfig;
use crate::error::BillingError;
use crate::provider::{
    http_client, transport_error, PlatformAdapter, Receipt, VerifiedPurchase, VerifyReceiptRequest,
};

/// Play Store adapter
#[derive(Clone)]
pub struct PlayStoreAdapter {
    client: Client,
    config: Option<PlayStoreConfig>,
}

impl PlayStoreAdapter {
    /// Create a Play Store adapter; `None` leaves the platform disabled
    pub fn new(config: Option<PlayStoreConfig>, timeout: Duration) -> Result<Self, BillingError> {
        Ok(Self {
            client: http_client(timeout)?,
            config,
        })
    }

    fn credentials(&self) -> Result<&PlayStoreConfig, BillingError> {
        self.config
            .as_ref()
            .ok_or(BillingError::PlatformDisabled(Platform::Google))
    }

    fn token_url(config: &PlayStoreConfig, purchase_token: &str) -> String {
        format!(
            "{}/androidpublisher/v3/applications/{}/purchases/subscriptionsv2/tokens/{}",
            config.api_base, config.package_name, purchase_token
        )
    }
}

#[async_trait]
impl PlatformAdapter for PlayStoreAdapter {
    fn platform(&self) -> Platform {
        Platform::Google
    }

    fn is_enabled(&self) -> bool {
        self.config.is_some()
    }

    fn map_native_status(&self, native: &str) -> SubscriptionStatus {
        map_play_status(native)
    }

    #[instrument(skip(self, request), fields(product_id = %request.product_id))]
    async fn verify_receipt(
        &self,
        request: &VerifyReceiptRequest,
    ) -> Result<VerifiedPurchase, BillingError> {
        let config = self.credentials()?;
        let Receipt::PlayStore { purchase_token } = &request.receipt else {
            return Err(BillingError::Validation(
                "Play Store verification needs a purchase token".to_string(),
            ));
        };
        if purchase_token.trim().is_empty() {
            return Err(BillingError::Validation("purchase token is required".to_string()));
        }

        let response = self
            .client
            .get(Self::token_url(config, purchase_token))
            .bearer_auth(&config.access_token)
            .send()
            .await
            .map_err(|e| transport_error(Platform::Google, e))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            error!(status = %status, body = %body, "Play Developer API error");
            return Err(status_error(status));
        }

        let purchase: PlaySubscriptionPurchase = response.json().await.map_err(|e| {
            error!(error = %e, "Failed to parse Play Developer API response");
            BillingError::PlatformUnavailable("unreadable Play Store response".to_string())
        })?;

        let state = map_play_status(&purchase.subscription_state);
        if state != SubscriptionStatus::Active && purchase.subscription_state != GRACE_PERIOD {
            warn!(state = %purchase.subscription_state, "Play purchase is not in good standing");
            return Err(BillingError::VerificationFailed(format!(
                "purchase is {}",
                purchase.subscription_state
            )));
        }

        let line_item = purchase
            .line_items
            .iter()
            .find(|item| item.product_id == request.product_id)
            .ok_or_else(|| {
                BillingError::VerificationFailed(format!(
                    "purchase does not cover product {}",
                    request.product_id
                ))
            })?;

        info!(
            order_id = purchase.latest_order_id.as_deref().unwrap_or("none"),
            "Verified Play Store purchase"
        );

        Ok(VerifiedPurchase {
            platform_subscription_id: purchase_token.clone(),
            product_id: line_item.product_id.clone(),
            expires_at: line_item.expiry_time,
        })
    }

    #[instrument(skip(self, platform_subscription_id))]
    async fn cancel(
        &self,
        platform_subscription_id: &str,
        immediately: bool,
    ) -> Result<(), BillingError> {
        let config = self.credentials()?;
        // Play always cancels at the end of the paid period; access ends locally either way.
        let url = format!("{}:cancel", Self::token_url(config, platform_subscription_id));

        let response = self
            .client
            .post(url)
            .bearer_auth(&config.access_token)
            .json(&serde_json::json!({}))
            .send()
            .await
            .map_err(|e| transport_error(Platform::Google, e))?;

        let status = response.status();
        if !status.is_success() {
            error!(status = %status, "Play Store cancellation failed");
            return Err(status_error(status));
        }

        info!(immediately, "Canceled Play Store subscription");
        Ok(())
    }
}

const GRACE_PERIOD: &str = "SUBSCRIPTION_STATE_IN_GRACE_PERIOD";

/// Play `subscriptionState` vocabulary to canonical status
///
/// A CANCELED Play subscription still runs until its expiry, so it stays
/// ACTIVE here; the expiry notification ends it.
pub fn map_play_status(native: &str) -> SubscriptionStatus {
    match native {
        "SUBSCRIPTION_STATE_ACTIVE" | "SUBSCRIPTION_STATE_CANCELED" => SubscriptionStatus::Active,
        "SUBSCRIPTION_STATE_PENDING" => SubscriptionStatus::Pending,
        "SUBSCRIPTION_STATE_IN_GRACE_PERIOD" | "SUBSCRIPTION_STATE_ON_HOLD" => {
            SubscriptionStatus::PastDue
        }
        "SUBSCRIPTION_STATE_PAUSED" => SubscriptionStatus::Paused,
        "SUBSCRIPTION_STATE_EXPIRED" | "SUBSCRIPTION_STATE_PENDING_PURCHASE_CANCELED" => {
            SubscriptionStatus::Expired
        }
        _ => SubscriptionStatus::Pending,
    }
}

fn status_error(status: StatusCode) -> BillingError {
    match status {
        StatusCode::NOT_FOUND | StatusCode::BAD_REQUEST | StatusCode::GONE => {
            BillingError::InvalidReceipt(format!("Play Store rejected purchase token ({status})"))
        }
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
            BillingError::Internal("Play Developer API rejected the credentials".to_string())
        }
        s if s.is_server_error() || s == StatusCode::TOO_MANY_REQUESTS => {
            BillingError::PlatformUnavailable(format!("Play Store returned {status}"))
        }
        _ => BillingError::VerificationFailed(format!("Play Store returned {status}")),
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PlaySubscriptionPurchase {
    subscription_state: String,
    latest_order_id: Option<String>,
    #[serde(default)]
    line_items: Vec<PlayLineItem>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PlayLineItem {
    product_id: String,
    expiry_time: Option<DateTime<Utc>>,
}
