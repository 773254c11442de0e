//! App Store adapter
//!
//! Verifies base64 receipts against the App Store `verifyReceipt` endpoint.
//! A production answer of `21007` means the receipt came from the sandbox,
//! so the call is repeated once against the sandbox endpoint.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, instrument, warn};

use cadence_types::{Platform, SubscriptionStatus};

use crate::config::AppStoreConfig;
use crate::error::BillingError;
use crate::provider::{
    http_client, transport_error, PlatformAdapter, Receipt, VerifiedPurchase, VerifyReceiptRequest,
};

/// Receipt is valid
const STATUS_OK: i64 = 0;
/// Sandbox receipt sent to production
const STATUS_SANDBOX_RECEIPT: i64 = 21007;

/// App Store adapter
#[derive(Clone)]
pub struct AppStoreAdapter {
    client: Client,
    config: Option<AppStoreConfig>,
}

impl AppStoreAdapter {
    /// Create an App Store adapter; `None` leaves the platform disabled
    pub fn new(config: Option<AppStoreConfig>, timeout: Duration) -> Result<Self, BillingError> {
        Ok(Self {
            client: http_client(timeout)?,
            config,
        })
    }

    fn credentials(&self) -> Result<&AppStoreConfig, BillingError> {
        self.config
            .as_ref()
            .ok_or(BillingError::PlatformDisabled(Platform::Apple))
    }

    async fn post_receipt(
        &self,
        url: &str,
        body: &AppleVerifyRequest<'_>,
    ) -> Result<AppleVerifyResponse, BillingError> {
        let response = self
            .client
            .post(url)
            .json(body)
            .send()
            .await
            .map_err(|e| transport_error(Platform::Apple, e))?;

        let status = response.status();
        if !status.is_success() {
            error!(status = %status, "App Store verification endpoint error");
            return Err(BillingError::PlatformUnavailable(format!(
                "App Store returned {status}"
            )));
        }

        response.json().await.map_err(|e| {
            error!(error = %e, "Failed to parse App Store response");
            BillingError::PlatformUnavailable("unreadable App Store response".to_string())
        })
    }
}

#[async_trait]
impl PlatformAdapter for AppStoreAdapter {
    fn platform(&self) -> Platform {
        Platform::Apple
    }

    fn is_enabled(&self) -> bool {
        self.config.is_some()
    }

    fn map_native_status(&self, native: &str) -> SubscriptionStatus {
        map_apple_status(native)
    }

    #[instrument(skip(self, request), fields(product_id = %request.product_id))]
    async fn verify_receipt(
        &self,
        request: &VerifyReceiptRequest,
    ) -> Result<VerifiedPurchase, BillingError> {
        let config = self.credentials()?;
        let Receipt::AppStore { receipt_data } = &request.receipt else {
            return Err(BillingError::Validation(
                "App Store verification needs receipt data".to_string(),
            ));
        };
        if receipt_data.trim().is_empty() {
            return Err(BillingError::Validation("receipt data is required".to_string()));
        }

        let body = AppleVerifyRequest {
            receipt_data,
            password: &config.shared_secret,
            exclude_old_transactions: true,
        };

        let mut response = self.post_receipt(&config.verify_url, &body).await?;
        if response.status == STATUS_SANDBOX_RECEIPT {
            debug!("Sandbox receipt; retrying against sandbox endpoint");
            response = self.post_receipt(&config.sandbox_verify_url, &body).await?;
        }

        if response.status != STATUS_OK {
            warn!(status = response.status, "App Store rejected receipt");
            return Err(status_error(response.status));
        }

        let latest = response
            .latest_receipt_info
            .iter()
            .filter(|t| t.product_id == request.product_id)
            .max_by_key(|t| t.expires_at())
            .ok_or_else(|| {
                BillingError::VerificationFailed(format!(
                    "receipt does not contain product {}",
                    request.product_id
                ))
            })?;

        info!(
            original_transaction_id = %latest.original_transaction_id,
            environment = response.environment.as_deref().unwrap_or("unknown"),
            "Verified App Store receipt"
        );

        Ok(VerifiedPurchase {
            platform_subscription_id: latest.original_transaction_id.clone(),
            product_id: latest.product_id.clone(),
            expires_at: latest.expires_at(),
        })
    }

    async fn cancel(
        &self,
        platform_subscription_id: &str,
        immediately: bool,
    ) -> Result<(), BillingError> {
        // Auto-renewal can only be turned off by the user from their device settings.
        info!(
            original_transaction_id = %platform_subscription_id,
            immediately,
            "App Store subscriptions cannot be canceled server-side"
        );
        Ok(())
    }
}

/// App Store notification status vocabulary to canonical status
///
/// Accepts the numeric subscription statuses reported by the App Store
/// (1 active, 2 expired, 3 billing retry, 4 grace period, 5 revoked).
pub fn map_apple_status(native: &str) -> SubscriptionStatus {
    match native {
        "1" => SubscriptionStatus::Active,
        "2" => SubscriptionStatus::Expired,
        "3" | "4" => SubscriptionStatus::PastDue,
        "5" => SubscriptionStatus::Canceled,
        _ => SubscriptionStatus::Pending,
    }
}

fn status_error(status: i64) -> BillingError {
    match status {
        21002 | 21003 | 21010 => {
            BillingError::InvalidReceipt(format!("App Store rejected receipt ({status})"))
        }
        21005 | 21009 => BillingError::PlatformUnavailable(format!(
            "App Store receipt server unavailable ({status})"
        )),
        21006 => BillingError::VerificationFailed("subscription has expired".to_string()),
        other => BillingError::VerificationFailed(format!("App Store status {other}")),
    }
}

/// Parse Apple's millisecond timestamps, sent as strings
pub(crate) fn parse_millis(ms: &str) -> Option<DateTime<Utc>> {
    ms.parse::<i64>().ok().and_then(DateTime::from_timestamp_millis)
}

#[derive(Debug, Serialize)]
struct AppleVerifyRequest<'a> {
    #[serde(rename = "receipt-data")]
    receipt_data: &'a str,
    password: &'a str,
    #[serde(rename = "exclude-old-transactions")]
    exclude_old_transactions: bool,
}

#[derive(Debug, Deserialize)]
struct AppleVerifyResponse {
    status: i64,
    environment: Option<String>,
    #[serde(default)]
    latest_receipt_info: Vec<AppleTransaction>,
}

/// Transaction entry in a verified receipt or a server notification
#[derive(Debug, Clone, Deserialize)]
pub struct AppleTransaction {
    pub product_id: String,
    pub transaction_id: String,
    pub original_transaction_id: String,
    pub purchase_date_ms: Option<String>,
    pub expires_date_ms: Option<String>,
    pub cancellation_date_ms: Option<String>,
}

impl AppleTransaction {
    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        self.expires_date_ms.as_deref().and_then(parse_millis)
    }

    pub fn purchased_at(&self) -> Option<DateTime<Utc>> {
        self.purchase_date_ms.as_deref().and_then(parse_millis)
    }

    pub fn canceled_at(&self) -> Option<DateTime<Utc>> {
        self.cancellation_date_ms.as_deref().and_then(parse_millis)
    }
}
