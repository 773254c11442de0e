//! Payment platform abstraction

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::Client;
use tracing::{debug, error, warn};

use cadence_types::{Platform, Subscription, SubscriptionId, SubscriptionStatus, UserId};

use crate::error::BillingError;
use crate::transition::BillingPeriod;

/// Request to open a subscription on a platform that bills server-side
#[derive(Debug, Clone)]
pub struct CreateSubscriptionRequest {
    /// Local subscription id, used as the platform idempotency key
    pub subscription_ref: SubscriptionId,
    pub user_id: UserId,
    /// Platform price/product identifier
    pub product_id: String,
    pub trial_days: Option<u32>,
}

/// Platform-side subscription returned by creation
#[derive(Debug, Clone)]
pub struct PlatformSubscription {
    pub platform_subscription_id: String,
    pub customer_id: Option<String>,
    /// Platform-native status, see [`PlatformAdapter::map_native_status`]
    pub native_status: String,
    pub period: Option<BillingPeriod>,
    pub trial: Option<BillingPeriod>,
    /// Client-confirmation material for the caller's payment UI
    pub client_secret: Option<String>,
}

/// Store-issued proof of purchase
#[derive(Debug, Clone)]
pub enum Receipt {
    /// App Store base64 receipt
    AppStore { receipt_data: String },
    /// Play Store purchase token
    PlayStore { purchase_token: String },
}

/// Receipt verification request
#[derive(Debug, Clone)]
pub struct VerifyReceiptRequest {
    pub receipt: Receipt,
    /// Product the receipt must cover
    pub product_id: String,
}

/// Successful store verification
#[derive(Debug, Clone)]
pub struct VerifiedPurchase {
    /// Stable store identifier the subscription is tracked under
    pub platform_subscription_id: String,
    pub product_id: String,
    /// Expiry reported by the store, when it gave one
    pub expires_at: Option<DateTime<Utc>>,
}

/// Payment platform adapter
///
/// Each platform translates its own API into canonical terms. Adapters fail
/// with [`BillingError::PlatformUnavailable`] on transport errors and with
/// [`BillingError::InvalidReceipt`]/[`BillingError::VerificationFailed`] on a
/// negative trust decision.
#[async_trait]
pub trait PlatformAdapter: Send + Sync {
    /// Platform served by this adapter
    fn platform(&self) -> Platform;

    /// Whether credentials are configured
    fn is_enabled(&self) -> bool;

    /// Translate a platform-native status into the canonical vocabulary
    fn map_native_status(&self, native: &str) -> SubscriptionStatus;

    /// Open a subscription on the platform
    async fn create_subscription(
        &self,
        _request: &CreateSubscriptionRequest,
    ) -> Result<PlatformSubscription, BillingError> {
        Err(BillingError::Validation(format!(
            "{} subscriptions are purchased in the store, not created server-side",
            self.platform()
        )))
    }

    /// Check a store receipt with the platform
    async fn verify_receipt(
        &self,
        _request: &VerifyReceiptRequest,
    ) -> Result<VerifiedPurchase, BillingError> {
        Err(BillingError::Validation(format!(
            "{} does not use receipt verification",
            self.platform()
        )))
    }

    /// Cancel on the platform, immediately or at the end of the paid period
    async fn cancel(
        &self,
        platform_subscription_id: &str,
        immediately: bool,
    ) -> Result<(), BillingError>;
}

/// One adapter per platform
#[derive(Clone)]
pub struct PlatformAdapters {
    card: Arc<dyn PlatformAdapter>,
    app_store: Arc<dyn PlatformAdapter>,
    play_store: Arc<dyn PlatformAdapter>,
}

impl PlatformAdapters {
    pub fn new(
        card: Arc<dyn PlatformAdapter>,
        app_store: Arc<dyn PlatformAdapter>,
        play_store: Arc<dyn PlatformAdapter>,
    ) -> Self {
        Self {
            card,
            app_store,
            play_store,
        }
    }

    /// Adapter for a platform
    pub fn get(&self, platform: Platform) -> &Arc<dyn PlatformAdapter> {
        match platform {
            Platform::Card => &self.card,
            Platform::Apple => &self.app_store,
            Platform::Google => &self.play_store,
        }
    }

    /// Enabled adapter for a platform, or `PlatformDisabled`
    pub fn enabled(&self, platform: Platform) -> Result<&Arc<dyn PlatformAdapter>, BillingError> {
        let adapter = self.get(platform);
        if adapter.is_enabled() {
            Ok(adapter)
        } else {
            Err(BillingError::PlatformDisabled(platform))
        }
    }

    /// Cancel on the owning platform, logging instead of failing.
    ///
    /// Local state is authoritative for entitlement; platform cleanup may lag.
    pub async fn cancel_best_effort(&self, subscription: &Subscription, immediately: bool) {
        let Some(platform_id) = subscription.platform_subscription_id.as_deref() else {
            debug!(
                subscription_id = %subscription.id,
                "No platform subscription to cancel"
            );
            return;
        };

        let adapter = self.get(subscription.platform);
        if !adapter.is_enabled() {
            warn!(
                subscription_id = %subscription.id,
                platform = %subscription.platform,
                "Platform disabled; skipped platform-side cancellation"
            );
            return;
        }

        if let Err(e) = adapter.cancel(platform_id, immediately).await {
            warn!(
                subscription_id = %subscription.id,
                platform = %subscription.platform,
                error = %e,
                "Platform-side cancellation failed"
            );
            metrics::counter!(
                "billing_platform_cancel_failures_total",
                "platform" => subscription.platform.as_str()
            )
            .increment(1);
        }
    }
}

/// HTTP client bounded by the platform timeout
pub(crate) fn http_client(timeout: Duration) -> Result<Client, BillingError> {
    Client::builder()
        .timeout(timeout)
        .build()
        .map_err(|e| BillingError::Internal(format!("failed to build HTTP client: {e}")))
}

/// Map a transport failure to the retryable platform error
pub(crate) fn transport_error(platform: Platform, err: reqwest::Error) -> BillingError {
    error!(
        platform = %platform,
        error = %err,
        timeout = err.is_timeout(),
        "Platform request failed"
    );
    if err.is_timeout() {
        BillingError::PlatformUnavailable(format!("{platform} request timed out"))
    } else {
        BillingError::PlatformUnavailable(format!("{platform} request failed: {err}"))
    }
}
