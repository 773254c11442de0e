//! Scriptable platform adapter for testing

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;

use cadence_billing_core::provider::{
    CreateSubscriptionRequest, PlatformSubscription, VerifiedPurchase, VerifyReceiptRequest,
};
use cadence_billing_core::{BillingError, PlatformAdapter};
use cadence_types::{Platform, SubscriptionStatus};

/// How the mock answers `create_subscription`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CreateBehavior {
    Succeed,
    /// Simulates a timeout after the platform may have acted
    Unavailable,
    /// Simulates a declined card
    Reject,
    /// Simulates a 2xx answer whose body could not be read
    Unreadable,
}

/// In-memory platform adapter recording every call
pub struct MockPlatform {
    platform: Platform,
    enabled: bool,
    create: Mutex<CreateBehavior>,
    verified: Mutex<Option<VerifiedPurchase>>,
    created: AtomicUsize,
    /// platform subscription id -> immediately
    cancels: Arc<DashMap<String, bool>>,
    fail_cancel: Mutex<bool>,
}

impl MockPlatform {
    pub fn new(platform: Platform) -> Self {
        Self {
            platform,
            enabled: true,
            create: Mutex::new(CreateBehavior::Succeed),
            verified: Mutex::new(None),
            created: AtomicUsize::new(0),
            cancels: Arc::new(DashMap::new()),
            fail_cancel: Mutex::new(false),
        }
    }

    #[allow(dead_code)]
    pub fn disabled(platform: Platform) -> Self {
        Self {
            enabled: false,
            ..Self::new(platform)
        }
    }

    #[allow(dead_code)]
    pub fn set_create(&self, behavior: CreateBehavior) {
        *self.create.lock().unwrap() = behavior;
    }

    /// Purchase returned by the next receipt verifications
    #[allow(dead_code)]
    pub fn set_verified(&self, id: &str, product_id: &str, expires_at: DateTime<Utc>) {
        *self.verified.lock().unwrap() = Some(VerifiedPurchase {
            platform_subscription_id: id.to_string(),
            product_id: product_id.to_string(),
            expires_at: Some(expires_at),
        });
    }

    #[allow(dead_code)]
    pub fn fail_cancels(&self) {
        *self.fail_cancel.lock().unwrap() = true;
    }

    /// Whether a cancel was requested, and whether it was immediate
    #[allow(dead_code)]
    pub fn cancel_for(&self, platform_subscription_id: &str) -> Option<bool> {
        self.cancels.get(platform_subscription_id).map(|r| *r.value())
    }

    #[allow(dead_code)]
    pub fn cancel_count(&self) -> usize {
        self.cancels.len()
    }

    #[allow(dead_code)]
    pub fn created_count(&self) -> usize {
        self.created.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PlatformAdapter for MockPlatform {
    fn platform(&self) -> Platform {
        self.platform
    }

    fn is_enabled(&self) -> bool {
        self.enabled
    }

    fn map_native_status(&self, native: &str) -> SubscriptionStatus {
        native.parse().unwrap_or(SubscriptionStatus::Pending)
    }

    async fn create_subscription(
        &self,
        request: &CreateSubscriptionRequest,
    ) -> Result<PlatformSubscription, BillingError> {
        let behavior = *self.create.lock().unwrap();
        match behavior {
            CreateBehavior::Succeed => {
                let n = self.created.fetch_add(1, Ordering::SeqCst) + 1;
                Ok(PlatformSubscription {
                    platform_subscription_id: format!("sub_mock_{n}"),
                    customer_id: Some(format!("cus_{}", request.user_id)),
                    native_status: "incomplete".to_string(),
                    period: None,
                    trial: None,
                    client_secret: Some(format!("pi_mock_{n}_secret")),
                })
            }
            CreateBehavior::Unavailable => Err(BillingError::PlatformUnavailable(
                "operation timed out".to_string(),
            )),
            CreateBehavior::Reject => Err(BillingError::Validation(
                "Your card was declined.".to_string(),
            )),
            CreateBehavior::Unreadable => {
                self.created.fetch_add(1, Ordering::SeqCst);
                Err(BillingError::Internal(
                    "error decoding response body".to_string(),
                ))
            }
        }
    }

    async fn verify_receipt(
        &self,
        request: &VerifyReceiptRequest,
    ) -> Result<VerifiedPurchase, BillingError> {
        let verified = self.verified.lock().unwrap().clone();
        match verified {
            Some(purchase) if purchase.product_id == request.product_id => Ok(purchase),
            Some(_) => Err(BillingError::VerificationFailed(
                "receipt does not contain product".to_string(),
            )),
            None => Err(BillingError::InvalidReceipt("malformed receipt".to_string())),
        }
    }

    async fn cancel(
        &self,
        platform_subscription_id: &str,
        immediately: bool,
    ) -> Result<(), BillingError> {
        self.cancels
            .insert(platform_subscription_id.to_string(), immediately);
        if *self.fail_cancel.lock().unwrap() {
            return Err(BillingError::PlatformUnavailable("connection reset".to_string()));
        }
        Ok(())
    }
}
