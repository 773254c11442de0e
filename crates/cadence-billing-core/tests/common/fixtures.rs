//! Test harness and notification payload builders

use std::sync::Arc;

use chrono::{DateTime, TimeZone, Utc};
use hmac::{Hmac, Mac};
use rust_decimal::Decimal;
use serde_json::{json, Value};
use sha2::Sha256;

use cadence_billing_core::{
    AppStoreConfig, BillingConfig, BillingService, Clock, ManualClock, PlatformAdapters,
};
use cadence_db::Stores;
use cadence_types::{EntitlementLimits, NewPlan, Plan, Platform, PlatformProducts, SubscriptionId};

use super::mock_platform::MockPlatform;

pub const CARD_WEBHOOK_SECRET: &str = "whsec_test_secret";
pub const APPLE_SECRET: &str = "apple-shared-secret";
pub const PLAY_TOKEN: &str = "play-push-token";

/// Fixed starting instant for every scenario
pub fn start_time() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 3, 10, 12, 0, 0).unwrap()
}

/// Billing engine over in-memory stores, mock platforms and a manual clock
pub struct Harness {
    pub billing: BillingService,
    pub stores: Stores,
    pub clock: Arc<ManualClock>,
    pub card: Arc<MockPlatform>,
    pub apple: Arc<MockPlatform>,
    pub google: Arc<MockPlatform>,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_platforms(
            MockPlatform::new(Platform::Card),
            MockPlatform::new(Platform::Apple),
            MockPlatform::new(Platform::Google),
        )
    }

    pub fn with_platforms(card: MockPlatform, apple: MockPlatform, google: MockPlatform) -> Self {
        Self::build(Stores::in_memory(), card, apple, google)
    }

    /// Default mock platforms over the given stores
    #[allow(dead_code)]
    pub fn with_stores(stores: Stores) -> Self {
        Self::build(
            stores,
            MockPlatform::new(Platform::Card),
            MockPlatform::new(Platform::Apple),
            MockPlatform::new(Platform::Google),
        )
    }

    fn build(
        stores: Stores,
        card: MockPlatform,
        apple: MockPlatform,
        google: MockPlatform,
    ) -> Self {
        let clock = Arc::new(ManualClock::new(start_time()));
        let card = Arc::new(card);
        let apple = Arc::new(apple);
        let google = Arc::new(google);

        let config = BillingConfig::new()
            .with_card_webhook_secret(CARD_WEBHOOK_SECRET)
            .with_app_store(AppStoreConfig::new(APPLE_SECRET))
            .with_play_notification_token(PLAY_TOKEN);
        let adapters = PlatformAdapters::new(card.clone(), apple.clone(), google.clone());
        let billing = BillingService::from_parts(stores.clone(), config, adapters, clock.clone());

        Self {
            billing,
            stores,
            clock,
            card,
            apple,
            google,
        }
    }

    /// Create the standard "Pro" plan
    pub async fn pro_plan(&self) -> Plan {
        self.billing.create_plan(pro_plan()).await.unwrap()
    }

    /// Sign a card payload at the harness clock's current time
    pub fn sign(&self, payload: &str) -> String {
        sign_card_payload(payload, self.clock.now())
    }
}

/// Pro plan: 9.99/month, 10 analyses, 5 GB, chat
pub fn pro_plan() -> NewPlan {
    NewPlan {
        name: "Pro".to_string(),
        description: Some("For regular use".to_string()),
        features: vec!["10 analyses per month".to_string(), "AI Chat".to_string()],
        monthly_price: Decimal::new(999, 2),
        yearly_price: Decimal::new(9999, 2),
        products: PlatformProducts {
            card_monthly: Some("price_pro_monthly".to_string()),
            card_yearly: Some("price_pro_yearly".to_string()),
            apple_monthly: Some("com.cadence.pro.monthly".to_string()),
            apple_yearly: Some("com.cadence.pro.yearly".to_string()),
            google_monthly: Some("pro_monthly".to_string()),
            google_yearly: Some("pro_yearly".to_string()),
        },
        limits: EntitlementLimits {
            max_analyses_per_month: Some(10),
            max_storage_gb: Some(5),
            chat_enabled: true,
            priority_support: false,
        },
        sort_order: 1,
    }
}

/// `t=<unix>,v1=<hex>` header over `"{t}.{payload}"`
pub fn sign_card_payload(payload: &str, at: DateTime<Utc>) -> String {
    let timestamp = at.timestamp();
    let mut mac = Hmac::<Sha256>::new_from_slice(CARD_WEBHOOK_SECRET.as_bytes()).unwrap();
    mac.update(format!("{timestamp}.{payload}").as_bytes());
    format!("t={timestamp},v1={}", hex::encode(mac.finalize().into_bytes()))
}

/// Card subscription event with the given processor status and period
pub fn card_subscription_event(
    event_id: &str,
    event_type: &str,
    created: DateTime<Utc>,
    platform_subscription_id: &str,
    subscription_ref: Option<SubscriptionId>,
    status: &str,
    period: (DateTime<Utc>, DateTime<Utc>),
) -> String {
    let mut metadata = serde_json::Map::new();
    if let Some(reference) = subscription_ref {
        metadata.insert("subscription_ref".to_string(), Value::from(reference.to_string()));
    }
    json!({
        "id": event_id,
        "type": event_type,
        "created": created.timestamp(),
        "data": {
            "object": {
                "id": platform_subscription_id,
                "customer": "cus_test",
                "status": status,
                "current_period_start": period.0.timestamp(),
                "current_period_end": period.1.timestamp(),
                "cancel_at_period_end": false,
                "metadata": metadata
            }
        }
    })
    .to_string()
}

/// Card invoice event paying for one period
pub fn card_invoice_event(
    event_id: &str,
    event_type: &str,
    created: DateTime<Utc>,
    platform_subscription_id: &str,
    payment_intent: &str,
    amount_cents: i64,
    period: (DateTime<Utc>, DateTime<Utc>),
) -> String {
    json!({
        "id": event_id,
        "type": event_type,
        "created": created.timestamp(),
        "data": {
            "object": {
                "id": format!("in_{event_id}"),
                "customer": "cus_test",
                "subscription": platform_subscription_id,
                "amount_paid": amount_cents,
                "amount_due": amount_cents,
                "currency": "usd",
                "payment_intent": payment_intent,
                "lines": {
                    "data": [
                        { "period": { "start": period.0.timestamp(), "end": period.1.timestamp() } }
                    ]
                }
            }
        }
    })
    .to_string()
}
