//! Integration tests for the HTTP platform adapters
//!
//! These tests use wiremock to stand in for the card processor, the App Store
//! receipt endpoints and the Play Developer API.

use std::time::Duration;

use chrono::Utc;
use serde_json::json;
use wiremock::matchers::{body_string_contains, header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use cadence_billing_core::provider::{CreateSubscriptionRequest, Receipt, VerifyReceiptRequest};
use cadence_billing_core::{
    AppStoreAdapter, AppStoreConfig, AppleReceiptVerification, BillingConfig, BillingError,
    BillingService, CardAdapter, CardConfig, PlatformAdapter, PlayStoreAdapter, PlayStoreConfig,
};
use cadence_db::Stores;
use cadence_types::{
    BillingCycle, EntitlementLimits, NewPlan, PlatformProducts, SubscriptionId,
    SubscriptionStatus, UserId,
};

const TIMEOUT: Duration = Duration::from_secs(5);
const PACKAGE: &str = "com.cadence.app";

fn card_adapter(server: &MockServer) -> CardAdapter {
    CardAdapter::new(
        Some(CardConfig::new("sk_test_123").with_api_base(server.uri())),
        TIMEOUT,
    )
    .unwrap()
}

fn app_store_config(server: &MockServer) -> AppStoreConfig {
    AppStoreConfig::new("shared-secret").with_urls(
        format!("{}/verifyReceipt", server.uri()),
        format!("{}/sandbox/verifyReceipt", server.uri()),
    )
}

fn play_adapter(server: &MockServer) -> PlayStoreAdapter {
    PlayStoreAdapter::new(
        Some(PlayStoreConfig::new(PACKAGE, "ya29.token").with_api_base(server.uri())),
        TIMEOUT,
    )
    .unwrap()
}

fn play_token_path(token: &str) -> String {
    format!("/androidpublisher/v3/applications/{PACKAGE}/purchases/subscriptionsv2/tokens/{token}")
}

fn apple_receipt(product_id: &str, expires_in: chrono::Duration) -> serde_json::Value {
    let now = Utc::now();
    json!({
        "status": 0,
        "environment": "Production",
        "latest_receipt_info": [{
            "product_id": product_id,
            "transaction_id": "2000000002",
            "original_transaction_id": "1000000001",
            "purchase_date_ms": now.timestamp_millis().to_string(),
            "expires_date_ms": (now + expires_in).timestamp_millis().to_string()
        }]
    })
}

fn apple_request(receipt: &str, product_id: &str) -> VerifyReceiptRequest {
    VerifyReceiptRequest {
        receipt: Receipt::AppStore {
            receipt_data: receipt.to_string(),
        },
        product_id: product_id.to_string(),
    }
}

// ============================================================================
// Card processor
// ============================================================================

#[tokio::test]
async fn test_card_create_uses_reference_as_idempotency_key() {
    let server = MockServer::start().await;
    let subscription_ref = SubscriptionId::new();
    let user = UserId::new();

    Mock::given(method("GET"))
        .and(path("/customers/search"))
        .and(query_param("limit", "1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "data": [] })))
        .expect(1)
        .mount(&server)
        .await;

    Mock::given(method("POST"))
        .and(path("/customers"))
        .and(header("Idempotency-Key", format!("customer-{user}").as_str()))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "id": "cus_new" })))
        .expect(1)
        .mount(&server)
        .await;

    let now = Utc::now().timestamp();
    Mock::given(method("POST"))
        .and(path("/subscriptions"))
        .and(header("Idempotency-Key", subscription_ref.to_string().as_str()))
        .and(body_string_contains("customer=cus_new"))
        .and(body_string_contains("items%5B0%5D%5Bprice%5D=price_pro_monthly"))
        .and(body_string_contains(format!(
            "metadata%5Bsubscription_ref%5D={subscription_ref}"
        )))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": "sub_live_1",
            "customer": "cus_new",
            "status": "incomplete",
            "current_period_start": now,
            "current_period_end": now + 30 * 86_400,
            "metadata": { "subscription_ref": subscription_ref.to_string() },
            "latest_invoice": {
                "id": "in_1",
                "payment_intent": { "id": "pi_1", "client_secret": "pi_1_secret_abc" }
            }
        })))
        .expect(1)
        .mount(&server)
        .await;

    let created = card_adapter(&server)
        .create_subscription(&CreateSubscriptionRequest {
            subscription_ref,
            user_id: user,
            product_id: "price_pro_monthly".to_string(),
            trial_days: None,
        })
        .await
        .unwrap();

    assert_eq!(created.platform_subscription_id, "sub_live_1");
    assert_eq!(created.customer_id.as_deref(), Some("cus_new"));
    assert_eq!(created.native_status, "incomplete");
    assert_eq!(created.client_secret.as_deref(), Some("pi_1_secret_abc"));
    assert!(created.period.is_some());
}

#[tokio::test]
async fn test_card_cancel_modes() {
    let server = MockServer::start().await;
    let subscription = json!({
        "id": "sub_live_1",
        "customer": "cus_1",
        "status": "active"
    });

    Mock::given(method("DELETE"))
        .and(path("/subscriptions/sub_live_1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(subscription.clone()))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/subscriptions/sub_live_1"))
        .and(body_string_contains("cancel_at_period_end=true"))
        .respond_with(ResponseTemplate::new(200).set_body_json(subscription))
        .expect(1)
        .mount(&server)
        .await;

    let adapter = card_adapter(&server);
    adapter.cancel("sub_live_1", true).await.unwrap();
    adapter.cancel("sub_live_1", false).await.unwrap();
}

#[tokio::test]
async fn test_card_errors_are_classified() {
    let server = MockServer::start().await;

    Mock::given(method("DELETE"))
        .and(path("/subscriptions/sub_declined"))
        .respond_with(ResponseTemplate::new(402).set_body_json(json!({
            "error": { "message": "Your card was declined.", "type": "card_error" }
        })))
        .mount(&server)
        .await;
    Mock::given(method("DELETE"))
        .and(path("/subscriptions/sub_busy"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;

    let adapter = card_adapter(&server);
    match adapter.cancel("sub_declined", true).await {
        Err(BillingError::Validation(msg)) => assert_eq!(msg, "Your card was declined."),
        other => panic!("Expected Validation, got: {:?}", other),
    }
    assert!(matches!(
        adapter.cancel("sub_busy", true).await,
        Err(BillingError::PlatformUnavailable(_))
    ));
}

#[tokio::test]
async fn test_unconfigured_card_adapter_is_disabled() {
    let adapter = CardAdapter::new(None, TIMEOUT).unwrap();
    assert!(!adapter.is_enabled());
    assert!(matches!(
        adapter.cancel("sub_1", true).await,
        Err(BillingError::PlatformDisabled(_))
    ));
}

// ============================================================================
// App Store
// ============================================================================

#[tokio::test]
async fn test_sandbox_receipt_is_retried_against_sandbox() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/verifyReceipt"))
        .and(body_string_contains("\"password\":\"shared-secret\""))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "status": 21007 })))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/sandbox/verifyReceipt"))
        .respond_with(ResponseTemplate::new(200).set_body_json(apple_receipt(
            "com.cadence.pro.monthly",
            chrono::Duration::days(30),
        )))
        .expect(1)
        .mount(&server)
        .await;

    let adapter = AppStoreAdapter::new(Some(app_store_config(&server)), TIMEOUT).unwrap();
    let verified = adapter
        .verify_receipt(&apple_request("MIIT", "com.cadence.pro.monthly"))
        .await
        .unwrap();

    assert_eq!(verified.platform_subscription_id, "1000000001");
    assert!(verified.expires_at.is_some_and(|at| at > Utc::now()));
}

#[tokio::test]
async fn test_app_store_failure_statuses() {
    let cases = [
        (21003, "invalid"),
        (21005, "unavailable"),
        (21006, "failed"),
    ];

    for (status, expected) in cases {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/verifyReceipt"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "status": status })))
            .mount(&server)
            .await;

        let adapter = AppStoreAdapter::new(Some(app_store_config(&server)), TIMEOUT).unwrap();
        let result = adapter
            .verify_receipt(&apple_request("MIIT", "com.cadence.pro.monthly"))
            .await;

        match (expected, result) {
            ("invalid", Err(BillingError::InvalidReceipt(_)))
            | ("unavailable", Err(BillingError::PlatformUnavailable(_)))
            | ("failed", Err(BillingError::VerificationFailed(_))) => {}
            (_, other) => panic!("status {status}: unexpected {:?}", other),
        }
    }
}

#[tokio::test]
async fn test_receipt_without_product_fails_verification() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/verifyReceipt"))
        .respond_with(ResponseTemplate::new(200).set_body_json(apple_receipt(
            "com.cadence.basic.monthly",
            chrono::Duration::days(30),
        )))
        .mount(&server)
        .await;

    let adapter = AppStoreAdapter::new(Some(app_store_config(&server)), TIMEOUT).unwrap();
    let result = adapter
        .verify_receipt(&apple_request("MIIT", "com.cadence.pro.monthly"))
        .await;
    assert!(matches!(result, Err(BillingError::VerificationFailed(_))));
}

#[tokio::test]
async fn test_yearly_apple_subscription_end_to_end() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/verifyReceipt"))
        .respond_with(ResponseTemplate::new(200).set_body_json(apple_receipt(
            "com.cadence.pro.yearly",
            chrono::Duration::days(365),
        )))
        .mount(&server)
        .await;

    let config = BillingConfig::new().with_app_store(app_store_config(&server));
    let billing = BillingService::new(Stores::in_memory(), config).unwrap();
    let plan = billing
        .create_plan(NewPlan {
            name: "Pro".to_string(),
            description: None,
            features: vec![],
            monthly_price: rust_decimal::Decimal::new(999, 2),
            yearly_price: rust_decimal::Decimal::new(9999, 2),
            products: PlatformProducts {
                apple_yearly: Some("com.cadence.pro.yearly".to_string()),
                ..Default::default()
            },
            limits: EntitlementLimits {
                max_analyses_per_month: Some(10),
                ..Default::default()
            },
            sort_order: 0,
        })
        .await
        .unwrap();

    let before = Utc::now();
    let user = UserId::new();
    let sub = billing
        .verify_apple_receipt(
            user,
            AppleReceiptVerification {
                plan_id: plan.id,
                billing_cycle: BillingCycle::Yearly,
                receipt_data: "MIIT".to_string(),
                product_id: Some("com.cadence.pro.yearly".to_string()),
                transaction_id: Some("2000000002".to_string()),
            },
        )
        .await
        .unwrap();

    assert_eq!(sub.status, SubscriptionStatus::Active);
    let expected_end = before + chrono::Duration::days(365);
    assert!((sub.current_period_end - expected_end).num_seconds().abs() < 60);
    assert!(billing.active_subscription(user).await.unwrap().is_some());

    // Card and Play are not configured
    assert!(!billing.platform_enabled(cadence_types::Platform::Card));
    assert!(!billing.platform_enabled(cadence_types::Platform::Google));
}

// ============================================================================
// Play Store
// ============================================================================

#[tokio::test]
async fn test_play_purchase_verification() {
    let server = MockServer::start().await;
    let expiry = Utc::now() + chrono::Duration::days(30);

    Mock::given(method("GET"))
        .and(path(play_token_path("token-1")))
        .and(header("Authorization", "Bearer ya29.token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "subscriptionState": "SUBSCRIPTION_STATE_ACTIVE",
            "latestOrderId": "GPA.1111",
            "lineItems": [{ "productId": "pro_monthly", "expiryTime": expiry.to_rfc3339() }]
        })))
        .expect(1)
        .mount(&server)
        .await;

    let verified = play_adapter(&server)
        .verify_receipt(&VerifyReceiptRequest {
            receipt: Receipt::PlayStore {
                purchase_token: "token-1".to_string(),
            },
            product_id: "pro_monthly".to_string(),
        })
        .await
        .unwrap();

    assert_eq!(verified.platform_subscription_id, "token-1");
    assert_eq!(verified.product_id, "pro_monthly");
    assert!(verified.expires_at.is_some());
}

#[tokio::test]
async fn test_play_unknown_token_is_invalid() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(play_token_path("token-unknown")))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let result = play_adapter(&server)
        .verify_receipt(&VerifyReceiptRequest {
            receipt: Receipt::PlayStore {
                purchase_token: "token-unknown".to_string(),
            },
            product_id: "pro_monthly".to_string(),
        })
        .await;
    assert!(matches!(result, Err(BillingError::InvalidReceipt(_))));
}

#[tokio::test]
async fn test_play_expired_purchase_fails_verification() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(play_token_path("token-expired")))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "subscriptionState": "SUBSCRIPTION_STATE_EXPIRED",
            "lineItems": [{ "productId": "pro_monthly" }]
        })))
        .mount(&server)
        .await;

    let result = play_adapter(&server)
        .verify_receipt(&VerifyReceiptRequest {
            receipt: Receipt::PlayStore {
                purchase_token: "token-expired".to_string(),
            },
            product_id: "pro_monthly".to_string(),
        })
        .await;
    assert!(matches!(result, Err(BillingError::VerificationFailed(_))));
}

#[tokio::test]
async fn test_play_cancel_calls_cancel_endpoint() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(format!("{}:cancel", play_token_path("token-1"))))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
        .expect(1)
        .mount(&server)
        .await;

    play_adapter(&server).cancel("token-1", false).await.unwrap();
}
