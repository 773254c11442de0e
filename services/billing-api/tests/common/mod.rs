//! Shared helpers for router-level tests

#![allow(dead_code)]

use std::time::Duration;

use axum::body::{to_bytes, Body};
use axum::http::{Request, Response, StatusCode};
use axum::Router;
use chrono::Utc;
use hmac::{Hmac, Mac};
use serde_json::Value;
use sha2::Sha256;
use tower::ServiceExt;

use billing_api::{build_router, AppState, Config};
use cadence_billing_core::{AppStoreConfig, BillingConfig, BillingService};
use cadence_db::Stores;

pub const CARD_WEBHOOK_SECRET: &str = "whsec_api_test";
pub const APPLE_SECRET: &str = "apple-shared-secret";
pub const PLAY_TOKEN: &str = "play-push-token";
pub const ADMIN_KEY: &str = "admin-test-key";

/// Router over in-memory stores with the card processor unconfigured
pub fn test_app() -> Router {
    let billing_config = BillingConfig::new()
        .with_card_webhook_secret(CARD_WEBHOOK_SECRET)
        .with_app_store(AppStoreConfig::new(APPLE_SECRET))
        .with_play_notification_token(PLAY_TOKEN);

    let config = Config {
        http_port: 0,
        database_url: None,
        billing: billing_config.clone(),
        request_timeout: Duration::from_secs(5),
        metrics_enabled: false,
        admin_api_key: Some(ADMIN_KEY.to_string()),
        sweep_interval: Duration::from_secs(60),
        json_logs: false,
    };

    let billing = match BillingService::new(Stores::in_memory(), billing_config) {
        Ok(billing) => billing,
        Err(e) => panic!("failed to build billing service: {e}"),
    };
    build_router(AppState::new(billing, None, config), None)
}

/// Sign a card payload the way the processor does, timestamped now
pub fn sign_card_payload(payload: &str) -> String {
    sign_card_payload_at(payload, Utc::now().timestamp(), CARD_WEBHOOK_SECRET)
}

pub fn sign_card_payload_at(payload: &str, timestamp: i64, secret: &str) -> String {
    let mut mac = Hmac::<Sha256>::new_from_slice(secret.as_bytes()).unwrap();
    mac.update(format!("{timestamp}.{payload}").as_bytes());
    format!("t={timestamp},v1={}", hex::encode(mac.finalize().into_bytes()))
}

/// Send a request and decode the JSON response body
pub async fn send(app: &Router, request: Request<Body>) -> (StatusCode, Value) {
    let response: Response<Body> = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let body = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap_or(Value::Null)
    };
    (status, body)
}

pub fn json_request(method: &str, uri: &str, user: Option<&str>, body: Value) -> Request<Body> {
    let mut builder = Request::builder()
        .method(method)
        .uri(uri)
        .header("content-type", "application/json");
    if let Some(user) = user {
        builder = builder.header("x-user-id", user);
    }
    builder.body(Body::from(body.to_string())).unwrap()
}

pub fn get_request(uri: &str, user: Option<&str>) -> Request<Body> {
    let mut builder = Request::builder().method("GET").uri(uri);
    if let Some(user) = user {
        builder = builder.header("x-user-id", user);
    }
    builder.body(Body::empty()).unwrap()
}

/// Pro plan body for the admin route
pub fn pro_plan_body() -> Value {
    serde_json::json!({
        "name": "Pro",
        "description": "For regular use",
        "features": ["10 analyses per month"],
        "monthly_price": "9.99",
        "yearly_price": "99.99",
        "products": {
            "card_monthly": "price_pro_monthly",
            "card_yearly": "price_pro_yearly"
        },
        "limits": {
            "max_analyses_per_month": 10,
            "max_storage_gb": 5,
            "chat_enabled": true
        }
    })
}

/// Create the Pro plan through the admin route and return its id
pub async fn create_pro_plan(app: &Router) -> String {
    let request = Request::builder()
        .method("POST")
        .uri("/api/v1/subscriptions/admin/plans")
        .header("content-type", "application/json")
        .header("x-admin-key", ADMIN_KEY)
        .body(Body::from(pro_plan_body().to_string()))
        .unwrap();
    let (status, body) = send(app, request).await;
    assert_eq!(status, StatusCode::CREATED, "plan creation failed: {body}");
    body["id"].as_str().unwrap().to_string()
}
