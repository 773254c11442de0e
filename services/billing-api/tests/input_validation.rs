//! Input validation tests
//!
//! Request boundary checks in billing-api: caller identity, path and query
//! parsing, body bounds, and the error envelope returned for each category.

mod common;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use serde_json::json;

use common::{create_pro_plan, get_request, json_request, send, test_app};

const USER: &str = "7d9f3a52-3c1e-4b6a-9f0e-2a4b6c8d0e1f";
const UNKNOWN_ID: &str = "00000000-0000-4000-8000-000000000001";

// ============================================================================
// Caller identity
// ============================================================================

#[tokio::test]
async fn test_missing_user_header_is_unauthenticated() {
    let app = test_app();
    let (status, body) = send(&app, get_request("/api/v1/subscriptions/my", None)).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"]["code"], "UNAUTHENTICATED");
}

#[tokio::test]
async fn test_malformed_user_header_is_unauthenticated() {
    let app = test_app();
    let request = get_request("/api/v1/subscriptions/active", Some("user-42"));
    let (status, _) = send(&app, request).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

// ============================================================================
// Path and query parsing
// ============================================================================

#[tokio::test]
async fn test_invalid_subscription_id_is_bad_request() {
    let app = test_app();
    let request = get_request("/api/v1/subscriptions/not-a-uuid/payments", Some(USER));
    let (status, body) = send(&app, request).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["code"], "BAD_REQUEST");
}

#[tokio::test]
async fn test_unknown_subscription_is_not_found() {
    let app = test_app();
    let uri = format!("/api/v1/subscriptions/{UNKNOWN_ID}");
    let (status, body) = send(&app, get_request(&uri, Some(USER))).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"]["code"], "SUBSCRIPTION_NOT_FOUND");
}

#[tokio::test]
async fn test_cancel_unknown_subscription_is_not_found() {
    let app = test_app();
    let uri = format!("/api/v1/subscriptions/{UNKNOWN_ID}/cancel");
    let request = json_request("PUT", &uri, Some(USER), json!({ "immediately": true }));
    let (status, _) = send(&app, request).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_unknown_plan_is_not_found() {
    let app = test_app();
    let uri = format!("/api/v1/subscriptions/plans/{UNKNOWN_ID}");
    let (status, body) = send(&app, get_request(&uri, None)).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"]["code"], "PLAN_NOT_FOUND");
}

#[tokio::test]
async fn test_unknown_feature_is_bad_request() {
    let app = test_app();
    let request = get_request("/api/v1/subscriptions/check-limits/teleport", Some(USER));
    let (status, _) = send(&app, request).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_subscription_filters_are_validated() {
    let app = test_app();

    let request = get_request("/api/v1/subscriptions/my?status=LAPSED", Some(USER));
    let (status, _) = send(&app, request).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let request = get_request("/api/v1/subscriptions/my?limit=0", Some(USER));
    let (status, body) = send(&app, request).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["code"], "VALIDATION_ERROR");

    let request = get_request("/api/v1/subscriptions/my?status=active&page=1", Some(USER));
    let (status, body) = send(&app, request).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["items"], json!([]));
    assert_eq!(body["pagination"]["total"], 0);
}

// ============================================================================
// Request bodies
// ============================================================================

#[tokio::test]
async fn test_empty_usage_increment_is_rejected() {
    let app = test_app();
    let request = json_request("PUT", "/api/v1/subscriptions/usage", Some(USER), json!({}));
    let (status, _) = send(&app, request).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_negative_usage_increment_is_rejected() {
    let app = test_app();
    let request = json_request(
        "PUT",
        "/api/v1/subscriptions/usage",
        Some(USER),
        json!({ "analyses_used": -3 }),
    );
    let (status, body) = send(&app, request).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["code"], "VALIDATION_ERROR");
}

#[tokio::test]
async fn test_usage_increment_is_reflected_in_report() {
    let app = test_app();
    let request = json_request(
        "PUT",
        "/api/v1/subscriptions/usage",
        Some(USER),
        json!({ "analyses_used": 2, "chat_messages_used": 5 }),
    );
    let (status, body) = send(&app, request).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["analyses_used"], 2);

    let request = get_request("/api/v1/subscriptions/usage", Some(USER));
    let (status, body) = send(&app, request).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["usage"]["analyses_used"], 2);
    assert_eq!(body["usage"]["chat_messages_used"], 5);
}

#[tokio::test]
async fn test_empty_receipt_is_rejected() {
    let app = test_app();
    let request = json_request(
        "POST",
        "/api/v1/subscriptions/apple/verify",
        Some(USER),
        json!({
            "plan_id": UNKNOWN_ID,
            "billing_cycle": "MONTHLY",
            "receipt_data": "   "
        }),
    );
    let (status, body) = send(&app, request).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["message"], "Bad request: receipt_data is required");
}

#[tokio::test]
async fn test_oversized_purchase_token_is_rejected() {
    let app = test_app();
    let request = json_request(
        "POST",
        "/api/v1/subscriptions/google/verify",
        Some(USER),
        json!({
            "plan_id": UNKNOWN_ID,
            "billing_cycle": "YEARLY",
            "purchase_token": "t".repeat(70 * 1024)
        }),
    );
    let (status, _) = send(&app, request).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_unknown_billing_cycle_is_rejected_before_the_engine() {
    let app = test_app();
    let request = json_request(
        "POST",
        "/api/v1/subscriptions/card/create",
        Some(USER),
        json!({ "plan_id": UNKNOWN_ID, "billing_cycle": "WEEKLY" }),
    );
    let (status, _) = send(&app, request).await;
    assert!(status.is_client_error());
}

// ============================================================================
// Plans and platforms
// ============================================================================

#[tokio::test]
async fn test_plan_administration_requires_admin_key() {
    let app = test_app();
    let request = json_request(
        "POST",
        "/api/v1/subscriptions/admin/plans",
        None,
        common::pro_plan_body(),
    );
    let (status, body) = send(&app, request).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["error"]["code"], "FORBIDDEN");
}

#[tokio::test]
async fn test_retired_plan_leaves_the_catalog() {
    let app = test_app();
    let plan_id = create_pro_plan(&app).await;

    let (status, body) = send(&app, get_request("/api/v1/subscriptions/plans", None)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body.as_array().map(Vec::len), Some(1));

    let retire = Request::builder()
        .method("POST")
        .uri(format!("/api/v1/subscriptions/admin/plans/{plan_id}/retire"))
        .header("x-admin-key", common::ADMIN_KEY)
        .body(Body::empty())
        .unwrap();
    let (status, body) = send(&app, retire).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["active"], false);

    let (_, body) = send(&app, get_request("/api/v1/subscriptions/plans", None)).await;
    assert_eq!(body, json!([]));

    // Retired plans stay resolvable by id
    let uri = format!("/api/v1/subscriptions/plans/{plan_id}");
    let (status, _) = send(&app, get_request(&uri, None)).await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn test_card_subscription_without_processor_is_disabled() {
    let app = test_app();
    let plan_id = create_pro_plan(&app).await;

    let request = json_request(
        "POST",
        "/api/v1/subscriptions/card/create",
        Some(USER),
        json!({ "plan_id": plan_id, "billing_cycle": "MONTHLY" }),
    );
    let (status, body) = send(&app, request).await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body["error"]["code"], "PLATFORM_DISABLED");
}

#[tokio::test]
async fn test_user_without_subscription_has_no_entitlement() {
    let app = test_app();
    create_pro_plan(&app).await;

    let request = get_request("/api/v1/subscriptions/active", Some(USER));
    let (status, body) = send(&app, request).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["subscription"], serde_json::Value::Null);

    let request = get_request("/api/v1/subscriptions/check-limits/analyses", Some(USER));
    let (status, body) = send(&app, request).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["allowed"], false);
}

// ============================================================================
// Health
// ============================================================================

#[tokio::test]
async fn test_health_and_readiness() {
    let app = test_app();

    let (status, body) = send(&app, get_request("/health", None)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "healthy");

    let (status, body) = send(&app, get_request("/ready", None)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["database"], "in-memory");
    assert_eq!(body["platforms"]["card"], false);
    assert_eq!(body["platforms"]["apple"], true);
}
