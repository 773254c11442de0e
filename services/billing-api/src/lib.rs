//! Cadence Billing API
//!
//! HTTP boundary of the subscription billing engine.
//!
//! ## Subscription Endpoints (`/api/v1/subscriptions`)
//!
//! - `GET /plans`, `GET /plans/{id}` - Plan catalog
//! - `POST /admin/plans`, `POST /admin/plans/{id}/retire` - Plan administration
//! - `POST /card/create` - Open a card subscription
//! - `POST /apple/verify`, `POST /google/verify` - Verify a store purchase
//! - `GET /my`, `GET /active`, `GET /{id}`, `GET /{id}/payments` - Subscription queries
//! - `PUT /{id}/cancel` - Cancel a subscription
//! - `GET /usage`, `PUT /usage` - Usage report and increments
//! - `GET /check-limits/{feature}` - Entitlement check
//! - `POST /webhooks/{card,apple,google}` - Platform notifications
//!
//! ## Health Endpoints
//!
//! - `GET /health` - Liveness check
//! - `GET /ready` - Readiness check
//! - `GET /metrics` - Prometheus metrics

pub mod config;
pub mod error;
pub mod handlers;
pub mod state;

use axum::routing::{get, post, put};
use axum::Router;
use metrics_exporter_prometheus::PrometheusHandle;
use tower::ServiceBuilder;
use tower_http::cors::{Any, CorsLayer};
use tower_http::request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer};
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::{DefaultMakeSpan, DefaultOnResponse, TraceLayer};
use tracing::Level;

pub use crate::config::Config;
pub use crate::state::AppState;

/// Build the HTTP router with its middleware stack
pub fn build_router(state: AppState, metrics_handle: Option<PrometheusHandle>) -> Router {
    let request_timeout = state.request_timeout();

    let subscriptions = Router::new()
        // Plan catalog
        .route("/plans", get(handlers::list_plans))
        .route("/plans/{id}", get(handlers::get_plan))
        .route("/admin/plans", post(handlers::create_plan))
        .route("/admin/plans/{id}/retire", post(handlers::retire_plan))
        // Subscription creation
        .route("/card/create", post(handlers::create_card_subscription))
        .route("/apple/verify", post(handlers::verify_apple_receipt))
        .route("/google/verify", post(handlers::verify_google_purchase))
        // Usage and entitlements
        .route(
            "/usage",
            get(handlers::get_usage).put(handlers::increment_usage),
        )
        .route("/check-limits/{feature}", get(handlers::check_limits))
        // Subscription queries
        .route("/my", get(handlers::list_my_subscriptions))
        .route("/active", get(handlers::get_active_subscription))
        .route("/{id}", get(handlers::get_subscription))
        .route("/{id}/payments", get(handlers::list_subscription_payments))
        .route("/{id}/cancel", put(handlers::cancel_subscription));

    // Webhook routes (raw body, authenticated per platform)
    let webhook_routes = Router::new()
        .route("/webhooks/card", post(handlers::card_webhook))
        .route("/webhooks/apple", post(handlers::apple_webhook))
        .route("/webhooks/google", post(handlers::google_webhook));

    // Health routes (no timeout - must always respond quickly)
    let health_routes = Router::new()
        .route("/health", get(handlers::health))
        .route("/ready", get(handlers::ready));

    // Metrics route (no timeout)
    let metrics_route = if let Some(handle) = metrics_handle {
        Router::new().route("/metrics", get(move || async move { handle.render() }))
    } else {
        Router::new()
    };

    // Build middleware stack (order matters - outermost first)
    let middleware = ServiceBuilder::new()
        .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid))
        .layer(PropagateRequestIdLayer::x_request_id())
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
                .on_response(DefaultOnResponse::new().level(Level::INFO)),
        )
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        // Innermost - closest to handler
        .layer(TimeoutLayer::new(request_timeout));

    Router::new()
        .nest("/api/v1/subscriptions", subscriptions.merge(webhook_routes))
        .layer(middleware)
        .merge(health_routes)
        .merge(metrics_route)
        .with_state(state)
}
